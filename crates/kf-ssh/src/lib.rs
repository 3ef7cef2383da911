//! kf-ssh: SSH transport for kForge
//!
//! Provides [`SshExecutor`], the [`RemoteExecutor`](kf_core::traits::RemoteExecutor)
//! used against real hosts, and the retry schedule used when polling hosts until
//! they accept connections.

pub mod client;
pub mod executor;
pub mod retry;

pub use client::{SshError, SshSession};
pub use executor::SshExecutor;
pub use retry::RetrySchedule;
