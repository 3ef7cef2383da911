//! kf-cli: Command-line interface for kForge
//!
//! Provides the `kforge` CLI for installing, scaling and tearing down
//! clusters described by a Clusterfile.

pub mod commands;
pub mod context;
pub mod output;
