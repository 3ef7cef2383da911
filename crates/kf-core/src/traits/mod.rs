//! Core trait definitions

mod collaborators;
mod executor;

pub use collaborators::{CertService, CertificateDescriptor, ClusterMounter, ImageService, Platform};
pub use executor::RemoteExecutor;
