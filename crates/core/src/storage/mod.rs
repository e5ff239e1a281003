//! Blob storage gateway.
//!
//! Job assets, status snapshots and result artifacts are moved through a
//! [`StorageGateway`]. Every operation is authorized with the job's own
//! [`IdToken`](crate::job::IdToken).

mod config;
mod error;
mod sas;
mod traits;

pub use config::StorageConfig;
pub use error::StorageError;
pub use sas::SasStorageGateway;
pub use traits::StorageGateway;
