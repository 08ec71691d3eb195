//! Error types for workload execution.

use thiserror::Error;

use crate::client::ClientError;
use crate::config::ConfigError;
use crate::record_store::RecordStoreError;

/// The result type for workload operations.
pub type Result<T> = std::result::Result<T, WorkloadError>;

/// Errors surfaced by a single engine operation or by engine setup.
#[derive(Debug, Error)]
pub enum WorkloadError {
    /// No usable key was available in the record store.
    #[error(transparent)]
    Store(#[from] RecordStoreError),

    /// The store client reported a failure.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Invalid run configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The sequence would never issue a request in this store mode.
    #[error("sequence '{sequence}' has no runnable operations")]
    EmptySequence {
        /// Textual form of the rejected sequence.
        sequence: String,
    },
}
