//! Error types for the store.

use thiserror::Error;

use weir_core::{Address, TransferId};

/// Errors from channel persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no channel at {0}")]
    ChannelNotFound(Address),

    #[error("transfer {0} already active")]
    TransferAlreadyActive(TransferId),

    #[error("transfer {0} not active")]
    TransferNotActive(TransferId),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
