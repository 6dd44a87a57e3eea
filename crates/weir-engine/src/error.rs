//! Error types for the protocol engine.
//!
//! `ProtocolError` is the full error value used inside a replica;
//! `ProtocolErrorKind` is the wire-safe discriminant carried in rejection
//! replies so the counterparty can dispatch without parsing messages.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use weir_core::{ChannelUpdate, ValidationError};
use weir_store::StoreError;

use crate::chain::ChainError;

/// Errors from the outbound and inbound procedures.
///
/// Every variant except `StaleUpdate` and `CounterpartyFailure` is fatal
/// for the update being processed; none of them leave the replica mutated.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The inbound update's nonce is in the past. Carries our latest
    /// committed update so the counterparty can run its one-step sync.
    #[error("stale update: replica is ahead")]
    StaleUpdate {
        latest_update: Option<Box<ChannelUpdate>>,
    },

    /// The counterparty offered a sync target that is not double-signed.
    #[error("sync target is not double-signed")]
    SyncSingleSigned,

    /// Syncing would require replaying a setup update.
    #[error("cannot sync a setup update")]
    CannotSyncSetup,

    /// The nonce gap is wider than one; only an external restore can
    /// recover this replica.
    #[error("nonce gap too wide: expected {expected}, got {got}")]
    RestoreNeeded { expected: u64, got: u64 },

    #[error("invalid params: {0}")]
    InvalidParams(ValidationError),

    #[error("invalid update: {0}")]
    InvalidUpdate(ValidationError),

    #[error("external validation failed: {0}")]
    ExternalValidationFailed(String),

    #[error("bad signatures: {0}")]
    BadSignatures(String),

    /// Opaque transport or remote error; the caller may retry.
    #[error("counterparty failure: {0}")]
    CounterpartyFailure(String),

    #[error("store failure: {0}")]
    StoreFailure(#[from] StoreError),

    #[error("chain error: {0}")]
    ChainError(#[from] ChainError),
}

impl ProtocolError {
    /// The wire-safe discriminant of this error.
    pub fn kind(&self) -> ProtocolErrorKind {
        match self {
            ProtocolError::StaleUpdate { .. } => ProtocolErrorKind::StaleUpdate,
            ProtocolError::SyncSingleSigned => ProtocolErrorKind::SyncSingleSigned,
            ProtocolError::CannotSyncSetup => ProtocolErrorKind::CannotSyncSetup,
            ProtocolError::RestoreNeeded { .. } => ProtocolErrorKind::RestoreNeeded,
            ProtocolError::InvalidParams(_) => ProtocolErrorKind::InvalidParams,
            ProtocolError::InvalidUpdate(_) => ProtocolErrorKind::InvalidUpdate,
            ProtocolError::ExternalValidationFailed(_) => {
                ProtocolErrorKind::ExternalValidationFailed
            }
            ProtocolError::BadSignatures(_) => ProtocolErrorKind::BadSignatures,
            ProtocolError::CounterpartyFailure(_) => ProtocolErrorKind::CounterpartyFailure,
            ProtocolError::StoreFailure(_) => ProtocolErrorKind::StoreFailure,
            ProtocolError::ChainError(_) => ProtocolErrorKind::ChainError,
        }
    }

    /// Whether the caller may simply retry the operation.
    pub fn is_retriable(&self) -> bool {
        matches!(self.kind(), ProtocolErrorKind::CounterpartyFailure)
    }
}

/// Wire-safe error discriminant for rejection replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolErrorKind {
    StaleUpdate,
    SyncSingleSigned,
    CannotSyncSetup,
    RestoreNeeded,
    InvalidParams,
    InvalidUpdate,
    ExternalValidationFailed,
    BadSignatures,
    CounterpartyFailure,
    StoreFailure,
    ChainError,
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_counterparty_failure_is_retriable() {
        assert!(ProtocolError::CounterpartyFailure("timeout".into()).is_retriable());
        assert!(!ProtocolError::SyncSingleSigned.is_retriable());
        assert!(!ProtocolError::RestoreNeeded {
            expected: 3,
            got: 5
        }
        .is_retriable());
    }

    #[test]
    fn test_kind_mapping() {
        let err = ProtocolError::StaleUpdate {
            latest_update: None,
        };
        assert_eq!(err.kind(), ProtocolErrorKind::StaleUpdate);
    }
}
