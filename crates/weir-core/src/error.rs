//! Error types for the weir core.

use thiserror::Error;

use crate::types::{Address, AssetId, TransferId};

/// Errors from the pure primitives: crypto, encoding, the transfer set.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid secret key")]
    InvalidSecretKey,

    #[error("signer mismatch: expected {expected}, recovered {recovered}")]
    SignerMismatch {
        expected: Address,
        recovered: Address,
    },

    #[error("duplicate transfer {0}")]
    DuplicateTransfer(TransferId),

    #[error("transfer {0} not found")]
    TransferNotFound(TransferId),

    #[error("malformed encoding: {0}")]
    MalformedEncoding(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Validation errors raised while checking or applying a channel update.
///
/// Every variant is fatal for the update being processed; none of them may
/// leave a replica partially mutated.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("channel already exists at {0}")]
    ChannelAlreadyExists(Address),

    #[error("no channel at {0}")]
    ChannelNotFound(Address),

    #[error("update is for channel {got}, replica is {expected}")]
    ChannelAddressMismatch { expected: Address, got: Address },

    #[error("invalid nonce: expected {expected}, got {got}")]
    InvalidNonce { expected: u64, got: u64 },

    #[error("{0} is not a participant of this channel")]
    NotAParticipant(Address),

    #[error("initiator and counterparty are the same address")]
    IdenticalParticipants,

    #[error("asset {0} not tracked by this channel")]
    UnknownAsset(AssetId),

    #[error("insufficient balance for participant {participant} of asset {asset}")]
    InsufficientBalance { participant: usize, asset: AssetId },

    #[error("onchain deposit total regressed for asset {0}")]
    DepositTotalRegressed(AssetId),

    #[error("declared deposit total for asset {0} exceeds the onchain total")]
    DepositNotOnchain(AssetId),

    #[error("value conservation violated for asset {0}")]
    ConservationViolated(AssetId),

    #[error("update balance does not match applied result")]
    BalanceMismatch,

    #[error("transfer id mismatch: expected {expected}, got {got}")]
    TransferIdMismatch {
        expected: TransferId,
        got: TransferId,
    },

    #[error("duplicate transfer {0}")]
    DuplicateTransfer(TransferId),

    #[error("transfer {0} not found")]
    TransferNotFound(TransferId),

    #[error("resolved balance does not conserve locked value for transfer {0}")]
    ResolutionNotConserving(TransferId),

    #[error("resolve application requires a resolved balance")]
    MissingResolvedBalance,

    #[error("invalid resolver: {0}")]
    InvalidResolver(String),

    #[error("update is one nonce ahead but no previous update was supplied")]
    MissingPreviousUpdate,

    #[error("timeout {got} outside policy bounds [{min}, {max}]")]
    TimeoutOutOfBounds { got: u64, min: u64, max: u64 },

    #[error("transfer definition {0} is not registered")]
    UnknownTransferDefinition(Address),

    #[error("balance recipients are not channel participants")]
    InvalidBalanceRecipients,

    #[error("bad signature: {0}")]
    BadSignature(#[from] CoreError),

    #[error("arithmetic overflow while applying update")]
    AmountOverflow,
}
