//! # Weir Core
//!
//! Pure primitives for the weir payment-channel protocol: channel and
//! transfer state, signed updates, canonical encoding, and the Merkle set
//! of active transfers.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation over cryptographic data structures.
//!
//! ## Key Types
//!
//! - [`CoreChannelState`] - The onchain-relevant channel commitment
//! - [`ChannelUpdate`] - A numbered, signed state transition
//! - [`TransferSet`] - The Merkle-committed set of active transfers
//! - [`ChannelSigner`] - A participant's signing capability
//!
//! ## Canonicalization
//!
//! All commitments are keccak256 digests over deterministic CBOR. See
//! [`canonical`].

pub mod apply;
pub mod canonical;
pub mod crypto;
pub mod error;
pub mod merkle;
pub mod state;
pub mod types;
pub mod update;
pub mod validation;

pub use apply::{apply_update, AppliedUpdate};
pub use canonical::{
    canonical_channel_state_bytes, canonical_transfer_state_bytes, canonical_update_bytes,
    decode_channel_state, decode_transfer_state, decode_update, hash_channel_commitment,
    hash_transfer_state, hash_update,
};
pub use crypto::{keccak256, recover_signer, verify_signature, ChannelSigner, Signature};
pub use error::{CoreError, ValidationError};
pub use merkle::{MerkleProof, TransferSet};
pub use state::{
    derive_channel_address, derive_transfer_id, Balance, CoreChannelState, CoreTransferState,
    FullChannelState, FullTransferState, NetworkContext, RESOLVER_ENCODING, STATE_ENCODING,
};
pub use types::{Address, AssetId, Bytes32, Participant, TransferId};
pub use update::{
    next_nonce, ChannelUpdate, UpdateDetails, UpdateId, UpdateType, SETUP_NONCE,
};
pub use validation::{
    check_conservation, validate_applied_balance, validate_update_membership,
    validate_update_structure,
};
