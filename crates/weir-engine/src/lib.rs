//! # Weir Engine
//!
//! The update protocol engine for weir payment channels.
//!
//! ## Overview
//!
//! Two replicas advance a shared channel through signed, numbered updates.
//! The initiator runs [`outbound`]; the responder runs [`inbound`]. The
//! protocol is strictly lock-step: an initiator does not propose update
//! N+1 until N is double-signed, so healthy replicas disagree by at most
//! one committed update and a single-step sync recovers every benign race.
//!
//! ## Key Properties
//!
//! - **Errors are values**: both procedures return results; stored state
//!   is mutated only by the caller, only on success.
//! - **Idempotent**: re-delivery of a committed update is answered with
//!   the committed double-signed update, never re-executed.
//! - **One-shot sync**: `outbound` catches up at most one nonce and never
//!   retransmits its proposal.
//!
//! ## Message Flow
//!
//! ```text
//! Initiator                             Responder
//!   |------ (update N+1, prev N) -------->|
//!   |<----- countersigned update N+1 -----|        happy path
//!   |
//!   |------ (update N+1, prev N) -------->|
//!   |<----- StaleUpdate + their N+1 ------|        they were ahead
//!   |  apply their N+1 locally, no retransmit
//! ```

pub mod chain;
pub mod config;
pub mod error;
pub mod external;
pub mod messaging;
pub mod sync;
pub mod validate;

pub use chain::{ChainError, ChainReader, LatestDeposit};
pub use config::EngineConfig;
pub use error::{ProtocolError, ProtocolErrorKind};
pub use external::{ExternalValidation, NoopValidation};
pub use messaging::{MessageBus, MessagingError, ProtocolReply};
pub use sync::{inbound, outbound, InboundOutcome, InboundStep, OutboundResult, UpdateOutcome};
pub use validate::{generate_outbound_update, validate_and_apply_inbound, UpdateParams};
