//! External validation hook.
//!
//! Deployments can veto updates beyond the protocol rules (rate limits,
//! allow-lists, screening). A rejection is fatal for the current update but
//! never corrupts stored state, because the engine consults the hook before
//! applying anything.

use async_trait::async_trait;

use weir_core::{ChannelUpdate, FullChannelState, TransferSet};

use crate::validate::UpdateParams;

/// Result type for external validation.
pub type Result<T> = std::result::Result<T, String>;

/// Optional veto over outbound params and inbound updates.
#[async_trait]
pub trait ExternalValidation: Send + Sync {
    /// Called before an outbound update is generated.
    async fn validate_outbound(
        &self,
        params: &UpdateParams,
        state: Option<&FullChannelState>,
        active: &TransferSet,
    ) -> Result<()>;

    /// Called before an inbound update is applied.
    async fn validate_inbound(
        &self,
        update: &ChannelUpdate,
        state: Option<&FullChannelState>,
        active: &TransferSet,
    ) -> Result<()>;
}

/// The default hook: accepts everything.
pub struct NoopValidation;

#[async_trait]
impl ExternalValidation for NoopValidation {
    async fn validate_outbound(
        &self,
        _params: &UpdateParams,
        _state: Option<&FullChannelState>,
        _active: &TransferSet,
    ) -> Result<()> {
        Ok(())
    }

    async fn validate_inbound(
        &self,
        _update: &ChannelUpdate,
        _state: Option<&FullChannelState>,
        _active: &TransferSet,
    ) -> Result<()> {
        Ok(())
    }
}
