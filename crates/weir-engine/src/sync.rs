//! The sync engine: `outbound` and `inbound` procedures.
//!
//! The protocol is strictly lock-step, so two healthy replicas disagree by
//! at most one committed update. `inbound` arbitrates on the incoming
//! nonce; `outbound` performs at most one catch-up (without retransmitting
//! its proposal) when the counterparty reports a stale update.

use weir_core::{
    next_nonce, AppliedUpdate, ChannelSigner, ChannelUpdate, FullChannelState, TransferSet,
    UpdateType, ValidationError, SETUP_NONCE,
};

use crate::chain::ChainReader;
use crate::config::EngineConfig;
use crate::error::{ProtocolError, ProtocolErrorKind, Result};
use crate::external::ExternalValidation;
use crate::messaging::{MessageBus, ProtocolReply};
use crate::validate::{generate_outbound_update, validate_and_apply_inbound, UpdateParams};

/// How an outbound call advanced the replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Our proposal was countersigned and committed.
    Applied,
    /// The counterparty was one nonce ahead; we applied its update instead
    /// and did not retransmit. The caller may re-propose against the new
    /// state.
    Synced,
}

/// Result of a successful outbound call.
#[derive(Debug)]
pub struct OutboundResult {
    pub outcome: UpdateOutcome,
    /// The double-signed update now committed (ours when `Applied`, the
    /// counterparty's when `Synced`).
    pub update: ChannelUpdate,
    /// The replica state to persist.
    pub applied: AppliedUpdate,
}

/// One committed step produced by an inbound call.
#[derive(Debug)]
pub struct InboundStep {
    /// The double-signed update committed by this step.
    pub update: ChannelUpdate,
    pub applied: AppliedUpdate,
}

/// Result of a successful inbound call.
#[derive(Debug)]
pub enum InboundOutcome {
    /// One or two steps were applied (two when the sender was a nonce
    /// ahead and supplied its previous update). Persist them in order.
    Applied { steps: Vec<InboundStep> },
    /// The update was already committed at its nonce; nothing to persist.
    AlreadyApplied { update: ChannelUpdate },
}

impl InboundOutcome {
    /// The double-signed update to reply with.
    pub fn reply(&self) -> &ChannelUpdate {
        match self {
            InboundOutcome::Applied { steps } => {
                &steps.last().expect("applied outcome has a step").update
            }
            InboundOutcome::AlreadyApplied { update } => update,
        }
    }
}

/// Propose an update to the counterparty and drive it to commitment.
pub async fn outbound<M, C, V>(
    signer: &ChannelSigner,
    params: &UpdateParams,
    channel: Option<&FullChannelState>,
    active: &TransferSet,
    bus: &M,
    chain: &C,
    external: &V,
    config: &EngineConfig,
) -> Result<OutboundResult>
where
    M: MessageBus + ?Sized,
    C: ChainReader + ?Sized,
    V: ExternalValidation + ?Sized,
{
    let (update, mut applied) =
        generate_outbound_update(signer, params, channel, active, chain, external, config)
            .await?;

    let previous_update = channel.and_then(|c| c.latest_update.clone());
    let reply = bus
        .send_protocol_message(update.to_identifier, update.clone(), previous_update)
        .await
        .map_err(|e| ProtocolError::CounterpartyFailure(e.to_string()))?;

    match reply {
        ProtocolReply::Accepted {
            update: countersigned,
        } => {
            if countersigned.id.id != update.id.id || countersigned.nonce != update.nonce {
                return Err(ProtocolError::CounterpartyFailure(
                    "reply does not match the proposed update".into(),
                ));
            }
            countersigned
                .verify_both_signatures(&applied.state.core)
                .map_err(|e| ProtocolError::BadSignatures(e.to_string()))?;

            tracing::debug!(
                channel = %update.channel_address,
                nonce = update.nonce,
                update_type = ?update.update_type(),
                "outbound update committed"
            );
            applied.state.latest_update = Some(countersigned.clone());
            Ok(OutboundResult {
                outcome: UpdateOutcome::Applied,
                update: countersigned,
                applied,
            })
        }

        ProtocolReply::Rejected {
            kind: ProtocolErrorKind::StaleUpdate,
            latest_update: Some(to_sync),
            ..
        } => {
            tracing::debug!(
                channel = %update.channel_address,
                ours = update.nonce,
                theirs = to_sync.nonce,
                "counterparty is ahead, entering sync"
            );
            sync_from_counterparty(to_sync, channel, active, chain, external, config).await
        }

        ProtocolReply::Rejected {
            kind: ProtocolErrorKind::StaleUpdate,
            latest_update: None,
            ..
        } => Err(ProtocolError::CounterpartyFailure(
            "stale-update reply carried no update to sync".into(),
        )),

        ProtocolReply::Rejected { kind, message, .. } => Err(ProtocolError::CounterpartyFailure(
            format!("{kind:?}: {message}"),
        )),
    }
}

/// One-step catch-up: validate and apply the counterparty's committed
/// update. Never retransmits the original proposal.
async fn sync_from_counterparty<C, V>(
    to_sync: ChannelUpdate,
    channel: Option<&FullChannelState>,
    active: &TransferSet,
    chain: &C,
    external: &V,
    config: &EngineConfig,
) -> Result<OutboundResult>
where
    C: ChainReader + ?Sized,
    V: ExternalValidation + ?Sized,
{
    if to_sync.update_type() == UpdateType::Setup {
        return Err(ProtocolError::CannotSyncSetup);
    }
    if !to_sync.is_double_signed() {
        return Err(ProtocolError::SyncSingleSigned);
    }
    let expected = channel.map(|c| next_nonce(c.nonce())).unwrap_or(SETUP_NONCE);
    if to_sync.nonce != expected {
        return Err(ProtocolError::RestoreNeeded {
            expected,
            got: to_sync.nonce,
        });
    }

    let mut applied =
        validate_and_apply_inbound(&to_sync, channel, active, chain, external, config).await?;
    to_sync
        .verify_both_signatures(&applied.state.core)
        .map_err(|e| ProtocolError::BadSignatures(e.to_string()))?;
    applied.state.latest_update = Some(to_sync.clone());

    Ok(OutboundResult {
        outcome: UpdateOutcome::Synced,
        update: to_sync,
        applied,
    })
}

/// Handle an update proposed by the counterparty.
pub async fn inbound<C, V>(
    signer: &ChannelSigner,
    update: ChannelUpdate,
    previous_update: Option<ChannelUpdate>,
    channel: Option<&FullChannelState>,
    active: &TransferSet,
    chain: &C,
    external: &V,
    config: &EngineConfig,
) -> Result<InboundOutcome>
where
    C: ChainReader + ?Sized,
    V: ExternalValidation + ?Sized,
{
    if update.to_identifier != signer.address() {
        return Err(ProtocolError::InvalidUpdate(
            ValidationError::NotAParticipant(update.to_identifier),
        ));
    }

    // A fresh replica accepts only setup.
    let Some(ch) = channel else {
        if update.update_type() != UpdateType::Setup {
            return Err(ProtocolError::InvalidUpdate(
                ValidationError::ChannelNotFound(update.channel_address),
            ));
        }
        if update.nonce != SETUP_NONCE {
            return Err(ProtocolError::InvalidUpdate(ValidationError::InvalidNonce {
                expected: SETUP_NONCE,
                got: update.nonce,
            }));
        }
        let step =
            apply_and_countersign(signer, update, None, &TransferSet::new(), chain, external, config)
                .await?;
        return Ok(InboundOutcome::Applied { steps: vec![step] });
    };

    let expected = next_nonce(ch.nonce());

    if update.nonce < expected {
        // Idempotent retry: the same operation is already committed.
        if let Some(latest) = &ch.latest_update {
            if latest.id.id == update.id.id {
                tracing::debug!(
                    channel = %update.channel_address,
                    nonce = update.nonce,
                    "duplicate delivery of a committed update"
                );
                return Ok(InboundOutcome::AlreadyApplied {
                    update: latest.clone(),
                });
            }
        }
        tracing::debug!(
            channel = %update.channel_address,
            got = update.nonce,
            expected,
            "stale inbound update"
        );
        return Err(ProtocolError::StaleUpdate {
            latest_update: ch.latest_update.clone().map(Box::new),
        });
    }

    if update.nonce == expected {
        let step =
            apply_and_countersign(signer, update, Some(ch), active, chain, external, config)
                .await?;
        return Ok(InboundOutcome::Applied { steps: vec![step] });
    }

    if update.nonce == expected + 1 {
        // The counterparty is one committed update ahead; catch up with its
        // previous update first.
        let prev = previous_update.ok_or(ProtocolError::InvalidUpdate(
            ValidationError::MissingPreviousUpdate,
        ))?;
        if !prev.is_double_signed() {
            return Err(ProtocolError::SyncSingleSigned);
        }
        if prev.update_type() == UpdateType::Setup {
            return Err(ProtocolError::CannotSyncSetup);
        }
        if prev.nonce != expected {
            return Err(ProtocolError::RestoreNeeded {
                expected,
                got: prev.nonce,
            });
        }

        let mut prev_applied =
            validate_and_apply_inbound(&prev, Some(ch), active, chain, external, config).await?;
        prev.verify_both_signatures(&prev_applied.state.core)
            .map_err(|e| ProtocolError::BadSignatures(e.to_string()))?;
        prev_applied.state.latest_update = Some(prev.clone());

        let sync_step = InboundStep {
            update: prev,
            applied: prev_applied,
        };
        let step = apply_and_countersign(
            signer,
            update,
            Some(&sync_step.applied.state),
            &sync_step.applied.active,
            chain,
            external,
            config,
        )
        .await?;
        return Ok(InboundOutcome::Applied {
            steps: vec![sync_step, step],
        });
    }

    Err(ProtocolError::RestoreNeeded {
        expected,
        got: update.nonce,
    })
}

/// Validate, apply and countersign a single inbound update.
async fn apply_and_countersign<C, V>(
    signer: &ChannelSigner,
    mut update: ChannelUpdate,
    channel: Option<&FullChannelState>,
    active: &TransferSet,
    chain: &C,
    external: &V,
    config: &EngineConfig,
) -> Result<InboundStep>
where
    C: ChainReader + ?Sized,
    V: ExternalValidation + ?Sized,
{
    let mut applied =
        validate_and_apply_inbound(&update, channel, active, chain, external, config).await?;

    let me = applied
        .state
        .core
        .participant(&signer.address())
        .ok_or(ProtocolError::InvalidUpdate(
            ValidationError::NotAParticipant(signer.address()),
        ))?;
    update.sign_commitment(signer, me, &applied.state.core);
    update
        .verify_both_signatures(&applied.state.core)
        .map_err(|e| ProtocolError::BadSignatures(e.to_string()))?;
    applied.state.latest_update = Some(update.clone());

    tracing::debug!(
        channel = %update.channel_address,
        nonce = update.nonce,
        update_type = ?update.update_type(),
        "inbound update committed"
    );

    Ok(InboundStep { update, applied })
}
