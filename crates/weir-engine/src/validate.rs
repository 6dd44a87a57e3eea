//! Stateful validation of outbound params and inbound updates.
//!
//! Both entry points defer to the pure applier in `weir-core` after their
//! checks pass; nothing here mutates stored state. Chain queries supply the
//! deposit totals and resolve payouts the applier needs.

use weir_core::{
    apply_update, check_conservation, derive_channel_address, derive_transfer_id, keccak256,
    next_nonce, validate_applied_balance, validate_update_membership, validate_update_structure,
    Address, AppliedUpdate, AssetId, Balance, ChannelSigner, ChannelUpdate, FullChannelState,
    NetworkContext, Participant, TransferId, TransferSet, UpdateDetails, UpdateId, UpdateType,
    ValidationError, SETUP_NONCE,
};

use crate::chain::{ChainError, ChainReader};
use crate::config::EngineConfig;
use crate::error::{ProtocolError, Result};
use crate::external::ExternalValidation;

/// Caller-supplied parameters for an outbound update.
#[derive(Debug, Clone)]
pub enum UpdateParams {
    Setup {
        counterparty: Address,
        /// Dispute window in seconds.
        timeout: u64,
        network_context: NetworkContext,
    },
    Deposit {
        channel_address: Address,
        asset_id: AssetId,
    },
    Create {
        channel_address: Address,
        asset_id: AssetId,
        /// Value to lock; index 0 is the initiator side.
        balance: Balance,
        transfer_definition: Address,
        transfer_timeout: u64,
        initial_state: Vec<u8>,
        meta: Option<String>,
    },
    Resolve {
        channel_address: Address,
        transfer_id: TransferId,
        transfer_resolver: Vec<u8>,
    },
}

impl UpdateParams {
    /// The channel these params address. Setup derives it from the
    /// initiator and counterparty.
    pub fn channel_address(&self, initiator: &Address) -> Address {
        match self {
            UpdateParams::Setup {
                counterparty,
                network_context,
                ..
            } => derive_channel_address(initiator, counterparty, network_context),
            UpdateParams::Deposit {
                channel_address, ..
            }
            | UpdateParams::Create {
                channel_address, ..
            }
            | UpdateParams::Resolve {
                channel_address, ..
            } => *channel_address,
        }
    }

    pub fn update_type(&self) -> UpdateType {
        match self {
            UpdateParams::Setup { .. } => UpdateType::Setup,
            UpdateParams::Deposit { .. } => UpdateType::Deposit,
            UpdateParams::Create { .. } => UpdateType::Create,
            UpdateParams::Resolve { .. } => UpdateType::Resolve,
        }
    }
}

/// Validate outbound params and produce the initiator-signed candidate
/// update together with its applied result.
pub async fn generate_outbound_update<C, V>(
    signer: &ChannelSigner,
    params: &UpdateParams,
    channel: Option<&FullChannelState>,
    active: &TransferSet,
    chain: &C,
    external: &V,
    config: &EngineConfig,
) -> Result<(ChannelUpdate, AppliedUpdate)>
where
    C: ChainReader + ?Sized,
    V: ExternalValidation + ?Sized,
{
    external
        .validate_outbound(params, channel, active)
        .await
        .map_err(ProtocolError::ExternalValidationFailed)?;

    let from = signer.address();
    let (to, nonce, asset_id, details, resolved) = match params {
        UpdateParams::Setup {
            counterparty,
            timeout,
            network_context,
        } => {
            if let Some(existing) = channel {
                return Err(ProtocolError::InvalidParams(
                    ValidationError::ChannelAlreadyExists(existing.channel_address()),
                ));
            }
            if *counterparty == from {
                return Err(ProtocolError::InvalidParams(
                    ValidationError::IdenticalParticipants,
                ));
            }
            check_bounds(
                *timeout,
                config.channel_timeout_min,
                config.channel_timeout_max,
            )
            .map_err(ProtocolError::InvalidParams)?;

            (
                *counterparty,
                SETUP_NONCE,
                AssetId::NATIVE,
                UpdateDetails::Setup {
                    timeout: *timeout,
                    network_context: *network_context,
                },
                None,
            )
        }

        UpdateParams::Deposit {
            channel_address,
            asset_id,
        } => {
            let ch = require_channel(channel, channel_address, ProtocolError::InvalidParams)?;
            let me = participant_of(ch, &from).map_err(ProtocolError::InvalidParams)?;
            let chain_id = ch.network_context.chain_id;

            let latest_alice = chain
                .get_latest_deposit(*channel_address, *asset_id, chain_id, Participant::Alice)
                .await?;
            let latest_bob = chain
                .get_latest_deposit(*channel_address, *asset_id, chain_id, Participant::Bob)
                .await?;

            if let Some(idx) = ch.core.asset_index(asset_id) {
                if latest_alice.amount < ch.core.processed_deposits_alice[idx]
                    || latest_bob.amount < ch.core.processed_deposits_bob[idx]
                {
                    return Err(ProtocolError::InvalidParams(
                        ValidationError::DepositTotalRegressed(*asset_id),
                    ));
                }
            }

            (
                ch.core.address_of(me.other()),
                next_nonce(ch.nonce()),
                *asset_id,
                UpdateDetails::Deposit {
                    total_deposits_alice: latest_alice.amount,
                    total_deposits_bob: latest_bob.amount,
                },
                None,
            )
        }

        UpdateParams::Create {
            channel_address,
            asset_id,
            balance,
            transfer_definition,
            transfer_timeout,
            initial_state,
            meta,
        } => {
            let ch = require_channel(channel, channel_address, ProtocolError::InvalidParams)?;
            let me = participant_of(ch, &from).map_err(ProtocolError::InvalidParams)?;
            if ch.core.asset_index(asset_id).is_none() {
                return Err(ProtocolError::InvalidParams(ValidationError::UnknownAsset(
                    *asset_id,
                )));
            }
            check_bounds(
                *transfer_timeout,
                config.transfer_timeout_min,
                config.transfer_timeout_max,
            )
            .map_err(ProtocolError::InvalidParams)?;
            check_recipients(ch, balance).map_err(ProtocolError::InvalidParams)?;
            check_definition_deployed(chain, ch, transfer_definition, ProtocolError::InvalidParams)
                .await?;

            let nonce = next_nonce(ch.nonce());
            let transfer_id = derive_transfer_id(
                channel_address,
                nonce,
                transfer_definition,
                &keccak256(initial_state),
            );

            (
                ch.core.address_of(me.other()),
                nonce,
                *asset_id,
                UpdateDetails::Create {
                    transfer_id,
                    balance: balance.clone(),
                    transfer_definition: *transfer_definition,
                    transfer_timeout: *transfer_timeout,
                    initial_state: initial_state.clone(),
                    meta: meta.clone(),
                },
                None,
            )
        }

        UpdateParams::Resolve {
            channel_address,
            transfer_id,
            transfer_resolver,
        } => {
            let ch = require_channel(channel, channel_address, ProtocolError::InvalidParams)?;
            let me = participant_of(ch, &from).map_err(ProtocolError::InvalidParams)?;
            let transfer = active.get(transfer_id).ok_or(ProtocolError::InvalidParams(
                ValidationError::TransferNotFound(*transfer_id),
            ))?;

            let payout = chain
                .resolve_transfer(transfer, transfer_resolver, ch.network_context.chain_id)
                .await
                .map_err(|e| match e {
                    ChainError::InvalidResolver(m) => {
                        ProtocolError::InvalidParams(ValidationError::InvalidResolver(m))
                    }
                    other => ProtocolError::ChainError(other),
                })?;

            (
                ch.core.address_of(me.other()),
                next_nonce(ch.nonce()),
                transfer.core.asset_id,
                UpdateDetails::Resolve {
                    transfer_id: *transfer_id,
                    transfer_resolver: transfer_resolver.clone(),
                },
                Some(payout),
            )
        }
    };

    let mut update = ChannelUpdate {
        id: UpdateId::sign(signer),
        channel_address: params.channel_address(&from),
        from_identifier: from,
        to_identifier: to,
        nonce,
        asset_id,
        balance: Balance::empty([from, to]),
        details,
        alice_signature: None,
        bob_signature: None,
    };

    let mut applied = apply_update(channel, active, &update, resolved.as_ref())
        .map_err(ProtocolError::InvalidParams)?;
    check_conservation(&applied.state.core, &applied.active)
        .map_err(ProtocolError::InvalidParams)?;

    if update.update_type() != UpdateType::Setup {
        let idx = applied
            .state
            .core
            .asset_index(&asset_id)
            .expect("applied state tracks the update's asset");
        update.balance = applied.state.core.balances[idx].clone();
    }

    let me = applied
        .state
        .core
        .participant(&from)
        .expect("initiator is a participant of the applied state");
    update.sign_commitment(signer, me, &applied.state.core);
    applied.state.latest_update = Some(update.clone());

    Ok((update, applied))
}

/// Validate an inbound update against the replica and apply it.
///
/// The caller decides the nonce case (§ sync engine); this function assumes
/// the update targets `next_nonce(channel.nonce)` and fails otherwise.
pub async fn validate_and_apply_inbound<C, V>(
    update: &ChannelUpdate,
    channel: Option<&FullChannelState>,
    active: &TransferSet,
    chain: &C,
    external: &V,
    config: &EngineConfig,
) -> Result<AppliedUpdate>
where
    C: ChainReader + ?Sized,
    V: ExternalValidation + ?Sized,
{
    validate_update_structure(update).map_err(ProtocolError::InvalidUpdate)?;

    let resolved = match (&update.details, channel) {
        (UpdateDetails::Setup { timeout, .. }, None) => {
            check_bounds(
                *timeout,
                config.channel_timeout_min,
                config.channel_timeout_max,
            )
            .map_err(ProtocolError::InvalidUpdate)?;
            None
        }
        (UpdateDetails::Setup { .. }, Some(existing)) => {
            return Err(ProtocolError::InvalidUpdate(
                ValidationError::ChannelAlreadyExists(existing.channel_address()),
            ));
        }
        (_, None) => {
            return Err(ProtocolError::InvalidUpdate(
                ValidationError::ChannelNotFound(update.channel_address),
            ));
        }
        (details, Some(ch)) => {
            validate_update_membership(update, ch).map_err(ProtocolError::InvalidUpdate)?;

            match details {
                UpdateDetails::Deposit {
                    total_deposits_alice,
                    total_deposits_bob,
                } => {
                    let chain_id = ch.network_context.chain_id;
                    let latest_alice = chain
                        .get_latest_deposit(
                            update.channel_address,
                            update.asset_id,
                            chain_id,
                            Participant::Alice,
                        )
                        .await?;
                    let latest_bob = chain
                        .get_latest_deposit(
                            update.channel_address,
                            update.asset_id,
                            chain_id,
                            Participant::Bob,
                        )
                        .await?;

                    if *total_deposits_alice > latest_alice.amount
                        || *total_deposits_bob > latest_bob.amount
                    {
                        return Err(ProtocolError::InvalidUpdate(
                            ValidationError::DepositNotOnchain(update.asset_id),
                        ));
                    }
                    None
                }
                UpdateDetails::Create {
                    balance,
                    transfer_definition,
                    transfer_timeout,
                    ..
                } => {
                    check_bounds(
                        *transfer_timeout,
                        config.transfer_timeout_min,
                        config.transfer_timeout_max,
                    )
                    .map_err(ProtocolError::InvalidUpdate)?;
                    check_recipients(ch, balance).map_err(ProtocolError::InvalidUpdate)?;
                    check_definition_deployed(
                        chain,
                        ch,
                        transfer_definition,
                        ProtocolError::InvalidUpdate,
                    )
                    .await?;
                    None
                }
                UpdateDetails::Resolve {
                    transfer_id,
                    transfer_resolver,
                } => {
                    let transfer =
                        active.get(transfer_id).ok_or(ProtocolError::InvalidUpdate(
                            ValidationError::TransferNotFound(*transfer_id),
                        ))?;
                    let payout = chain
                        .resolve_transfer(
                            transfer,
                            transfer_resolver,
                            ch.network_context.chain_id,
                        )
                        .await
                        .map_err(|e| match e {
                            ChainError::InvalidResolver(m) => ProtocolError::InvalidUpdate(
                                ValidationError::InvalidResolver(m),
                            ),
                            other => ProtocolError::ChainError(other),
                        })?;
                    Some(payout)
                }
                UpdateDetails::Setup { .. } => unreachable!("handled above"),
            }
        }
    };

    external
        .validate_inbound(update, channel, active)
        .await
        .map_err(ProtocolError::ExternalValidationFailed)?;

    let applied = apply_update(channel, active, update, resolved.as_ref())
        .map_err(ProtocolError::InvalidUpdate)?;
    check_conservation(&applied.state.core, &applied.active)
        .map_err(ProtocolError::InvalidUpdate)?;
    validate_applied_balance(update, &applied).map_err(ProtocolError::InvalidUpdate)?;

    let initiator = applied
        .state
        .core
        .participant(&update.from_identifier)
        .ok_or(ProtocolError::InvalidUpdate(
            ValidationError::NotAParticipant(update.from_identifier),
        ))?;
    update
        .verify_commitment_signature(initiator, &applied.state.core)
        .map_err(|e| ProtocolError::BadSignatures(e.to_string()))?;

    Ok(applied)
}

fn require_channel<'a>(
    channel: Option<&'a FullChannelState>,
    channel_address: &Address,
    wrap: fn(ValidationError) -> ProtocolError,
) -> Result<&'a FullChannelState> {
    let ch = channel.ok_or_else(|| wrap(ValidationError::ChannelNotFound(*channel_address)))?;
    if &ch.channel_address() != channel_address {
        return Err(wrap(ValidationError::ChannelAddressMismatch {
            expected: ch.channel_address(),
            got: *channel_address,
        }));
    }
    Ok(ch)
}

fn participant_of(
    channel: &FullChannelState,
    address: &Address,
) -> std::result::Result<Participant, ValidationError> {
    channel
        .core
        .participant(address)
        .ok_or(ValidationError::NotAParticipant(*address))
}

fn check_bounds(got: u64, min: u64, max: u64) -> std::result::Result<(), ValidationError> {
    if got < min || got > max {
        return Err(ValidationError::TimeoutOutOfBounds { got, min, max });
    }
    Ok(())
}

fn check_recipients(
    channel: &FullChannelState,
    balance: &Balance,
) -> std::result::Result<(), ValidationError> {
    for to in &balance.to {
        if channel.core.participant(to).is_none() {
            return Err(ValidationError::InvalidBalanceRecipients);
        }
    }
    Ok(())
}

async fn check_definition_deployed<C>(
    chain: &C,
    channel: &FullChannelState,
    definition: &Address,
    wrap: fn(ValidationError) -> ProtocolError,
) -> Result<()>
where
    C: ChainReader + ?Sized,
{
    let code = chain
        .get_code(*definition, channel.network_context.chain_id)
        .await?;
    if code.is_empty() {
        return Err(wrap(ValidationError::UnknownTransferDefinition(
            *definition,
        )));
    }
    Ok(())
}
