//! Structural validation of channel updates.
//!
//! These checks are pure; the stateful preconditions (nonce arbitration,
//! chain reconciliation, external hooks) live in the engine and defer to
//! the applier after passing through here.

use crate::apply::AppliedUpdate;
use crate::error::ValidationError;
use crate::merkle::TransferSet;
use crate::state::{CoreChannelState, FullChannelState};
use crate::update::{ChannelUpdate, UpdateType};

/// Validate an update's internal structure.
///
/// Checks that participants are distinct, the nonce is in range, and the
/// idempotency id signature recovers to the initiator.
pub fn validate_update_structure(update: &ChannelUpdate) -> Result<(), ValidationError> {
    if update.from_identifier == update.to_identifier {
        return Err(ValidationError::IdenticalParticipants);
    }
    if update.nonce == 0 {
        return Err(ValidationError::InvalidNonce {
            expected: 1,
            got: 0,
        });
    }
    update.id.verify(&update.from_identifier)?;
    Ok(())
}

/// Validate an update against the replica it claims to advance.
///
/// For setup updates the replica must be absent and this function must not
/// be called; for every other type the channel must exist and the update's
/// initiator and counterparty must be its two participants.
pub fn validate_update_membership(
    update: &ChannelUpdate,
    channel: &FullChannelState,
) -> Result<(), ValidationError> {
    if update.channel_address != channel.channel_address() {
        return Err(ValidationError::ChannelAddressMismatch {
            expected: channel.channel_address(),
            got: update.channel_address,
        });
    }
    let from = channel
        .core
        .participant(&update.from_identifier)
        .ok_or(ValidationError::NotAParticipant(update.from_identifier))?;
    if channel.core.address_of(from.other()) != update.to_identifier {
        return Err(ValidationError::NotAParticipant(update.to_identifier));
    }
    Ok(())
}

/// Check that the update's declared post-balance matches the applied result.
///
/// Setup updates carry an empty placeholder balance and are exempt.
pub fn validate_applied_balance(
    update: &ChannelUpdate,
    applied: &AppliedUpdate,
) -> Result<(), ValidationError> {
    if update.update_type() == UpdateType::Setup {
        return Ok(());
    }
    let idx = applied
        .state
        .core
        .asset_index(&update.asset_id)
        .ok_or(ValidationError::UnknownAsset(update.asset_id))?;
    if applied.state.core.balances[idx] != update.balance {
        return Err(ValidationError::BalanceMismatch);
    }
    Ok(())
}

/// Invariant 3: per asset, channel balances plus value locked in active
/// transfers equal the processed deposit totals.
pub fn check_conservation(
    core: &CoreChannelState,
    active: &TransferSet,
) -> Result<(), ValidationError> {
    for (idx, asset_id) in core.asset_ids.iter().enumerate() {
        let mut held = core.balances[idx]
            .total()
            .ok_or(ValidationError::AmountOverflow)?;

        for transfer in active.iter() {
            if &transfer.core.asset_id == asset_id {
                let locked = transfer
                    .core
                    .balance
                    .total()
                    .ok_or(ValidationError::AmountOverflow)?;
                held = held
                    .checked_add(locked)
                    .ok_or(ValidationError::AmountOverflow)?;
            }
        }

        let deposited = core.processed_deposits_alice[idx]
            .checked_add(core.processed_deposits_bob[idx])
            .ok_or(ValidationError::AmountOverflow)?;

        if held != deposited {
            return Err(ValidationError::ConservationViolated(*asset_id));
        }
    }
    Ok(())
}
