//! The applier: a pure state-transition function over validated updates.
//!
//! Given the previous channel, the active transfer set and an update, it
//! produces the next channel and transfer set. It never performs I/O;
//! deposit totals arrive inside the update details and resolve payouts are
//! passed in by the caller after consulting the chain reader.

use crate::crypto::keccak256;
use crate::error::ValidationError;
use crate::merkle::TransferSet;
use crate::state::{
    derive_channel_address, derive_transfer_id, Balance, CoreChannelState, CoreTransferState,
    FullChannelState, FullTransferState, RESOLVER_ENCODING, STATE_ENCODING,
};
use crate::update::{next_nonce, ChannelUpdate, UpdateDetails, SETUP_NONCE};

/// The result of applying one update.
#[derive(Debug, Clone)]
pub struct AppliedUpdate {
    pub state: FullChannelState,
    pub active: TransferSet,
    /// The transfer installed by a create or closed by a resolve.
    pub transfer: Option<FullTransferState>,
}

/// Apply `update` to the replica, producing the next state.
///
/// `resolved` must carry the payout balance computed by the transfer
/// definition when the update is a resolve, and nothing otherwise.
pub fn apply_update(
    prev: Option<&FullChannelState>,
    active: &TransferSet,
    update: &ChannelUpdate,
    resolved: Option<&Balance>,
) -> Result<AppliedUpdate, ValidationError> {
    match &update.details {
        UpdateDetails::Setup {
            timeout,
            network_context,
        } => {
            if let Some(existing) = prev {
                return Err(ValidationError::ChannelAlreadyExists(
                    existing.channel_address(),
                ));
            }
            if update.nonce != SETUP_NONCE {
                return Err(ValidationError::InvalidNonce {
                    expected: SETUP_NONCE,
                    got: update.nonce,
                });
            }

            let expected = derive_channel_address(
                &update.from_identifier,
                &update.to_identifier,
                network_context,
            );
            if update.channel_address != expected {
                return Err(ValidationError::ChannelAddressMismatch {
                    expected,
                    got: update.channel_address,
                });
            }

            let core = CoreChannelState {
                channel_address: update.channel_address,
                alice: update.from_identifier,
                bob: update.to_identifier,
                asset_ids: Vec::new(),
                balances: Vec::new(),
                processed_deposits_alice: Vec::new(),
                processed_deposits_bob: Vec::new(),
                defund_nonces: Vec::new(),
                timeout: *timeout,
                nonce: SETUP_NONCE,
                merkle_root: crate::types::Bytes32::ZERO,
            };

            Ok(AppliedUpdate {
                state: FullChannelState {
                    core,
                    latest_update: Some(update.clone()),
                    network_context: *network_context,
                    in_dispute: false,
                },
                active: TransferSet::new(),
                transfer: None,
            })
        }

        UpdateDetails::Deposit {
            total_deposits_alice,
            total_deposits_bob,
        } => {
            let prev = require_channel(prev, update)?;
            check_nonce(prev, update)?;

            let mut next = prev.clone();
            let idx = match next.core.asset_index(&update.asset_id) {
                Some(idx) => idx,
                None => {
                    next.core.asset_ids.push(update.asset_id);
                    next.core
                        .balances
                        .push(Balance::empty([next.core.alice, next.core.bob]));
                    next.core.processed_deposits_alice.push(0);
                    next.core.processed_deposits_bob.push(0);
                    next.core.defund_nonces.push(0);
                    next.core.asset_ids.len() - 1
                }
            };

            let credit_alice = total_deposits_alice
                .checked_sub(next.core.processed_deposits_alice[idx])
                .ok_or(ValidationError::DepositTotalRegressed(update.asset_id))?;
            let credit_bob = total_deposits_bob
                .checked_sub(next.core.processed_deposits_bob[idx])
                .ok_or(ValidationError::DepositTotalRegressed(update.asset_id))?;

            let balance = &mut next.core.balances[idx];
            balance.amount[0] = balance.amount[0]
                .checked_add(credit_alice)
                .ok_or(ValidationError::AmountOverflow)?;
            balance.amount[1] = balance.amount[1]
                .checked_add(credit_bob)
                .ok_or(ValidationError::AmountOverflow)?;
            next.core.processed_deposits_alice[idx] = *total_deposits_alice;
            next.core.processed_deposits_bob[idx] = *total_deposits_bob;

            next.core.nonce = update.nonce;
            next.latest_update = Some(update.clone());

            Ok(AppliedUpdate {
                state: next,
                active: active.clone(),
                transfer: None,
            })
        }

        UpdateDetails::Create {
            transfer_id,
            balance: locked,
            transfer_definition,
            transfer_timeout,
            initial_state,
            meta: _,
        } => {
            let prev = require_channel(prev, update)?;
            check_nonce(prev, update)?;

            let initiator = prev
                .core
                .participant(&update.from_identifier)
                .ok_or(ValidationError::NotAParticipant(update.from_identifier))?;
            let idx = prev
                .core
                .asset_index(&update.asset_id)
                .ok_or(ValidationError::UnknownAsset(update.asset_id))?;

            let initial_state_hash = keccak256(initial_state);
            let expected_id = derive_transfer_id(
                &prev.core.channel_address,
                update.nonce,
                transfer_definition,
                &initial_state_hash,
            );
            if *transfer_id != expected_id {
                return Err(ValidationError::TransferIdMismatch {
                    expected: expected_id,
                    got: *transfer_id,
                });
            }

            let total_locked = locked.total().ok_or(ValidationError::AmountOverflow)?;

            let mut next = prev.clone();
            let funds = &mut next.core.balances[idx].amount[initiator.index()];
            *funds = funds
                .checked_sub(total_locked)
                .ok_or(ValidationError::InsufficientBalance {
                    participant: initiator.index(),
                    asset: update.asset_id,
                })?;

            let transfer = FullTransferState {
                core: CoreTransferState {
                    transfer_id: *transfer_id,
                    channel_address: prev.core.channel_address,
                    channel_nonce: update.nonce,
                    transfer_definition: *transfer_definition,
                    initiator: update.from_identifier,
                    responder: update.to_identifier,
                    asset_id: update.asset_id,
                    balance: locked.clone(),
                    transfer_timeout: *transfer_timeout,
                    initial_state_hash,
                },
                transfer_state: initial_state.clone(),
                transfer_resolver: None,
                state_encoding: STATE_ENCODING.into(),
                resolver_encoding: RESOLVER_ENCODING.into(),
                chain_id: prev.network_context.chain_id,
                in_dispute: false,
            };

            let mut next_active = active.clone();
            let root = next_active
                .insert(transfer.clone())
                .map_err(|_| ValidationError::DuplicateTransfer(*transfer_id))?;
            next.core.merkle_root = root;
            next.core.nonce = update.nonce;
            next.latest_update = Some(update.clone());

            Ok(AppliedUpdate {
                state: next,
                active: next_active,
                transfer: Some(transfer),
            })
        }

        UpdateDetails::Resolve {
            transfer_id,
            transfer_resolver,
        } => {
            let prev = require_channel(prev, update)?;
            check_nonce(prev, update)?;

            let payout = resolved.ok_or(ValidationError::MissingResolvedBalance)?;

            let mut next_active = active.clone();
            let (mut transfer, root) = next_active
                .remove(transfer_id)
                .map_err(|_| ValidationError::TransferNotFound(*transfer_id))?;

            let locked_total = transfer
                .core
                .balance
                .total()
                .ok_or(ValidationError::AmountOverflow)?;
            let payout_total = payout.total().ok_or(ValidationError::AmountOverflow)?;
            if locked_total != payout_total {
                return Err(ValidationError::ResolutionNotConserving(*transfer_id));
            }

            let initiator = prev
                .core
                .participant(&transfer.core.initiator)
                .ok_or(ValidationError::NotAParticipant(transfer.core.initiator))?;
            let idx = prev
                .core
                .asset_index(&transfer.core.asset_id)
                .ok_or(ValidationError::UnknownAsset(transfer.core.asset_id))?;

            let mut next = prev.clone();
            let balance = &mut next.core.balances[idx];
            balance.amount[initiator.index()] = balance.amount[initiator.index()]
                .checked_add(payout.amount[0])
                .ok_or(ValidationError::AmountOverflow)?;
            balance.amount[initiator.other().index()] = balance.amount
                [initiator.other().index()]
            .checked_add(payout.amount[1])
            .ok_or(ValidationError::AmountOverflow)?;

            transfer.transfer_resolver = Some(transfer_resolver.clone());

            next.core.merkle_root = root;
            next.core.nonce = update.nonce;
            next.latest_update = Some(update.clone());

            Ok(AppliedUpdate {
                state: next,
                active: next_active,
                transfer: Some(transfer),
            })
        }
    }
}

fn require_channel<'a>(
    prev: Option<&'a FullChannelState>,
    update: &ChannelUpdate,
) -> Result<&'a FullChannelState, ValidationError> {
    let prev = prev.ok_or(ValidationError::ChannelNotFound(update.channel_address))?;
    if prev.channel_address() != update.channel_address {
        return Err(ValidationError::ChannelAddressMismatch {
            expected: prev.channel_address(),
            got: update.channel_address,
        });
    }
    Ok(prev)
}

fn check_nonce(prev: &FullChannelState, update: &ChannelUpdate) -> Result<(), ValidationError> {
    let expected = next_nonce(prev.nonce());
    if update.nonce != expected {
        return Err(ValidationError::InvalidNonce {
            expected,
            got: update.nonce,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ChannelSigner;
    use crate::state::NetworkContext;
    use crate::types::{Address, AssetId, Bytes32, TransferId};
    use crate::update::{UpdateId, UpdateType};

    fn signers() -> (ChannelSigner, ChannelSigner) {
        (
            ChannelSigner::from_seed(&[0x41; 32]).unwrap(),
            ChannelSigner::from_seed(&[0x42; 32]).unwrap(),
        )
    }

    fn network() -> NetworkContext {
        NetworkContext {
            chain_id: 1337,
            channel_factory: Address::from_bytes([0xfa; 20]),
        }
    }

    fn base_update(
        alice: &ChannelSigner,
        bob: &ChannelSigner,
        nonce: u64,
        details: UpdateDetails,
    ) -> ChannelUpdate {
        let channel_address =
            derive_channel_address(&alice.address(), &bob.address(), &network());
        ChannelUpdate {
            id: UpdateId::sign(alice),
            channel_address,
            from_identifier: alice.address(),
            to_identifier: bob.address(),
            nonce,
            asset_id: AssetId::NATIVE,
            balance: Balance::empty([alice.address(), bob.address()]),
            details,
            alice_signature: None,
            bob_signature: None,
        }
    }

    fn setup_state(alice: &ChannelSigner, bob: &ChannelSigner) -> AppliedUpdate {
        let update = base_update(
            alice,
            bob,
            SETUP_NONCE,
            UpdateDetails::Setup {
                timeout: 86_400,
                network_context: network(),
            },
        );
        apply_update(None, &TransferSet::new(), &update, None).unwrap()
    }

    fn deposited_state(alice: &ChannelSigner, bob: &ChannelSigner, amount: u128) -> AppliedUpdate {
        let setup = setup_state(alice, bob);
        let update = base_update(
            alice,
            bob,
            2,
            UpdateDetails::Deposit {
                total_deposits_alice: amount,
                total_deposits_bob: 0,
            },
        );
        apply_update(Some(&setup.state), &setup.active, &update, None).unwrap()
    }

    #[test]
    fn test_setup_produces_empty_channel() {
        let (alice, bob) = signers();
        let applied = setup_state(&alice, &bob);

        assert_eq!(applied.state.nonce(), 1);
        assert_eq!(applied.state.core.alice, alice.address());
        assert_eq!(applied.state.core.bob, bob.address());
        assert!(applied.state.core.asset_ids.is_empty());
        assert_eq!(applied.state.core.merkle_root, Bytes32::ZERO);
        assert!(!applied.state.in_dispute);
    }

    #[test]
    fn test_setup_rejects_existing_channel() {
        let (alice, bob) = signers();
        let applied = setup_state(&alice, &bob);
        let update = base_update(
            &alice,
            &bob,
            SETUP_NONCE,
            UpdateDetails::Setup {
                timeout: 86_400,
                network_context: network(),
            },
        );
        let err = apply_update(Some(&applied.state), &applied.active, &update, None).unwrap_err();
        assert!(matches!(err, ValidationError::ChannelAlreadyExists(_)));
    }

    #[test]
    fn test_setup_rejects_wrong_address() {
        let (alice, bob) = signers();
        let mut update = base_update(
            &alice,
            &bob,
            SETUP_NONCE,
            UpdateDetails::Setup {
                timeout: 86_400,
                network_context: network(),
            },
        );
        update.channel_address = Address::from_bytes([0x01; 20]);
        let err = apply_update(None, &TransferSet::new(), &update, None).unwrap_err();
        assert!(matches!(err, ValidationError::ChannelAddressMismatch { .. }));
    }

    #[test]
    fn test_first_deposit_credits_and_tracks_asset() {
        let (alice, bob) = signers();
        let applied = deposited_state(&alice, &bob, 100);

        assert_eq!(applied.state.nonce(), 2);
        assert_eq!(applied.state.core.asset_ids, vec![AssetId::NATIVE]);
        assert_eq!(applied.state.core.balances[0].amount, [100, 0]);
        assert_eq!(applied.state.core.processed_deposits_alice, vec![100]);
        assert_eq!(applied.state.core.processed_deposits_bob, vec![0]);
    }

    #[test]
    fn test_repeat_deposit_credits_difference_only() {
        let (alice, bob) = signers();
        let first = deposited_state(&alice, &bob, 100);

        let update = base_update(
            &alice,
            &bob,
            3,
            UpdateDetails::Deposit {
                total_deposits_alice: 130,
                total_deposits_bob: 10,
            },
        );
        let applied = apply_update(Some(&first.state), &first.active, &update, None).unwrap();
        assert_eq!(applied.state.core.balances[0].amount, [130, 10]);
        assert_eq!(applied.state.core.processed_deposits_alice, vec![130]);
        assert_eq!(applied.state.core.processed_deposits_bob, vec![10]);
    }

    #[test]
    fn test_deposit_rejects_regressed_total() {
        let (alice, bob) = signers();
        let first = deposited_state(&alice, &bob, 100);

        let update = base_update(
            &alice,
            &bob,
            3,
            UpdateDetails::Deposit {
                total_deposits_alice: 50,
                total_deposits_bob: 0,
            },
        );
        let err = apply_update(Some(&first.state), &first.active, &update, None).unwrap_err();
        assert!(matches!(err, ValidationError::DepositTotalRegressed(_)));
    }

    fn create_update(
        alice: &ChannelSigner,
        bob: &ChannelSigner,
        state: &FullChannelState,
        locked: u128,
    ) -> ChannelUpdate {
        let initial_state = vec![0x99; 32];
        let definition = Address::from_bytes([0xde; 20]);
        let nonce = state.nonce() + 1;
        let transfer_id = derive_transfer_id(
            &state.channel_address(),
            nonce,
            &definition,
            &keccak256(&initial_state),
        );
        base_update(
            alice,
            bob,
            nonce,
            UpdateDetails::Create {
                transfer_id,
                balance: Balance {
                    to: [alice.address(), bob.address()],
                    amount: [locked, 0],
                },
                transfer_definition: definition,
                transfer_timeout: 3_600,
                initial_state,
                meta: None,
            },
        )
    }

    #[test]
    fn test_create_debits_and_installs_transfer() {
        let (alice, bob) = signers();
        let deposited = deposited_state(&alice, &bob, 100);

        let update = create_update(&alice, &bob, &deposited.state, 40);
        let applied =
            apply_update(Some(&deposited.state), &deposited.active, &update, None).unwrap();

        assert_eq!(applied.state.nonce(), 3);
        assert_eq!(applied.state.core.balances[0].amount, [60, 0]);
        assert_eq!(applied.active.len(), 1);
        assert_ne!(applied.state.core.merkle_root, Bytes32::ZERO);
        assert_eq!(applied.state.core.merkle_root, applied.active.root());

        let transfer = applied.transfer.unwrap();
        assert_eq!(transfer.core.channel_nonce, 3);
        assert_eq!(transfer.core.initiator, alice.address());
        assert_eq!(transfer.core.balance.amount, [40, 0]);
    }

    #[test]
    fn test_create_rejects_insufficient_balance() {
        let (alice, bob) = signers();
        let deposited = deposited_state(&alice, &bob, 100);

        let update = create_update(&alice, &bob, &deposited.state, 101);
        let err =
            apply_update(Some(&deposited.state), &deposited.active, &update, None).unwrap_err();
        assert!(matches!(err, ValidationError::InsufficientBalance { .. }));
    }

    #[test]
    fn test_create_rejects_bad_transfer_id() {
        let (alice, bob) = signers();
        let deposited = deposited_state(&alice, &bob, 100);

        let mut update = create_update(&alice, &bob, &deposited.state, 40);
        if let UpdateDetails::Create { transfer_id, .. } = &mut update.details {
            *transfer_id = TransferId::from_bytes([0xff; 32]);
        }
        let err =
            apply_update(Some(&deposited.state), &deposited.active, &update, None).unwrap_err();
        assert!(matches!(err, ValidationError::TransferIdMismatch { .. }));
    }

    #[test]
    fn test_resolve_credits_and_clears_merkle_entry() {
        let (alice, bob) = signers();
        let deposited = deposited_state(&alice, &bob, 100);
        let create = create_update(&alice, &bob, &deposited.state, 40);
        let created =
            apply_update(Some(&deposited.state), &deposited.active, &create, None).unwrap();
        let transfer_id = created.transfer.as_ref().unwrap().transfer_id();

        // Responder claims with the correct pre-image: full value to Bob.
        let mut update = base_update(
            &alice,
            &bob,
            4,
            UpdateDetails::Resolve {
                transfer_id,
                transfer_resolver: vec![0xaa; 32],
            },
        );
        update.from_identifier = bob.address();
        update.to_identifier = alice.address();

        let payout = Balance {
            to: [alice.address(), bob.address()],
            amount: [0, 40],
        };
        let applied =
            apply_update(Some(&created.state), &created.active, &update, Some(&payout)).unwrap();

        assert_eq!(applied.state.nonce(), 4);
        assert!(applied.active.is_empty());
        assert_eq!(applied.state.core.merkle_root, Bytes32::ZERO);
        assert_eq!(applied.state.core.balances[0].amount, [60, 40]);

        let transfer = applied.transfer.unwrap();
        assert_eq!(transfer.transfer_resolver, Some(vec![0xaa; 32]));
        assert_eq!(transfer.transfer_id(), transfer_id);
    }

    #[test]
    fn test_resolve_rejects_nonconserving_payout() {
        let (alice, bob) = signers();
        let deposited = deposited_state(&alice, &bob, 100);
        let create = create_update(&alice, &bob, &deposited.state, 40);
        let created =
            apply_update(Some(&deposited.state), &deposited.active, &create, None).unwrap();
        let transfer_id = created.transfer.as_ref().unwrap().transfer_id();

        let update = base_update(
            &alice,
            &bob,
            4,
            UpdateDetails::Resolve {
                transfer_id,
                transfer_resolver: vec![0xaa; 32],
            },
        );
        let payout = Balance {
            to: [alice.address(), bob.address()],
            amount: [0, 41],
        };
        let err = apply_update(Some(&created.state), &created.active, &update, Some(&payout))
            .unwrap_err();
        assert!(matches!(err, ValidationError::ResolutionNotConserving(_)));
    }

    #[test]
    fn test_resolve_missing_transfer() {
        let (alice, bob) = signers();
        let deposited = deposited_state(&alice, &bob, 100);

        let update = base_update(
            &alice,
            &bob,
            3,
            UpdateDetails::Resolve {
                transfer_id: TransferId::from_bytes([0x77; 32]),
                transfer_resolver: vec![],
            },
        );
        let payout = Balance::empty([alice.address(), bob.address()]);
        let err = apply_update(
            Some(&deposited.state),
            &deposited.active,
            &update,
            Some(&payout),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::TransferNotFound(_)));
    }

    #[test]
    fn test_wrong_nonce_rejected() {
        let (alice, bob) = signers();
        let setup = setup_state(&alice, &bob);

        let update = base_update(
            &alice,
            &bob,
            5,
            UpdateDetails::Deposit {
                total_deposits_alice: 10,
                total_deposits_bob: 0,
            },
        );
        let err = apply_update(Some(&setup.state), &setup.active, &update, None).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidNonce { expected: 2, got: 5 }
        ));
    }

    #[test]
    fn test_update_type_tags() {
        let (alice, bob) = signers();
        let setup = setup_state(&alice, &bob);
        let latest = setup.state.latest_update.unwrap();
        assert_eq!(latest.update_type(), UpdateType::Setup);
    }
}
