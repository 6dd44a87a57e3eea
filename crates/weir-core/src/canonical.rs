//! Canonical CBOR encoding for deterministic serialization.
//!
//! This module implements RFC 8949 Core Deterministic Encoding:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//! - No floats
//!
//! The canonical encoding is critical: both participants must produce
//! bit-identical bytes for the same update or state, because commitment
//! digests and signatures are computed over these bytes. 128-bit amounts
//! exceed CBOR's integer range and encode as fixed 16-byte big-endian
//! strings.

use ciborium::value::Value;

use crate::crypto::{keccak256, Signature};
use crate::error::CoreError;
use crate::state::{Balance, CoreChannelState, CoreTransferState, NetworkContext};
use crate::types::{Address, AssetId, Bytes32, TransferId};
use crate::update::{ChannelUpdate, UpdateDetails, UpdateId, UpdateType};

/// Channel state field keys.
///
/// Keys 0-23 encode as single bytes in CBOR.
mod channel_keys {
    pub const CHANNEL_ADDRESS: u64 = 0;
    pub const ALICE: u64 = 1;
    pub const BOB: u64 = 2;
    pub const ASSET_IDS: u64 = 3;
    pub const BALANCES: u64 = 4;
    pub const PROCESSED_DEPOSITS_ALICE: u64 = 5;
    pub const PROCESSED_DEPOSITS_BOB: u64 = 6;
    pub const DEFUND_NONCES: u64 = 7;
    pub const TIMEOUT: u64 = 8;
    pub const NONCE: u64 = 9;
    pub const MERKLE_ROOT: u64 = 10;
}

/// Transfer state field keys.
mod transfer_keys {
    pub const TRANSFER_ID: u64 = 0;
    pub const CHANNEL_ADDRESS: u64 = 1;
    pub const CHANNEL_NONCE: u64 = 2;
    pub const TRANSFER_DEFINITION: u64 = 3;
    pub const INITIATOR: u64 = 4;
    pub const RESPONDER: u64 = 5;
    pub const ASSET_ID: u64 = 6;
    pub const BALANCE: u64 = 7;
    pub const TRANSFER_TIMEOUT: u64 = 8;
    pub const INITIAL_STATE_HASH: u64 = 9;
}

/// Update field keys. Keys 10 and 11 (participant signatures) are excluded
/// from the digest view so the digest is stable while countersigning.
mod update_keys {
    pub const ID_UUID: u64 = 0;
    pub const ID_SIGNATURE: u64 = 1;
    pub const CHANNEL_ADDRESS: u64 = 2;
    pub const FROM: u64 = 3;
    pub const TO: u64 = 4;
    pub const UPDATE_TYPE: u64 = 5;
    pub const NONCE: u64 = 6;
    pub const ASSET_ID: u64 = 7;
    pub const BALANCE: u64 = 8;
    pub const DETAILS: u64 = 9;
    pub const ALICE_SIGNATURE: u64 = 10;
    pub const BOB_SIGNATURE: u64 = 11;
}

// ─────────────────────────────────────────────────────────────────────────
// Encoding
// ─────────────────────────────────────────────────────────────────────────

/// Encode a channel state to canonical bytes.
pub fn canonical_channel_state_bytes(state: &CoreChannelState) -> Vec<u8> {
    encode_canonical(&channel_state_to_value(state))
}

/// Encode a transfer state to canonical bytes.
pub fn canonical_transfer_state_bytes(state: &CoreTransferState) -> Vec<u8> {
    encode_canonical(&transfer_state_to_value(state))
}

/// Encode an update to canonical bytes, including participant signatures.
///
/// This is the wire format of an update.
pub fn canonical_update_bytes(update: &ChannelUpdate) -> Vec<u8> {
    encode_canonical(&update_to_value(update, true))
}

/// The commitment digest of a channel state. Participants sign this.
pub fn hash_channel_commitment(state: &CoreChannelState) -> Bytes32 {
    keccak256(&canonical_channel_state_bytes(state))
}

/// The digest of a transfer state. Merkle leaves are these digests.
pub fn hash_transfer_state(state: &CoreTransferState) -> Bytes32 {
    keccak256(&canonical_transfer_state_bytes(state))
}

/// The digest of an update over its signature-free view.
pub fn hash_update(update: &ChannelUpdate) -> Bytes32 {
    keccak256(&encode_canonical(&update_to_value(update, false)))
}

fn channel_state_to_value(state: &CoreChannelState) -> Value {
    let entries = vec![
        (
            key(channel_keys::CHANNEL_ADDRESS),
            address_value(&state.channel_address),
        ),
        (key(channel_keys::ALICE), address_value(&state.alice)),
        (key(channel_keys::BOB), address_value(&state.bob)),
        (
            key(channel_keys::ASSET_IDS),
            Value::Array(state.asset_ids.iter().map(asset_value).collect()),
        ),
        (
            key(channel_keys::BALANCES),
            Value::Array(state.balances.iter().map(balance_value).collect()),
        ),
        (
            key(channel_keys::PROCESSED_DEPOSITS_ALICE),
            Value::Array(
                state
                    .processed_deposits_alice
                    .iter()
                    .map(|a| amount_value(*a))
                    .collect(),
            ),
        ),
        (
            key(channel_keys::PROCESSED_DEPOSITS_BOB),
            Value::Array(
                state
                    .processed_deposits_bob
                    .iter()
                    .map(|a| amount_value(*a))
                    .collect(),
            ),
        ),
        (
            key(channel_keys::DEFUND_NONCES),
            Value::Array(
                state
                    .defund_nonces
                    .iter()
                    .map(|n| Value::Integer((*n).into()))
                    .collect(),
            ),
        ),
        (
            key(channel_keys::TIMEOUT),
            Value::Integer(state.timeout.into()),
        ),
        (key(channel_keys::NONCE), Value::Integer(state.nonce.into())),
        (
            key(channel_keys::MERKLE_ROOT),
            bytes32_value(&state.merkle_root),
        ),
    ];
    Value::Map(entries)
}

fn transfer_state_to_value(state: &CoreTransferState) -> Value {
    let entries = vec![
        (
            key(transfer_keys::TRANSFER_ID),
            Value::Bytes(state.transfer_id.0.to_vec()),
        ),
        (
            key(transfer_keys::CHANNEL_ADDRESS),
            address_value(&state.channel_address),
        ),
        (
            key(transfer_keys::CHANNEL_NONCE),
            Value::Integer(state.channel_nonce.into()),
        ),
        (
            key(transfer_keys::TRANSFER_DEFINITION),
            address_value(&state.transfer_definition),
        ),
        (
            key(transfer_keys::INITIATOR),
            address_value(&state.initiator),
        ),
        (
            key(transfer_keys::RESPONDER),
            address_value(&state.responder),
        ),
        (key(transfer_keys::ASSET_ID), asset_value(&state.asset_id)),
        (key(transfer_keys::BALANCE), balance_value(&state.balance)),
        (
            key(transfer_keys::TRANSFER_TIMEOUT),
            Value::Integer(state.transfer_timeout.into()),
        ),
        (
            key(transfer_keys::INITIAL_STATE_HASH),
            bytes32_value(&state.initial_state_hash),
        ),
    ];
    Value::Map(entries)
}

fn update_to_value(update: &ChannelUpdate, include_signatures: bool) -> Value {
    let mut entries = vec![
        (
            key(update_keys::ID_UUID),
            Value::Bytes(update.id.id.as_bytes().to_vec()),
        ),
        (
            key(update_keys::ID_SIGNATURE),
            Value::Bytes(update.id.signature.0.to_vec()),
        ),
        (
            key(update_keys::CHANNEL_ADDRESS),
            address_value(&update.channel_address),
        ),
        (key(update_keys::FROM), address_value(&update.from_identifier)),
        (key(update_keys::TO), address_value(&update.to_identifier)),
        (
            key(update_keys::UPDATE_TYPE),
            Value::Integer(u64::from(update.update_type().to_u8()).into()),
        ),
        (key(update_keys::NONCE), Value::Integer(update.nonce.into())),
        (key(update_keys::ASSET_ID), asset_value(&update.asset_id)),
        (key(update_keys::BALANCE), balance_value(&update.balance)),
        (key(update_keys::DETAILS), details_to_value(&update.details)),
    ];

    if include_signatures {
        entries.push((
            key(update_keys::ALICE_SIGNATURE),
            option_signature_value(&update.alice_signature),
        ));
        entries.push((
            key(update_keys::BOB_SIGNATURE),
            option_signature_value(&update.bob_signature),
        ));
    }

    Value::Map(entries)
}

fn details_to_value(details: &UpdateDetails) -> Value {
    let entries = match details {
        UpdateDetails::Setup {
            timeout,
            network_context,
        } => vec![
            (key(0), Value::Integer((*timeout).into())),
            (key(1), Value::Integer(network_context.chain_id.into())),
            (key(2), address_value(&network_context.channel_factory)),
        ],
        UpdateDetails::Deposit {
            total_deposits_alice,
            total_deposits_bob,
        } => vec![
            (key(0), amount_value(*total_deposits_alice)),
            (key(1), amount_value(*total_deposits_bob)),
        ],
        UpdateDetails::Create {
            transfer_id,
            balance,
            transfer_definition,
            transfer_timeout,
            initial_state,
            meta,
        } => vec![
            (key(0), Value::Bytes(transfer_id.0.to_vec())),
            (key(1), balance_value(balance)),
            (key(2), address_value(transfer_definition)),
            (key(3), Value::Integer((*transfer_timeout).into())),
            (key(4), Value::Bytes(initial_state.clone())),
            (
                key(5),
                match meta {
                    Some(m) => Value::Text(m.clone()),
                    None => Value::Null,
                },
            ),
        ],
        UpdateDetails::Resolve {
            transfer_id,
            transfer_resolver,
        } => vec![
            (key(0), Value::Bytes(transfer_id.0.to_vec())),
            (key(1), Value::Bytes(transfer_resolver.clone())),
        ],
    };
    Value::Map(entries)
}

fn key(k: u64) -> Value {
    Value::Integer(k.into())
}

fn address_value(address: &Address) -> Value {
    Value::Bytes(address.0.to_vec())
}

fn asset_value(asset: &AssetId) -> Value {
    address_value(asset.address())
}

fn bytes32_value(b: &Bytes32) -> Value {
    Value::Bytes(b.0.to_vec())
}

fn amount_value(amount: u128) -> Value {
    Value::Bytes(amount.to_be_bytes().to_vec())
}

fn balance_value(balance: &Balance) -> Value {
    Value::Array(vec![
        Value::Array(vec![
            address_value(&balance.to[0]),
            address_value(&balance.to[1]),
        ]),
        Value::Array(vec![
            amount_value(balance.amount[0]),
            amount_value(balance.amount[1]),
        ]),
    ])
}

fn option_signature_value(signature: &Option<Signature>) -> Value {
    match signature {
        Some(sig) => Value::Bytes(sig.0.to_vec()),
        None => Value::Null,
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Canonical CBOR writer
// ─────────────────────────────────────────────────────────────────────────

fn encode_canonical(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_value_to(&mut buf, value);
    buf
}

fn encode_value_to(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(i) => {
            let n: i128 = (*i).into();
            if n >= 0 {
                encode_uint(buf, 0, n as u64);
            } else {
                encode_uint(buf, 1, (-1 - n) as u64);
            }
        }
        Value::Bytes(b) => {
            encode_uint(buf, 2, b.len() as u64);
            buf.extend_from_slice(b);
        }
        Value::Text(s) => {
            encode_uint(buf, 3, s.len() as u64);
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Array(arr) => {
            encode_uint(buf, 4, arr.len() as u64);
            for item in arr {
                encode_value_to(buf, item);
            }
        }
        Value::Map(entries) => {
            encode_map_canonical(buf, entries);
        }
        Value::Bool(b) => {
            buf.push(if *b { 0xf5 } else { 0xf4 });
        }
        Value::Null => {
            buf.push(0xf6);
        }
        _ => {
            unreachable!("value kind not produced by this module");
        }
    }
}

/// Encode an unsigned integer with the given major type, smallest form.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Encode a map with keys sorted by their encoded byte comparison.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(Value, Value)]) {
    let mut pairs: Vec<(Vec<u8>, &Value)> = entries
        .iter()
        .map(|(k, v)| {
            let mut key_buf = Vec::new();
            encode_value_to(&mut key_buf, k);
            (key_buf, v)
        })
        .collect();

    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, 5, pairs.len() as u64);
    for (key_bytes, value) in pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value);
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Decoding
// ─────────────────────────────────────────────────────────────────────────

/// Decode a channel state from canonical bytes.
pub fn decode_channel_state(bytes: &[u8]) -> Result<CoreChannelState, CoreError> {
    let value = parse(bytes)?;
    let map = as_map(&value)?;

    let asset_ids = get_array(map, channel_keys::ASSET_IDS)?
        .iter()
        .map(|v| Ok(AssetId(decode_address(v)?)))
        .collect::<Result<Vec<_>, CoreError>>()?;
    let balances = get_array(map, channel_keys::BALANCES)?
        .iter()
        .map(decode_balance)
        .collect::<Result<Vec<_>, _>>()?;
    let processed_deposits_alice = get_array(map, channel_keys::PROCESSED_DEPOSITS_ALICE)?
        .iter()
        .map(decode_amount)
        .collect::<Result<Vec<_>, _>>()?;
    let processed_deposits_bob = get_array(map, channel_keys::PROCESSED_DEPOSITS_BOB)?
        .iter()
        .map(decode_amount)
        .collect::<Result<Vec<_>, _>>()?;
    let defund_nonces = get_array(map, channel_keys::DEFUND_NONCES)?
        .iter()
        .map(decode_u64)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CoreChannelState {
        channel_address: decode_address(get(map, channel_keys::CHANNEL_ADDRESS)?)?,
        alice: decode_address(get(map, channel_keys::ALICE)?)?,
        bob: decode_address(get(map, channel_keys::BOB)?)?,
        asset_ids,
        balances,
        processed_deposits_alice,
        processed_deposits_bob,
        defund_nonces,
        timeout: decode_u64(get(map, channel_keys::TIMEOUT)?)?,
        nonce: decode_u64(get(map, channel_keys::NONCE)?)?,
        merkle_root: decode_bytes32(get(map, channel_keys::MERKLE_ROOT)?)?,
    })
}

/// Decode a transfer state from canonical bytes.
pub fn decode_transfer_state(bytes: &[u8]) -> Result<CoreTransferState, CoreError> {
    let value = parse(bytes)?;
    let map = as_map(&value)?;

    Ok(CoreTransferState {
        transfer_id: TransferId(decode_bytes32(get(map, transfer_keys::TRANSFER_ID)?)?.0),
        channel_address: decode_address(get(map, transfer_keys::CHANNEL_ADDRESS)?)?,
        channel_nonce: decode_u64(get(map, transfer_keys::CHANNEL_NONCE)?)?,
        transfer_definition: decode_address(get(map, transfer_keys::TRANSFER_DEFINITION)?)?,
        initiator: decode_address(get(map, transfer_keys::INITIATOR)?)?,
        responder: decode_address(get(map, transfer_keys::RESPONDER)?)?,
        asset_id: AssetId(decode_address(get(map, transfer_keys::ASSET_ID)?)?),
        balance: decode_balance(get(map, transfer_keys::BALANCE)?)?,
        transfer_timeout: decode_u64(get(map, transfer_keys::TRANSFER_TIMEOUT)?)?,
        initial_state_hash: decode_bytes32(get(map, transfer_keys::INITIAL_STATE_HASH)?)?,
    })
}

/// Decode an update from canonical bytes.
pub fn decode_update(bytes: &[u8]) -> Result<ChannelUpdate, CoreError> {
    let value = parse(bytes)?;
    let map = as_map(&value)?;

    let uuid_bytes = decode_bytes(get(map, update_keys::ID_UUID)?, 16)?;
    let id = uuid::Uuid::from_slice(&uuid_bytes)
        .map_err(|e| CoreError::MalformedEncoding(format!("invalid uuid: {e}")))?;
    let id_signature = decode_signature(get(map, update_keys::ID_SIGNATURE)?)?;

    let type_tag = decode_u64(get(map, update_keys::UPDATE_TYPE)?)?;
    let update_type = u8::try_from(type_tag)
        .ok()
        .and_then(UpdateType::from_u8)
        .ok_or_else(|| CoreError::MalformedEncoding(format!("invalid update type {type_tag}")))?;
    let details = decode_details(update_type, get(map, update_keys::DETAILS)?)?;

    Ok(ChannelUpdate {
        id: UpdateId {
            id,
            signature: id_signature,
        },
        channel_address: decode_address(get(map, update_keys::CHANNEL_ADDRESS)?)?,
        from_identifier: decode_address(get(map, update_keys::FROM)?)?,
        to_identifier: decode_address(get(map, update_keys::TO)?)?,
        nonce: decode_u64(get(map, update_keys::NONCE)?)?,
        asset_id: AssetId(decode_address(get(map, update_keys::ASSET_ID)?)?),
        balance: decode_balance(get(map, update_keys::BALANCE)?)?,
        details,
        alice_signature: decode_option_signature(get(map, update_keys::ALICE_SIGNATURE)?)?,
        bob_signature: decode_option_signature(get(map, update_keys::BOB_SIGNATURE)?)?,
    })
}

fn decode_details(update_type: UpdateType, value: &Value) -> Result<UpdateDetails, CoreError> {
    let map = as_map(value)?;
    match update_type {
        UpdateType::Setup => Ok(UpdateDetails::Setup {
            timeout: decode_u64(get(map, 0)?)?,
            network_context: NetworkContext {
                chain_id: decode_u64(get(map, 1)?)?,
                channel_factory: decode_address(get(map, 2)?)?,
            },
        }),
        UpdateType::Deposit => Ok(UpdateDetails::Deposit {
            total_deposits_alice: decode_amount(get(map, 0)?)?,
            total_deposits_bob: decode_amount(get(map, 1)?)?,
        }),
        UpdateType::Create => Ok(UpdateDetails::Create {
            transfer_id: TransferId(decode_bytes32(get(map, 0)?)?.0),
            balance: decode_balance(get(map, 1)?)?,
            transfer_definition: decode_address(get(map, 2)?)?,
            transfer_timeout: decode_u64(get(map, 3)?)?,
            initial_state: match get(map, 4)? {
                Value::Bytes(b) => b.clone(),
                _ => return Err(CoreError::MalformedEncoding("initial state".into())),
            },
            meta: match get(map, 5)? {
                Value::Null => None,
                Value::Text(s) => Some(s.clone()),
                _ => return Err(CoreError::MalformedEncoding("meta".into())),
            },
        }),
        UpdateType::Resolve => Ok(UpdateDetails::Resolve {
            transfer_id: TransferId(decode_bytes32(get(map, 0)?)?.0),
            transfer_resolver: match get(map, 1)? {
                Value::Bytes(b) => b.clone(),
                _ => return Err(CoreError::MalformedEncoding("resolver".into())),
            },
        }),
    }
}

fn parse(bytes: &[u8]) -> Result<Value, CoreError> {
    ciborium::from_reader(std::io::Cursor::new(bytes))
        .map_err(|e| CoreError::DecodingError(e.to_string()))
}

fn as_map(value: &Value) -> Result<&Vec<(Value, Value)>, CoreError> {
    match value {
        Value::Map(m) => Ok(m),
        _ => Err(CoreError::MalformedEncoding("expected map".into())),
    }
}

fn get<'a>(map: &'a [(Value, Value)], k: u64) -> Result<&'a Value, CoreError> {
    map.iter()
        .find_map(|(key, v)| match key {
            Value::Integer(i) if i128::from(*i) == k as i128 => Some(v),
            _ => None,
        })
        .ok_or_else(|| CoreError::MalformedEncoding(format!("missing field {k}")))
}

fn get_array<'a>(map: &'a [(Value, Value)], k: u64) -> Result<&'a Vec<Value>, CoreError> {
    match get(map, k)? {
        Value::Array(arr) => Ok(arr),
        _ => Err(CoreError::MalformedEncoding(format!(
            "field {k} is not an array"
        ))),
    }
}

fn decode_bytes(value: &Value, len: usize) -> Result<Vec<u8>, CoreError> {
    match value {
        Value::Bytes(b) if b.len() == len => Ok(b.clone()),
        Value::Bytes(b) => Err(CoreError::MalformedEncoding(format!(
            "expected {len} bytes, got {}",
            b.len()
        ))),
        _ => Err(CoreError::MalformedEncoding("expected bytes".into())),
    }
}

fn decode_address(value: &Value) -> Result<Address, CoreError> {
    let bytes = decode_bytes(value, 20)?;
    let mut arr = [0u8; 20];
    arr.copy_from_slice(&bytes);
    Ok(Address(arr))
}

fn decode_bytes32(value: &Value) -> Result<Bytes32, CoreError> {
    let bytes = decode_bytes(value, 32)?;
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(Bytes32(arr))
}

fn decode_signature(value: &Value) -> Result<Signature, CoreError> {
    let bytes = decode_bytes(value, 65)?;
    let mut arr = [0u8; 65];
    arr.copy_from_slice(&bytes);
    Ok(Signature(arr))
}

fn decode_option_signature(value: &Value) -> Result<Option<Signature>, CoreError> {
    match value {
        Value::Null => Ok(None),
        other => Ok(Some(decode_signature(other)?)),
    }
}

fn decode_u64(value: &Value) -> Result<u64, CoreError> {
    match value {
        Value::Integer(i) => u64::try_from(i128::from(*i))
            .map_err(|_| CoreError::MalformedEncoding("integer out of range".into())),
        _ => Err(CoreError::MalformedEncoding("expected integer".into())),
    }
}

fn decode_amount(value: &Value) -> Result<u128, CoreError> {
    let bytes = decode_bytes(value, 16)?;
    let mut arr = [0u8; 16];
    arr.copy_from_slice(&bytes);
    Ok(u128::from_be_bytes(arr))
}

fn decode_balance(value: &Value) -> Result<Balance, CoreError> {
    let arr = match value {
        Value::Array(a) if a.len() == 2 => a,
        _ => return Err(CoreError::MalformedEncoding("expected balance pair".into())),
    };
    let to = match &arr[0] {
        Value::Array(a) if a.len() == 2 => {
            [decode_address(&a[0])?, decode_address(&a[1])?]
        }
        _ => return Err(CoreError::MalformedEncoding("balance recipients".into())),
    };
    let amount = match &arr[1] {
        Value::Array(a) if a.len() == 2 => [decode_amount(&a[0])?, decode_amount(&a[1])?],
        _ => return Err(CoreError::MalformedEncoding("balance amounts".into())),
    };
    Ok(Balance { to, amount })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ChannelSigner;
    use crate::update::UpdateId;

    fn sample_channel_state() -> CoreChannelState {
        CoreChannelState {
            channel_address: Address::from_bytes([0xcc; 20]),
            alice: Address::from_bytes([0x0a; 20]),
            bob: Address::from_bytes([0x0b; 20]),
            asset_ids: vec![AssetId::NATIVE, AssetId(Address::from_bytes([0x77; 20]))],
            balances: vec![
                Balance {
                    to: [Address::from_bytes([0x0a; 20]), Address::from_bytes([0x0b; 20])],
                    amount: [100, 25],
                },
                Balance {
                    to: [Address::from_bytes([0x0a; 20]), Address::from_bytes([0x0b; 20])],
                    amount: [u128::MAX, 0],
                },
            ],
            processed_deposits_alice: vec![100, u128::MAX],
            processed_deposits_bob: vec![25, 0],
            defund_nonces: vec![1, 1],
            timeout: 86_400,
            nonce: 7,
            merkle_root: Bytes32::from_bytes([0x33; 32]),
        }
    }

    fn sample_transfer_state() -> CoreTransferState {
        CoreTransferState {
            transfer_id: TransferId::from_bytes([0x55; 32]),
            channel_address: Address::from_bytes([0xcc; 20]),
            channel_nonce: 8,
            transfer_definition: Address::from_bytes([0xde; 20]),
            initiator: Address::from_bytes([0x0a; 20]),
            responder: Address::from_bytes([0x0b; 20]),
            asset_id: AssetId::NATIVE,
            balance: Balance {
                to: [Address::from_bytes([0x0a; 20]), Address::from_bytes([0x0b; 20])],
                amount: [42, 0],
            },
            transfer_timeout: 3_600,
            initial_state_hash: Bytes32::from_bytes([0x99; 32]),
        }
    }

    fn sample_update() -> ChannelUpdate {
        let signer = ChannelSigner::from_seed(&[0x21; 32]).unwrap();
        ChannelUpdate {
            id: UpdateId::sign(&signer),
            channel_address: Address::from_bytes([0xcc; 20]),
            from_identifier: Address::from_bytes([0x0a; 20]),
            to_identifier: Address::from_bytes([0x0b; 20]),
            nonce: 9,
            asset_id: AssetId::NATIVE,
            balance: Balance {
                to: [Address::from_bytes([0x0a; 20]), Address::from_bytes([0x0b; 20])],
                amount: [58, 0],
            },
            details: UpdateDetails::Create {
                transfer_id: TransferId::from_bytes([0x55; 32]),
                balance: Balance {
                    to: [Address::from_bytes([0x0a; 20]), Address::from_bytes([0x0b; 20])],
                    amount: [42, 0],
                },
                transfer_definition: Address::from_bytes([0xde; 20]),
                transfer_timeout: 3_600,
                initial_state: vec![0x99; 32],
                meta: Some("invoice-123".into()),
            },
            alice_signature: Some(signer.sign(&keccak256(b"commitment"))),
            bob_signature: None,
        }
    }

    #[test]
    fn test_channel_state_roundtrip() {
        let state = sample_channel_state();
        let bytes = canonical_channel_state_bytes(&state);
        let decoded = decode_channel_state(&bytes).unwrap();
        assert_eq!(state, decoded);
        assert_eq!(hash_channel_commitment(&state), hash_channel_commitment(&decoded));
    }

    #[test]
    fn test_transfer_state_roundtrip() {
        let state = sample_transfer_state();
        let bytes = canonical_transfer_state_bytes(&state);
        let decoded = decode_transfer_state(&bytes).unwrap();
        assert_eq!(state, decoded);
        assert_eq!(hash_transfer_state(&state), hash_transfer_state(&decoded));
    }

    #[test]
    fn test_update_roundtrip() {
        for details in [
            sample_update().details,
            UpdateDetails::Setup {
                timeout: 86_400,
                network_context: NetworkContext {
                    chain_id: 1337,
                    channel_factory: Address::from_bytes([0xfa; 20]),
                },
            },
            UpdateDetails::Deposit {
                total_deposits_alice: 100,
                total_deposits_bob: u128::MAX,
            },
            UpdateDetails::Resolve {
                transfer_id: TransferId::from_bytes([0x55; 32]),
                transfer_resolver: vec![0xaa; 32],
            },
        ] {
            let mut update = sample_update();
            update.details = details;
            let bytes = canonical_update_bytes(&update);
            let decoded = decode_update(&bytes).unwrap();
            assert_eq!(update, decoded);
            assert_eq!(hash_update(&update), hash_update(&decoded));
        }
    }

    #[test]
    fn test_encoding_deterministic() {
        let state = sample_channel_state();
        assert_eq!(
            canonical_channel_state_bytes(&state),
            canonical_channel_state_bytes(&state),
        );
    }

    #[test]
    fn test_hash_update_stable_under_countersigning() {
        let mut update = sample_update();
        let before = hash_update(&update);
        let signer = ChannelSigner::from_seed(&[0x22; 32]).unwrap();
        update.bob_signature = Some(signer.sign(&keccak256(b"commitment")));
        assert_eq!(before, hash_update(&update));

        // The wire encoding does change.
        let mut unsigned = sample_update();
        unsigned.bob_signature = None;
        assert_ne!(canonical_update_bytes(&update), canonical_update_bytes(&unsigned));
    }

    #[test]
    fn test_commitment_changes_with_nonce() {
        let state = sample_channel_state();
        let mut bumped = state.clone();
        bumped.nonce += 1;
        assert_ne!(hash_channel_commitment(&state), hash_channel_commitment(&bumped));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_update(b"not cbor at all").is_err());
        assert!(decode_channel_state(&[]).is_err());
    }

    #[test]
    fn test_decode_rejects_missing_field() {
        // Valid CBOR, but an empty map.
        let bytes = encode_canonical(&Value::Map(vec![]));
        assert!(decode_channel_state(&bytes).is_err());
    }

    #[test]
    fn test_decode_rejects_wrong_width() {
        // A channel state whose alice field is 19 bytes.
        let mut state_value = match channel_state_to_value(&sample_channel_state()) {
            Value::Map(m) => m,
            _ => unreachable!(),
        };
        state_value[1].1 = Value::Bytes(vec![0u8; 19]);
        let bytes = encode_canonical(&Value::Map(state_value));
        assert!(decode_channel_state(&bytes).is_err());
    }
}
