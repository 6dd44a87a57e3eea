//! Cryptographic primitives for the weir protocol.
//!
//! Digests are keccak256 over canonical encodings. Signatures are 65-byte
//! recoverable secp256k1 signatures over the `"\x19Ethereum Signed
//! Message:\n32"` prefix of the digest, so the counterparty (and an onchain
//! adjudicator) can recover the signer address rather than needing the
//! public key on the wire.

use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;

use crate::error::CoreError;
use crate::types::{Address, Bytes32};

/// Compute the keccak256 digest of the given data.
pub fn keccak256(data: &[u8]) -> Bytes32 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    Bytes32(hasher.finalize().into())
}

/// Prefix a digest the way `eth_sign` does before signing or recovery.
fn eth_signed_message_hash(digest: &Bytes32) -> Bytes32 {
    let mut hasher = Keccak256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n32");
    hasher.update(digest.as_bytes());
    Bytes32(hasher.finalize().into())
}

/// A 65-byte recoverable signature: `r || s || v`, `v` in `{27, 28}`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub [u8; 65]);

impl Signature {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 65]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The zero signature (invalid, used as placeholder).
    pub const ZERO: Self = Self([0u8; 65]);
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}...)", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 65]> for Signature {
    fn from(bytes: [u8; 65]) -> Self {
        Self(bytes)
    }
}

// serde's derive stops at 32-byte arrays, so the 65-byte signature is
// serialized as a plain byte string.
impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = Vec::deserialize(deserializer)?;
        let arr: [u8; 65] = bytes
            .try_into()
            .map_err(|_| de::Error::custom("signature must be 65 bytes"))?;
        Ok(Self(arr))
    }
}

/// A signing capability for one channel participant.
///
/// Wraps a k256 secp256k1 signing key; the participant's identity is the
/// address recovered from its public key.
#[derive(Clone)]
pub struct ChannelSigner {
    signing_key: SigningKey,
}

impl ChannelSigner {
    /// Generate a new random signer.
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut rand::thread_rng());
        Self { signing_key }
    }

    /// Create from a 32-byte seed.
    ///
    /// Fails if the seed is not a valid secp256k1 scalar.
    pub fn from_seed(seed: &[u8; 32]) -> Result<Self, CoreError> {
        let signing_key =
            SigningKey::from_slice(seed).map_err(|_| CoreError::InvalidSecretKey)?;
        Ok(Self { signing_key })
    }

    /// The address this signer's signatures recover to.
    pub fn address(&self) -> Address {
        address_of(self.signing_key.verifying_key())
    }

    /// Sign a digest, producing a recoverable 65-byte signature.
    pub fn sign(&self, digest: &Bytes32) -> Signature {
        let prehash = eth_signed_message_hash(digest);
        let (sig, recid) = self
            .signing_key
            .sign_prehash_recoverable(prehash.as_bytes())
            .expect("signing with a valid key cannot fail");

        let mut bytes = [0u8; 65];
        bytes[..64].copy_from_slice(&sig.to_bytes());
        bytes[64] = 27 + recid.to_byte();
        Signature(bytes)
    }
}

impl fmt::Debug for ChannelSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelSigner({:?})", self.address())
    }
}

/// Derive the 20-byte address from a verifying key: the last 20 bytes of
/// keccak256 over the uncompressed public key (without the 0x04 tag).
fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&digest.as_bytes()[12..]);
    Address(addr)
}

/// Recover the signer address of a signature over `digest`.
pub fn recover_signer(digest: &Bytes32, signature: &Signature) -> Result<Address, CoreError> {
    let prehash = eth_signed_message_hash(digest);

    let sig = EcdsaSignature::from_slice(&signature.0[..64])
        .map_err(|_| CoreError::InvalidSignature)?;
    let v = signature.0[64]
        .checked_sub(27)
        .ok_or(CoreError::InvalidSignature)?;
    let recid = RecoveryId::from_byte(v).ok_or(CoreError::InvalidSignature)?;

    let key = VerifyingKey::recover_from_prehash(prehash.as_bytes(), &sig, recid)
        .map_err(|_| CoreError::InvalidSignature)?;
    Ok(address_of(&key))
}

/// Verify that `signature` over `digest` recovers to exactly `address`.
pub fn verify_signature(
    digest: &Bytes32,
    signature: &Signature,
    address: &Address,
) -> Result<(), CoreError> {
    let recovered = recover_signer(digest, signature)?;
    if &recovered == address {
        Ok(())
    } else {
        Err(CoreError::SignerMismatch {
            expected: *address,
            recovered,
        })
    }
}
