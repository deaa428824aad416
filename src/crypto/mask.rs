//! Commutative masking over the Ristretto group
//!
//! Identifiers are hashed to group elements and blinded by scalar
//! multiplication with a per-session secret scalar:
//!
//! ```text
//! mask(x, k)          = k · H(x)
//! mask(mask(x, a), b) = b · a · H(x) = mask(mask(x, b), a)
//! unmask(v, k)        = k⁻¹ · v
//! ```
//!
//! # Security Properties
//!
//! - **Commutative**: layers can be applied and removed in any order
//! - **Deterministic**: a fixed key always maps an identifier to the same value
//! - **Prime order group**: Ristretto has no small-subgroup elements, and every
//!   32-byte encoding is canonical, so byte equality is group equality
//! - **Constant time**: scalar multiplication does not branch on secret data
//! - **Ephemeral**: [`SessionKey`] is zeroized on drop and never serialized
//!
//! Each masked value records which key ids have been applied to it. The key id
//! is a random tag with no relation to the secret scalar; it lets [`unmask`]
//! reject a key that never touched the value instead of returning garbage.

use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use std::fmt;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::types::Identifier;

/// Domain separation prefix for hashing identifiers into the group.
const HASH_TO_GROUP_DOMAIN: &[u8] = b"fedpsi/v1/identifier";

/// Masking and protocol verification errors.
///
/// Messages never include key material or cleartext identifiers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Failed to generate random key: {0}")]
    KeyGeneration(String),

    #[error("Masked value is not a valid group element")]
    InvalidEncoding,

    #[error("Key {0} was never applied to this value")]
    InvalidKeyOperation(KeyId),

    #[error("Session key material already released")]
    KeyReleased,

    #[error("Unexpected payload: expected {expected}, got {got}")]
    UnexpectedPayload {
        expected: &'static str,
        got: &'static str,
    },

    #[error("Payload length mismatch: expected {expected}, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("Protocol step out of order: {0}")]
    OutOfOrder(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Public tag identifying which session key produced a masking layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyId([u8; 8]);

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Per-session secret blinding key.
///
/// Not `Clone`, not `Serialize`: the owning exchange is the only holder.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    #[zeroize(skip)]
    id: KeyId,
    scalar: Scalar,
    inverse: Scalar,
}

impl SessionKey {
    /// Generate a fresh key from the system CSPRNG.
    pub fn generate() -> Result<Self, CryptoError> {
        let rng = SystemRandom::new();

        let mut wide = [0u8; 64];
        let mut id = [0u8; 8];
        loop {
            rng.fill(&mut wide)
                .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
            let scalar = Scalar::from_bytes_mod_order_wide(&wide);
            wide.zeroize();
            // Zero has no inverse; probability is negligible but cheap to exclude.
            if scalar == Scalar::ZERO {
                continue;
            }

            rng.fill(&mut id)
                .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

            return Ok(Self {
                id: KeyId(id),
                inverse: scalar.invert(),
                scalar,
            });
        }
    }

    /// Public tag for this key.
    pub fn id(&self) -> KeyId {
        self.id
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKey")
            .field("id", &self.id)
            .field("scalar", &"<redacted>")
            .finish()
    }
}

/// An identifier (hash) blinded with one or more session keys.
///
/// Safe to transmit. `layers` is kept sorted so values are equal regardless of
/// the order in which keys were applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MaskedValue {
    point: [u8; 32],
    layers: Vec<KeyId>,
}

impl MaskedValue {
    /// Compressed group element bytes.
    pub fn point(&self) -> &[u8; 32] {
        &self.point
    }

    /// Key ids applied to this value, sorted.
    pub fn layers(&self) -> &[KeyId] {
        &self.layers
    }

    /// Whether `key` contributed a layer.
    pub fn has_layer(&self, key: KeyId) -> bool {
        self.layers.binary_search(&key).is_ok()
    }

    /// Check the encoding is a valid group element.
    pub fn verify(&self) -> Result<(), CryptoError> {
        self.decompress().map(|_| ())
    }

    fn decompress(&self) -> Result<RistrettoPoint, CryptoError> {
        CompressedRistretto(self.point)
            .decompress()
            .ok_or(CryptoError::InvalidEncoding)
    }

    fn from_point(point: RistrettoPoint, layers: Vec<KeyId>) -> Self {
        Self {
            point: point.compress().to_bytes(),
            layers,
        }
    }

    #[cfg(test)]
    pub(crate) fn from_raw(point: [u8; 32], layers: Vec<KeyId>) -> Self {
        Self { point, layers }
    }
}

fn hash_to_group(id: &Identifier) -> RistrettoPoint {
    let mut input = Vec::with_capacity(HASH_TO_GROUP_DOMAIN.len() + id.as_bytes().len());
    input.extend_from_slice(HASH_TO_GROUP_DOMAIN);
    input.extend_from_slice(id.as_bytes());
    let point = RistrettoPoint::hash_from_bytes::<Sha512>(&input);
    input.zeroize();
    point
}

/// Apply the first masking layer to a cleartext identifier.
pub fn mask_identifier(id: &Identifier, key: &SessionKey) -> MaskedValue {
    let point = hash_to_group(id) * key.scalar;
    MaskedValue::from_point(point, vec![key.id])
}

/// Add one masking layer to an already-masked value.
pub fn mask(value: &MaskedValue, key: &SessionKey) -> Result<MaskedValue, CryptoError> {
    let point = value.decompress()? * key.scalar;

    let mut layers = value.layers.clone();
    let pos = layers.binary_search(&key.id).unwrap_or_else(|p| p);
    layers.insert(pos, key.id);

    Ok(MaskedValue::from_point(point, layers))
}

/// Remove the layer that `key` applied.
///
/// Fails with [`CryptoError::InvalidKeyOperation`] when `key` never masked
/// this value.
pub fn unmask(value: &MaskedValue, key: &SessionKey) -> Result<MaskedValue, CryptoError> {
    let pos = value
        .layers
        .binary_search(&key.id)
        .map_err(|_| CryptoError::InvalidKeyOperation(key.id))?;

    let point = value.decompress()? * key.inverse;

    let mut layers = value.layers.clone();
    layers.remove(pos);

    Ok(MaskedValue::from_point(point, layers))
}
