//! Pluggable PSI algorithm variants.
//!
//! Every variant drives one pairwise exchange with one peer and implements the
//! same three-step contract:
//!
//! 1. [`PsiAlgorithm::propose`] masks the local set for the first outbound message
//! 2. [`PsiAlgorithm::respond`] consumes each inbound round and may answer
//! 3. [`PsiAlgorithm::finalize_intersection`] recovers the local identifiers
//!    matched by the peer
//!
//! The coordinator owns one instance per peer, so each pairing gets its own
//! fresh key material. Variants are selected by [`AlgorithmKind`] in config.

pub mod bloom;
pub mod dh;

#[cfg(test)]
mod proptests;

pub use bloom::{BloomFilter, BloomPsi, DEFAULT_FALSE_POSITIVE_RATE};
pub use dh::DhPsi;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::crypto::{CryptoError, MaskedValue};
use crate::types::{IntersectionResult, PrivateSet};

/// Available PSI variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlgorithmKind {
    /// Diffie–Hellman double masking. Exact.
    #[serde(rename = "dh")]
    DhDoubleMask,

    /// DH masking with a Bloom filter reply. No false negatives; false
    /// positives bounded by the configured rate.
    #[serde(rename = "bloom")]
    BloomFilter,
}

impl AlgorithmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmKind::DhDoubleMask => "dh",
            AlgorithmKind::BloomFilter => "bloom",
        }
    }

    /// Whether the variant computes the exact intersection.
    pub fn is_exact(&self) -> bool {
        matches!(self, AlgorithmKind::DhDoubleMask)
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlgorithmKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dh" | "ecdh" | "dh_double_mask" => Ok(AlgorithmKind::DhDoubleMask),
            "bloom" | "bloom_filter" => Ok(AlgorithmKind::BloomFilter),
            other => Err(format!("Unknown PSI algorithm '{}'", other)),
        }
    }
}

/// Variant selection plus variant-specific tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    #[serde(default = "default_kind")]
    pub kind: AlgorithmKind,

    /// Target false positive rate for the Bloom variant.
    #[serde(default = "default_false_positive_rate")]
    pub false_positive_rate: f64,
}

fn default_kind() -> AlgorithmKind {
    AlgorithmKind::DhDoubleMask
}

fn default_false_positive_rate() -> f64 {
    DEFAULT_FALSE_POSITIVE_RATE
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            false_positive_rate: default_false_positive_rate(),
        }
    }
}

impl AlgorithmConfig {
    pub fn new(kind: AlgorithmKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }
}

/// Message body exchanged between two variants.
///
/// Only group elements travel on the wire; cleartext identifiers never do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PsiPayload {
    /// Sender's own set under the sender's key, shuffled.
    Masked(Vec<MaskedValue>),

    /// Receiver's set re-masked by the sender, in the receiver's order.
    DoubleMasked(Vec<MaskedValue>),

    /// Receiver's set re-masked by the sender, plus a filter over the
    /// sender's own singly-masked set.
    DoubleMaskedWithFilter {
        values: Vec<MaskedValue>,
        filter: BloomFilter,
    },
}

impl PsiPayload {
    pub fn label(&self) -> &'static str {
        match self {
            PsiPayload::Masked(_) => "masked",
            PsiPayload::DoubleMasked(_) => "double_masked",
            PsiPayload::DoubleMaskedWithFilter { .. } => "double_masked_with_filter",
        }
    }

    /// Number of masked values carried.
    pub fn len(&self) -> usize {
        match self {
            PsiPayload::Masked(values) | PsiPayload::DoubleMasked(values) => values.len(),
            PsiPayload::DoubleMaskedWithFilter { values, .. } => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Capability contract shared by all PSI variants.
///
/// Instances are single-use: one peer, one session.
pub trait PsiAlgorithm: Send + Sync {
    fn kind(&self) -> AlgorithmKind;

    /// Number of inbound rounds expected from the peer.
    fn rounds(&self) -> u32;

    /// Generate the opening message from the local set.
    fn propose(&mut self, local: &PrivateSet) -> Result<PsiPayload, CryptoError>;

    /// Consume the peer's message for `round`; returns the reply to send as
    /// round `round + 1`, if any.
    fn respond(&mut self, round: u32, inbound: &PsiPayload)
        -> Result<Option<PsiPayload>, CryptoError>;

    /// Recover the local identifiers that the peer also holds.
    ///
    /// `exchanged` holds every inbound message from the peer, indexed by round.
    fn finalize_intersection(
        &mut self,
        exchanged: &[PsiPayload],
    ) -> Result<IntersectionResult, CryptoError>;

    /// Destroy key material and buffered values.
    fn release(&mut self);
}

/// Build a fresh variant instance with new key material.
pub fn new_algorithm(config: &AlgorithmConfig) -> Result<Box<dyn PsiAlgorithm>, CryptoError> {
    match config.kind {
        AlgorithmKind::DhDoubleMask => Ok(Box::new(DhPsi::new()?)),
        AlgorithmKind::BloomFilter => Ok(Box::new(BloomPsi::new(config.false_positive_rate)?)),
    }
}

/// Shuffle identifiers before masking to break positional correlation.
pub(crate) fn shuffled(local: &PrivateSet) -> Vec<crate::types::Identifier> {
    use rand::seq::SliceRandom;

    let mut items: Vec<_> = local.iter().cloned().collect();
    items.shuffle(&mut rand::rngs::OsRng);
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_str() {
        assert_eq!("dh".parse::<AlgorithmKind>(), Ok(AlgorithmKind::DhDoubleMask));
        assert_eq!("Bloom".parse::<AlgorithmKind>(), Ok(AlgorithmKind::BloomFilter));
        assert!("rsa".parse::<AlgorithmKind>().is_err());
    }

    #[test]
    fn test_kind_serde_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            kind: AlgorithmKind,
        }
        let w: Wrapper = toml::from_str("kind = \"bloom\"").unwrap();
        assert_eq!(w.kind, AlgorithmKind::BloomFilter);
    }

    #[test]
    fn test_only_dh_is_exact() {
        assert!(AlgorithmKind::DhDoubleMask.is_exact());
        assert!(!AlgorithmKind::BloomFilter.is_exact());
    }

    #[test]
    fn test_factory_builds_requested_kind() {
        let dh = new_algorithm(&AlgorithmConfig::new(AlgorithmKind::DhDoubleMask)).unwrap();
        let bloom = new_algorithm(&AlgorithmConfig::new(AlgorithmKind::BloomFilter)).unwrap();
        assert_eq!(dh.kind(), AlgorithmKind::DhDoubleMask);
        assert_eq!(bloom.kind(), AlgorithmKind::BloomFilter);
        assert_eq!(dh.rounds(), 2);
        assert_eq!(bloom.rounds(), 2);
    }

    #[test]
    fn test_factory_rejects_bad_rate() {
        let config = AlgorithmConfig {
            kind: AlgorithmKind::BloomFilter,
            false_positive_rate: 1.5,
        };
        assert!(new_algorithm(&config).is_err());
    }
}
