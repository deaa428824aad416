//! Bloom-filter PSI (approximate)
//!
//! Same first round as the DH variant, but the reply carries a compact Bloom
//! filter over the responder's singly-masked set instead of relying on the
//! initiator to re-mask it:
//!
//! ```text
//! A → B : k_a·H(a_i)                      (shuffled)
//! B → A : k_b·k_a·H(a_i)  (A's order),  Bloom{ k_b·H(b_j) }
//! A     : unmask(k_b·k_a·H(a_i), k_a) = k_b·H(a_i)  ∈? Bloom
//! ```
//!
//! # Error Rates
//!
//! - **False negatives**: none. Every true match is reported.
//! - **False positives**: each non-matching item is reported with probability
//!   at most `false_positive_rate` (default 1e-6), from the optimal filter
//!   sizing `m = -n·ln(p) / ln(2)²`, `k = (m/n)·ln(2)`.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use super::{shuffled, AlgorithmKind, PsiAlgorithm, PsiPayload};
use crate::crypto::{mask, mask_identifier, unmask, CryptoError, SessionKey};
use crate::types::{Identifier, IntersectionResult, PrivateSet};

/// Default target false positive rate.
pub const DEFAULT_FALSE_POSITIVE_RATE: f64 = 1e-6;

/// Upper bound on filter size accepted from a peer (512 MiB of bits).
const MAX_FILTER_BITS: u64 = 1 << 32;

/// Upper bound on hash functions.
const MAX_HASHES: u32 = 32;

/// Smallest filter we build, so an empty set still yields a valid filter.
const MIN_FILTER_BITS: u64 = 64;

/// Fixed-size Bloom filter keyed by masked group elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloomFilter {
    num_bits: u64,
    num_hashes: u32,
    words: Vec<u64>,
}

impl BloomFilter {
    /// Size a filter for `expected_items` at `false_positive_rate`.
    pub fn with_rate(expected_items: usize, false_positive_rate: f64) -> Result<Self, CryptoError> {
        validate_rate(false_positive_rate)?;

        let n = expected_items.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;
        let bits = (-(n * false_positive_rate.ln()) / (ln2 * ln2)).ceil() as u64;
        let num_bits = bits.clamp(MIN_FILTER_BITS, MAX_FILTER_BITS);
        let num_hashes = ((num_bits as f64 / n) * ln2).round() as u32;

        Ok(Self::with_params(num_bits, num_hashes.clamp(1, MAX_HASHES)))
    }

    fn with_params(num_bits: u64, num_hashes: u32) -> Self {
        let words = num_bits.div_ceil(64) as usize;
        Self {
            num_bits,
            num_hashes,
            words: vec![0; words],
        }
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    pub fn insert(&mut self, element: &[u8]) {
        let bits: Vec<u64> = self.bit_indexes(element).collect();
        for bit in bits {
            self.words[(bit / 64) as usize] |= 1u64 << (bit % 64);
        }
    }

    pub fn contains(&self, element: &[u8]) -> bool {
        self.bit_indexes(element)
            .all(|bit| self.words[(bit / 64) as usize] & (1u64 << (bit % 64)) != 0)
    }

    /// Structural checks for a filter received from a peer.
    pub fn validate(&self) -> Result<(), CryptoError> {
        if self.num_bits == 0 || self.num_bits > MAX_FILTER_BITS {
            return Err(CryptoError::InvalidParameter(format!(
                "filter size {} out of range",
                self.num_bits
            )));
        }
        if self.num_hashes == 0 || self.num_hashes > MAX_HASHES {
            return Err(CryptoError::InvalidParameter(format!(
                "filter hash count {} out of range",
                self.num_hashes
            )));
        }
        if (self.words.len() as u64) != self.num_bits.div_ceil(64) {
            return Err(CryptoError::InvalidParameter(
                "filter words do not match declared size".to_string(),
            ));
        }
        Ok(())
    }

    /// Kirsch–Mitzenmacher double hashing over SHA-256.
    fn bit_indexes<'a>(&'a self, element: &[u8]) -> impl Iterator<Item = u64> + 'a {
        let digest = Sha256::digest(element);
        let mut h1 = [0u8; 8];
        let mut h2 = [0u8; 8];
        h1.copy_from_slice(&digest[0..8]);
        h2.copy_from_slice(&digest[8..16]);
        let h1 = u64::from_le_bytes(h1);
        let h2 = u64::from_le_bytes(h2) | 1;

        (0..self.num_hashes as u64)
            .map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits)
    }
}

fn validate_rate(rate: f64) -> Result<(), CryptoError> {
    if !(rate > 0.0 && rate < 1.0) {
        return Err(CryptoError::InvalidParameter(
            "false positive rate must be between 0.0 and 1.0 (exclusive)".to_string(),
        ));
    }
    Ok(())
}

/// Pairwise Bloom-filter exchange.
pub struct BloomPsi {
    key: Option<SessionKey>,
    false_positive_rate: f64,

    /// Own identifiers in the (shuffled) order they were sent.
    sent: Option<Vec<Identifier>>,
}

impl BloomPsi {
    pub fn new(false_positive_rate: f64) -> Result<Self, CryptoError> {
        validate_rate(false_positive_rate)?;
        Ok(Self {
            key: Some(SessionKey::generate()?),
            false_positive_rate,
            sent: None,
        })
    }

    fn key(&self) -> Result<&SessionKey, CryptoError> {
        self.key.as_ref().ok_or(CryptoError::KeyReleased)
    }
}

impl PsiAlgorithm for BloomPsi {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::BloomFilter
    }

    fn rounds(&self) -> u32 {
        2
    }

    fn propose(&mut self, local: &PrivateSet) -> Result<PsiPayload, CryptoError> {
        if self.sent.is_some() {
            return Err(CryptoError::OutOfOrder("propose called twice".to_string()));
        }

        let key = self.key()?;
        let order = shuffled(local);
        let masked = order.iter().map(|id| mask_identifier(id, key)).collect();

        self.sent = Some(order);
        Ok(PsiPayload::Masked(masked))
    }

    fn respond(
        &mut self,
        round: u32,
        inbound: &PsiPayload,
    ) -> Result<Option<PsiPayload>, CryptoError> {
        let sent = self
            .sent
            .as_ref()
            .ok_or_else(|| CryptoError::OutOfOrder("respond before propose".to_string()))?;

        match (round, inbound) {
            (0, PsiPayload::Masked(values)) => {
                let key = self.key()?;
                let double = values
                    .iter()
                    .map(|v| mask(v, key))
                    .collect::<Result<Vec<_>, _>>()?;

                let mut filter = BloomFilter::with_rate(sent.len(), self.false_positive_rate)?;
                for id in sent {
                    filter.insert(mask_identifier(id, key).point());
                }

                Ok(Some(PsiPayload::DoubleMaskedWithFilter {
                    values: double,
                    filter,
                }))
            }
            (1, PsiPayload::DoubleMaskedWithFilter { values, filter }) => {
                if values.len() != sent.len() {
                    return Err(CryptoError::LengthMismatch {
                        expected: sent.len(),
                        got: values.len(),
                    });
                }
                filter.validate()?;
                Ok(None)
            }
            (0, other) => Err(CryptoError::UnexpectedPayload {
                expected: "masked",
                got: other.label(),
            }),
            (1, other) => Err(CryptoError::UnexpectedPayload {
                expected: "double_masked_with_filter",
                got: other.label(),
            }),
            (n, _) => Err(CryptoError::OutOfOrder(format!("unexpected round {}", n))),
        }
    }

    fn finalize_intersection(
        &mut self,
        exchanged: &[PsiPayload],
    ) -> Result<IntersectionResult, CryptoError> {
        let key = self.key()?;
        let sent = self
            .sent
            .as_ref()
            .ok_or_else(|| CryptoError::OutOfOrder("finalize before propose".to_string()))?;

        let (values, filter) = match exchanged.get(1) {
            Some(PsiPayload::DoubleMaskedWithFilter { values, filter }) => (values, filter),
            Some(other) => {
                return Err(CryptoError::UnexpectedPayload {
                    expected: "double_masked_with_filter",
                    got: other.label(),
                })
            }
            None => return Err(CryptoError::OutOfOrder("missing round 1".to_string())),
        };
        if values.len() != sent.len() {
            return Err(CryptoError::LengthMismatch {
                expected: sent.len(),
                got: values.len(),
            });
        }
        filter.validate()?;

        let mut result = IntersectionResult::new();
        for (id, value) in sent.iter().zip(values) {
            let peer_only = unmask(value, key)?;
            if filter.contains(peer_only.point()) {
                result.insert(id.clone());
            }
        }

        Ok(result)
    }

    fn release(&mut self) {
        self.key = None;
        if let Some(mut sent) = self.sent.take() {
            for id in sent.iter_mut() {
                id.zeroize();
            }
        }
    }
}

impl Drop for BloomPsi {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[&str]) -> PrivateSet {
        values.iter().map(|v| Identifier::from(*v)).collect()
    }

    fn ids(values: &[&str]) -> IntersectionResult {
        values.iter().map(|v| Identifier::from(*v)).collect()
    }

    fn run_pair(a: &PrivateSet, b: &PrivateSet) -> (IntersectionResult, IntersectionResult) {
        let mut psi_a = BloomPsi::new(DEFAULT_FALSE_POSITIVE_RATE).unwrap();
        let mut psi_b = BloomPsi::new(DEFAULT_FALSE_POSITIVE_RATE).unwrap();

        let a0 = psi_a.propose(a).unwrap();
        let b0 = psi_b.propose(b).unwrap();
        let a1 = psi_a.respond(0, &b0).unwrap().unwrap();
        let b1 = psi_b.respond(0, &a0).unwrap().unwrap();
        assert!(psi_a.respond(1, &b1).unwrap().is_none());
        assert!(psi_b.respond(1, &a1).unwrap().is_none());

        (
            psi_a.finalize_intersection(&[b0, b1]).unwrap(),
            psi_b.finalize_intersection(&[a0, a1]).unwrap(),
        )
    }

    #[test]
    fn test_bloom_full_protocol() {
        let (res_a, res_b) = run_pair(&set(&["a1", "a2", "a3"]), &set(&["a2", "a3", "a4"]));
        assert_eq!(res_a, ids(&["a2", "a3"]));
        assert_eq!(res_b, ids(&["a2", "a3"]));
    }

    #[test]
    fn test_bloom_empty_sets() {
        let (res_a, res_b) = run_pair(&set(&[]), &set(&["x"]));
        assert!(res_a.is_empty());
        assert!(res_b.is_empty());
    }

    #[test]
    fn test_filter_has_no_false_negatives() {
        let mut filter = BloomFilter::with_rate(100, 0.01).unwrap();
        for i in 0..100u32 {
            filter.insert(&i.to_le_bytes());
        }
        for i in 0..100u32 {
            assert!(filter.contains(&i.to_le_bytes()));
        }
    }

    #[test]
    fn test_filter_false_positive_rate_is_bounded() {
        let mut filter = BloomFilter::with_rate(1000, 0.01).unwrap();
        for i in 0..1000u32 {
            filter.insert(&i.to_le_bytes());
        }
        let false_positives = (1000..11_000u32)
            .filter(|i| filter.contains(&i.to_le_bytes()))
            .count();
        // 1% of 10k is 100; allow generous slack for variance
        assert!(false_positives < 250, "got {} false positives", false_positives);
    }

    #[test]
    fn test_filter_sizing() {
        let filter = BloomFilter::with_rate(1000, 0.01).unwrap();
        // m ≈ 9586 bits, k ≈ 7 for n=1000, p=0.01
        assert!(filter.num_bits() > 9000 && filter.num_bits() < 10_000);
        assert_eq!(filter.num_hashes(), 7);
        assert!(filter.validate().is_ok());
    }

    #[test]
    fn test_filter_rejects_bad_rate() {
        assert!(BloomFilter::with_rate(10, 0.0).is_err());
        assert!(BloomFilter::with_rate(10, 1.0).is_err());
        assert!(BloomPsi::new(-0.1).is_err());
    }

    #[test]
    fn test_filter_validate_rejects_tampering() {
        let mut filter = BloomFilter::with_rate(10, 0.01).unwrap();
        filter.words.pop();
        assert!(filter.validate().is_err());

        let mut filter = BloomFilter::with_rate(10, 0.01).unwrap();
        filter.num_hashes = 0;
        assert!(filter.validate().is_err());
    }

    #[test]
    fn test_finalize_rejects_reply_without_our_layer() {
        let mut psi_a = BloomPsi::new(DEFAULT_FALSE_POSITIVE_RATE).unwrap();
        let mut psi_b = BloomPsi::new(DEFAULT_FALSE_POSITIVE_RATE).unwrap();
        psi_a.propose(&set(&["a"])).unwrap();
        let b0 = psi_b.propose(&set(&["a"])).unwrap();

        let forged = match &b0 {
            PsiPayload::Masked(values) => PsiPayload::DoubleMaskedWithFilter {
                values: values.clone(),
                filter: BloomFilter::with_rate(1, 0.01).unwrap(),
            },
            _ => unreachable!(),
        };
        let result = psi_a.finalize_intersection(&[b0, forged]);
        assert!(matches!(result, Err(CryptoError::InvalidKeyOperation(_))));
    }
}
