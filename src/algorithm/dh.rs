//! Diffie–Hellman double-masking PSI (exact)
//!
//! # Protocol Overview
//!
//! 1. **Round 0 out**: mask own items with `k_self`, shuffle, send
//! 2. **Round 0 in**: re-mask the peer's values with `k_self`, send them back
//!    in the order received
//! 3. **Round 1 in**: receive own values re-masked by the peer
//! 4. **Finalize**: an own item matches when `k_peer · k_self · H(x)` appears
//!    among the locally computed `k_self · k_peer · H(y)` values
//!
//! Commutativity makes both representations identical exactly when `x == y`,
//! so the result is the exact intersection. Neither side ever unmasks.

use std::collections::HashSet;

use super::{shuffled, AlgorithmKind, PsiAlgorithm, PsiPayload};
use crate::crypto::{mask, mask_identifier, CryptoError, SessionKey};
use crate::types::{Identifier, IntersectionResult, PrivateSet};
use zeroize::Zeroize;

/// Pairwise DH double-masking exchange.
pub struct DhPsi {
    key: Option<SessionKey>,

    /// Own identifiers in the (shuffled) order they were sent.
    sent: Option<Vec<Identifier>>,

    /// Peer's values re-masked with our key.
    peer_double: Option<HashSet<[u8; 32]>>,
}

impl DhPsi {
    pub fn new() -> Result<Self, CryptoError> {
        Ok(Self {
            key: Some(SessionKey::generate()?),
            sent: None,
            peer_double: None,
        })
    }

    fn key(&self) -> Result<&SessionKey, CryptoError> {
        self.key.as_ref().ok_or(CryptoError::KeyReleased)
    }
}

impl PsiAlgorithm for DhPsi {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::DhDoubleMask
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
        let sent_len = self
            .sent
            .as_ref()
            .map(Vec::len)
            .ok_or_else(|| CryptoError::OutOfOrder("respond before propose".to_string()))?;

        match (round, inbound) {
            (0, PsiPayload::Masked(values)) => {
                let key = self.key()?;
                let double = values
                    .iter()
                    .map(|v| mask(v, key))
                    .collect::<Result<Vec<_>, _>>()?;

                self.peer_double = Some(double.iter().map(|v| *v.point()).collect());
                Ok(Some(PsiPayload::DoubleMasked(double)))
            }
            (1, PsiPayload::DoubleMasked(values)) => {
                if values.len() != sent_len {
                    return Err(CryptoError::LengthMismatch {
                        expected: sent_len,
                        got: values.len(),
                    });
                }
                Ok(None)
            }
            (0, other) => Err(CryptoError::UnexpectedPayload {
                expected: "masked",
                got: other.label(),
            }),
            (1, other) => Err(CryptoError::UnexpectedPayload {
                expected: "double_masked",
                got: other.label(),
            }),
            (n, _) => Err(CryptoError::OutOfOrder(format!("unexpected round {}", n))),
        }
    }

    fn finalize_intersection(
        &mut self,
        exchanged: &[PsiPayload],
    ) -> Result<IntersectionResult, CryptoError> {
        let key_id = self.key()?.id();
        let sent = self
            .sent
            .as_ref()
            .ok_or_else(|| CryptoError::OutOfOrder("finalize before propose".to_string()))?;
        let peer_double = self
            .peer_double
            .as_ref()
            .ok_or_else(|| CryptoError::OutOfOrder("finalize before peer set".to_string()))?;

        let own_double = match exchanged.get(1) {
            Some(PsiPayload::DoubleMasked(values)) => values,
            Some(other) => {
                return Err(CryptoError::UnexpectedPayload {
                    expected: "double_masked",
                    got: other.label(),
                })
            }
            None => return Err(CryptoError::OutOfOrder("missing round 1".to_string())),
        };
        if own_double.len() != sent.len() {
            return Err(CryptoError::LengthMismatch {
                expected: sent.len(),
                got: own_double.len(),
            });
        }

        let mut result = IntersectionResult::new();
        for (id, value) in sent.iter().zip(own_double) {
            // The peer must have built on our value, not substituted its own.
            if !value.has_layer(key_id) {
                return Err(CryptoError::InvalidKeyOperation(key_id));
            }
            value.verify()?;

            if peer_double.contains(value.point()) {
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
        self.peer_double = None;
    }
}

impl Drop for DhPsi {
    fn drop(&mut self) {
        self.release();
    }
}
