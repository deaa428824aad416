//! Session-level error taxonomy.
//!
//! Subsystem errors ([`CryptoError`], [`StoreError`], [`TransportError`],
//! [`ItemSourceError`]) fold into [`PsiError`]. Messages are diagnostic only
//! and never carry key material or cleartext identifiers.

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::serialization::SerializationError;
use crate::session::SessionPhase;
use crate::source::ItemSourceError;
use crate::store::StoreError;
use crate::transport::TransportError;
use crate::types::ParticipantId;

/// Result type for session operations.
pub type PsiResult<T> = Result<T, PsiError>;

#[derive(Debug, Error)]
pub enum PsiError {
    /// Local data unavailable. Fatal.
    #[error("Item source error: {0}")]
    ItemSource(#[from] ItemSourceError),

    /// A round deadline passed. Retryable with a fresh attempt.
    #[error("Peer timeout in round {round}: no message from {}", join(.missing))]
    PeerTimeout {
        round: u32,
        missing: Vec<ParticipantId>,
    },

    /// A masked value or frame failed an integrity or format check. Fatal.
    #[error("Crypto verification failed: {0}")]
    CryptoVerification(String),

    /// Misconfigured component. Fatal at initialize.
    #[error("Component binding error: {0}")]
    ComponentBinding(String),

    /// Result store save failed after bounded retries.
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Peer {peer} aborted the session: {reason}")]
    PeerAborted { peer: ParticipantId, reason: String },

    #[error("Session aborted: {0}")]
    Aborted(String),

    #[error("Invalid session transition from {from} to {to}")]
    InvalidTransition { from: SessionPhase, to: SessionPhase },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

fn join(peers: &[ParticipantId]) -> String {
    peers
        .iter()
        .map(|p| p.0.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<CryptoError> for PsiError {
    fn from(err: CryptoError) -> Self {
        PsiError::CryptoVerification(err.to_string())
    }
}

impl From<SerializationError> for PsiError {
    fn from(err: SerializationError) -> Self {
        PsiError::CryptoVerification(format!("malformed frame: {}", err))
    }
}

impl PsiError {
    /// Whether re-running (a fresh attempt, or persistence alone) may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            PsiError::PeerTimeout { .. } => true,
            PsiError::Persistence(err) => err.is_retryable(),
            PsiError::Transport(err) => err.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionId;

    #[test]
    fn test_peer_timeout_display_lists_peers() {
        let err = PsiError::PeerTimeout {
            round: 1,
            missing: vec![ParticipantId::from("site-2"), ParticipantId::from("site-3")],
        };
        assert_eq!(
            err.to_string(),
            "Peer timeout in round 1: no message from site-2, site-3"
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_crypto_errors_are_fatal() {
        let err: PsiError = CryptoError::InvalidEncoding.into();
        assert!(matches!(err, PsiError::CryptoVerification(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_persistence_retryability_follows_store() {
        let transient = PsiError::Persistence(StoreError::Unavailable("disk busy".to_string()));
        let permanent =
            PsiError::Persistence(StoreError::AlreadyExists(SessionId::from("job-1")));
        assert!(transient.is_retryable());
        assert!(!permanent.is_retryable());
    }

    #[test]
    fn test_item_source_is_fatal() {
        let err: PsiError = ItemSourceError::Unavailable("no data".to_string()).into();
        assert!(!err.is_retryable());
    }
}
