//! Trait abstraction for the messaging collaborator.
//!
//! The federated job runtime that moves bytes between participants lives
//! outside this crate. Coordinators only see this trait, which keeps them
//! testable against [`super::InMemoryHub`].

use async_trait::async_trait;

use crate::types::{ParticipantId, SessionId};

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Unknown participant: {0}")]
    UnknownPeer(ParticipantId),

    #[error("Channel closed")]
    Closed,

    #[error("Network error: {0}")]
    Network(String),
}

impl TransportError {
    /// Network errors are transient; the others are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Network(_))
    }
}

/// Reliable point-to-point messaging keyed by session and participant.
///
/// Delivery may be at-least-once; the coordinator deduplicates by
/// round and sender.
#[async_trait]
pub trait PsiTransport: Send + Sync {
    /// Identity of the local participant.
    fn local_id(&self) -> &ParticipantId;

    /// Deliver one frame to `to` within `session`.
    async fn send(&self, session: &SessionId, to: &ParticipantId, frame: Vec<u8>)
        -> TransportResult<()>;

    /// Wait for the next frame addressed to the local participant in `session`.
    async fn recv(&self, session: &SessionId) -> TransportResult<Vec<u8>>;
}
