//! Result store contract.
//!
//! Implementations:
//! - [`super::FileResultStore`]: JSON file per session, atomic rename
//! - [`super::MemoryResultStore`]: in-memory, with failure injection for tests

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Identifier, IntersectionResult, SessionId};

/// Version of the persisted result layout.
pub const RESULT_FORMAT_VERSION: u32 = 1;

/// Errors that can occur during result persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No result stored for session {0}")]
    NotFound(SessionId),

    #[error("Result already exists for session {0}")]
    AlreadyExists(SessionId),

    #[error("Invalid session key for storage: {0}")]
    InvalidKey(SessionId),

    #[error("Stored result for session {session} is corrupt: {reason}")]
    Corrupt { session: SessionId, reason: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Transient failures worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Io(_))
    }
}

/// Stable on-disk layout of a persisted intersection.
///
/// Items are sorted and deduplicated; readable without the protocol runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedResult {
    pub version: u32,
    pub session: SessionId,
    pub items: Vec<Identifier>,
}

impl PersistedResult {
    pub fn new(session: &SessionId, result: &IntersectionResult) -> Self {
        Self {
            version: RESULT_FORMAT_VERSION,
            session: session.clone(),
            items: result.to_vec(),
        }
    }

    pub fn into_result(self) -> Result<IntersectionResult, StoreError> {
        if self.version != RESULT_FORMAT_VERSION {
            return Err(StoreError::Corrupt {
                session: self.session,
                reason: format!("unsupported format version {}", self.version),
            });
        }
        Ok(self.items.into_iter().collect())
    }
}

/// Durable, overwrite-safe persistence of intersection results.
///
/// Readers never observe a partially written or mixed-version result.
/// Concurrent saves for the same session are serialized.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Persist `result` for `session`.
    ///
    /// With `overwrite == false` an existing result yields
    /// [`StoreError::AlreadyExists`]; with `true` it is atomically replaced.
    async fn save(
        &self,
        session: &SessionId,
        result: &IntersectionResult,
        overwrite: bool,
    ) -> Result<(), StoreError>;

    /// Load the result for `session`, or [`StoreError::NotFound`].
    async fn load(&self, session: &SessionId) -> Result<IntersectionResult, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persisted_layout_is_sorted() {
        let result: IntersectionResult = ["b", "a"].into_iter().map(Identifier::from).collect();
        let persisted = PersistedResult::new(&SessionId::from("job-1"), &result);
        let json = serde_json::to_string(&persisted).unwrap();
        assert_eq!(json, r#"{"version":1,"session":"job-1","items":["a","b"]}"#);
    }

    #[test]
    fn test_unknown_version_is_corrupt() {
        let persisted = PersistedResult {
            version: 7,
            session: SessionId::from("job-1"),
            items: vec![],
        };
        assert!(matches!(
            persisted.into_result(),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(StoreError::Unavailable("busy".to_string()).is_retryable());
        assert!(!StoreError::NotFound(SessionId::from("x")).is_retryable());
    }
}
