//! In-memory result store.
//!
//! Used by tests and simulations. Failures can be injected to exercise the
//! coordinator's persistence retry path.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::traits::{ResultStore, StoreError};
use crate::types::{IntersectionResult, SessionId};

#[derive(Clone, Default)]
pub struct MemoryResultStore {
    results: Arc<Mutex<HashMap<SessionId, IntersectionResult>>>,
    failures_remaining: Arc<AtomicU32>,
    saves: Arc<AtomicUsize>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` saves fail with [`StoreError::Unavailable`].
    pub fn fail_next_saves(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn contains(&self, session: &SessionId) -> bool {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(session)
    }

    fn take_failure(&self) -> bool {
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn save(
        &self,
        session: &SessionId,
        result: &IntersectionResult,
        overwrite: bool,
    ) -> Result<(), StoreError> {
        if self.take_failure() {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }

        let mut results = self.results.lock().unwrap_or_else(|e| e.into_inner());
        if !overwrite && results.contains_key(session) {
            return Err(StoreError::AlreadyExists(session.clone()));
        }
        results.insert(session.clone(), result.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self, session: &SessionId) -> Result<IntersectionResult, StoreError> {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(session)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(session.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Identifier;

    #[tokio::test]
    async fn test_injected_failures_then_success() {
        let store = MemoryResultStore::new();
        let session = SessionId::from("job-1");
        let result: IntersectionResult = [Identifier::from("a")].into_iter().collect();

        store.fail_next_saves(2);
        assert!(store.save(&session, &result, true).await.is_err());
        assert!(store.save(&session, &result, true).await.is_err());
        store.save(&session, &result, true).await.unwrap();

        assert_eq!(store.save_count(), 1);
        assert_eq!(store.load(&session).await.unwrap(), result);
    }

    #[tokio::test]
    async fn test_no_overwrite() {
        let store = MemoryResultStore::new();
        let session = SessionId::from("job-1");

        store.save(&session, &IntersectionResult::new(), false).await.unwrap();
        let err = store
            .save(&session, &IntersectionResult::new(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }
}
