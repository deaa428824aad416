//! Lifecycle adapter: exposes a session as an init/run/finalize component.
//!
//! The adapter receives its collaborators already typed, either directly
//! ([`PsiLifecycle::new`]) or resolved from a [`ComponentRegistry`]
//! ([`PsiLifecycle::from_registry`]). A session that failed with a retryable
//! error can be re-initialized; the new coordinator uses the next attempt
//! number so frames from the failed attempt are ignored.

use std::sync::Arc;
use tracing::info;

use super::registry::ComponentRegistry;
use crate::error::{PsiError, PsiResult};
use crate::session::{AbortHandle, SessionCoordinator, SessionPhase, SessionSettings};
use crate::source::ItemSource;
use crate::store::ResultStore;
use crate::transport::PsiTransport;
use crate::types::IntersectionResult;

/// Component ids to resolve from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentBindings {
    pub psi_writer_id: String,
    pub item_source_id: String,
}

pub struct PsiLifecycle {
    settings: SessionSettings,
    transport: Arc<dyn PsiTransport>,
    source: Arc<dyn ItemSource>,
    store: Arc<dyn ResultStore>,
    coordinator: Option<SessionCoordinator>,
}

impl PsiLifecycle {
    pub fn new(
        settings: SessionSettings,
        transport: Arc<dyn PsiTransport>,
        source: Arc<dyn ItemSource>,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            settings,
            transport,
            source,
            store,
            coordinator: None,
        }
    }

    /// Resolve the result store and item source by id.
    ///
    /// Fails with [`PsiError::ComponentBinding`] when an id is missing or
    /// names a component of the wrong kind.
    pub fn from_registry(
        registry: &ComponentRegistry,
        bindings: &ComponentBindings,
        settings: SessionSettings,
        transport: Arc<dyn PsiTransport>,
    ) -> PsiResult<Self> {
        let store = registry.resolve_result_store(&bindings.psi_writer_id)?;
        let source = registry.resolve_item_source(&bindings.item_source_id)?;
        Ok(Self::new(settings, transport, source, store))
    }

    /// Build a coordinator and load local items.
    ///
    /// Allowed before the first run and after a failure; anything else is an
    /// invalid transition.
    pub async fn initialize(&mut self) -> PsiResult<()> {
        let attempt = match &self.coordinator {
            None => self.settings.attempt,
            Some(previous) if previous.phase() == SessionPhase::Failed => {
                previous.session().attempt() + 1
            }
            Some(previous) => {
                return Err(PsiError::InvalidTransition {
                    from: previous.phase(),
                    to: SessionPhase::ItemsLoaded,
                })
            }
        };

        let settings = self.settings.clone().with_attempt(attempt);
        info!(session = %settings.session, attempt, "initializing PSI component");
        let coordinator = SessionCoordinator::new(
            settings,
            self.transport.clone(),
            self.source.clone(),
            self.store.clone(),
        )?;
        let coordinator = self.coordinator.insert(coordinator);
        coordinator.initialize().await
    }

    /// Drive the session to `Persisted`, retrying persistence alone when a
    /// previous run already computed the result.
    pub async fn run(&mut self) -> PsiResult<IntersectionResult> {
        if self.coordinator.is_none() {
            self.initialize().await?;
        }
        let coordinator = self.coordinator.as_mut().ok_or_else(|| {
            PsiError::ComponentBinding("component not initialized".to_string())
        })?;
        coordinator.run().await
    }

    /// Release key material. Safe to call more than once, and before
    /// `initialize`.
    pub async fn finalize(&mut self) -> PsiResult<()> {
        match self.coordinator.as_mut() {
            Some(coordinator) => coordinator.finalize().await,
            None => Ok(()),
        }
    }

    pub fn get_intersection(&self) -> Option<&IntersectionResult> {
        self.coordinator.as_ref()?.get_intersection()
    }

    pub fn phase(&self) -> Option<SessionPhase> {
        self.coordinator.as_ref().map(SessionCoordinator::phase)
    }

    pub fn coordinator(&self) -> Option<&SessionCoordinator> {
        self.coordinator.as_ref()
    }

    pub fn abort_handle(&self) -> Option<AbortHandle> {
        self.coordinator.as_ref().map(SessionCoordinator::abort_handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StaticItemSource;
    use crate::store::MemoryResultStore;
    use crate::transport::InMemoryHub;
    use crate::types::{Identifier, ParticipantId, SessionId};
    use std::time::Duration;

    fn bindings() -> ComponentBindings {
        ComponentBindings {
            psi_writer_id: "psi_writer".to_string(),
            item_source_id: "local_items".to_string(),
        }
    }

    fn settings(peers: &[&str]) -> SessionSettings {
        SessionSettings::new(
            SessionId::from("job-7"),
            peers.iter().map(|p| ParticipantId::from(*p)).collect(),
        )
        .with_round_timeout(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_from_registry_binds_and_runs() {
        let hub = InMemoryHub::new();
        let store = MemoryResultStore::new();
        let mut registry = ComponentRegistry::new();
        registry.register_result_store("psi_writer", Arc::new(store.clone()));
        registry.register_item_source("local_items", Arc::new(StaticItemSource::new(["x", "y"])));

        let mut lifecycle = PsiLifecycle::from_registry(
            &registry,
            &bindings(),
            settings(&[]),
            Arc::new(hub.endpoint("site-1")),
        )
        .unwrap();

        assert!(lifecycle.get_intersection().is_none());
        lifecycle.initialize().await.unwrap();
        let result = lifecycle.run().await.unwrap();
        assert_eq!(result.len(), 2);
        assert!(lifecycle.get_intersection().unwrap().contains(&Identifier::from("x")));

        lifecycle.finalize().await.unwrap();
        lifecycle.finalize().await.unwrap();
        assert_eq!(lifecycle.phase(), Some(SessionPhase::Finalized));
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_wrong_component_kind_fails_fast() {
        let hub = InMemoryHub::new();
        let mut registry = ComponentRegistry::new();
        registry.register_item_source("psi_writer", Arc::new(StaticItemSource::default()));
        registry.register_item_source("local_items", Arc::new(StaticItemSource::default()));

        let result = PsiLifecycle::from_registry(
            &registry,
            &bindings(),
            settings(&[]),
            Arc::new(hub.endpoint("site-1")),
        );
        assert!(matches!(result, Err(PsiError::ComponentBinding(_))));
    }

    #[tokio::test]
    async fn test_reinitialize_after_timeout_bumps_attempt() {
        let hub = InMemoryHub::new();
        let _silent_peer = hub.endpoint("site-2");
        let mut lifecycle = PsiLifecycle::new(
            settings(&["site-2"]),
            Arc::new(hub.endpoint("site-1")),
            Arc::new(StaticItemSource::new(["x"])),
            Arc::new(MemoryResultStore::new()),
        );

        let err = lifecycle.run().await.unwrap_err();
        assert!(matches!(err, PsiError::PeerTimeout { .. }));
        assert!(err.is_retryable());
        assert_eq!(lifecycle.phase(), Some(SessionPhase::Failed));

        lifecycle.initialize().await.unwrap();
        let coordinator = lifecycle.coordinator().unwrap();
        assert_eq!(coordinator.session().attempt(), 1);
        assert_eq!(coordinator.phase(), SessionPhase::ItemsLoaded);
    }

    #[tokio::test]
    async fn test_double_initialize_rejected() {
        let hub = InMemoryHub::new();
        let mut lifecycle = PsiLifecycle::new(
            settings(&[]),
            Arc::new(hub.endpoint("site-1")),
            Arc::new(StaticItemSource::new(["x"])),
            Arc::new(MemoryResultStore::new()),
        );

        lifecycle.initialize().await.unwrap();
        let err = lifecycle.initialize().await.unwrap_err();
        assert!(matches!(err, PsiError::InvalidTransition { .. }));
    }
}
