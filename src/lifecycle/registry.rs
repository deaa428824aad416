//! Named component registry.
//!
//! The platform configures components by id (`psi_writer_id = "file_writer"`).
//! Registration keeps the capability in the type, so resolving checks both
//! presence and kind before a session is built.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{PsiError, PsiResult};
use crate::source::ItemSource;
use crate::store::ResultStore;

/// A registered component and the capability it provides.
#[derive(Clone)]
pub enum Component {
    ResultStore(Arc<dyn ResultStore>),
    ItemSource(Arc<dyn ItemSource>),
}

impl Component {
    pub fn capability(&self) -> &'static str {
        match self {
            Component::ResultStore(_) => "result store",
            Component::ItemSource(_) => "item source",
        }
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Component({})", self.capability())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ComponentRegistry {
    components: HashMap<String, Component>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a result store under `id`.
    pub fn register_result_store(&mut self, id: impl Into<String>, store: Arc<dyn ResultStore>) {
        self.components
            .insert(id.into(), Component::ResultStore(store));
    }

    /// Register (or replace) an item source under `id`.
    pub fn register_item_source(&mut self, id: impl Into<String>, source: Arc<dyn ItemSource>) {
        self.components
            .insert(id.into(), Component::ItemSource(source));
    }

    pub fn get(&self, id: &str) -> Option<&Component> {
        self.components.get(id)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn resolve_result_store(&self, id: &str) -> PsiResult<Arc<dyn ResultStore>> {
        match self.lookup(id)? {
            Component::ResultStore(store) => Ok(store.clone()),
            other => Err(wrong_kind(id, "result store", other)),
        }
    }

    pub fn resolve_item_source(&self, id: &str) -> PsiResult<Arc<dyn ItemSource>> {
        match self.lookup(id)? {
            Component::ItemSource(source) => Ok(source.clone()),
            other => Err(wrong_kind(id, "item source", other)),
        }
    }

    fn lookup(&self, id: &str) -> PsiResult<&Component> {
        self.components
            .get(id)
            .ok_or_else(|| PsiError::ComponentBinding(format!("no component registered as '{}'", id)))
    }
}

fn wrong_kind(id: &str, expected: &str, found: &Component) -> PsiError {
    PsiError::ComponentBinding(format!(
        "component '{}' provides {}, expected {}",
        id,
        found.capability(),
        expected
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StaticItemSource;
    use crate::store::MemoryResultStore;

    fn registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        registry.register_result_store("psi_writer", Arc::new(MemoryResultStore::new()));
        registry.register_item_source("items", Arc::new(StaticItemSource::new(["a"])));
        registry
    }

    #[test]
    fn test_resolves_by_kind() {
        let registry = registry();
        assert!(registry.resolve_result_store("psi_writer").is_ok());
        assert!(registry.resolve_item_source("items").is_ok());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_missing_component() {
        let err = registry().resolve_result_store("nope").err().unwrap();
        assert!(matches!(err, PsiError::ComponentBinding(_)));
        assert!(err.to_string().contains("'nope'"));
    }

    #[test]
    fn test_wrong_capability() {
        let err = registry().resolve_result_store("items").err().unwrap();
        assert!(matches!(err, PsiError::ComponentBinding(_)));
        assert!(err.to_string().contains("provides item source, expected result store"));

        let err = registry().resolve_item_source("psi_writer").err().unwrap();
        assert!(matches!(err, PsiError::ComponentBinding(_)));
    }
}
