//! Backend capability registry.
//!
//! Built explicitly at process start from a registration call list, then
//! shared read-only. Registration after initialization is a configuration
//! bug, so `register` lives on `&mut self` and the registry is frozen by
//! wrapping it in `Arc`.

use std::collections::BTreeMap;
use std::sync::Arc;

use fansearch_core::Error;

use crate::backend::SearchBackend;

/// Registry of search backends, keyed by unique name.
#[derive(Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn SearchBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend.
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateName` if the name is already taken. This is
    /// fatal at startup.
    pub fn register(&mut self, backend: Arc<dyn SearchBackend>) -> Result<(), Error> {
        let name = backend.name().to_string();
        if self.backends.contains_key(&name) {
            return Err(Error::DuplicateName(name));
        }
        self.backends.insert(name, backend);
        Ok(())
    }

    /// Resolve the fan-out set for an optional allow-list.
    ///
    /// Allow-list semantics: `None` returns the full registered set; an
    /// explicitly empty list returns none; otherwise only named backends.
    /// Ordered by priority ascending, ties broken by name ascending. This
    /// ordering determines execution-start order and which source's
    /// metadata wins when duplicates merge.
    pub fn resolve(&self, filter: Option<&[String]>) -> Vec<Arc<dyn SearchBackend>> {
        let mut resolved: Vec<Arc<dyn SearchBackend>> = match filter {
            None => self.backends.values().cloned().collect(),
            Some(names) => names
                .iter()
                .filter_map(|name| self.backends.get(name).cloned())
                .collect(),
        };

        resolved.sort_by(|a, b| {
            a.priority()
                .cmp(&b.priority())
                .then_with(|| a.name().cmp(b.name()))
        });
        resolved
    }

    /// Registered backend names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Iterate all registered backends, for capability enumeration.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn SearchBackend>> {
        self.backends.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use async_trait::async_trait;
    use fansearch_core::{SearchQuery, SearchResult};

    struct Stub {
        name: &'static str,
        priority: i32,
    }

    #[async_trait]
    impl SearchBackend for Stub {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        async fn execute(&self, _query: &SearchQuery) -> Result<Vec<SearchResult>, BackendError> {
            Ok(vec![])
        }
    }

    fn registry() -> BackendRegistry {
        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(Stub { name: "b", priority: 2 })).unwrap();
        registry.register(Arc::new(Stub { name: "a", priority: 1 })).unwrap();
        registry.register(Arc::new(Stub { name: "c", priority: 1 })).unwrap();
        registry
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = registry();
        let err = registry.register(Arc::new(Stub { name: "a", priority: 9 })).unwrap_err();
        assert!(matches!(err, Error::DuplicateName(name) if name == "a"));
    }

    #[test]
    fn test_resolve_none_returns_all_ordered() {
        let names: Vec<String> = registry()
            .resolve(None)
            .iter()
            .map(|b| b.name().to_string())
            .collect();
        assert_eq!(names, vec!["a", "c", "b"]);
    }

    #[test]
    fn test_resolve_empty_list_returns_none() {
        assert!(registry().resolve(Some(&[])).is_empty());
    }

    #[test]
    fn test_resolve_allow_list_orders_by_priority_then_name() {
        let filter = vec!["b".to_string(), "a".to_string()];
        let names: Vec<String> = registry()
            .resolve(Some(&filter))
            .iter()
            .map(|b| b.name().to_string())
            .collect();
        // priority(a)=1 < priority(b)=2, so a comes first regardless of
        // allow-list order.
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_resolve_equal_priority_is_alphabetical() {
        let filter = vec!["c".to_string(), "a".to_string()];
        let names: Vec<String> = registry()
            .resolve(Some(&filter))
            .iter()
            .map(|b| b.name().to_string())
            .collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn test_resolve_skips_unknown_names() {
        let filter = vec!["a".to_string(), "ghost".to_string()];
        assert_eq!(registry().resolve(Some(&filter)).len(), 1);
    }
}
