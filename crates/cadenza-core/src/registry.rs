//! Keyed instance registry
//!
//! Owns the live instances of one kind, keyed by caller-supplied strings.
//! All mutations go through the map's write lock, so creation/destruction
//! races cannot observe a half-registered instance; lookups take the read
//! lock only long enough to clone the `Arc` out.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{EngineError, EngineResult};
use crate::types::InstanceKind;

/// Registry of live instances of a single kind
pub struct Registry<T> {
    kind: InstanceKind,
    capacity: usize,
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T> Registry<T> {
    /// Create an empty registry with the given instance ceiling
    pub fn new(kind: InstanceKind, capacity: usize) -> Self {
        Self {
            kind,
            capacity,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// The kind this registry manages
    pub fn kind(&self) -> InstanceKind {
        self.kind
    }

    /// Create and register an instance under `key`
    ///
    /// The constructor runs under the write lock, so a concurrent `create`
    /// with the same key observes either no entry or the finished one.
    /// Fails with `DuplicateKey` if the key is live and `ResourceExhausted`
    /// at the ceiling; the constructor is not invoked in either case.
    pub fn insert_with(
        &self,
        key: &str,
        make: impl FnOnce() -> EngineResult<T>,
    ) -> EngineResult<Arc<T>> {
        if key.is_empty() {
            return Err(EngineError::invalid("instance key must be non-empty"));
        }

        let mut entries = self.entries.write().expect("registry lock poisoned");
        if entries.contains_key(key) {
            return Err(EngineError::DuplicateKey {
                kind: self.kind,
                key: key.to_string(),
            });
        }
        if entries.len() >= self.capacity {
            return Err(EngineError::ResourceExhausted(format!(
                "{} ceiling of {} live instances reached",
                self.kind, self.capacity
            )));
        }

        let instance = Arc::new(make()?);
        entries.insert(key.to_string(), Arc::clone(&instance));
        log::debug!(
            "registered {} '{}' ({}/{} live)",
            self.kind,
            key,
            entries.len(),
            self.capacity
        );
        Ok(instance)
    }

    /// Look up a live instance
    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .get(key)
            .cloned()
    }

    /// Remove an instance, returning it for teardown
    pub fn remove(&self, key: &str) -> Option<Arc<T>> {
        let removed = self
            .entries
            .write()
            .expect("registry lock poisoned")
            .remove(key);
        if removed.is_some() {
            log::debug!("unregistered {} '{}'", self.kind, key);
        }
        removed
    }

    /// Remove every instance, returning them for teardown
    pub fn drain(&self) -> Vec<(String, Arc<T>)> {
        self.entries
            .write()
            .expect("registry lock poisoned")
            .drain()
            .collect()
    }

    /// Snapshot of all live instances
    pub fn values(&self) -> Vec<Arc<T>> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Number of live instances
    pub fn len(&self) -> usize {
        self.entries.read().expect("registry lock poisoned").len()
    }

    /// Check whether no instances are live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `stop` on every live instance and remove them all
    ///
    /// Returns `Ok` only if every stop succeeded; otherwise the aggregate
    /// error lists each failing key. Instances are removed either way, so
    /// the registry is empty afterwards.
    pub fn stop_all(&self, stop: impl Fn(&str, &Arc<T>) -> EngineResult<()>) -> EngineResult<()> {
        let drained = self.drain();
        let total = drained.len();
        let mut details = Vec::new();

        for (key, instance) in &drained {
            if let Err(e) = stop(key, instance) {
                log::warn!("stop-all: {} '{}' failed: {}", self.kind, key, e);
                details.push(format!("{}: {}", key, e));
            }
        }

        if details.is_empty() {
            Ok(())
        } else {
            Err(EngineError::StopAllFailed {
                kind: self.kind,
                failed: details.len(),
                total,
                details,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(capacity: usize) -> Registry<u32> {
        Registry::new(InstanceKind::Player, capacity)
    }

    #[test]
    fn test_insert_get_remove() {
        let reg = registry(4);
        reg.insert_with("a", || Ok(1)).unwrap();

        assert_eq!(*reg.get("a").unwrap(), 1);
        assert!(reg.get("b").is_none());

        assert!(reg.remove("a").is_some());
        assert!(reg.get("a").is_none());
        assert!(reg.remove("a").is_none());
    }

    #[test]
    fn test_empty_key_rejected() {
        let reg = registry(4);
        assert!(matches!(
            reg.insert_with("", || Ok(1)),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let reg = registry(4);
        reg.insert_with("a", || Ok(1)).unwrap();

        let err = reg.insert_with("a", || Ok(2)).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateKey { .. }));
        // Original instance untouched
        assert_eq!(*reg.get("a").unwrap(), 1);
    }

    #[test]
    fn test_ceiling_enforced_and_slot_freed() {
        let reg = registry(2);
        reg.insert_with("a", || Ok(1)).unwrap();
        reg.insert_with("b", || Ok(2)).unwrap();

        let err = reg.insert_with("c", || Ok(3)).unwrap_err();
        assert!(matches!(err, EngineError::ResourceExhausted(_)));

        reg.remove("a");
        reg.insert_with("c", || Ok(3)).unwrap();
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_failed_constructor_leaves_no_entry() {
        let reg = registry(2);
        let result = reg.insert_with("a", || Err(EngineError::invalid("nope")));
        assert!(result.is_err());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_stop_all_aggregates_failures() {
        let reg = registry(8);
        for key in ["a", "b", "c"] {
            reg.insert_with(key, || Ok(0)).unwrap();
        }

        let err = reg
            .stop_all(|key, _| {
                if key == "b" {
                    Err(EngineError::NotPlaying)
                } else {
                    Ok(())
                }
            })
            .unwrap_err();

        match err {
            EngineError::StopAllFailed { failed, total, .. } => {
                assert_eq!(failed, 1);
                assert_eq!(total, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(reg.is_empty());
    }
}
