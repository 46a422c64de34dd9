//! Named factory registries
//!
//! Shared storage for the transform and dataset registries: a string key maps
//! to one entry, and re-registering a key is an error.

use std::collections::HashMap;

use crate::error::{Result, StrataError};

/// String-keyed registry of entries of type `T`
#[derive(Clone)]
pub struct Registry<T> {
    name: &'static str,
    entries: HashMap<String, T>,
}

impl<T> Registry<T> {
    /// Create an empty registry; `name` appears in error messages
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: HashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Add an entry, refusing to overwrite an existing key
    pub fn register(&mut self, key: impl Into<String>, entry: T) -> Result<()> {
        let key = key.into();
        if self.entries.contains_key(&key) {
            return Err(StrataError::DuplicateRegistration {
                registry: self.name.to_string(),
                name: key,
            });
        }
        self.entries.insert(key, entry);
        Ok(())
    }

    /// Look up an entry by key
    pub fn get(&self, key: &str) -> Result<&T> {
        self.entries.get(key).ok_or_else(|| StrataError::UnknownKind {
            registry: self.name.to_string(),
            kind: key.to_string(),
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Registered keys in sorted order
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> std::fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("name", &self.name)
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_get() {
        let mut registry = Registry::new("test");
        registry.register("one", 1).unwrap();
        registry.register("two", 2).unwrap();

        assert_eq!(*registry.get("two").unwrap(), 2);
        assert_eq!(registry.keys(), vec!["one", "two"]);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = Registry::new("test");
        registry.register("one", 1).unwrap();
        let err = registry.register("one", 5).unwrap_err();
        assert!(matches!(err, StrataError::DuplicateRegistration { .. }));
        assert_eq!(*registry.get("one").unwrap(), 1);
    }

    #[test]
    fn test_unknown_kind() {
        let registry: Registry<u8> = Registry::new("pipeline");
        match registry.get("Blur") {
            Err(StrataError::UnknownKind { registry, kind }) => {
                assert_eq!(registry, "pipeline");
                assert_eq!(kind, "Blur");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
