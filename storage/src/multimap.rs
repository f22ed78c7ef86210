//! Multimap abstraction backing the inverted index.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::RwLock;

use crate::error::Result;

/// A map from a key to a set of values.
///
/// Implementations decide how entries are held: fully in memory, or sharded
/// into pages that spill to a backing store when resident memory is bounded.
/// All methods take `&self` and synchronize internally, so a trait object can
/// sit behind the index store's outer lock.
pub trait MultiMap<K, V>: Send + Sync {
    /// Associate `value` with `key`.
    fn add(&self, key: K, value: V) -> Result<()>;

    /// Snapshot of the values currently associated with `key`.
    fn get(&self, key: &K) -> Result<Option<HashSet<V>>>;

    /// Remove `key` and every value associated with it.
    fn remove(&self, key: &K) -> Result<()>;

    /// Remove a single value from `key`'s set, dropping the key once its
    /// set is empty.
    fn remove_value(&self, key: &K, value: &V) -> Result<()>;

    /// Human-readable description of the implementation.
    fn meta(&self) -> String;

    /// Human-readable summary of the current contents.
    fn state(&self) -> String;
}

/// Trivial unsharded multimap over a `HashMap`. No eviction.
#[derive(Debug, Default)]
pub struct InMemoryMultiMap<K, V> {
    entries: RwLock<HashMap<K, HashSet<V>>>,
}

impl<K, V> InMemoryMultiMap<K, V> {
    /// Create a new empty multimap.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> MultiMap<K, V> for InMemoryMultiMap<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Eq + Hash + Clone + Send + Sync,
{
    fn add(&self, key: K, value: V) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.entry(key).or_default().insert(value);
        Ok(())
    }

    fn get(&self, key: &K) -> Result<Option<HashSet<V>>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn remove(&self, key: &K) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }

    fn remove_value(&self, key: &K, value: &V) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Some(values) = entries.get_mut(key) {
            values.remove(value);
            if values.is_empty() {
                entries.remove(key);
            }
        }
        Ok(())
    }

    fn meta(&self) -> String {
        "in-memory multimap: single hash map, no eviction".to_string()
    }

    fn state(&self) -> String {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        format!("{} keys in memory", entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_add_and_get() {
        let map: InMemoryMultiMap<String, String> = InMemoryMultiMap::new();
        map.add("word".to_string(), "a.txt".to_string()).unwrap();
        map.add("word".to_string(), "b.txt".to_string()).unwrap();
        map.add("word".to_string(), "a.txt".to_string()).unwrap();

        let values = map.get(&"word".to_string()).unwrap().unwrap();
        assert_eq!(values.len(), 2);
        assert!(values.contains("a.txt"));
        assert!(values.contains("b.txt"));
    }

    #[test]
    fn test_get_unknown_key() {
        let map: InMemoryMultiMap<String, String> = InMemoryMultiMap::new();
        assert_eq!(map.get(&"missing".to_string()).unwrap(), None);
    }

    #[test]
    fn test_remove_key() {
        let map: InMemoryMultiMap<String, String> = InMemoryMultiMap::new();
        map.add("word".to_string(), "a.txt".to_string()).unwrap();
        map.remove(&"word".to_string()).unwrap();
        assert_eq!(map.get(&"word".to_string()).unwrap(), None);
    }

    #[test]
    fn test_remove_value_drops_empty_key() {
        let map: InMemoryMultiMap<String, String> = InMemoryMultiMap::new();
        map.add("word".to_string(), "a.txt".to_string()).unwrap();
        map.add("word".to_string(), "b.txt".to_string()).unwrap();

        map.remove_value(&"word".to_string(), &"a.txt".to_string())
            .unwrap();
        let values = map.get(&"word".to_string()).unwrap().unwrap();
        assert_eq!(values.len(), 1);

        map.remove_value(&"word".to_string(), &"b.txt".to_string())
            .unwrap();
        assert_eq!(map.get(&"word".to_string()).unwrap(), None);
    }
}
