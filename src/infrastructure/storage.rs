//! Storage implementations for cached state.
//!
//! Provides concurrent, sharded storage for authorization decisions and
//! forced-sync markers.

use crate::application::ports::Storage;
use ahash::RandomState;
use dashmap::DashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

/// Thread-safe sharded storage backed by DashMap.
///
/// DashMap provides lock-free reads and fine-grained locking for writes,
/// which suits a request path where every call reads the cache.
#[derive(Debug)]
pub struct ShardedStorage<K, V>
where
    K: Eq + Hash + Clone,
{
    map: DashMap<K, V, RandomState>,
}

impl<K, V> ShardedStorage<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a new sharded storage instance.
    pub fn new() -> Self {
        Self {
            map: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Get a copy of a value.
    pub fn get_cloned(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.map.get(key).map(|value| value.value().clone())
    }

    /// Check if a key exists.
    pub fn contains_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }
}

impl<K, V> Default for ShardedStorage<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Storage<K, V> for ShardedStorage<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + Debug,
    V: Send + Sync + Debug,
{
    fn update<F, R>(&self, key: &K, accessor: F) -> Option<R>
    where
        F: FnOnce(&mut V) -> R,
    {
        self.map.get_mut(key).map(|mut value| accessor(&mut value))
    }

    fn insert(&self, key: K, value: V) {
        self.map.insert(key, value);
    }

    fn remove(&self, key: &K) -> Option<V> {
        self.map.remove(key).map(|(_, value)| value)
    }

    fn remove_if<F>(&self, key: &K, predicate: F) -> bool
    where
        F: FnOnce(&V) -> bool,
    {
        self.map.remove_if(key, |_, value| predicate(value)).is_some()
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn clear(&self) {
        self.map.clear()
    }

    fn retain<F>(&self, f: F)
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        self.map.retain(f);
    }
}

// Implement Storage for Arc<ShardedStorage> so one map can be shared
impl<K, V> Storage<K, V> for Arc<ShardedStorage<K, V>>
where
    K: Hash + Eq + Clone + Send + Sync + Debug,
    V: Send + Sync + Debug,
{
    fn update<F, R>(&self, key: &K, accessor: F) -> Option<R>
    where
        F: FnOnce(&mut V) -> R,
    {
        (**self).update(key, accessor)
    }

    fn insert(&self, key: K, value: V) {
        (**self).insert(key, value)
    }

    fn remove(&self, key: &K) -> Option<V> {
        (**self).remove(key)
    }

    fn remove_if<F>(&self, key: &K, predicate: F) -> bool
    where
        F: FnOnce(&V) -> bool,
    {
        (**self).remove_if(key, predicate)
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn is_empty(&self) -> bool {
        (**self).is_empty()
    }

    fn clear(&self) {
        (**self).clear()
    }

    fn retain<F>(&self, f: F)
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        (**self).retain(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_operations() {
        let storage = ShardedStorage::new();

        storage.insert("key1", 100);
        storage.insert("key2", 200);

        assert_eq!(storage.get_cloned(&"key1"), Some(100));
        assert_eq!(storage.get_cloned(&"key2"), Some(200));
        assert!(storage.get_cloned(&"key3").is_none());

        assert_eq!(Storage::len(&storage), 2);
        assert!(!Storage::is_empty(&storage));
    }

    #[test]
    fn test_update_existing_only() {
        let storage = ShardedStorage::new();
        storage.insert("key", 100);

        assert_eq!(storage.update(&"key", |v| { *v += 1; *v }), Some(101));
        assert_eq!(storage.update(&"missing", |v| *v), None);
        assert!(!storage.contains_key(&"missing"));
    }

    #[test]
    fn test_remove_and_remove_if() {
        let storage = ShardedStorage::new();
        storage.insert("a", 1);
        storage.insert("b", 2);

        assert_eq!(Storage::remove(&storage, &"a"), Some(1));
        assert!(!storage.contains_key(&"a"));

        assert!(!storage.remove_if(&"b", |v| *v > 5));
        assert!(storage.remove_if(&"b", |v| *v == 2));
        assert!(Storage::is_empty(&storage));
    }

    #[test]
    fn test_retain_and_clear() {
        let storage = ShardedStorage::new();
        for i in 0..10 {
            storage.insert(i, i);
        }

        storage.retain(|_, v| *v % 2 == 0);
        assert_eq!(Storage::len(&storage), 5);

        Storage::clear(&storage);
        assert!(Storage::is_empty(&storage));
    }

    #[test]
    fn test_concurrent_access() {
        use std::thread;

        let storage = Arc::new(ShardedStorage::new());
        let mut handles = vec![];

        for i in 0..10 {
            let storage_clone = Arc::clone(&storage);
            let handle = thread::spawn(move || {
                for j in 0..100 {
                    storage_clone.insert(format!("key_{}_{}", i, j), i * 100 + j);
                }
            });
            handles.push(handle);
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(Storage::len(&storage), 1000);
    }
}
