//! A sharded concurrent map backing the channel and session registries.
//!
//! Entries are distributed across `N` shards, each behind its own mutex, so
//! operations on unrelated channels or sessions never contend on a single
//! global lock. Shard selection uses SipHash-2-4 with a random key so an
//! adversary cannot craft paths that all land in one shard.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use async_lock::Mutex;
use siphasher::sip::SipHasher24;

/// A sharded concurrent map with `N` independent shards.
#[derive(Debug)]
pub struct ShardedMap<K: Hash, V, const N: usize = 64> {
    shards: [Mutex<HashMap<K, V>>; N],
    key0: u64,
    key1: u64,
}

impl<K: Hash + Eq, V, const N: usize> ShardedMap<K, V, N> {
    /// Creates a new empty map with a randomly generated shard key.
    #[must_use]
    pub fn new() -> Self {
        Self::with_key(rand::random(), rand::random())
    }

    /// Creates a new empty map with the given SipHash keys.
    ///
    /// Use this when deterministic shard placement matters (tests).
    #[must_use]
    pub fn with_key(key0: u64, key1: u64) -> Self {
        Self {
            shards: std::array::from_fn(|_| Mutex::new(HashMap::new())),
            key0,
            key1,
        }
    }

    #[inline]
    fn shard(&self, key: &K) -> &Mutex<HashMap<K, V>> {
        let mut hasher = SipHasher24::new_with_keys(self.key0, self.key1);
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % N]
    }

    /// Gets a cloned value for the given key, if it exists.
    pub async fn get_cloned(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.shard(key).lock().await.get(key).cloned()
    }

    /// Returns `true` if the map contains the given key.
    pub async fn contains_key(&self, key: &K) -> bool {
        self.shard(key).lock().await.contains_key(key)
    }

    /// Inserts a key-value pair, returning the previous value if present.
    pub async fn insert(&self, key: K, value: V) -> Option<V> {
        self.shard(&key).lock().await.insert(key, value)
    }

    /// Removes a key, returning the value if it was present.
    pub async fn remove(&self, key: &K) -> Option<V> {
        self.shard(key).lock().await.remove(key)
    }

    /// Gets the value for `key`, or inserts the one built by `make`.
    ///
    /// `make` runs while the shard lock is held, so no other operation on
    /// this shard can observe the entry before `make` returns. The second
    /// element of the return value is `true` when the entry was created by
    /// this call.
    pub async fn get_or_insert_with<F>(&self, key: K, make: F) -> (V, bool)
    where
        V: Clone,
        F: FnOnce() -> V,
    {
        let mut guard = self.shard(&key).lock().await;
        if let Some(existing) = guard.get(&key) {
            return (existing.clone(), false);
        }
        let value = make();
        guard.insert(key, value.clone());
        (value, true)
    }

    /// Collects all values from all shards.
    ///
    /// Shard locks are acquired sequentially and released between shards.
    pub async fn values(&self) -> Vec<V>
    where
        V: Clone,
    {
        let mut values = Vec::new();
        for shard in &self.shards {
            values.extend(shard.lock().await.values().cloned());
        }
        values
    }

    /// Collects all keys from all shards.
    pub async fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        let mut keys = Vec::new();
        for shard in &self.shards {
            keys.extend(shard.lock().await.keys().cloned());
        }
        keys
    }

    /// Returns the total number of entries across all shards.
    pub async fn len(&self) -> usize {
        let mut total = 0;
        for shard in &self.shards {
            total += shard.lock().await.len();
        }
        total
    }

    /// Returns `true` if the map is empty.
    pub async fn is_empty(&self) -> bool {
        for shard in &self.shards {
            if !shard.lock().await.is_empty() {
                return false;
            }
        }
        true
    }
}

impl<K: Hash + Eq, V, const N: usize> Default for ShardedMap<K, V, N> {
    fn default() -> Self {
        Self::new()
    }
}
