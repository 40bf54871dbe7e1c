// Copyright (c) 2026 Chainstate
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Capacity-bounded layer with least-recently-used eviction.
//!
//! Capacity is a byte budget over `key.byte_size() + value.byte_size()`; a tombstone
//! weighs its key only. Reads and writes refresh recency.

use crate::core::state::layer::{Layer, Lookup, StorageKey, StorageValue};
use crate::core::types::ByteSize;
use lru::LruCache;
use parking_lot::Mutex;

/// Default byte budget (32 MiB).
pub const DEFAULT_CAPACITY: usize = 32 * 1024 * 1024;

struct LruInner<K, V> {
    cache: LruCache<K, Option<V>>,
    used: usize,
    capacity: usize,
}

fn weight<K: ByteSize, V: ByteSize>(key: &K, value: &Option<V>) -> usize {
    key.byte_size() + value.as_ref().map_or(0, |v| v.byte_size())
}

impl<K: StorageKey + ByteSize, V: ByteSize> LruInner<K, V> {
    fn evict(&mut self) -> usize {
        let mut evicted = 0usize;
        while self.used > self.capacity {
            let Some((k, v)) = self.cache.pop_lru() else {
                break;
            };
            self.used = self.used.saturating_sub(weight(&k, &v));
            evicted += 1;
        }
        evicted
    }

    fn insert(&mut self, key: K, value: Option<V>) {
        let w = weight(&key, &value);
        // `push` hands back the displaced pair, if any
        if let Some((old_k, old_v)) = self.cache.push(key, value) {
            self.used = self.used.saturating_sub(weight(&old_k, &old_v));
        }
        self.used += w;
        self.evict();
    }
}

/// LRU-bounded layer.
pub struct LruLayer<K, V> {
    inner: Mutex<LruInner<K, V>>,
    logical_deletion: bool,
}

impl<K: StorageKey + ByteSize, V: StorageValue + ByteSize> LruLayer<K, V> {
    /// Layer with a `capacity` byte budget; deletes remove physically.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruInner {
                cache: LruCache::unbounded(),
                used: 0,
                capacity,
            }),
            logical_deletion: false,
        }
    }

    /// Keep deletes as tombstones (required when used as a mutable layer).
    pub fn with_logical_deletion(mut self) -> Self {
        self.logical_deletion = true;
        self
    }

    /// Change the byte budget, evicting immediately if needed.
    pub fn set_max_capacity(&self, capacity: usize) {
        let mut g = self.inner.lock();
        g.capacity = capacity;
        g.evict();
    }

    /// Current byte budget.
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Bytes currently accounted.
    pub fn used(&self) -> usize {
        self.inner.lock().used
    }

    /// Drop `key` regardless of the deletion mode.
    pub fn evict_key(&self, key: &K) {
        let mut g = self.inner.lock();
        if let Some(v) = g.cache.pop(key) {
            let w = weight(key, &v);
            g.used = g.used.saturating_sub(w);
        }
    }
}

/// Logical deletion on, [`DEFAULT_CAPACITY`] budget.
impl<K: StorageKey + ByteSize, V: StorageValue + ByteSize> Default for LruLayer<K, V> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY).with_logical_deletion()
    }
}

impl<K: StorageKey + ByteSize, V: StorageValue + ByteSize> Layer<K, V> for LruLayer<K, V> {
    fn get(&self, key: &K) -> Lookup<V> {
        match self.inner.lock().cache.get(key) {
            Some(Some(v)) => Lookup::Value(v.clone()),
            Some(None) => Lookup::Deleted,
            None => Lookup::Missing,
        }
    }

    fn put(&self, key: K, value: V) {
        self.inner.lock().insert(key, Some(value));
    }

    fn remove(&self, key: K) {
        if self.logical_deletion {
            self.inner.lock().insert(key, None);
        } else {
            self.evict_key(&key);
        }
    }

    fn entries(&self) -> Vec<(K, Lookup<V>)> {
        self.inner
            .lock()
            .cache
            .iter()
            .map(|(k, v)| {
                let l = match v {
                    Some(v) => Lookup::Value(v.clone()),
                    None => Lookup::Deleted,
                };
                (k.clone(), l)
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.inner.lock().cache.len()
    }

    fn logical_deletion(&self) -> bool {
        self.logical_deletion
    }
}
