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

//! In-memory layers.
//!
//! - [`MemoryLayer`]: ordered, keeps tombstones. Used for mutable and immutable layers.
//! - [`MemoryBackend`]: ordered, sharded for concurrent access, removes physically.

use crate::core::state::layer::{
    ConcurrentLayer, Layer, Lookup, OrderedBackend, OrderedLayer, StorageBackend, StorageError,
    StorageKey, StorageValue, SEEK_BATCH,
};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::ops::Bound;
use std::sync::Arc;

/// Ordered layer with logical deletion. `None` marks a tombstone.
pub struct MemoryLayer<K, V> {
    map: RwLock<BTreeMap<K, Option<V>>>,
}

impl<K: StorageKey, V: StorageValue> MemoryLayer<K, V> {
    /// Empty layer.
    pub fn new() -> Self {
        Self {
            map: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<K: StorageKey, V: StorageValue> Default for MemoryLayer<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

fn slot_to_lookup<V: Clone>(slot: &Option<V>) -> Lookup<V> {
    match slot {
        Some(v) => Lookup::Value(v.clone()),
        None => Lookup::Deleted,
    }
}

impl<K: StorageKey, V: StorageValue> Layer<K, V> for MemoryLayer<K, V> {
    fn get(&self, key: &K) -> Lookup<V> {
        match self.map.read().get(key) {
            Some(slot) => slot_to_lookup(slot),
            None => Lookup::Missing,
        }
    }

    fn put(&self, key: K, value: V) {
        self.map.write().insert(key, Some(value));
    }

    // tombstone even when absent here: the key may live in a lower layer
    fn remove(&self, key: K) {
        self.map.write().insert(key, None);
    }

    fn entries(&self) -> Vec<(K, Lookup<V>)> {
        self.map
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), slot_to_lookup(v)))
            .collect()
    }

    fn len(&self) -> usize {
        self.map.read().len()
    }

    fn logical_deletion(&self) -> bool {
        true
    }
}

impl<K: StorageKey, V: StorageValue> OrderedLayer<K, V> for MemoryLayer<K, V> {
    fn range_from(&self, start: &K) -> Vec<(K, Lookup<V>)> {
        self.map
            .read()
            .range(start.clone()..)
            .map(|(k, v)| (k.clone(), slot_to_lookup(v)))
            .collect()
    }
}

/// Sharded ordered backend. Each bucket has its own reader/writer lock, so point reads
/// proceed while a merge writes other keys.
pub struct MemoryBackend<K, V> {
    buckets: Vec<RwLock<BTreeMap<K, V>>>,
}

/// Default bucket count: twice the available parallelism.
pub fn default_bucket_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(8)
}

impl<K: StorageKey, V: StorageValue> MemoryBackend<K, V> {
    /// Backend with [`default_bucket_count`] buckets.
    pub fn new() -> Self {
        Self::with_buckets(0)
    }

    /// Backend with `buckets` buckets (0 selects the default).
    pub fn with_buckets(buckets: usize) -> Self {
        let n = if buckets == 0 {
            default_bucket_count()
        } else {
            buckets
        };
        Self {
            buckets: (0..n).map(|_| RwLock::new(BTreeMap::new())).collect(),
        }
    }

    /// Number of buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Up to `max` smallest entries after `from`, taking each bucket lock briefly.
    fn scan_batch(&self, from: &Bound<K>, max: usize) -> Vec<(K, V)> {
        let mut out: Vec<(K, V)> = Vec::new();
        for b in &self.buckets {
            out.extend(
                b.read()
                    .range((from.clone(), Bound::Unbounded))
                    .take(max)
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out.truncate(max);
        out
    }

    fn bucket(&self, key: &K) -> &RwLock<BTreeMap<K, V>> {
        let mut h = DefaultHasher::new();
        key.hash(&mut h);
        &self.buckets[(h.finish() % self.buckets.len() as u64) as usize]
    }
}

impl<K: StorageKey, V: StorageValue> Default for MemoryBackend<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: StorageKey, V: StorageValue> Layer<K, V> for MemoryBackend<K, V> {
    fn get(&self, key: &K) -> Lookup<V> {
        self.bucket(key).read().get(key).cloned().into()
    }

    fn put(&self, key: K, value: V) {
        self.bucket(&key).write().insert(key, value);
    }

    fn remove(&self, key: K) {
        self.bucket(&key).write().remove(&key);
    }

    fn entries(&self) -> Vec<(K, Lookup<V>)> {
        let mut out: Vec<(K, Lookup<V>)> = Vec::new();
        for b in &self.buckets {
            out.extend(
                b.read()
                    .iter()
                    .map(|(k, v)| (k.clone(), Lookup::Value(v.clone()))),
            );
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.read().len()).sum()
    }

    fn logical_deletion(&self) -> bool {
        false
    }
}

impl<K: StorageKey, V: StorageValue> OrderedLayer<K, V> for MemoryBackend<K, V> {
    fn range_from(&self, start: &K) -> Vec<(K, Lookup<V>)> {
        let mut out: Vec<(K, Lookup<V>)> = Vec::new();
        for b in &self.buckets {
            out.extend(
                b.read()
                    .range(start.clone()..)
                    .map(|(k, v)| (k.clone(), Lookup::Value(v.clone()))),
            );
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

impl<K: StorageKey, V: StorageValue> ConcurrentLayer<K, V> for MemoryBackend<K, V> {}

impl<K: StorageKey, V: StorageValue> StorageBackend<K, V> for MemoryBackend<K, V> {
    fn read_some<'a>(&'a self, keys: &'a [K]) -> BoxFuture<'a, Result<Vec<Option<V>>, StorageError>> {
        async move {
            Ok(keys
                .iter()
                .map(|k| self.bucket(k).read().get(k).cloned())
                .collect())
        }
        .boxed()
    }

    fn write_some(&self, items: Vec<(K, V)>) -> BoxFuture<'_, Result<(), StorageError>> {
        async move {
            for (k, v) in items {
                self.put(k, v);
            }
            Ok(())
        }
        .boxed()
    }

    fn remove_some(&self, keys: Vec<K>) -> BoxFuture<'_, Result<(), StorageError>> {
        async move {
            for k in keys {
                Layer::remove(self, k);
            }
            Ok(())
        }
        .boxed()
    }
}

impl<K: StorageKey, V: StorageValue> OrderedBackend<K, V> for MemoryBackend<K, V> {
    fn seek(self: Arc<Self>, start: K) -> BoxStream<'static, Result<(K, V), StorageError>> {
        stream::unfold(Some(Bound::Included(start)), move |from| {
            let backend = self.clone();
            async move {
                let Some(from) = from else {
                    return None;
                };
                let batch = backend.scan_batch(&from, SEEK_BATCH);
                let next = match batch.last() {
                    Some((k, _)) if batch.len() == SEEK_BATCH => Some(Bound::Excluded(k.clone())),
                    _ => None,
                };
                if batch.is_empty() {
                    return None;
                }
                Some((stream::iter(batch.into_iter().map(Ok::<(K, V), StorageError>)), next))
            }
        })
        .flatten()
        .boxed()
    }
}
