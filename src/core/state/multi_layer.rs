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

//! Multi-layer transactional storage.
//!
//! One optional mutable layer on top, immutable layers below it (front = newest),
//! an optional LRU cache and one backend at the bottom. Reads fall through in that
//! order and stop at the first layer holding the key, tombstones included.
//!
//! Lifecycle, called once per block by the scheduler:
//! `new_mutable` -> writes through a mutable [`View`] -> `push_mutable_to_immutable_front`
//! -> `merge_and_pop_immutable_back` (folds the oldest immutable layer into the backend).

use crate::core::state::layer::{
    Layer, Lookup, OrderedBackend, OrderedLayer, StorageBackend, StorageError, StorageKey,
    StorageValue,
};
use crate::core::state::lru_layer::LruLayer;
use crate::core::types::ByteSize;
use crate::monitoring::metrics::Metrics;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::iter::Peekable;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

/// A layer plus its freeze flag. A frozen layer accepts no further writes.
pub struct LayerHandle<M> {
    layer: M,
    frozen: RwLock<bool>,
}

impl<M> LayerHandle<M> {
    fn new(layer: M) -> Self {
        Self {
            layer,
            frozen: RwLock::new(false),
        }
    }

    /// The wrapped layer.
    pub fn layer(&self) -> &M {
        &self.layer
    }

    /// True once pushed to the immutable list.
    pub fn is_frozen(&self) -> bool {
        *self.frozen.read()
    }

    // waits for in-flight writes, which hold the read side
    fn freeze(&self) {
        *self.frozen.write() = true;
    }
}

struct Topology<M> {
    mutable: Option<Arc<LayerHandle<M>>>,
    immutables: VecDeque<Arc<LayerHandle<M>>>,
}

/// Layers captured when a view is forked.
struct Snapshot<K, V, M, B> {
    temporary: Option<Arc<LayerHandle<M>>>,
    mutable: Option<Arc<LayerHandle<M>>>,
    immutables: Vec<Arc<LayerHandle<M>>>,
    cache: Option<Arc<LruLayer<K, V>>>,
    backend: Arc<B>,
}

impl<K, V, M, B> Snapshot<K, V, M, B>
where
    K: StorageKey + ByteSize,
    V: StorageValue + ByteSize,
    M: Layer<K, V> + 'static,
    B: StorageBackend<K, V>,
{
    /// In-memory layer handles, top first.
    fn handles(&self) -> impl DoubleEndedIterator<Item = &Arc<LayerHandle<M>>> {
        self.temporary
            .iter()
            .chain(self.mutable.iter())
            .chain(self.immutables.iter())
    }

    /// In-memory layers, top first.
    fn layers(&self) -> impl Iterator<Item = &M> {
        self.handles().map(|h| &h.layer)
    }

    async fn read_one(&self, key: &K) -> Result<Lookup<V>, StorageError> {
        for layer in self.layers() {
            let found = layer.get(key);
            if found.is_found() {
                return Ok(found);
            }
        }
        if let Some(cache) = &self.cache {
            let found = cache.get(key);
            if found.is_found() {
                return Ok(found);
            }
        }
        let mut got = self.backend.read_some(std::slice::from_ref(key)).await?;
        Ok(got.pop().flatten().into())
    }

    /// Batch resolution: each layer only sees the keys still unresolved above it.
    async fn read_some(&self, keys: &[K]) -> Result<Vec<Lookup<V>>, StorageError> {
        let mut out: Vec<Lookup<V>> = vec![Lookup::Missing; keys.len()];
        let mut missing: Vec<usize> = (0..keys.len()).collect();

        let cache = self.cache.as_deref().map(|c| c as &dyn Layer<K, V>);
        let layers = self
            .layers()
            .map(|l| l as &dyn Layer<K, V>)
            .chain(cache);
        for layer in layers {
            if missing.is_empty() {
                return Ok(out);
            }
            missing.retain(|&i| {
                let found = layer.get(&keys[i]);
                if found.is_found() {
                    out[i] = found;
                    false
                } else {
                    true
                }
            });
        }
        if missing.is_empty() {
            return Ok(out);
        }

        let lookup: Vec<K> = missing.iter().map(|&i| keys[i].clone()).collect();
        let got = self.backend.read_some(&lookup).await?;
        for (&i, v) in missing.iter().zip(got) {
            out[i] = v.into();
        }
        Ok(out)
    }
}

/// The layered store.
pub struct MultiLayerStorage<K, V, M, B> {
    topology: Mutex<Topology<M>>,
    merge_lock: tokio::sync::Mutex<()>,
    writer: Arc<tokio::sync::Mutex<()>>,
    backend: Arc<B>,
    cache: Option<Arc<LruLayer<K, V>>>,
    metrics: Option<Arc<Metrics>>,
}

impl<K, V, M, B> MultiLayerStorage<K, V, M, B>
where
    K: StorageKey + ByteSize,
    V: StorageValue + ByteSize,
    M: Layer<K, V> + 'static,
    B: StorageBackend<K, V>,
{
    /// Stack over `backend` with no mutable and no immutable layers.
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            topology: Mutex::new(Topology {
                mutable: None,
                immutables: VecDeque::new(),
            }),
            merge_lock: tokio::sync::Mutex::new(()),
            writer: Arc::new(tokio::sync::Mutex::new(())),
            backend,
            cache: None,
            metrics: None,
        }
    }

    /// Add a cache layer between the immutable layers and the backend. Merges write
    /// into it alongside the backend.
    pub fn with_cache(mut self, cache: Arc<LruLayer<K, V>>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Attach metrics.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Backend layer.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Cache layer, if configured.
    pub fn cache(&self) -> Option<&Arc<LruLayer<K, V>>> {
        self.cache.as_ref()
    }

    /// True while a mutable layer is live.
    pub fn has_mutable(&self) -> bool {
        self.topology.lock().mutable.is_some()
    }

    /// Number of immutable layers awaiting merge.
    pub fn immutable_len(&self) -> usize {
        self.topology.lock().immutables.len()
    }

    /// Create an empty mutable layer.
    pub fn new_mutable(&self) -> Result<(), StorageError>
    where
        M: Default,
    {
        self.new_mutable_with(M::default())
    }

    /// Install `layer` as the mutable layer.
    pub fn new_mutable_with(&self, layer: M) -> Result<(), StorageError> {
        let mut t = self.topology.lock();
        if t.mutable.is_some() {
            return Err(StorageError::DuplicateMutableStorage);
        }
        t.mutable = Some(Arc::new(LayerHandle::new(layer)));
        debug!(immutables = t.immutables.len(), "new mutable layer");
        Ok(())
    }

    /// Freeze the mutable layer and move it to the front of the immutable list.
    pub fn push_mutable_to_immutable_front(&self) -> Result<(), StorageError> {
        let mut t = self.topology.lock();
        let Some(handle) = t.mutable.take() else {
            return Err(StorageError::NotExistsMutableStorage {
                immutables: t.immutables.len(),
            });
        };
        handle.freeze();
        let entries = handle.layer.len();
        t.immutables.push_front(handle);
        if let Some(m) = &self.metrics {
            m.storage_immutable_layers.set(t.immutables.len() as i64);
        }
        info!(entries, immutables = t.immutables.len(), "mutable layer pushed to immutable front");
        Ok(())
    }

    /// Fold the oldest immutable layer into the backend (and cache), then drop it.
    ///
    /// Tombstones are purged from the backend. Merges are serialized; readers keep
    /// seeing the layer until it is popped.
    pub async fn merge_and_pop_immutable_back(&self) -> Result<(), StorageError> {
        let _merging = self.merge_lock.lock().await;
        let layer = {
            let t = self.topology.lock();
            t.immutables
                .back()
                .cloned()
                .ok_or(StorageError::NotExistsImmutableStorage)?
        };

        let mut writes: Vec<(K, V)> = Vec::new();
        let mut removes: Vec<K> = Vec::new();
        for (k, found) in layer.layer.entries() {
            match found {
                Lookup::Value(v) => writes.push((k, v)),
                Lookup::Deleted => removes.push(k),
                Lookup::Missing => {}
            }
        }
        let (written, purged) = (writes.len(), removes.len());
        debug!(written, purged, "merging immutable layer into backend");

        let for_cache = self
            .cache
            .as_ref()
            .map(|_| (writes.clone(), removes.clone()));
        if !writes.is_empty() {
            self.backend.write_some(writes).await?;
        }
        if !removes.is_empty() {
            self.backend.remove_some(removes).await?;
        }
        if let (Some(cache), Some((writes, removes))) = (&self.cache, for_cache) {
            for (k, v) in writes {
                cache.put(k, v);
            }
            for k in removes {
                cache.evict_key(&k);
            }
        }

        let remaining = {
            let mut t = self.topology.lock();
            match t.immutables.back() {
                Some(back) if Arc::ptr_eq(back, &layer) => {
                    t.immutables.pop_back();
                }
                _ => warn!("merged layer is no longer at the back of the immutable list"),
            }
            t.immutables.len()
        };

        if let Some(m) = &self.metrics {
            m.storage_merges_total.inc();
            m.storage_merged_entries_total.inc_by(written as u64);
            m.storage_purged_entries_total.inc_by(purged as u64);
            m.storage_immutable_layers.set(remaining as i64);
        }
        info!(written, purged, immutables = remaining, "immutable layer merged");
        Ok(())
    }

    /// Newest immutable layer.
    pub fn front_immutable(&self) -> Result<Arc<LayerHandle<M>>, StorageError> {
        self.topology
            .lock()
            .immutables
            .front()
            .cloned()
            .ok_or(StorageError::NotExistsImmutableStorage)
    }

    /// Oldest immutable layer (the next one to merge).
    pub fn back_immutable(&self) -> Result<Arc<LayerHandle<M>>, StorageError> {
        self.topology
            .lock()
            .immutables
            .back()
            .cloned()
            .ok_or(StorageError::NotExistsImmutableStorage)
    }

    /// Bind a view to the current layers.
    ///
    /// A mutable view holds the single-writer guard until released or dropped; a second
    /// one fails with [`StorageError::DuplicateMutableView`]. Read-only views are unlimited.
    pub fn fork(&self, mutable: bool) -> Result<View<K, V, M, B>, StorageError> {
        let writer = if mutable {
            Some(
                self.writer
                    .clone()
                    .try_lock_owned()
                    .map_err(|_| StorageError::DuplicateMutableView)?,
            )
        } else {
            None
        };
        let t = self.topology.lock();
        let snapshot = Snapshot {
            temporary: None,
            mutable: t.mutable.clone(),
            immutables: t.immutables.iter().cloned().collect(),
            cache: self.cache.clone(),
            backend: self.backend.clone(),
        };
        Ok(View {
            snapshot: Arc::new(snapshot),
            writer,
            metrics: self.metrics.clone(),
        })
    }
}

/// Accessor bound to the layers present at fork time.
pub struct View<K, V, M, B> {
    snapshot: Arc<Snapshot<K, V, M, B>>,
    writer: Option<OwnedMutexGuard<()>>,
    metrics: Option<Arc<Metrics>>,
}

impl<K, V, M, B> View<K, V, M, B>
where
    K: StorageKey + ByteSize,
    V: StorageValue + ByteSize,
    M: Layer<K, V> + 'static,
    B: StorageBackend<K, V>,
{
    /// True while this view holds the writer guard.
    pub fn is_mutable(&self) -> bool {
        self.writer.is_some()
    }

    /// Give up the writer guard. The view stays usable for reads.
    pub fn release(&mut self) {
        self.writer = None;
    }

    /// Immutable layers visible to this view.
    pub fn immutable_len(&self) -> usize {
        self.snapshot.immutables.len()
    }

    /// True once [`View::new_temporary_mutable`] installed a scratch layer.
    pub fn has_temporary(&self) -> bool {
        self.snapshot.temporary.is_some()
    }

    /// Install a scratch mutable layer private to this view, on top of its snapshot.
    ///
    /// Writes then go to `layer` without the single-writer guard. They are never pushed
    /// or merged and are dropped with the view. Fails with
    /// [`StorageError::DuplicateMutableStorage`] if the view already writes to a mutable
    /// layer, its own or the shared one.
    pub fn new_temporary_mutable(&mut self, layer: M) -> Result<(), StorageError> {
        let s = &self.snapshot;
        if s.temporary.is_some() || (self.writer.is_some() && s.mutable.is_some()) {
            return Err(StorageError::DuplicateMutableStorage);
        }
        self.snapshot = Arc::new(Snapshot {
            temporary: Some(Arc::new(LayerHandle::new(layer))),
            mutable: s.mutable.clone(),
            immutables: s.immutables.clone(),
            cache: s.cache.clone(),
            backend: s.backend.clone(),
        });
        debug!(immutables = self.snapshot.immutables.len(), "temporary mutable layer installed");
        Ok(())
    }

    fn count_reads(&self, n: usize) {
        if let Some(m) = &self.metrics {
            m.storage_read_keys_total.inc_by(n as u64);
        }
    }

    /// Resolve one key.
    pub async fn read_one(&self, key: &K) -> Result<Lookup<V>, StorageError> {
        self.count_reads(1);
        self.snapshot.read_one(key).await
    }

    /// Resolve `keys` in one pass per layer; results in input order.
    pub async fn read_some(&self, keys: &[K]) -> Result<Vec<Lookup<V>>, StorageError> {
        self.count_reads(keys.len());
        self.snapshot.read_some(keys).await
    }

    /// Lazy, single-pass reader over `keys`, in input order.
    pub fn read(&self, keys: impl IntoIterator<Item = K>) -> ReadIter<K, V, M, B> {
        let keys: Vec<K> = keys.into_iter().collect();
        self.count_reads(keys.len());
        ReadIter {
            snapshot: Some(self.snapshot.clone()),
            keys: keys.into_iter(),
        }
    }

    fn with_writable<R>(&self, f: impl FnOnce(&M) -> R) -> Result<R, StorageError> {
        let not_exists = || StorageError::NotExistsMutableStorage {
            immutables: self.snapshot.immutables.len(),
        };
        if let Some(scratch) = &self.snapshot.temporary {
            return Ok(f(&scratch.layer));
        }
        let (Some(_), Some(handle)) = (&self.writer, &self.snapshot.mutable) else {
            return Err(not_exists());
        };
        let frozen = handle.frozen.read();
        if *frozen {
            return Err(not_exists());
        }
        Ok(f(&handle.layer))
    }

    /// Write `keys[i] = values[i]` into the mutable layer.
    pub async fn write(
        &self,
        keys: impl IntoIterator<Item = K>,
        values: impl IntoIterator<Item = V>,
    ) -> Result<(), StorageError> {
        let keys: Vec<K> = keys.into_iter().collect();
        let values: Vec<V> = values.into_iter().collect();
        if keys.len() != values.len() {
            return Err(StorageError::LengthMismatch {
                keys: keys.len(),
                values: values.len(),
            });
        }
        let n = keys.len();
        self.with_writable(move |layer| {
            for (k, v) in keys.into_iter().zip(values) {
                layer.put(k, v);
            }
        })?;
        if let Some(m) = &self.metrics {
            m.storage_written_keys_total.inc_by(n as u64);
        }
        Ok(())
    }

    /// Write one pair.
    pub async fn write_one(&self, key: K, value: V) -> Result<(), StorageError> {
        self.write([key], [value]).await
    }

    /// Tombstone `keys` in the mutable layer.
    pub async fn remove(&self, keys: impl IntoIterator<Item = K>) -> Result<(), StorageError> {
        let keys: Vec<K> = keys.into_iter().collect();
        let n = keys.len();
        self.with_writable(move |layer| {
            for k in keys {
                layer.remove(k);
            }
        })?;
        if let Some(m) = &self.metrics {
            m.storage_written_keys_total.inc_by(n as u64);
        }
        Ok(())
    }

    /// Entries with key `>= start` across all layers in key order. Upper layers shadow
    /// lower ones; tombstones still held above the backend come out as [`Lookup::Deleted`].
    ///
    /// The in-memory layers are merged up front; the backend is scanned lazily as the
    /// iterator advances.
    pub fn seek(&self, start: &K) -> SeekIter<K, V>
    where
        M: OrderedLayer<K, V>,
        B: OrderedBackend<K, V>,
    {
        let s = &self.snapshot;
        let mut upper: BTreeMap<K, Lookup<V>> = BTreeMap::new();
        // bottom-up, so newer layers overwrite older ones
        for h in s.handles().rev() {
            for (k, found) in h.layer.range_from(start) {
                upper.insert(k, found);
            }
        }
        SeekIter {
            upper: upper.into_iter().peekable(),
            backend: Some(s.backend.clone().seek(start.clone())),
            pending: None,
        }
    }
}

/// Lazy reader produced by [`View::read`].
pub struct ReadIter<K, V, M, B> {
    snapshot: Option<Arc<Snapshot<K, V, M, B>>>,
    keys: std::vec::IntoIter<K>,
}

impl<K, V, M, B> ReadIter<K, V, M, B>
where
    K: StorageKey + ByteSize,
    V: StorageValue + ByteSize,
    M: Layer<K, V> + 'static,
    B: StorageBackend<K, V>,
{
    /// Resolve the next key. `Ok(None)` once exhausted or released.
    pub async fn next(&mut self) -> Result<Option<(K, Lookup<V>)>, StorageError> {
        let Some(snapshot) = self.snapshot.clone() else {
            return Ok(None);
        };
        let Some(key) = self.keys.next() else {
            self.release();
            return Ok(None);
        };
        let found = snapshot.read_one(&key).await?;
        Ok(Some((key, found)))
    }

    /// Keys not yet resolved.
    pub fn remaining(&self) -> usize {
        self.keys.len()
    }

    /// Drop the layer references. Safe to call repeatedly.
    pub fn release(&mut self) {
        self.snapshot = None;
        self.keys = Vec::new().into_iter();
    }

    /// Drain every remaining result.
    pub async fn collect_all(mut self) -> Result<Vec<(K, Lookup<V>)>, StorageError> {
        let mut out = Vec::with_capacity(self.remaining());
        while let Some(item) = self.next().await? {
            out.push(item);
        }
        Ok(out)
    }
}

/// Ordered cursor produced by [`View::seek`].
pub struct SeekIter<K, V> {
    upper: Peekable<std::collections::btree_map::IntoIter<K, Lookup<V>>>,
    backend: Option<BoxStream<'static, Result<(K, V), StorageError>>>,
    pending: Option<(K, V)>,
}

impl<K: Ord, V> SeekIter<K, V> {
    /// Next entry in key order. `Ok(None)` once exhausted or released.
    pub async fn next(&mut self) -> Result<Option<(K, Lookup<V>)>, StorageError> {
        if self.pending.is_none() && self.backend.is_some() {
            let row = match self.backend.as_mut() {
                Some(stream) => stream.next().await,
                None => None,
            };
            match row {
                Some(row) => self.pending = Some(row?),
                None => self.backend = None,
            }
        }
        let order = match (self.upper.peek(), &self.pending) {
            (None, None) => return Ok(None),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some((upper, _)), Some((lower, _))) => upper.cmp(lower),
        };
        if order == Ordering::Equal {
            // shadowed by an upper layer
            self.pending = None;
        }
        if order == Ordering::Greater {
            return Ok(self.pending.take().map(|(k, v)| (k, Lookup::Value(v))));
        }
        Ok(self.upper.next())
    }

    /// Drop the backend scan and whatever has not been consumed. Safe to call repeatedly.
    pub fn release(&mut self) {
        self.backend = None;
        self.pending = None;
        self.upper = BTreeMap::new().into_iter().peekable();
    }

    /// Drain every remaining entry, tombstones included.
    pub async fn collect_all(mut self) -> Result<Vec<(K, Lookup<V>)>, StorageError> {
        let mut out = Vec::new();
        while let Some(item) = self.next().await? {
            out.push(item);
        }
        Ok(out)
    }

    /// Drain the remaining live entries.
    pub async fn values(mut self) -> Result<Vec<(K, V)>, StorageError> {
        let mut out = Vec::new();
        while let Some((k, found)) = self.next().await? {
            if let Lookup::Value(v) = found {
                out.push((k, v));
            }
        }
        Ok(out)
    }
}
