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

//! Layer capabilities shared by every storage layer.
//!
//! In-memory layers implement the synchronous [`Layer`] family. The bottom of the
//! stack is reached through the asynchronous [`StorageBackend`] boundary so that it
//! may be persistent.

use crate::core::types::CodecError;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use std::hash::Hash;
use std::sync::Arc;
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// `new_mutable` while a mutable layer is live.
    #[error("mutable storage already exists")]
    DuplicateMutableStorage,
    /// Write path used without a live mutable layer.
    #[error("mutable storage does not exist (immutable layers: {immutables})")]
    NotExistsMutableStorage {
        /// Immutable layers visible to the caller.
        immutables: usize,
    },
    /// Merge or accessor used with an empty immutable list.
    #[error("immutable storage does not exist")]
    NotExistsImmutableStorage,
    /// A second mutable view was requested.
    #[error("a mutable view is already outstanding")]
    DuplicateMutableView,
    /// `write` got different numbers of keys and values.
    #[error("length mismatch: {keys} keys, {values} values")]
    LengthMismatch {
        /// Key count.
        keys: usize,
        /// Value count.
        values: usize,
    },
    /// Key or value encoding failed.
    #[error("codec: {0}")]
    Codec(#[from] CodecError),
    /// Backend failure.
    #[error("backend: {0}")]
    Backend(String),
}

/// Bounds every storage key satisfies.
pub trait StorageKey: Ord + Hash + Clone + Send + Sync + 'static {}
impl<T: Ord + Hash + Clone + Send + Sync + 'static> StorageKey for T {}

/// Bounds every storage value satisfies.
pub trait StorageValue: Clone + Send + Sync + 'static {}
impl<T: Clone + Send + Sync + 'static> StorageValue for T {}

/// Resolution of one key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lookup<V> {
    /// Live value.
    Value(V),
    /// Tombstone: deleted in this layer, shadows everything below.
    Deleted,
    /// Not held here; look further down.
    Missing,
}

impl<V> Lookup<V> {
    /// True for a value or a tombstone.
    pub fn is_found(&self) -> bool {
        !matches!(self, Lookup::Missing)
    }

    /// True for a tombstone.
    pub fn is_deleted(&self) -> bool {
        matches!(self, Lookup::Deleted)
    }

    /// Live value, if any.
    pub fn into_value(self) -> Option<V> {
        match self {
            Lookup::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow the live value, if any.
    pub fn as_value(&self) -> Option<&V> {
        match self {
            Lookup::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl<V> From<Option<V>> for Lookup<V> {
    fn from(v: Option<V>) -> Self {
        match v {
            Some(v) => Lookup::Value(v),
            None => Lookup::Missing,
        }
    }
}

/// Point-access key/value layer.
pub trait Layer<K, V>: Send + Sync {
    /// Resolve `key` in this layer only.
    fn get(&self, key: &K) -> Lookup<V>;
    /// Insert or overwrite.
    fn put(&self, key: K, value: V);
    /// Delete: a tombstone with logical deletion, physical removal otherwise.
    fn remove(&self, key: K);
    /// Snapshot of all held entries, tombstones as [`Lookup::Deleted`].
    fn entries(&self) -> Vec<(K, Lookup<V>)>;
    /// Number of held entries, tombstones included.
    fn len(&self) -> usize;
    /// True if nothing is held.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// True if deletes are kept as tombstones.
    fn logical_deletion(&self) -> bool;
}

/// Layer supporting key-ordered range iteration.
pub trait OrderedLayer<K, V>: Layer<K, V> {
    /// Entries with key `>= start`, in key order.
    fn range_from(&self, start: &K) -> Vec<(K, Lookup<V>)>;
}

/// Layer that tolerates parallel point reads while a merge writes into it.
pub trait ConcurrentLayer<K, V>: Layer<K, V> {}

/// Bottom layer of the stack.
pub trait StorageBackend<K, V>: Send + Sync + 'static {
    /// Values for `keys`, in input order.
    fn read_some<'a>(&'a self, keys: &'a [K]) -> BoxFuture<'a, Result<Vec<Option<V>>, StorageError>>;
    /// Insert or overwrite every pair.
    fn write_some(&self, items: Vec<(K, V)>) -> BoxFuture<'_, Result<(), StorageError>>;
    /// Physically remove every key.
    fn remove_some(&self, keys: Vec<K>) -> BoxFuture<'_, Result<(), StorageError>>;
}

/// Rows fetched per step of a backend scan.
pub const SEEK_BATCH: usize = 256;

/// Backend supporting key-ordered scans.
pub trait OrderedBackend<K, V>: StorageBackend<K, V> {
    /// Entries with key `>= start`, in key order.
    ///
    /// The stream is lazy: rows are fetched in batches of [`SEEK_BATCH`] as it is polled,
    /// and dropping it stops the scan.
    fn seek(self: Arc<Self>, start: K) -> BoxStream<'static, Result<(K, V), StorageError>>;
}
