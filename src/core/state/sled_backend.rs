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

//! Persistent backend layer on sled.
//!
//! Keys are stored with their order-preserving [`KeyCodec`] encoding so sled's byte order
//! is the key order; values use canonical bincode.

use crate::core::state::layer::{OrderedBackend, StorageBackend, StorageError, SEEK_BATCH};
use crate::core::types::{decode_canonical_limited, encode_canonical, KeyCodec};
use futures::future::{BoxFuture, FutureExt, TryFutureExt};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Upper bound for one decoded value.
pub const MAX_VALUE_BYTES: usize = 16 * 1024 * 1024;

/// sled-backed storage backend.
pub struct SledBackend<K, V> {
    db: sled::Db,
    tree: sled::Tree,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Clone for SledBackend<K, V> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            tree: self.tree.clone(),
            _marker: PhantomData,
        }
    }
}

fn io(e: sled::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn join(e: tokio::task::JoinError) -> StorageError {
    StorageError::Backend(e.to_string())
}

type RawRow = (sled::IVec, sled::IVec);

/// Pull up to `max` rows off `iter` on the blocking pool. The iterator is handed back
/// unless it ran dry.
async fn next_rows(
    mut iter: sled::Iter,
    max: usize,
) -> Result<(Vec<RawRow>, Option<sled::Iter>), StorageError> {
    tokio::task::spawn_blocking(move || {
        let mut rows = Vec::with_capacity(max);
        while rows.len() < max {
            match iter.next() {
                Some(row) => rows.push(row.map_err(io)?),
                None => return Ok((rows, None)),
            }
        }
        Ok((rows, Some(iter)))
    })
    .await
    .map_err(join)?
}

type ScanStep<K, V> = Option<(Vec<(K, V)>, Option<sled::Iter>)>;

/// One decoded batch of a range scan. `None` once the scan is exhausted.
async fn scan_step<K, V>(iter: Option<sled::Iter>) -> Result<ScanStep<K, V>, StorageError>
where
    K: KeyCodec,
    V: DeserializeOwned,
{
    let Some(iter) = iter else {
        return Ok(None);
    };
    let (rows, rest) = next_rows(iter, SEEK_BATCH).await?;
    if rows.is_empty() {
        return Ok(None);
    }
    let mut decoded = Vec::with_capacity(rows.len());
    for (k, v) in rows {
        decoded.push((
            K::decode_key(&k)?,
            decode_canonical_limited(&v, MAX_VALUE_BYTES)?,
        ));
    }
    Ok(Some((decoded, rest)))
}

impl<K, V> SledBackend<K, V>
where
    K: KeyCodec + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Open the DB at `path` (directory), using the default tree.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::open_tree(path, "state")
    }

    /// Open the DB at `path`, using the named tree.
    pub fn open_tree(path: impl AsRef<Path>, tree: &str) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(io)?;
        let tree = db.open_tree(tree).map_err(io)?;
        Ok(Self {
            db,
            tree,
            _marker: PhantomData,
        })
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Read one key synchronously.
    pub fn get(&self, key: &K) -> Result<Option<V>, StorageError> {
        match self.tree.get(key.encode_key()).map_err(io)? {
            Some(raw) => Ok(Some(decode_canonical_limited(&raw, MAX_VALUE_BYTES)?)),
            None => Ok(None),
        }
    }

    /// Flush pending writes to disk.
    pub async fn flush(&self) -> Result<(), StorageError> {
        self.db.flush_async().await.map_err(io)?;
        Ok(())
    }

    async fn apply(&self, batch: sled::Batch, len: usize) -> Result<(), StorageError> {
        let tree = self.tree.clone();
        tokio::task::spawn_blocking(move || tree.apply_batch(batch))
            .await
            .map_err(join)?
            .map_err(io)?;
        self.flush().await?;
        debug!(ops = len, "sled batch applied");
        Ok(())
    }
}

impl<K, V> StorageBackend<K, V> for SledBackend<K, V>
where
    K: KeyCodec + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn read_some<'a>(&'a self, keys: &'a [K]) -> BoxFuture<'a, Result<Vec<Option<V>>, StorageError>> {
        async move {
            let tree = self.tree.clone();
            let encoded: Vec<Vec<u8>> = keys.iter().map(KeyCodec::encode_key).collect();
            let raw = tokio::task::spawn_blocking(move || {
                encoded
                    .iter()
                    .map(|k| tree.get(k).map_err(io))
                    .collect::<Result<Vec<_>, _>>()
            })
            .await
            .map_err(join)??;
            raw.into_iter()
                .map(|v| -> Result<Option<V>, StorageError> {
                    match v {
                        Some(v) => Ok(Some(decode_canonical_limited(&v, MAX_VALUE_BYTES)?)),
                        None => Ok(None),
                    }
                })
                .collect()
        }
        .boxed()
    }

    fn write_some(&self, items: Vec<(K, V)>) -> BoxFuture<'_, Result<(), StorageError>> {
        async move {
            let len = items.len();
            let mut batch = sled::Batch::default();
            for (k, v) in items.iter() {
                batch.insert(k.encode_key(), encode_canonical(v)?);
            }
            self.apply(batch, len).await
        }
        .boxed()
    }

    fn remove_some(&self, keys: Vec<K>) -> BoxFuture<'_, Result<(), StorageError>> {
        async move {
            let len = keys.len();
            let mut batch = sled::Batch::default();
            for k in keys.iter() {
                batch.remove(k.encode_key());
            }
            self.apply(batch, len).await
        }
        .boxed()
    }
}

impl<K, V> OrderedBackend<K, V> for SledBackend<K, V>
where
    K: KeyCodec + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn seek(self: Arc<Self>, start: K) -> BoxStream<'static, Result<(K, V), StorageError>> {
        let iter = self.tree.range(start.encode_key()..);
        stream::try_unfold(Some(iter), |iter| {
            scan_step::<K, V>(iter).map_ok(|step| {
                step.map(|(rows, rest)| {
                    (stream::iter(rows.into_iter().map(Ok::<(K, V), StorageError>)), rest)
                })
            })
        })
        .try_flatten()
        .boxed()
    }
}
