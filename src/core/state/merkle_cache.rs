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

//! Bounded cache of built trees keyed by block number, so repeated proof requests for
//! the same block's transactions or receipts don't rebuild the tree.

use crate::core::crypto::hasher::Hasher;
use crate::core::state::merkle::{Merkle, MerkleError, MerkleProof, MerkleTree};
use crate::core::types::Hash32;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::trace;

/// LRU cache of Merkle trees by block number.
pub struct MerkleCache {
    trees: Mutex<LruCache<u64, Arc<MerkleTree>>>,
}

impl MerkleCache {
    /// Cache holding at most `capacity` trees (at least one).
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            trees: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Cached tree for `block`, built from `leaves` when absent or stale.
    ///
    /// A cached tree is reused only if it was built over the same leaves with the
    /// same fan-out and digest.
    pub fn get_or_build<H: Hasher>(
        &self,
        block: u64,
        leaves: &[Hash32],
        merkle: &Merkle<H>,
    ) -> Result<Arc<MerkleTree>, MerkleError> {
        if let Some(tree) = self.trees.lock().get(&block) {
            if tree.width() == merkle.width()
                && tree.hasher_id() == merkle.hasher_id()
                && tree.leaves() == leaves
            {
                trace!(block, "merkle cache hit");
                return Ok(tree.clone());
            }
        }
        let tree = Arc::new(merkle.generate(leaves)?);
        self.trees.lock().put(block, tree.clone());
        trace!(block, leaves = leaves.len(), "merkle cache miss");
        Ok(tree)
    }

    /// Inclusion proof for `target` in block `block`.
    pub fn prove<H: Hasher>(
        &self,
        block: u64,
        leaves: &[Hash32],
        merkle: &Merkle<H>,
        target: &Hash32,
    ) -> Result<MerkleProof, MerkleError> {
        let tree = self.get_or_build(block, leaves, merkle)?;
        merkle.prove(&tree, target)
    }

    /// Drop the cached tree of `block`.
    pub fn invalidate(&self, block: u64) {
        self.trees.lock().pop(&block);
    }

    /// Number of cached trees.
    pub fn len(&self) -> usize {
        self.trees.lock().len()
    }

    /// True if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.trees.lock().is_empty()
    }
}
