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

//! Deterministic W-ary Merkle tree with inclusion proofs.
//!
//! Level 0 is the leaf sequence. Each following level groups the previous one into
//! chunks of `width` hashes (the last chunk may be shorter) and stores
//! `H(chunk[0] || chunk[1] || ..)` per chunk. Levels are appended to one flat buffer
//! until a level of exactly one hash is produced; that hash is the root and the last
//! element of the buffer.
//!
//! At least one level is always hashed, so a single leaf `a` has root `H(a)` and a
//! one-level proof with no siblings.

use crate::core::crypto::hasher::Hasher;
use crate::core::types::Hash32;
use crate::monitoring::metrics::Metrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Merkle errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MerkleError {
    /// Malformed input: empty leaves, empty proof, bad index, unknown target, bad width.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

/// Sibling hashes around the path element at one level.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofLevel {
    /// Chunk members before the path element, in order.
    pub left: Vec<Hash32>,
    /// Chunk members after the path element, in order.
    pub right: Vec<Hash32>,
}

/// Merkle inclusion proof, ordered from the leaf level up to the level below the root.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Per-level siblings.
    pub levels: Vec<ProofLevel>,
}

impl MerkleProof {
    /// Total number of sibling hashes.
    pub fn sibling_count(&self) -> usize {
        self.levels
            .iter()
            .map(|l| l.left.len() + l.right.len())
            .sum()
    }
}

/// Built tree: leaves followed by every hashed level.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerkleTree {
    nodes: Vec<Hash32>,
    leaf_count: usize,
    width: usize,
    hasher_id: &'static str,
    root: Hash32,
}

impl MerkleTree {
    /// Root hash.
    pub fn root(&self) -> Hash32 {
        self.root
    }

    /// Leaves the tree was built from.
    pub fn leaves(&self) -> &[Hash32] {
        &self.nodes[..self.leaf_count]
    }

    /// Flattened output (leaves, levels, root last).
    pub fn nodes(&self) -> &[Hash32] {
        &self.nodes
    }

    /// Fan-out used to build the tree.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Name of the digest the tree was hashed with.
    pub fn hasher_id(&self) -> &'static str {
        self.hasher_id
    }
}

/// Sizes of every level for `leaves` leaves, leaf level first, root level last.
fn level_sizes(leaves: usize, width: usize) -> Vec<usize> {
    let mut sizes = vec![leaves];
    let mut len = leaves;
    loop {
        len = len.div_ceil(width);
        sizes.push(len);
        if len == 1 {
            return sizes;
        }
    }
}

/// Merkle engine bound to a hasher and a fan-out.
#[derive(Clone, Debug)]
pub struct Merkle<H: Hasher> {
    hasher: H,
    width: usize,
    metrics: Option<Arc<Metrics>>,
}

impl<H: Hasher> Merkle<H> {
    /// Create an engine. `width` must be at least 2.
    pub fn new(hasher: H, width: usize) -> Result<Self, MerkleError> {
        if width < 2 {
            return Err(MerkleError::InvalidArgument("width must be >= 2"));
        }
        Ok(Self {
            hasher,
            width,
            metrics: None,
        })
    }

    /// Attach metrics.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Fan-out.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Name of the injected digest.
    pub fn hasher_id(&self) -> &'static str {
        self.hasher.id()
    }

    /// Build the tree into `out` (cleared first). The root is `out.last()`.
    pub fn generate_into(&self, leaves: &[Hash32], out: &mut Vec<Hash32>) -> Result<(), MerkleError> {
        if leaves.is_empty() {
            return Err(MerkleError::InvalidArgument("empty leaves"));
        }
        let w = self.width;
        let mut hasher = self.hasher.clone();

        out.clear();
        out.reserve(level_sizes(leaves.len(), w).iter().sum());
        out.extend_from_slice(leaves);

        let mut start = 0usize;
        let mut len = leaves.len();
        loop {
            let end = start + len;
            let mut chunk = start;
            while chunk < end {
                let chunk_end = (chunk + w).min(end);
                for h in &out[chunk..chunk_end] {
                    hasher.update(h);
                }
                let parent = hasher.finalize();
                out.push(parent);
                chunk = chunk_end;
            }
            start = end;
            len = out.len() - end;
            if len == 1 {
                break;
            }
        }

        if let Some(m) = &self.metrics {
            m.merkle_trees_total.inc();
        }
        debug!(leaves = leaves.len(), width = w, nodes = out.len(), "merkle tree built");
        Ok(())
    }

    /// Build a tree.
    pub fn generate(&self, leaves: &[Hash32]) -> Result<MerkleTree, MerkleError> {
        let mut nodes = Vec::new();
        self.generate_into(leaves, &mut nodes)?;
        let root = *nodes
            .last()
            .ok_or(MerkleError::InvalidArgument("empty merkle output"))?;
        Ok(MerkleTree {
            nodes,
            leaf_count: leaves.len(),
            width: self.width,
            hasher_id: self.hasher.id(),
            root,
        })
    }

    /// Proof for the first leaf equal to `target`.
    pub fn generate_proof(
        &self,
        leaves: &[Hash32],
        output: &[Hash32],
        target: &Hash32,
    ) -> Result<MerkleProof, MerkleError> {
        if output.is_empty() {
            return Err(MerkleError::InvalidArgument("empty merkle output"));
        }
        let index = leaves
            .iter()
            .position(|l| l == target)
            .ok_or(MerkleError::InvalidArgument("target hash not found"))?;
        self.generate_proof_by_index(leaves, output, index)
    }

    /// Proof for the leaf at `index`.
    pub fn generate_proof_by_index(
        &self,
        leaves: &[Hash32],
        output: &[Hash32],
        index: usize,
    ) -> Result<MerkleProof, MerkleError> {
        if output.is_empty() {
            return Err(MerkleError::InvalidArgument("empty merkle output"));
        }
        if index >= leaves.len() {
            return Err(MerkleError::InvalidArgument("leaf index out of range"));
        }
        let w = self.width;
        let sizes = level_sizes(leaves.len(), w);
        if output.len() != sizes.iter().sum::<usize>() || output[..leaves.len()] != *leaves {
            return Err(MerkleError::InvalidArgument("merkle output does not match leaves"));
        }

        let mut levels = Vec::with_capacity(sizes.len() - 1);
        let mut offset = 0usize;
        let mut idx = index;
        // the root level has no siblings
        for &size in &sizes[..sizes.len() - 1] {
            let chunk_start = idx / w * w;
            let chunk_end = (chunk_start + w).min(size);
            levels.push(ProofLevel {
                left: output[offset + chunk_start..offset + idx].to_vec(),
                right: output[offset + idx + 1..offset + chunk_end].to_vec(),
            });
            offset += size;
            idx /= w;
        }

        if let Some(m) = &self.metrics {
            m.merkle_proofs_total.inc();
        }
        Ok(MerkleProof { levels })
    }

    /// Proof for `target` against an already built tree.
    pub fn prove(&self, tree: &MerkleTree, target: &Hash32) -> Result<MerkleProof, MerkleError> {
        self.generate_proof(tree.leaves(), tree.nodes(), target)
    }

    /// Recompute the root from `leaf` along `proof` and compare with `root`.
    ///
    /// `Ok(false)` is a failed verification; `Err` means the proof is malformed.
    pub fn verify_proof(
        &self,
        proof: &MerkleProof,
        leaf: &Hash32,
        root: &Hash32,
    ) -> Result<bool, MerkleError> {
        if proof.levels.is_empty() {
            return Err(MerkleError::InvalidArgument("empty proof"));
        }
        let mut hasher = self.hasher.clone();
        let mut cur = *leaf;
        for level in &proof.levels {
            for h in &level.left {
                hasher.update(h);
            }
            hasher.update(&cur);
            for h in &level.right {
                hasher.update(h);
            }
            cur = hasher.finalize();
        }
        Ok(cur == *root)
    }
}
