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

//! Chainstate - execution-state primitives for a block pipeline.
//!
//! This crate provides:
//! - A deterministic W-ary Merkle engine with inclusion proofs and an injected digest
//! - A multi-layer key-value store (mutable / immutable / cache / backend) with
//!   tombstones, snapshot views, single-writer forks and merge-into-backend
//! - In-memory, LRU-bounded and sled-backed layers
//! - Monitoring via Prometheus metrics and structured logging

/// Configuration (TOML).
pub mod config;
/// Core primitives (types, digests, Merkle engine, layered storage).
pub mod core;
/// Observability (metrics, logging setup).
pub mod monitoring;

pub use crate::core::state::layer::{Lookup, StorageError};
pub use crate::core::state::merkle::{Merkle, MerkleError, MerkleProof, MerkleTree, ProofLevel};
pub use crate::core::state::multi_layer::{MultiLayerStorage, View};
