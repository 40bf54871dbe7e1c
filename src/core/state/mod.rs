// Copyright (c) 2026 Chainstate
// Licensed under the Apache License, Version 2.0

/// Versioned state record.
pub mod entry;
/// Layer capabilities, lookup results and storage errors.
pub mod layer;
/// Capacity-bounded LRU layer.
pub mod lru_layer;
/// In-memory layers and backend.
pub mod memory_layer;
/// W-ary Merkle engine.
pub mod merkle;
/// Per-block Merkle tree cache.
pub mod merkle_cache;
/// Multi-layer storage stack and views.
pub mod multi_layer;
/// sled backend.
pub mod sled_backend;
