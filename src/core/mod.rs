// Copyright (c) 2026 Chainstate
// Licensed under the Apache License, Version 2.0

/// Digests.
pub mod crypto;
/// Merkle engine and layered storage.
pub mod state;
/// Shared primitives and canonical encoding.
pub mod types;
