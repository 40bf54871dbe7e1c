// Copyright (c) 2026 Chainstate
// Licensed under the Apache License, Version 2.0

/// Digest abstraction and `ring` implementations.
pub mod hasher;
