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

//! Streaming digest abstraction injected into the Merkle engine.

use crate::core::types::Hash32;
use ring::digest;
use serde::{Deserialize, Serialize};

/// Incremental 32-byte digest.
pub trait Hasher: Clone + Send + Sync {
    /// Absorb bytes.
    fn update(&mut self, data: &[u8]);
    /// Produce the digest and reset the context.
    fn finalize(&mut self) -> Hash32;
    /// Stable name of the digest, e.g. `sha256`. Trees built by different digests never
    /// share a name.
    fn id(&self) -> &'static str;
}

/// Digest algorithms with a 32-byte output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// SHA-256.
    #[default]
    Sha256,
    /// SHA-512/256.
    Sha512_256,
}

impl HashAlgorithm {
    /// Config name of the algorithm.
    pub fn as_str(self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512_256 => "sha512_256",
        }
    }

    fn ring(self) -> &'static digest::Algorithm {
        match self {
            HashAlgorithm::Sha256 => &digest::SHA256,
            HashAlgorithm::Sha512_256 => &digest::SHA512_256,
        }
    }
}

/// `ring` backed hasher.
#[derive(Clone)]
pub struct RingHasher {
    alg: HashAlgorithm,
    ctx: digest::Context,
}

impl RingHasher {
    /// New hasher for `alg`.
    pub fn new(alg: HashAlgorithm) -> Self {
        Self {
            alg,
            ctx: digest::Context::new(alg.ring()),
        }
    }

    /// SHA-256 hasher.
    pub fn sha256() -> Self {
        Self::new(HashAlgorithm::Sha256)
    }

    /// Algorithm in use.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.alg
    }
}

impl Default for RingHasher {
    fn default() -> Self {
        Self::sha256()
    }
}

impl std::fmt::Debug for RingHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingHasher").field("alg", &self.alg).finish()
    }
}

impl Hasher for RingHasher {
    fn update(&mut self, data: &[u8]) {
        self.ctx.update(data);
    }

    fn finalize(&mut self) -> Hash32 {
        let ctx = std::mem::replace(&mut self.ctx, digest::Context::new(self.alg.ring()));
        let d = ctx.finish();
        let mut out = [0u8; 32];
        out.copy_from_slice(d.as_ref());
        out
    }

    fn id(&self) -> &'static str {
        self.alg.as_str()
    }
}
