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

//! TOML configuration. Every field has a default, so an empty file is valid.
//!
//! ```toml
//! [merkle]
//! width = 2
//! hash = "sha256"
//! cache_blocks = 64
//!
//! [storage]
//! backend = "sled"
//! data_dir = "./data"
//! buckets = 0
//! cache_capacity_bytes = 33554432
//!
//! [log]
//! level = "info"
//! json = false
//! ```

use crate::core::crypto::hasher::{HashAlgorithm, RingHasher};
use crate::core::state::layer::{StorageError, StorageKey, StorageValue};
use crate::core::state::lru_layer::LruLayer;
use crate::core::state::memory_layer::MemoryBackend;
use crate::core::state::merkle::{Merkle, MerkleError};
use crate::core::state::merkle_cache::MerkleCache;
use crate::core::state::sled_backend::SledBackend;
use crate::core::types::{ByteSize, KeyCodec};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Config errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Root configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Merkle engine.
    pub merkle: MerkleConfig,
    /// Layered storage.
    pub storage: StorageConfig,
    /// Logging.
    pub log: LogConfig,
}

impl Config {
    /// Parse and validate TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Reject values the engines cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.merkle.width < 2 {
            return Err(ConfigError::Invalid("merkle.width must be >= 2"));
        }
        if self.storage.backend == BackendKind::Sled && self.storage.data_dir.trim().is_empty() {
            return Err(ConfigError::Invalid("storage.data_dir is required for the sled backend"));
        }
        Ok(())
    }
}

/// Merkle engine settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MerkleConfig {
    /// Fan-out (>= 2).
    pub width: usize,
    /// Digest.
    pub hash: HashAlgorithm,
    /// Trees kept by the per-block cache.
    pub cache_blocks: usize,
}

impl Default for MerkleConfig {
    fn default() -> Self {
        Self {
            width: 2,
            hash: HashAlgorithm::Sha256,
            cache_blocks: 64,
        }
    }
}

impl MerkleConfig {
    /// Engine for these settings.
    pub fn build(&self) -> Result<Merkle<RingHasher>, MerkleError> {
        Merkle::new(RingHasher::new(self.hash), self.width)
    }

    /// Per-block tree cache for these settings.
    pub fn build_cache(&self) -> MerkleCache {
        MerkleCache::new(self.cache_blocks)
    }
}

/// Backend selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Sharded in-memory backend.
    #[default]
    Memory,
    /// sled on disk.
    Sled,
}

/// Layered storage settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend kind.
    pub backend: BackendKind,
    /// Data directory for persistent backends.
    pub data_dir: String,
    /// Buckets of the in-memory backend (0 = twice the available parallelism).
    pub buckets: usize,
    /// Byte budget of the cache layer; `None` disables it.
    pub cache_capacity_bytes: Option<usize>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            data_dir: "./data".to_string(),
            buckets: 0,
            cache_capacity_bytes: None,
        }
    }
}

impl StorageConfig {
    /// In-memory backend with the configured bucket count.
    pub fn memory_backend<K: StorageKey, V: StorageValue>(&self) -> MemoryBackend<K, V> {
        MemoryBackend::with_buckets(self.buckets)
    }

    /// sled backend under `data_dir`.
    pub fn sled_backend<K, V>(&self) -> Result<SledBackend<K, V>, StorageError>
    where
        K: KeyCodec + Send + Sync + 'static,
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        SledBackend::open(&self.data_dir)
    }

    /// Cache layer, if a byte budget is configured.
    pub fn cache_layer<K, V>(&self) -> Option<Arc<LruLayer<K, V>>>
    where
        K: StorageKey + ByteSize,
        V: StorageValue + ByteSize,
    {
        self.cache_capacity_bytes
            .map(|capacity| Arc::new(LruLayer::new(capacity)))
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `chainstate=debug`.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
