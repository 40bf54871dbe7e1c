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

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus")]
    Prom,
}

/// Metrics container.
#[derive(Clone)]
pub struct Metrics {
    /// Registry.
    pub registry: Registry,

    /// Merkle trees built.
    pub merkle_trees_total: IntCounter,
    /// Merkle proofs generated.
    pub merkle_proofs_total: IntCounter,

    /// Immutable layers awaiting merge.
    pub storage_immutable_layers: IntGauge,
    /// Completed merges into the backend.
    pub storage_merges_total: IntCounter,
    /// Live entries written to the backend by merges.
    pub storage_merged_entries_total: IntCounter,
    /// Tombstones purged from the backend by merges.
    pub storage_purged_entries_total: IntCounter,
    /// Keys resolved through views.
    pub storage_read_keys_total: IntCounter,
    /// Keys written or removed through views.
    pub storage_written_keys_total: IntCounter,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("merkle_trees_total", &self.merkle_trees_total.get())
            .field("storage_merges_total", &self.storage_merges_total.get())
            .field("storage_immutable_layers", &self.storage_immutable_layers.get())
            .finish_non_exhaustive()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, MetricsError> {
    let c = IntCounter::new(name, help).map_err(|_| MetricsError::Prom)?;
    registry
        .register(Box::new(c.clone()))
        .map_err(|_| MetricsError::Prom)?;
    Ok(c)
}

impl Metrics {
    /// Create and register metrics.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let storage_immutable_layers = IntGauge::new(
            "chainstate_storage_immutable_layers",
            "Immutable layers awaiting merge",
        )
        .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(storage_immutable_layers.clone()))
            .map_err(|_| MetricsError::Prom)?;

        Ok(Self {
            merkle_trees_total: counter(&registry, "chainstate_merkle_trees_total", "Merkle trees built")?,
            merkle_proofs_total: counter(
                &registry,
                "chainstate_merkle_proofs_total",
                "Merkle proofs generated",
            )?,
            storage_merges_total: counter(
                &registry,
                "chainstate_storage_merges_total",
                "Immutable layers merged into the backend",
            )?,
            storage_merged_entries_total: counter(
                &registry,
                "chainstate_storage_merged_entries_total",
                "Entries written to the backend by merges",
            )?,
            storage_purged_entries_total: counter(
                &registry,
                "chainstate_storage_purged_entries_total",
                "Tombstones purged from the backend by merges",
            )?,
            storage_read_keys_total: counter(
                &registry,
                "chainstate_storage_read_keys_total",
                "Keys resolved through views",
            )?,
            storage_written_keys_total: counter(
                &registry,
                "chainstate_storage_written_keys_total",
                "Keys written or removed through views",
            )?,
            storage_immutable_layers,
            registry,
        })
    }

    /// Prometheus text exposition of every registered metric.
    pub fn render(&self) -> Result<String, MetricsError> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .map_err(|_| MetricsError::Prom)?;
        String::from_utf8(buf).map_err(|_| MetricsError::Prom)
    }
}
