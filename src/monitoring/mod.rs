// Copyright (c) 2026 Chainstate
// Licensed under the Apache License, Version 2.0

/// Structured logging setup.
pub mod logging;
/// Prometheus metrics.
pub mod metrics;
