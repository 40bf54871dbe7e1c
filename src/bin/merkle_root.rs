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

//! Reads hex leaf hashes (one per line) from stdin and prints the Merkle root.
//!
//! Usage: `merkle-root [--prove <index>]`. Settings come from the TOML file named by
//! `CHAINSTATE_CONFIG`, defaults otherwise.

use anyhow::{anyhow, bail, Context, Result};
use chainstate::config::Config;
use chainstate::core::types::Hash32;
use chainstate::monitoring::logging::init_tracing;
use std::io::BufRead;
use tracing::info;

fn parse_leaf(line: &str) -> Result<Hash32> {
    let raw = hex::decode(line.trim().trim_start_matches("0x")).context("leaf is not hex")?;
    raw.as_slice()
        .try_into()
        .map_err(|_| anyhow!("leaf must be 32 bytes, got {}", raw.len()))
}

fn main() -> Result<()> {
    let cfg = match std::env::var("CHAINSTATE_CONFIG") {
        Ok(path) => Config::load(&path).with_context(|| format!("loading {path}"))?,
        Err(_) => Config::default(),
    };
    init_tracing(&cfg.log);

    let mut args = std::env::args().skip(1);
    let prove = match args.next().as_deref() {
        None => None,
        Some("--prove") => Some(
            args.next()
                .ok_or_else(|| anyhow!("--prove needs an index"))?
                .parse::<usize>()
                .context("index must be an integer")?,
        ),
        Some(other) => bail!("unknown argument {other}"),
    };

    let mut leaves = Vec::new();
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        leaves.push(parse_leaf(&line)?);
    }

    let merkle = cfg.merkle.build()?;
    let tree = merkle.generate(&leaves)?;
    info!(leaves = leaves.len(), width = merkle.width(), "tree built");
    println!("{}", hex::encode(tree.root()));

    if let Some(index) = prove {
        let proof = merkle.generate_proof_by_index(tree.leaves(), tree.nodes(), index)?;
        for (depth, level) in proof.levels.iter().enumerate() {
            let left: Vec<String> = level.left.iter().map(hex::encode).collect();
            let right: Vec<String> = level.right.iter().map(hex::encode).collect();
            println!("{depth}: [{}] * [{}]", left.join(","), right.join(","));
        }
        let ok = merkle.verify_proof(&proof, &leaves[index], &tree.root())?;
        println!("verified: {ok}");
    }
    Ok(())
}
