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

#![no_main]
#![forbid(unsafe_code)]

use arbitrary::Arbitrary;
use chainstate::core::crypto::hasher::RingHasher;
use chainstate::core::state::merkle::{Merkle, MerkleProof, ProofLevel};
use libfuzzer_sys::fuzz_target;

#[derive(Clone, Debug, Arbitrary)]
struct Input {
    leaves: Vec<[u8; 32]>,
    width: u8,
    index: u16,
    junk: Vec<(Vec<[u8; 32]>, Vec<[u8; 32]>)>,
}

fuzz_target!(|inp: Input| {
    let Ok(m) = Merkle::new(RingHasher::sha256(), inp.width as usize) else {
        return;
    };
    let Ok(tree) = m.generate(&inp.leaves) else {
        return;
    };
    let idx = (inp.index as usize) % inp.leaves.len();
    if let Ok(p) = m.generate_proof_by_index(tree.leaves(), tree.nodes(), idx) {
        assert_eq!(m.verify_proof(&p, &inp.leaves[idx], &tree.root()), Ok(true));
    }

    // arbitrary proofs must never panic
    let junk = MerkleProof {
        levels: inp
            .junk
            .into_iter()
            .map(|(left, right)| ProofLevel { left, right })
            .collect(),
    };
    let _ = m.verify_proof(&junk, &inp.leaves[idx], &tree.root());
});
