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

//! Shared primitives: hashes, storage keys and canonical encoding helpers.

use bincode::Options;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// 32-byte hash produced by every supported digest.
pub type Hash32 = [u8; 32];

/// Canonical serialization error.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("serialization")]
    Serialize,
    #[error("deserialization")]
    Deserialize,
    #[error("size limit exceeded")]
    TooLarge,
    #[error("invalid key encoding")]
    InvalidKey,
}

/// Canonical bincode options (deterministic).
fn bincode_opts() -> impl Options {
    // Fixint encoding provides a stable integer representation.
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Encode with deterministic rules.
pub fn encode_canonical<T: Serialize>(v: &T) -> Result<Vec<u8>, CodecError> {
    bincode_opts()
        .serialize(v)
        .map_err(|_| CodecError::Serialize)
}

/// Decode with a hard size cap.
pub fn decode_canonical_limited<T: DeserializeOwned>(
    bytes: &[u8],
    max: usize,
) -> Result<T, CodecError> {
    if bytes.len() > max {
        return Err(CodecError::TooLarge);
    }
    // `with_limit` also bounds container lengths declared inside the payload.
    bincode_opts()
        .with_limit(max as u64)
        .deserialize(bytes)
        .map_err(|_| CodecError::Deserialize)
}

/// Composite state key: (table identifier, row key).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateKey {
    /// Table identifier.
    pub table: String,
    /// Row key inside the table.
    pub key: Vec<u8>,
}

impl StateKey {
    /// Construct a key.
    pub fn new(table: impl Into<String>, key: impl Into<Vec<u8>>) -> Self {
        Self {
            table: table.into(),
            key: key.into(),
        }
    }
}

/// Order-preserving byte encoding for keys kept in a byte-ordered store.
///
/// `a < b` must hold exactly when `a.encode_key() < b.encode_key()`.
pub trait KeyCodec: Sized {
    /// Encode to bytes.
    fn encode_key(&self) -> Vec<u8>;
    /// Decode bytes produced by [`KeyCodec::encode_key`].
    fn decode_key(bytes: &[u8]) -> Result<Self, CodecError>;
}

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N], CodecError> {
    bytes.try_into().map_err(|_| CodecError::InvalidKey)
}

impl KeyCodec for u32 {
    fn encode_key(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }
    fn decode_key(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(u32::from_be_bytes(fixed(bytes)?))
    }
}

impl KeyCodec for u64 {
    fn encode_key(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }
    fn decode_key(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(u64::from_be_bytes(fixed(bytes)?))
    }
}

impl KeyCodec for i64 {
    // flip the sign bit so negatives sort first
    fn encode_key(&self) -> Vec<u8> {
        ((*self as u64) ^ (1 << 63)).to_be_bytes().to_vec()
    }
    fn decode_key(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok((u64::from_be_bytes(fixed(bytes)?) ^ (1 << 63)) as i64)
    }
}

impl KeyCodec for Vec<u8> {
    fn encode_key(&self) -> Vec<u8> {
        self.clone()
    }
    fn decode_key(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(bytes.to_vec())
    }
}

impl KeyCodec for String {
    fn encode_key(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
    fn decode_key(bytes: &[u8]) -> Result<Self, CodecError> {
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidKey)
    }
}

const ESCAPE: u8 = 0x00;
const ESCAPED_ZERO: u8 = 0xFF;
const TERMINATOR: u8 = 0x01;

impl KeyCodec for StateKey {
    /// `escape(table) || 0x00 0x01 || key`, where `escape` maps 0x00 to 0x00 0xFF.
    fn encode_key(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.table.len() + 2 + self.key.len());
        for &b in self.table.as_bytes() {
            out.push(b);
            if b == ESCAPE {
                out.push(ESCAPED_ZERO);
            }
        }
        out.push(ESCAPE);
        out.push(TERMINATOR);
        out.extend_from_slice(&self.key);
        out
    }

    fn decode_key(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut table = Vec::new();
        let mut i = 0usize;
        loop {
            let b = *bytes.get(i).ok_or(CodecError::InvalidKey)?;
            if b != ESCAPE {
                table.push(b);
                i += 1;
                continue;
            }
            match bytes.get(i + 1) {
                Some(&ESCAPED_ZERO) => {
                    table.push(ESCAPE);
                    i += 2;
                }
                Some(&TERMINATOR) => {
                    i += 2;
                    break;
                }
                _ => return Err(CodecError::InvalidKey),
            }
        }
        let table = String::from_utf8(table).map_err(|_| CodecError::InvalidKey)?;
        Ok(Self {
            table,
            key: bytes[i..].to_vec(),
        })
    }
}

/// Accounting weight of a key or value, used by capacity-bounded layers.
pub trait ByteSize {
    /// Approximate number of bytes held.
    fn byte_size(&self) -> usize;
}

macro_rules! fixed_byte_size {
    ($($t:ty),*) => {
        $(impl ByteSize for $t {
            fn byte_size(&self) -> usize {
                std::mem::size_of::<$t>()
            }
        })*
    };
}

fixed_byte_size!(u8, u16, u32, u64, i32, i64, usize);

impl ByteSize for Vec<u8> {
    fn byte_size(&self) -> usize {
        self.len()
    }
}

impl ByteSize for String {
    fn byte_size(&self) -> usize {
        self.len()
    }
}

impl ByteSize for StateKey {
    fn byte_size(&self) -> usize {
        self.table.len() + self.key.len()
    }
}
