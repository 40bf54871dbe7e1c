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

//! Versioned state record with a small-buffer-optimised payload.
//!
//! The layered store treats an `Entry` as an opaque value. Deletion inside the stack is
//! a [`Lookup::Deleted`](crate::core::state::layer::Lookup::Deleted) tombstone, never
//! [`EntryStatus`], and merges never touch the dirty flag. Both belong to the
//! caller's own write-back tracking.

use crate::core::types::ByteSize;
use serde::{Deserialize, Serialize};

/// Payloads up to this many bytes are stored inline.
pub const INLINE_CAPACITY: usize = 32;

/// Record status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryStatus {
    /// Live record.
    #[default]
    Normal,
    /// Logically deleted.
    Deleted,
    /// Deleted and scheduled for physical removal.
    Purged,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
enum Payload {
    Inline { len: u8, buf: [u8; INLINE_CAPACITY] },
    Heap(Vec<u8>),
}

impl Payload {
    fn new(bytes: &[u8]) -> Self {
        if bytes.len() <= INLINE_CAPACITY {
            let mut buf = [0u8; INLINE_CAPACITY];
            buf[..bytes.len()].copy_from_slice(bytes);
            Payload::Inline {
                len: bytes.len() as u8,
                buf,
            }
        } else {
            Payload::Heap(bytes.to_vec())
        }
    }

    fn as_slice(&self) -> &[u8] {
        match self {
            Payload::Inline { len, buf } => &buf[..*len as usize],
            Payload::Heap(v) => v,
        }
    }
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Inline {
            len: 0,
            buf: [0u8; INLINE_CAPACITY],
        }
    }
}

/// A state record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    payload: Payload,
    status: EntryStatus,
    dirty: bool,
}

impl Entry {
    /// Empty, normal, clean entry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Normal entry holding `bytes`.
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Self {
        Self {
            payload: Payload::new(bytes.as_ref()),
            status: EntryStatus::Normal,
            dirty: false,
        }
    }

    /// Replace the payload and mark the entry dirty.
    pub fn set(&mut self, bytes: impl AsRef<[u8]>) {
        self.payload = Payload::new(bytes.as_ref());
        self.dirty = true;
    }

    /// Payload bytes.
    pub fn get(&self) -> &[u8] {
        self.payload.as_slice()
    }

    /// Status.
    pub fn status(&self) -> EntryStatus {
        self.status
    }

    /// Set status.
    pub fn set_status(&mut self, status: EntryStatus) {
        self.status = status;
        self.dirty = true;
    }

    /// True for `Deleted` and `Purged`.
    pub fn is_deleted(&self) -> bool {
        self.status != EntryStatus::Normal
    }

    /// Dirty flag for write-back tracking.
    pub fn dirty(&self) -> bool {
        self.dirty
    }

    /// Set dirty flag.
    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    /// Payload length.
    pub fn size(&self) -> usize {
        self.payload.as_slice().len()
    }

    /// True if the payload lives inline.
    pub fn is_inline(&self) -> bool {
        matches!(self.payload, Payload::Inline { .. })
    }
}

impl ByteSize for Entry {
    fn byte_size(&self) -> usize {
        self.size()
    }
}
