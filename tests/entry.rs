// Copyright (c) 2026 Chainstate
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

use chainstate::core::state::entry::{Entry, EntryStatus, INLINE_CAPACITY};
use chainstate::core::types::{decode_canonical_limited, encode_canonical, ByteSize};

#[test]
fn small_payloads_stay_inline() {
    let e = Entry::from_bytes(b"abc");
    assert!(e.is_inline());
    assert_eq!(e.get(), b"abc");
    assert_eq!(e.size(), 3);
    assert_eq!(e.byte_size(), 3);

    let edge = Entry::from_bytes([7u8; INLINE_CAPACITY]);
    assert!(edge.is_inline());

    let big = Entry::from_bytes([7u8; INLINE_CAPACITY + 1]);
    assert!(!big.is_inline());
    assert_eq!(big.size(), INLINE_CAPACITY + 1);
}

#[test]
fn set_switches_storage_and_marks_dirty() {
    let mut e = Entry::new();
    assert!(e.get().is_empty());
    assert!(!e.dirty());

    e.set(vec![1u8; 64]);
    assert!(!e.is_inline());
    assert!(e.dirty());
    e.set(b"x");
    assert!(e.is_inline());
    assert_eq!(e.get(), b"x");

    e.set_dirty(false);
    assert!(!e.dirty());
}

#[test]
fn status_transitions() {
    let mut e = Entry::from_bytes(b"v");
    assert_eq!(e.status(), EntryStatus::Normal);
    assert!(!e.is_deleted());

    e.set_status(EntryStatus::Deleted);
    assert!(e.is_deleted());
    assert!(e.dirty());
    e.set_status(EntryStatus::Purged);
    assert!(e.is_deleted());
}

#[test]
fn equal_payloads_compare_equal_regardless_of_history() {
    let mut a = Entry::from_bytes(vec![9u8; 100]);
    a.set(b"same");
    a.set_dirty(false);
    let b = Entry::from_bytes(b"same");
    assert_eq!(a, b);

    let raw = encode_canonical(&a).unwrap();
    let back: Entry = decode_canonical_limited(&raw, 1024).unwrap();
    assert_eq!(back, a);
}
