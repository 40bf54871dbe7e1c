// Copyright (c) 2026 Chainstate
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

use chainstate::core::state::layer::{
    ConcurrentLayer, Layer, Lookup, StorageBackend, StorageError, SEEK_BATCH,
};
use chainstate::core::state::lru_layer::LruLayer;
use chainstate::core::state::memory_layer::{MemoryBackend, MemoryLayer};
use chainstate::core::state::multi_layer::MultiLayerStorage;
use chainstate::monitoring::metrics::Metrics;
use futures::future::{BoxFuture, FutureExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Barrier;

type Storage = MultiLayerStorage<u32, String, MemoryLayer<u32, String>, MemoryBackend<u32, String>>;

fn storage() -> Storage {
    MultiLayerStorage::new(Arc::new(MemoryBackend::with_buckets(4)))
}

fn value(i: u32) -> String {
    format!("value: {i}")
}

async fn commit_block(s: &Storage, keys: std::ops::Range<u32>) {
    s.new_mutable().unwrap();
    let view = s.fork(true).unwrap();
    view.write(keys.clone(), keys.map(value)).await.unwrap();
    drop(view);
    s.push_mutable_to_immutable_front().unwrap();
    s.merge_and_pop_immutable_back().await.unwrap();
}

#[tokio::test]
async fn lifecycle_errors() {
    let s = storage();
    assert!(matches!(
        s.push_mutable_to_immutable_front(),
        Err(StorageError::NotExistsMutableStorage { immutables: 0 })
    ));
    assert!(matches!(
        s.merge_and_pop_immutable_back().await,
        Err(StorageError::NotExistsImmutableStorage)
    ));

    s.new_mutable().unwrap();
    assert!(matches!(s.new_mutable(), Err(StorageError::DuplicateMutableStorage)));
    assert!(s.has_mutable());

    s.push_mutable_to_immutable_front().unwrap();
    assert!(!s.has_mutable());
    assert_eq!(s.immutable_len(), 1);
    assert!(s.front_immutable().unwrap().is_frozen());

    s.merge_and_pop_immutable_back().await.unwrap();
    assert_eq!(s.immutable_len(), 0);
    assert!(matches!(
        s.merge_and_pop_immutable_back().await,
        Err(StorageError::NotExistsImmutableStorage)
    ));
    assert!(s.back_immutable().is_err());
}

#[tokio::test]
async fn merged_values_reach_the_backend() {
    let s = storage();
    commit_block(&s, 0..100).await;
    assert_eq!(s.backend().len(), 100);

    let view = s.fork(false).unwrap();
    for i in 0..100u32 {
        assert_eq!(view.read_one(&i).await.unwrap(), Lookup::Value(value(i)));
    }
    for i in [100u32, 101, 5000, u32::MAX] {
        assert_eq!(view.read_one(&i).await.unwrap(), Lookup::Missing);
    }
}

#[tokio::test]
async fn tombstones_shadow_and_purge() {
    let s = storage();
    commit_block(&s, 0..100).await;

    s.new_mutable().unwrap();
    let view = s.fork(true).unwrap();
    view.remove(20..30u32).await.unwrap();

    // not merged yet: the tombstones sit above the backend
    let pending: Vec<(u32, Lookup<String>)> = view.seek(&0).collect_all().await.unwrap();
    assert_eq!(pending.len(), 100);
    assert!(pending[20..30].iter().all(|(_, l)| l.is_deleted()));
    drop(view);

    s.push_mutable_to_immutable_front().unwrap();
    s.merge_and_pop_immutable_back().await.unwrap();
    assert_eq!(s.backend().len(), 90);

    let view = s.fork(false).unwrap();
    let live: Vec<(u32, String)> = view.seek(&0).values().await.unwrap();
    let expected: Vec<(u32, String)> = (0..20).chain(30..100).map(|i| (i, value(i))).collect();
    assert_eq!(live, expected);
    for i in 20..30u32 {
        assert!(!view.read_one(&i).await.unwrap().is_found());
    }
}

#[tokio::test]
async fn seek_starts_at_key_and_prefers_newer_layers() {
    let s = storage();
    commit_block(&s, 0..10).await;

    s.new_mutable().unwrap();
    let w = s.fork(true).unwrap();
    w.write_one(5, "old".to_string()).await.unwrap();
    drop(w);
    s.push_mutable_to_immutable_front().unwrap();

    s.new_mutable().unwrap();
    let w = s.fork(true).unwrap();
    w.write_one(5, "new".to_string()).await.unwrap();
    w.write_one(42, value(42)).await.unwrap();

    let mut it = w.seek(&4);
    assert_eq!(it.next().await.unwrap(), Some((4, Lookup::Value(value(4)))));
    assert_eq!(
        it.next().await.unwrap(),
        Some((5, Lookup::Value("new".to_string())))
    );
    let rest: Vec<u32> = it.collect_all().await.unwrap().into_iter().map(|(k, _)| k).collect();
    assert_eq!(rest, vec![6, 7, 8, 9, 42]);

    let mut it = w.seek(&0);
    assert!(it.next().await.unwrap().is_some());
    it.release();
    it.release();
    assert!(it.next().await.unwrap().is_none());
}

#[tokio::test]
async fn single_mutable_view() {
    let s = storage();
    s.new_mutable().unwrap();

    let mut first = s.fork(true).unwrap();
    assert!(first.is_mutable());
    assert!(matches!(s.fork(true), Err(StorageError::DuplicateMutableView)));
    // readers are unlimited
    let _r1 = s.fork(false).unwrap();
    let _r2 = s.fork(false).unwrap();

    first.release();
    assert!(!first.is_mutable());
    assert!(matches!(
        first.write_one(1, value(1)).await,
        Err(StorageError::NotExistsMutableStorage { .. })
    ));
    let second = s.fork(true).unwrap();
    second.write_one(1, value(1)).await.unwrap();
    drop(second);
    assert!(s.fork(true).is_ok());
}

#[tokio::test]
async fn writes_need_a_live_mutable_layer() {
    let s = storage();
    let view = s.fork(true).unwrap();
    assert!(matches!(
        view.write_one(1, value(1)).await,
        Err(StorageError::NotExistsMutableStorage { immutables: 0 })
    ));
    drop(view);

    s.new_mutable().unwrap();
    let view = s.fork(true).unwrap();
    view.write_one(1, value(1)).await.unwrap();
    s.push_mutable_to_immutable_front().unwrap();

    // the layer this view wrote to is now frozen
    assert!(matches!(
        view.write_one(2, value(2)).await,
        Err(StorageError::NotExistsMutableStorage { immutables: 0 })
    ));
    assert!(matches!(
        view.remove([1]).await,
        Err(StorageError::NotExistsMutableStorage { .. })
    ));
    assert_eq!(s.front_immutable().unwrap().layer().len(), 1);
}

#[tokio::test]
async fn read_only_view_cannot_write() {
    let s = storage();
    s.new_mutable().unwrap();
    let view = s.fork(false).unwrap();
    assert!(matches!(
        view.write_one(1, value(1)).await,
        Err(StorageError::NotExistsMutableStorage { .. })
    ));
}

#[tokio::test]
async fn failed_write_applies_nothing() {
    let s = storage();
    s.new_mutable().unwrap();
    let view = s.fork(true).unwrap();
    let err = view.write([1u32, 2, 3], [value(1)]).await.unwrap_err();
    assert!(matches!(err, StorageError::LengthMismatch { keys: 3, values: 1 }));
    assert_eq!(view.read_one(&1).await.unwrap(), Lookup::Missing);
}

#[tokio::test]
async fn batched_reads_keep_input_order() {
    let s = storage();
    commit_block(&s, 0..10).await;
    s.new_mutable().unwrap();
    let w = s.fork(true).unwrap();
    w.write_one(3, "top".to_string()).await.unwrap();
    w.remove([4]).await.unwrap();

    let keys = [9u32, 3, 4, 77, 0];
    let got = w.read_some(&keys).await.unwrap();
    assert_eq!(
        got,
        vec![
            Lookup::Value(value(9)),
            Lookup::Value("top".to_string()),
            Lookup::Deleted,
            Lookup::Missing,
            Lookup::Value(value(0)),
        ]
    );

    let mut it = w.read(keys);
    assert_eq!(it.remaining(), 5);
    assert_eq!(it.next().await.unwrap(), Some((9, Lookup::Value(value(9)))));
    it.release();
    it.release();
    assert_eq!(it.next().await.unwrap(), None);

    let all = w.read(keys).collect_all().await.unwrap();
    let order: Vec<u32> = all.iter().map(|(k, _)| *k).collect();
    assert_eq!(order, keys.to_vec());
    assert_eq!(all[1].1, got[1]);
}

#[tokio::test]
async fn views_keep_their_snapshot() {
    let s = storage();
    s.new_mutable().unwrap();
    let w = s.fork(true).unwrap();
    w.write_one(1, value(1)).await.unwrap();
    drop(w);
    s.push_mutable_to_immutable_front().unwrap();

    let before = s.fork(false).unwrap();
    assert_eq!(before.immutable_len(), 1);

    s.merge_and_pop_immutable_back().await.unwrap();
    s.new_mutable().unwrap();
    let w = s.fork(true).unwrap();
    w.write_one(1, "changed".to_string()).await.unwrap();

    // the old view sees neither the new mutable layer nor the pop
    assert_eq!(before.immutable_len(), 1);
    assert_eq!(before.read_one(&1).await.unwrap(), Lookup::Value(value(1)));
    assert_eq!(w.read_one(&1).await.unwrap(), Lookup::Value("changed".to_string()));
}

#[tokio::test]
async fn merges_fill_the_cache() {
    let cache = Arc::new(LruLayer::new(1 << 20));
    let s = storage().with_cache(cache.clone());
    commit_block(&s, 0..10).await;
    assert_eq!(cache.get(&3), Lookup::Value(value(3)));

    s.new_mutable().unwrap();
    let w = s.fork(true).unwrap();
    w.remove([3]).await.unwrap();
    drop(w);
    s.push_mutable_to_immutable_front().unwrap();
    s.merge_and_pop_immutable_back().await.unwrap();

    assert_eq!(cache.get(&3), Lookup::Missing);
    let r = s.fork(false).unwrap();
    assert_eq!(r.read_one(&3).await.unwrap(), Lookup::Missing);

    // a cached value is served without touching the backend
    cache.put(500, "cached".to_string());
    assert_eq!(r.read_one(&500).await.unwrap(), Lookup::Value("cached".to_string()));
}

#[tokio::test]
async fn lru_mutable_layer_evicts_least_recent() {
    // u32 key (4 bytes) + "value: N" (8 bytes) = 12 bytes per entry
    let s: MultiLayerStorage<u32, String, LruLayer<u32, String>, MemoryBackend<u32, String>> =
        MultiLayerStorage::new(Arc::new(MemoryBackend::new()));
    s.new_mutable_with(LruLayer::new(120).with_logical_deletion())
        .unwrap();
    let w = s.fork(true).unwrap();
    w.write(0..10u32, (0..10).map(value)).await.unwrap();
    w.write_one(10, "value: X".to_string()).await.unwrap();

    assert_eq!(w.read_one(&0).await.unwrap(), Lookup::Missing);
    for i in 1..10u32 {
        assert_eq!(w.read_one(&i).await.unwrap(), Lookup::Value(value(i)));
    }
    assert!(w.read_one(&10).await.unwrap().is_found());
}

#[tokio::test]
async fn metrics_follow_the_lifecycle() {
    let metrics = Arc::new(Metrics::new().unwrap());
    let s = storage().with_metrics(metrics.clone());
    commit_block(&s, 0..10).await;

    s.new_mutable().unwrap();
    let w = s.fork(true).unwrap();
    w.remove([1, 2]).await.unwrap();
    w.read_some(&[1, 2, 3]).await.unwrap();
    drop(w);
    s.push_mutable_to_immutable_front().unwrap();
    assert_eq!(metrics.storage_immutable_layers.get(), 1);
    s.merge_and_pop_immutable_back().await.unwrap();

    assert_eq!(metrics.storage_merges_total.get(), 2);
    assert_eq!(metrics.storage_merged_entries_total.get(), 10);
    assert_eq!(metrics.storage_purged_entries_total.get(), 2);
    assert_eq!(metrics.storage_written_keys_total.get(), 12);
    assert_eq!(metrics.storage_read_keys_total.get(), 3);
    assert_eq!(metrics.storage_immutable_layers.get(), 0);

    let text = metrics.render().unwrap();
    assert!(text.contains("chainstate_storage_merges_total 2"));
}

fn assert_concurrent<L: ConcurrentLayer<u32, String>>(_: &L) {}

/// Memory backend whose next write parks until the test lets it through.
struct GatedBackend {
    inner: MemoryBackend<u32, String>,
    armed: AtomicBool,
    entered: Barrier,
    release: Barrier,
}

impl GatedBackend {
    fn new() -> Self {
        Self {
            inner: MemoryBackend::with_buckets(4),
            armed: AtomicBool::new(false),
            entered: Barrier::new(2),
            release: Barrier::new(2),
        }
    }
}

impl StorageBackend<u32, String> for GatedBackend {
    fn read_some<'a>(
        &'a self,
        keys: &'a [u32],
    ) -> BoxFuture<'a, Result<Vec<Option<String>>, StorageError>> {
        self.inner.read_some(keys)
    }

    fn write_some(&self, items: Vec<(u32, String)>) -> BoxFuture<'_, Result<(), StorageError>> {
        async move {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.entered.wait().await;
                self.release.wait().await;
            }
            self.inner.write_some(items).await
        }
        .boxed()
    }

    fn remove_some(&self, keys: Vec<u32>) -> BoxFuture<'_, Result<(), StorageError>> {
        self.inner.remove_some(keys)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_readers_during_merge() {
    let s: Arc<MultiLayerStorage<u32, String, MemoryLayer<u32, String>, GatedBackend>> =
        Arc::new(MultiLayerStorage::new(Arc::new(GatedBackend::new())));
    assert_concurrent(&s.backend().inner);

    for block in [0..50u32, 50..100] {
        s.new_mutable().unwrap();
        let w = s.fork(true).unwrap();
        w.write(block.clone(), block.map(value)).await.unwrap();
        drop(w);
        s.push_mutable_to_immutable_front().unwrap();
    }
    s.merge_and_pop_immutable_back().await.unwrap();
    assert_eq!(s.immutable_len(), 1);

    s.backend().armed.store(true, Ordering::SeqCst);
    let merging = tokio::spawn({
        let s = s.clone();
        async move { s.merge_and_pop_immutable_back().await }
    });
    // the merge is now parked inside the backend write
    s.backend().entered.wait().await;
    assert_eq!(s.immutable_len(), 1);
    assert_eq!(s.backend().inner.len(), 50);

    let mut readers = Vec::new();
    for _ in 0..4 {
        let view = s.fork(false).unwrap();
        let storage = s.clone();
        readers.push(tokio::spawn(async move {
            let layers_at_start = storage.immutable_len();
            for i in 0..100u32 {
                assert_eq!(view.read_one(&i).await.unwrap(), Lookup::Value(value(i)));
            }
            let keys: Vec<u32> = (0..100).rev().collect();
            let got = view.read_some(&keys).await.unwrap();
            assert!(got.iter().all(|l| l.as_value().is_some()));
            layers_at_start
        }));
    }
    for r in readers {
        assert_eq!(r.await.unwrap(), 1);
    }
    assert!(!merging.is_finished());

    s.backend().release.wait().await;
    merging.await.unwrap().unwrap();
    assert_eq!(s.immutable_len(), 0);
    assert_eq!(s.backend().inner.len(), 100);
    let after = s.fork(false).unwrap();
    assert_eq!(after.read_one(&99).await.unwrap(), Lookup::Value(value(99)));
}

#[tokio::test]
async fn seek_streams_large_backends() {
    let s = storage();
    let total = (SEEK_BATCH * 3 + 7) as u32;
    commit_block(&s, 0..total).await;

    s.new_mutable().unwrap();
    let w = s.fork(true).unwrap();
    w.remove([300u32]).await.unwrap();
    w.write_one(total + 5, value(total + 5)).await.unwrap();

    let live = w.seek(&10).values().await.unwrap();
    let mut expected: Vec<u32> = (10..total).filter(|&k| k != 300).collect();
    expected.push(total + 5);
    let keys: Vec<u32> = live.iter().map(|(k, _)| *k).collect();
    assert_eq!(keys, expected);
    assert!(live.iter().all(|(k, v)| *v == value(*k)));

    let mut it = w.seek(&0);
    for i in 0..5u32 {
        assert_eq!(it.next().await.unwrap(), Some((i, Lookup::Value(value(i)))));
    }
    it.release();
    assert_eq!(it.next().await.unwrap(), None);
}

#[tokio::test]
async fn temporary_mutable_layer_stays_private() {
    let s = storage();
    commit_block(&s, 0..10).await;

    s.new_mutable().unwrap();
    let mut w = s.fork(true).unwrap();
    w.write_one(1, "block".to_string()).await.unwrap();

    let mut scratch = s.fork(false).unwrap();
    assert!(!scratch.has_temporary());
    scratch.new_temporary_mutable(MemoryLayer::new()).unwrap();
    assert!(scratch.has_temporary());
    // no writer guard needed, even with the mutable view outstanding
    scratch.write_one(3, "scratch".to_string()).await.unwrap();
    scratch.remove([4]).await.unwrap();

    assert_eq!(scratch.read_one(&3).await.unwrap(), Lookup::Value("scratch".to_string()));
    assert_eq!(scratch.read_one(&4).await.unwrap(), Lookup::Deleted);
    assert_eq!(scratch.read_one(&1).await.unwrap(), Lookup::Value("block".to_string()));
    let seen = scratch.seek(&3).collect_all().await.unwrap();
    assert_eq!(seen[0], (3, Lookup::Value("scratch".to_string())));
    assert_eq!(seen[1], (4, Lookup::Deleted));

    let other = s.fork(false).unwrap();
    assert_eq!(other.read_one(&3).await.unwrap(), Lookup::Value(value(3)));
    assert_eq!(other.read_one(&4).await.unwrap(), Lookup::Value(value(4)));

    assert!(matches!(
        scratch.new_temporary_mutable(MemoryLayer::new()),
        Err(StorageError::DuplicateMutableStorage)
    ));
    assert!(matches!(
        w.new_temporary_mutable(MemoryLayer::new()),
        Err(StorageError::DuplicateMutableStorage)
    ));

    drop(w);
    s.push_mutable_to_immutable_front().unwrap();
    s.merge_and_pop_immutable_back().await.unwrap();

    let fresh = s.fork(false).unwrap();
    assert_eq!(fresh.read_one(&1).await.unwrap(), Lookup::Value("block".to_string()));
    assert_eq!(fresh.read_one(&3).await.unwrap(), Lookup::Value(value(3)));
    assert_eq!(fresh.read_one(&4).await.unwrap(), Lookup::Value(value(4)));
    assert_eq!(s.backend().len(), 10);
    // the scratch view still reads its own writes over its snapshot
    assert_eq!(scratch.read_one(&3).await.unwrap(), Lookup::Value("scratch".to_string()));
}

#[tokio::test]
async fn entry_status_is_opaque_to_the_stack() {
    use chainstate::core::state::entry::{Entry, EntryStatus};

    let s: MultiLayerStorage<u32, Entry, MemoryLayer<u32, Entry>, MemoryBackend<u32, Entry>> =
        MultiLayerStorage::new(Arc::new(MemoryBackend::new()));
    let mut flagged = Entry::from_bytes(b"payload");
    flagged.set_status(EntryStatus::Deleted);
    assert!(flagged.dirty());

    s.new_mutable().unwrap();
    let w = s.fork(true).unwrap();
    w.write_one(1, flagged.clone()).await.unwrap();
    drop(w);
    s.push_mutable_to_immutable_front().unwrap();
    s.merge_and_pop_immutable_back().await.unwrap();

    // a status-deleted entry is still a value; only tombstones hide keys
    let r = s.fork(false).unwrap();
    let stored = r.read_one(&1).await.unwrap().into_value().unwrap();
    assert_eq!(stored, flagged);
    assert_eq!(stored.status(), EntryStatus::Deleted);
    assert!(stored.dirty());
}
