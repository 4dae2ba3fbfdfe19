//! Request coalescing, failure broadcast, cancellation and shutdown of the
//! fetch coordinator, driven through a zone

mod common;

use common::{eventually, open_zone, zone_config, FakeUpstream};
use slice_store::{ObjectId, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;

const BODY: &[u8] = b"0123456789ab";

async fn read_part(zone: &slice_store::Zone, index: &slice_store::ObjectIndex) -> Vec<u8> {
    let mut reader = zone.fetch(index).await.unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await.unwrap();
    out
}

#[tokio::test]
async fn test_concurrent_fetches_share_one_upstream_call() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::gated();
    upstream.insert("/video", BODY);
    let zone = Arc::new(open_zone(&zone_config(&dir, 4, 10), upstream.clone()).await);
    let index = ObjectId::new("key", "/video").part(1);

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let zone = zone.clone();
        let index = index.clone();
        tasks.push(tokio::spawn(async move {
            let mut reader = zone.fetch(&index).await?;
            let mut out = Vec::new();
            reader
                .read_to_end(&mut out)
                .await
                .map_err(StoreError::from)?;
            Ok::<_, StoreError>(out)
        }));
    }

    assert!(eventually(|| zone.metrics().coalesced_requests == 9).await);
    upstream.open_gate();

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), b"4567");
    }
    assert_eq!(upstream.range_calls(), 1);

    let metrics = zone.metrics();
    assert_eq!(metrics.cache_misses, 1);
    assert_eq!(metrics.parts_stored, 1);
    assert_eq!(zone.stats().objects, 1);

    // Later requests are hits
    assert_eq!(read_part(&zone, &index).await, b"4567");
    assert_eq!(upstream.range_calls(), 1);
    assert_eq!(zone.stats().hits, 1);
    zone.close().await.unwrap();
}

#[tokio::test]
async fn test_upstream_failure_reaches_every_waiter() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::gated();
    upstream.insert("/video", BODY);
    upstream.fail_with(Some(StoreError::origin_server_error(503, "busy")));
    let zone = Arc::new(open_zone(&zone_config(&dir, 4, 10), upstream.clone()).await);
    let index = ObjectId::new("key", "/video").part(0);

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let zone = zone.clone();
        let index = index.clone();
        tasks.push(tokio::spawn(async move { zone.fetch(&index).await.err() }));
    }
    assert!(eventually(|| zone.metrics().coalesced_requests == 4).await);
    upstream.open_gate();

    for task in tasks {
        assert_eq!(
            task.await.unwrap(),
            Some(StoreError::origin_server_error(503, "busy"))
        );
    }
    assert_eq!(upstream.range_calls(), 1);
    assert_eq!(zone.stats().objects, 0);

    // Failures are not cached
    upstream.fail_with(None);
    assert_eq!(read_part(&zone, &index).await, b"0123");
    assert_eq!(upstream.range_calls(), 2);
    zone.close().await.unwrap();
}

#[tokio::test]
async fn test_abandoned_fetch_still_populates_cache() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::gated();
    upstream.insert("/video", BODY);
    let zone = Arc::new(open_zone(&zone_config(&dir, 4, 10), upstream.clone()).await);
    let index = ObjectId::new("key", "/video").part(2);

    let abandoned = tokio::time::timeout(Duration::from_millis(20), zone.fetch(&index)).await;
    assert!(abandoned.is_err());

    upstream.open_gate();
    assert!(eventually(|| zone.stats().objects == 1).await);

    assert_eq!(read_part(&zone, &index).await, b"89ab");
    assert_eq!(upstream.range_calls(), 1);
    zone.close().await.unwrap();
}

#[tokio::test]
async fn test_uncacheable_response_is_not_stored() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::new();
    upstream.insert("/live", BODY);
    upstream.set_header("cache-control", "no-store");
    let zone = open_zone(&zone_config(&dir, 4, 10), upstream.clone()).await;
    let id = ObjectId::new("key", "/live");

    assert_eq!(read_part(&zone, &id.part(0)).await, b"0123");
    assert_eq!(read_part(&zone, &id.part(0)).await, b"0123");
    assert_eq!(upstream.range_calls(), 2);
    assert_eq!(zone.stats().objects, 0);
    assert_eq!(zone.metrics().rejected_parts, 2);
    zone.close().await.unwrap();
}

#[tokio::test]
async fn test_eviction_reaches_disk() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::new();
    upstream.insert("/a", BODY);
    upstream.insert("/b", BODY);
    let zone = open_zone(&zone_config(&dir, 4, 2), upstream.clone()).await;
    let a = ObjectId::new("key", "/a");
    let b = ObjectId::new("key", "/b");

    read_part(&zone, &a.part(0)).await;
    read_part(&zone, &a.part(1)).await;
    // Hit promotes a#0 to the protected tier
    read_part(&zone, &a.part(0)).await;
    read_part(&zone, &b.part(0)).await;

    assert_eq!(zone.stats().objects, 2);
    assert!(eventually(|| zone.metrics().evictions == 1).await);
    zone.close().await.unwrap();

    let store = slice_store::DiskStore::new(&zone_config(&dir, 4, 2)).await.unwrap();
    use slice_store::Storage;
    assert_eq!(store.get_available_parts(&a).await.unwrap(), vec![a.part(0)]);
    assert_eq!(store.get_available_parts(&b).await.unwrap(), vec![b.part(0)]);
}

#[tokio::test]
async fn test_noop_zone_leaves_nothing_on_disk() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::new();
    upstream.insert("/video", BODY);
    let mut config = zone_config(&dir, 4, 10);
    config.algorithm = "noop".to_string();
    let zone = open_zone(&config, upstream.clone()).await;
    let id = ObjectId::new("key", "/video");

    assert_eq!(read_part(&zone, &id.part(0)).await, b"0123");
    assert_eq!(read_part(&zone, &id.part(2)).await, b"89ab");
    assert_eq!(read_part(&zone, &id.part(0)).await, b"0123");
    assert_eq!(zone.fetch_metadata(&id).await.unwrap().size, 12);
    assert_eq!(upstream.range_calls(), 3);
    assert_eq!(zone.metrics().rejected_parts, 3);
    zone.close().await.unwrap();

    let store = slice_store::DiskStore::new(&config).await.unwrap();
    use slice_store::Storage;
    let mut objects = 0;
    store
        .iterate(&mut |_, _| {
            objects += 1;
            true
        })
        .await
        .unwrap();
    assert_eq!(objects, 0);
    assert!(store.get_metadata(&id).await.unwrap_err().is_not_found());
    assert!(!store.object_dir(&id).exists());
}

#[tokio::test]
async fn test_header_fetches_are_coalesced() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::gated();
    upstream.insert("/video", BODY);
    upstream.set_header("content-type", "video/mp4");
    let zone = Arc::new(open_zone(&zone_config(&dir, 4, 10), upstream.clone()).await);
    let id = ObjectId::new("key", "/video");

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let zone = zone.clone();
        let id = id.clone();
        tasks.push(tokio::spawn(async move { zone.fetch_headers(&id).await }));
    }
    assert!(eventually(|| zone.metrics().coalesced_requests == 4).await);
    upstream.open_gate();

    for task in tasks {
        let headers = task.await.unwrap().unwrap();
        assert_eq!(headers.get("content-type").unwrap(), "video/mp4");
    }
    assert_eq!(upstream.header_calls(), 1);

    let metadata = zone.fetch_metadata(&id).await.unwrap();
    assert_eq!(metadata.size, 12);
    assert_eq!(upstream.header_calls(), 1);
    zone.close().await.unwrap();
}

#[tokio::test]
async fn test_discard_removes_object() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::new();
    upstream.insert("/video", BODY);
    let zone = open_zone(&zone_config(&dir, 4, 10), upstream.clone()).await;
    let id = ObjectId::new("key", "/video");

    read_part(&zone, &id.part(0)).await;
    read_part(&zone, &id.part(1)).await;
    assert_eq!(zone.stats().objects, 2);

    zone.discard(&id).await.unwrap();
    assert_eq!(zone.stats().objects, 0);
    assert!(zone.discard(&id).await.unwrap_err().is_not_found());

    read_part(&zone, &id.part(0)).await;
    assert_eq!(upstream.range_calls(), 3);
    zone.close().await.unwrap();
}

#[tokio::test]
async fn test_expired_object_is_removed() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::new();
    upstream.insert("/news", BODY);
    upstream.set_header("cache-control", "max-age=1");
    let zone = open_zone(&zone_config(&dir, 4, 10), upstream.clone()).await;
    let id = ObjectId::new("key", "/news");

    read_part(&zone, &id.part(0)).await;
    assert_eq!(zone.stats().objects, 1);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(eventually(|| zone.metrics().expirations == 1).await);
    assert!(eventually(|| zone.stats().objects == 0).await);
    zone.close().await.unwrap();
}

#[tokio::test]
async fn test_close_waits_for_in_flight_fetches() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::gated();
    upstream.insert("/video", BODY);
    let zone = Arc::new(open_zone(&zone_config(&dir, 4, 10), upstream.clone()).await);
    let index = ObjectId::new("key", "/video").part(0);

    let pending = {
        let zone = zone.clone();
        let index = index.clone();
        tokio::spawn(async move { zone.fetch(&index).await.is_ok() })
    };
    assert!(eventually(|| upstream.range_calls() == 1).await);

    let closing = {
        let zone = zone.clone();
        tokio::spawn(async move { zone.close().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!closing.is_finished());
    assert_eq!(
        zone.fetch(&index.id.part(1)).await.err(),
        Some(StoreError::Closed)
    );

    upstream.open_gate();
    assert!(pending.await.unwrap());
    closing.await.unwrap().unwrap();
}
