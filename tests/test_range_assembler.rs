mod common;

use common::{open_zone, zone_config, FakeUpstream};
use slice_store::{ByteRange, ObjectId, StoreError};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;

const BODY: &[u8] = b"0123456789ab";

async fn read_range(zone: &slice_store::Zone, id: &ObjectId, start: u64, end: u64) -> Vec<u8> {
    let mut reader = zone.read(id, start, end).unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await.unwrap();
    out
}

#[tokio::test]
async fn test_range_spanning_three_parts() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::new();
    upstream.insert("/obj", BODY);
    let zone = open_zone(&zone_config(&dir, 4, 10), upstream.clone()).await;
    let id = ObjectId::new("key", "/obj");

    assert_eq!(zone.range_assembler().indices(&id, 2, 9).unwrap().len(), 3);
    assert_eq!(read_range(&zone, &id, 2, 9).await, b"23456789");

    let requested: Vec<_> = upstream.requested().into_iter().map(|(_, r)| r).collect();
    assert_eq!(
        requested,
        vec![
            ByteRange::new(0, 3).unwrap(),
            ByteRange::new(4, 7).unwrap(),
            ByteRange::new(8, 11).unwrap(),
        ]
    );

    // Second read is served from disk
    assert_eq!(read_range(&zone, &id, 0, 11).await, BODY);
    assert_eq!(upstream.range_calls(), 3);
    zone.close().await.unwrap();
}

#[tokio::test]
async fn test_range_inside_one_part() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::new();
    upstream.insert("/obj", BODY);
    let zone = open_zone(&zone_config(&dir, 4, 10), upstream.clone()).await;
    let id = ObjectId::new("key", "/obj");

    assert_eq!(read_range(&zone, &id, 5, 6).await, b"56");
    assert_eq!(read_range(&zone, &id, 4, 4).await, b"4");
    assert_eq!(upstream.range_calls(), 1);
    zone.close().await.unwrap();
}

#[tokio::test]
async fn test_range_past_end_is_truncated() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::new();
    upstream.insert("/obj", BODY);
    upstream.insert("/short", &b"0123456"[..]);
    let zone = open_zone(&zone_config(&dir, 4, 10), upstream.clone()).await;

    // Object ends on a part boundary
    assert_eq!(read_range(&zone, &ObjectId::new("key", "/obj"), 10, 100).await, b"ab");
    // Object ends inside a part
    assert_eq!(read_range(&zone, &ObjectId::new("key", "/short"), 2, 100).await, b"23456");
    zone.close().await.unwrap();
}

#[tokio::test]
async fn test_inverted_range_is_rejected() {
    let dir = TempDir::new().unwrap();
    let zone = open_zone(&zone_config(&dir, 4, 10), FakeUpstream::new()).await;
    let id = ObjectId::new("key", "/obj");

    assert!(matches!(zone.read(&id, 9, 2), Err(StoreError::InvalidRange(_))));
    assert!(zone.range_assembler().indices(&id, 9, 2).unwrap().is_empty());
    zone.close().await.unwrap();
}

#[tokio::test]
async fn test_missing_object_fails_the_read() {
    let dir = TempDir::new().unwrap();
    let zone = open_zone(&zone_config(&dir, 4, 10), FakeUpstream::new()).await;

    let mut reader = zone.read(&ObjectId::new("key", "/missing"), 0, 3).unwrap();
    let mut out = Vec::new();
    assert!(reader.read_to_end(&mut out).await.is_err());
    assert!(out.is_empty());
    zone.close().await.unwrap();
}

#[tokio::test]
async fn test_range_start_past_end_of_object_fails() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::new();
    upstream.insert("/obj", BODY);
    let zone = open_zone(&zone_config(&dir, 4, 10), upstream).await;

    let mut reader = zone.read(&ObjectId::new("key", "/obj"), 20, 30).unwrap();
    let mut out = Vec::new();
    assert!(reader.read_to_end(&mut out).await.is_err());
    zone.close().await.unwrap();
}

#[tokio::test]
async fn test_offsets_past_last_part_number_are_rejected() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::new();
    upstream.insert("/obj", BODY);
    let zone = open_zone(&zone_config(&dir, 1, 10), upstream.clone()).await;
    let id = ObjectId::new("key", "/obj");
    let past = 1u64 << 32;

    assert!(matches!(zone.read(&id, past, past), Err(StoreError::InvalidRange(_))));
    assert!(matches!(zone.read(&id, 0, past), Err(StoreError::InvalidRange(_))));
    assert!(matches!(
        zone.range_assembler().indices(&id, past, past),
        Err(StoreError::InvalidRange(_))
    ));
    assert_eq!(upstream.range_calls(), 0);

    // The last addressable part is still reachable
    let last = zone.range_assembler().indices(&id, past - 1, past - 1).unwrap();
    assert_eq!(last, vec![id.part(u32::MAX)]);
    zone.close().await.unwrap();
}
