//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode};
use slice_store::{
    ByteRange, CacheZone, DefaultCachePolicy, Result, StoreError, Upstream, UpstreamResponse,
    Zone,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;

const GATE_PERMITS: usize = 1 << 20;

/// In-memory origin that counts requests and can hold them back
pub struct FakeUpstream {
    objects: Mutex<HashMap<String, Bytes>>,
    headers: Mutex<HeaderMap>,
    failure: Mutex<Option<StoreError>>,
    requested: Mutex<Vec<(String, ByteRange)>>,
    range_calls: AtomicUsize,
    header_calls: AtomicUsize,
    gate: Semaphore,
}

impl FakeUpstream {
    pub fn new() -> Arc<Self> {
        Self::with_permits(GATE_PERMITS)
    }

    /// A fake whose requests block until `open_gate` is called
    pub fn gated() -> Arc<Self> {
        Self::with_permits(0)
    }

    fn with_permits(permits: usize) -> Arc<Self> {
        Arc::new(FakeUpstream {
            objects: Mutex::new(HashMap::new()),
            headers: Mutex::new(HeaderMap::new()),
            failure: Mutex::new(None),
            requested: Mutex::new(Vec::new()),
            range_calls: AtomicUsize::new(0),
            header_calls: AtomicUsize::new(0),
            gate: Semaphore::new(permits),
        })
    }

    pub fn open_gate(&self) {
        self.gate.add_permits(GATE_PERMITS);
    }

    pub fn insert(&self, path: &str, body: impl Into<Bytes>) {
        self.objects
            .lock()
            .unwrap()
            .insert(path.to_string(), body.into());
    }

    pub fn set_header(&self, name: &'static str, value: &'static str) {
        self.headers
            .lock()
            .unwrap()
            .insert(name, HeaderValue::from_static(value));
    }

    pub fn fail_with(&self, err: Option<StoreError>) {
        *self.failure.lock().unwrap() = err;
    }

    pub fn range_calls(&self) -> usize {
        self.range_calls.load(Ordering::SeqCst)
    }

    pub fn header_calls(&self) -> usize {
        self.header_calls.load(Ordering::SeqCst)
    }

    pub fn requested(&self) -> Vec<(String, ByteRange)> {
        self.requested.lock().unwrap().clone()
    }

    async fn pass_gate(&self) {
        let permit = self.gate.acquire().await.unwrap();
        drop(permit);
    }

    fn object(&self, path: &str) -> Result<Bytes> {
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        self.objects
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::origin_client_error(404, format!("{} not found", path)))
    }
}

#[async_trait]
impl Upstream for FakeUpstream {
    async fn fetch_range(&self, path: &str, range: ByteRange) -> Result<UpstreamResponse> {
        self.range_calls.fetch_add(1, Ordering::SeqCst);
        self.requested
            .lock()
            .unwrap()
            .push((path.to_string(), range));
        self.pass_gate().await;

        let body = self.object(path)?;
        let total = body.len() as u64;
        if range.start >= total {
            return Err(StoreError::origin_client_error(416, "range not satisfiable"));
        }
        let end = range.end.min(total - 1);

        Ok(UpstreamResponse {
            status: StatusCode::PARTIAL_CONTENT,
            headers: self.headers.lock().unwrap().clone(),
            body: body.slice(range.start as usize..=end as usize),
            object_size: Some(total),
        })
    }

    async fn fetch_headers(&self, path: &str) -> Result<UpstreamResponse> {
        self.header_calls.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;

        let body = self.object(path)?;
        Ok(UpstreamResponse {
            status: StatusCode::OK,
            headers: self.headers.lock().unwrap().clone(),
            body: Bytes::new(),
            object_size: Some(body.len() as u64),
        })
    }
}

pub fn zone_config(dir: &TempDir, part_size: u64, capacity: u64) -> CacheZone {
    CacheZone::new("test", dir.path(), part_size, capacity)
}

pub async fn open_zone(config: &CacheZone, upstream: Arc<FakeUpstream>) -> Zone {
    Zone::open(
        config,
        upstream,
        Arc::new(DefaultCachePolicy::new(config.default_ttl())),
    )
    .await
    .unwrap()
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
