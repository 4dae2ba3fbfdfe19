//! Upstream (origin) access
//!
//! The fetch coordinator only talks to the origin through the [`Upstream`]
//! trait, so tests can substitute an in-memory origin. [`HttpUpstream`] is the
//! HTTP implementation built on `reqwest`.

use crate::error::{Result, StoreError};
use crate::models::ByteRange;
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Headers describing a single transfer rather than the stored object
const TRANSFER_HEADERS: &[&str] = &[
    "content-range",
    "content-length",
    "transfer-encoding",
    "connection",
    "keep-alive",
    "date",
];

/// One response from the origin
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Total size of the object, when the origin reported it
    pub object_size: Option<u64>,
}

impl UpstreamResponse {
    /// Response headers with the per-transfer ones removed, suitable for
    /// answering later requests for the whole object
    pub fn object_headers(&self) -> HeaderMap {
        let mut headers = self.headers.clone();
        for name in TRANSFER_HEADERS {
            headers.remove(*name);
        }
        headers
    }
}

/// Source of object bytes and headers
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Fetch the inclusive byte range of the object at `path`. The body may be
    /// shorter than requested when the range runs past the end of the object.
    async fn fetch_range(&self, path: &str, range: ByteRange) -> Result<UpstreamResponse>;

    /// Fetch the headers of the object at `path` without its body
    async fn fetch_headers(&self, path: &str) -> Result<UpstreamResponse>;

    /// Total size of the object at `path`
    async fn fetch_size(&self, path: &str) -> Result<u64> {
        let response = self.fetch_headers(path).await?;
        response.object_size.ok_or_else(|| {
            StoreError::ParseError(format!("origin did not report the size of {}", path))
        })
    }
}

/// HTTP origin reached through `reqwest`
///
/// Requests are not retried: the coordinator broadcasts a failed fetch to
/// every waiter and the next request starts a new one.
pub struct HttpUpstream {
    client: Client,
    base_url: String,
}

impl HttpUpstream {
    /// Create an upstream for the given base URL with a per-request timeout
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Upstream(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = base_url.into();
        info!("Using upstream {}", base_url);
        Ok(HttpUpstream { client, base_url })
    }

    fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }

    fn check_status(url: &str, status: StatusCode) -> Result<()> {
        if status.is_client_error() || status.is_server_error() {
            warn!("Origin returned error for url={}: status={}", url, status);
            return Err(StoreError::from_http_status(
                status.as_u16(),
                format!("origin returned {} for {}", status, url),
            ));
        }
        if !status.is_success() {
            warn!("Unexpected status code for url={}: status={}", url, status);
            return Err(StoreError::Upstream(format!(
                "Unexpected status code: {}",
                status
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch_range(&self, path: &str, range: ByteRange) -> Result<UpstreamResponse> {
        let url = self.url(path);
        debug!("Fetching url={} range={}", url, range.to_header());

        let response = self
            .client
            .get(&url)
            .header("Range", range.to_header())
            .send()
            .await
            .map_err(|e| StoreError::Upstream(format!("Request failed: {}", e)))?;

        let status = response.status();
        Self::check_status(&url, status)?;
        let headers = response.headers().clone();

        let body = response
            .bytes()
            .await
            .map_err(|e| StoreError::Upstream(format!("Failed to read response body: {}", e)))?;

        match status {
            StatusCode::PARTIAL_CONTENT => {
                let content_range = headers
                    .get("content-range")
                    .ok_or_else(|| {
                        StoreError::Upstream("Missing Content-Range header in 206 response".into())
                    })?
                    .to_str()
                    .map_err(|e| {
                        StoreError::ParseError(format!("Invalid Content-Range header: {}", e))
                    })?;

                let (got, total) = parse_content_range(content_range)?;
                if got.start != range.start || got.end > range.end {
                    return Err(StoreError::Upstream(format!(
                        "Content-Range mismatch: expected {}-{}, got {}",
                        range.start, range.end, content_range
                    )));
                }
                if body.len() as u64 != got.size() {
                    return Err(StoreError::Upstream(format!(
                        "Body has {} bytes, Content-Range announced {}",
                        body.len(),
                        got.size()
                    )));
                }

                Ok(UpstreamResponse {
                    status,
                    headers,
                    body,
                    object_size: total,
                })
            }
            StatusCode::OK => {
                // Origin ignored the Range header and sent the whole object
                let total = body.len() as u64;
                if range.start >= total {
                    return Err(StoreError::InvalidRange(format!(
                        "range {} starts past the end of {} ({} bytes)",
                        range.to_header(),
                        url,
                        total
                    )));
                }
                let end = range.end.min(total - 1);
                debug!("Origin sent full body for url={}, using {}-{}", url, range.start, end);

                Ok(UpstreamResponse {
                    status,
                    headers,
                    body: body.slice(range.start as usize..=end as usize),
                    object_size: Some(total),
                })
            }
            other => Err(StoreError::Upstream(format!(
                "Expected status 206, got {}",
                other
            ))),
        }
    }

    async fn fetch_headers(&self, path: &str) -> Result<UpstreamResponse> {
        let url = self.url(path);
        debug!("Fetching headers for url={}", url);

        let response = self
            .client
            .head(&url)
            .send()
            .await
            .map_err(|e| StoreError::Upstream(format!("HEAD request failed: {}", e)))?;

        let status = response.status();
        Self::check_status(&url, status)?;
        let headers = response.headers().clone();

        let object_size = headers
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        Ok(UpstreamResponse {
            status,
            headers,
            body: Bytes::new(),
            object_size,
        })
    }
}

/// Parse a `Content-Range: bytes start-end/total` value
///
/// The total is `None` when the origin sent `*`.
pub fn parse_content_range(value: &str) -> Result<(ByteRange, Option<u64>)> {
    let value = value.trim();
    let rest = value.strip_prefix("bytes ").ok_or_else(|| {
        StoreError::ParseError(format!(
            "Content-Range must start with 'bytes ', got: {}",
            value
        ))
    })?;

    let (range, total) = rest.split_once('/').ok_or_else(|| {
        StoreError::ParseError(format!(
            "Invalid Content-Range format, expected 'start-end/total', got: {}",
            rest
        ))
    })?;

    let (start, end) = range.split_once('-').ok_or_else(|| {
        StoreError::ParseError(format!("Invalid range format in Content-Range: {}", range))
    })?;

    let start = start
        .trim()
        .parse::<u64>()
        .map_err(|e| StoreError::ParseError(format!("Invalid start value: {}", e)))?;
    let end = end
        .trim()
        .parse::<u64>()
        .map_err(|e| StoreError::ParseError(format!("Invalid end value: {}", e)))?;

    let total = match total.trim() {
        "*" => None,
        raw => Some(
            raw.parse::<u64>()
                .map_err(|e| StoreError::ParseError(format!("Invalid total value: {}", e)))?,
        ),
    };

    Ok((ByteRange::new(start, end)?, total))
}
