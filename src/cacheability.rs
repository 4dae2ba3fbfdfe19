//! Cacheability decisions for upstream responses

use http::{HeaderMap, StatusCode};
use std::time::Duration;

/// Outcome of evaluating an upstream response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheVerdict {
    /// Whether the response may be stored
    pub cacheable: bool,
    /// How long the stored object stays fresh; `None` never expires
    pub expires_in: Option<Duration>,
}

impl CacheVerdict {
    pub fn not_cacheable() -> Self {
        CacheVerdict {
            cacheable: false,
            expires_in: None,
        }
    }

    pub fn cacheable(expires_in: Option<Duration>) -> Self {
        CacheVerdict {
            cacheable: true,
            expires_in,
        }
    }
}

/// Decides whether an upstream response can be cached
pub trait CachePolicy: Send + Sync {
    fn evaluate(&self, status: StatusCode, headers: &HeaderMap) -> CacheVerdict;
}

impl<F> CachePolicy for F
where
    F: Fn(StatusCode, &HeaderMap) -> CacheVerdict + Send + Sync,
{
    fn evaluate(&self, status: StatusCode, headers: &HeaderMap) -> CacheVerdict {
        self(status, headers)
    }
}

/// Cache-Control based policy
///
/// Only `200` and `206` responses are stored. `no-store`, `no-cache`,
/// `private` and `Pragma: no-cache` prevent caching. `s-maxage` wins over
/// `max-age`; without either the configured default TTL is used.
#[derive(Debug, Clone, Default)]
pub struct DefaultCachePolicy {
    default_ttl: Option<Duration>,
}

impl DefaultCachePolicy {
    pub fn new(default_ttl: Option<Duration>) -> Self {
        DefaultCachePolicy { default_ttl }
    }
}

impl CachePolicy for DefaultCachePolicy {
    fn evaluate(&self, status: StatusCode, headers: &HeaderMap) -> CacheVerdict {
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            return CacheVerdict::not_cacheable();
        }

        let pragma_no_cache = headers
            .get_all("pragma")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.to_ascii_lowercase().contains("no-cache"));
        if pragma_no_cache {
            return CacheVerdict::not_cacheable();
        }

        let mut max_age = None;
        let mut s_maxage = None;
        for value in headers.get_all("cache-control").iter() {
            let Ok(value) = value.to_str() else {
                continue;
            };
            for directive in value.split(',') {
                let directive = directive.trim().to_ascii_lowercase();
                match directive.as_str() {
                    "no-store" | "no-cache" | "private" => {
                        return CacheVerdict::not_cacheable();
                    }
                    _ => {}
                }
                if let Some(raw) = directive.strip_prefix("s-maxage=") {
                    s_maxage = raw.trim_matches('"').parse::<u64>().ok();
                } else if let Some(raw) = directive.strip_prefix("max-age=") {
                    max_age = raw.trim_matches('"').parse::<u64>().ok();
                }
            }
        }

        match s_maxage.or(max_age) {
            Some(0) => CacheVerdict::not_cacheable(),
            Some(secs) => CacheVerdict::cacheable(Some(Duration::from_secs(secs))),
            None => CacheVerdict::cacheable(self.default_ttl),
        }
    }
}
