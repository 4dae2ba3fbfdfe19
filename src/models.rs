//! Core data models for the slice store

use crate::error::{Result, StoreError};
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identity of a logical cached resource within one cache zone
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId {
    /// Cache key of the zone tenant (virtual host, location, ...)
    pub cache_key: String,
    /// Upstream path of the resource
    pub path: String,
}

impl ObjectId {
    pub fn new(cache_key: impl Into<String>, path: impl Into<String>) -> Self {
        ObjectId {
            cache_key: cache_key.into(),
            path: path.into(),
        }
    }

    /// Index of the given part of this object
    pub fn part(&self, part: u32) -> ObjectIndex {
        ObjectIndex::new(self.clone(), part)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.cache_key, self.path)
    }
}

/// Identity of one fixed-size slice of an object's body
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectIndex {
    pub id: ObjectId,
    /// `byte_offset / part_size`
    pub part: u32,
}

impl ObjectIndex {
    pub fn new(id: ObjectId, part: u32) -> Self {
        ObjectIndex { id, part }
    }

    /// Index of the part holding `offset` for the given part size
    ///
    /// Fails with `InvalidRange` when the part number does not fit in a
    /// `u32`.
    pub fn for_offset(id: ObjectId, offset: u64, part_size: u64) -> Result<Self> {
        let part = u32::try_from(offset / part_size).map_err(|_| {
            StoreError::InvalidRange(format!(
                "offset {} is beyond the last addressable part of {} bytes",
                offset, part_size
            ))
        })?;
        Ok(ObjectIndex::new(id, part))
    }

    /// Byte range covered by this part, assuming the object is large enough
    pub fn byte_range(&self, part_size: u64) -> ByteRange {
        let start = self.part as u64 * part_size;
        ByteRange {
            start,
            end: start + part_size - 1,
        }
    }
}

impl fmt::Display for ObjectIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.id, self.part)
    }
}

/// Everything needed to answer a request for an object without contacting
/// upstream again
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    #[serde(rename = "ID")]
    pub id: ObjectId,
    /// Unix seconds at which the origin response was received
    pub response_timestamp: u64,
    /// Origin status code
    pub code: u16,
    /// Total object size in bytes
    pub size: u64,
    /// Origin response headers, lowercase names
    pub headers: BTreeMap<String, Vec<String>>,
    /// Unix seconds after which the object is stale; `None` never expires
    pub expires_at: Option<u64>,
}

impl ObjectMetadata {
    pub fn new(id: ObjectId, code: u16, size: u64, headers: &HeaderMap) -> Self {
        ObjectMetadata {
            id,
            response_timestamp: unix_now(),
            code,
            size,
            headers: header_map_to_btree(headers),
            expires_at: None,
        }
    }

    /// Whether the object is stale at the given unix time
    pub fn is_expired(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    /// Seconds left until expiry, `None` when the object never expires
    pub fn ttl(&self, now: u64) -> Option<u64> {
        self.expires_at.map(|at| at.saturating_sub(now))
    }

    /// The stored headers as an `http::HeaderMap`
    ///
    /// Entries that are not valid header names or values are skipped.
    pub fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, values) in &self.headers {
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                continue;
            };
            for value in values {
                if let Ok(value) = HeaderValue::from_str(value) {
                    map.append(name.clone(), value);
                }
            }
        }
        map
    }
}

fn header_map_to_btree(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            out.entry(name.as_str().to_string())
                .or_default()
                .push(value.to_string());
        }
    }
    out
}

/// Current unix time in seconds
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Represents a byte range for HTTP Range requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    /// Starting byte position (inclusive)
    pub start: u64,
    /// Ending byte position (inclusive)
    pub end: u64,
}

impl ByteRange {
    /// Create a new ByteRange
    ///
    /// # Arguments
    /// * `start` - Starting byte position (inclusive)
    /// * `end` - Ending byte position (inclusive)
    ///
    /// # Returns
    /// * `Ok(ByteRange)` if the range is valid
    /// * `Err(StoreError)` if start > end
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(StoreError::InvalidRange(format!(
                "start ({}) must be <= end ({})",
                start, end
            )));
        }
        Ok(ByteRange { start, end })
    }

    /// Get the size of this byte range in bytes
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Convert this ByteRange to an HTTP Range header value
    ///
    /// # Returns
    /// A string in the format "bytes=start-end"
    pub fn to_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_range_new() {
        let range = ByteRange::new(0, 1023).unwrap();
        assert_eq!(range.start, 0);
        assert_eq!(range.end, 1023);
        assert_eq!(range.size(), 1024);
    }

    #[test]
    fn test_byte_range_invalid() {
        assert!(ByteRange::new(100, 50).is_err());
    }

    #[test]
    fn test_byte_range_to_header() {
        let range = ByteRange::new(0, 1023).unwrap();
        assert_eq!(range.to_header(), "bytes=0-1023");
    }

    #[test]
    fn test_object_index_for_offset() {
        let id = ObjectId::new("key", "/file");
        assert_eq!(ObjectIndex::for_offset(id.clone(), 0, 4).unwrap().part, 0);
        assert_eq!(ObjectIndex::for_offset(id.clone(), 3, 4).unwrap().part, 0);
        assert_eq!(ObjectIndex::for_offset(id.clone(), 4, 4).unwrap().part, 1);
        assert_eq!(ObjectIndex::for_offset(id, 9, 4).unwrap().part, 2);
    }

    #[test]
    fn test_object_index_for_offset_past_last_part() {
        let id = ObjectId::new("key", "/file");
        let last = u32::MAX as u64;
        assert_eq!(
            ObjectIndex::for_offset(id.clone(), last, 1).unwrap().part,
            u32::MAX
        );
        assert!(matches!(
            ObjectIndex::for_offset(id, last + 1, 1),
            Err(StoreError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_object_index_byte_range() {
        let index = ObjectId::new("key", "/file").part(2);
        assert_eq!(index.byte_range(4), ByteRange { start: 8, end: 11 });
    }

    #[test]
    fn test_metadata_headers_round_trip() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("video/mp4"));
        headers.append("x-tag", HeaderValue::from_static("a"));
        headers.append("x-tag", HeaderValue::from_static("b"));

        let meta = ObjectMetadata::new(ObjectId::new("k", "/v.mp4"), 200, 10, &headers);
        let back = meta.header_map();
        assert_eq!(back.get("content-type").unwrap(), "video/mp4");
        assert_eq!(back.get_all("x-tag").iter().count(), 2);
    }

    #[test]
    fn test_metadata_expiry() {
        let mut meta = ObjectMetadata::new(ObjectId::new("k", "/a"), 200, 1, &HeaderMap::new());
        assert!(!meta.is_expired(u64::MAX));
        assert_eq!(meta.ttl(100), None);

        meta.expires_at = Some(100);
        assert!(!meta.is_expired(99));
        assert!(meta.is_expired(100));
        assert_eq!(meta.ttl(40), Some(60));
        assert_eq!(meta.ttl(200), Some(0));
    }

    #[test]
    fn test_metadata_json_round_trip() {
        let mut headers = HeaderMap::new();
        headers.insert("etag", HeaderValue::from_static("\"abc\""));
        let mut meta = ObjectMetadata::new(ObjectId::new("k", "/a"), 206, 12, &headers);
        meta.expires_at = Some(1234);

        let json = serde_json::to_string(&meta).unwrap();
        let back: ObjectMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }
}
