//! Disk storage engine
//!
//! On-disk layout of one zone:
//!
//! ```text
//! <root>/settings.json
//! <root>/[<cache key>/]<h0h1>/<h2h3>/<32 hex digit object hash>/objID
//! <root>/[<cache key>/]<h0h1>/<h2h3>/<32 hex digit object hash>/000000
//! <root>/[<cache key>/]<h0h1>/<h2h3>/<32 hex digit object hash>/000001
//! ```
//!
//! The object hash is the xxh3-128 digest of the cache key and the path. Its
//! first four hex digits form two directory levels, so no directory holds
//! more than 256 entries at the shard levels.
//!
//! Every file is written to `<final>.tmp.<suffix>` in the destination
//! directory and renamed over the final path once complete. Discarding an
//! object renames its directory aside before removing it. Readers and
//! `iterate` therefore never see half-written files or half-deleted objects.

use crate::config::CacheZone;
use crate::error::{Result, StoreError};
use crate::models::{ObjectId, ObjectIndex, ObjectMetadata};
use crate::storage::{IterateCallback, PartReader, Storage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs::{self, DirBuilder, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info, warn};
use xxhash_rust::xxh3::{xxh3_128, xxh3_64};

/// Name of the metadata file inside an object directory
pub const METADATA_FILE_NAME: &str = "objID";

/// Name of the zone settings file at the storage root
pub const SETTINGS_FILE_NAME: &str = "settings.json";

const OBJECT_DIR_LEN: usize = 32;
const SHARD_DIR_LEN: usize = 2;

#[cfg(unix)]
const DIR_MODE: u32 = 0o700;
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// Zone settings that fix the on-disk format of a storage root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct StoreSettings {
    part_size: u64,
    cache_key_in_path: bool,
}

/// Storage engine writing objects to a local directory tree
#[derive(Debug)]
pub struct DiskStore {
    root: PathBuf,
    part_size: u64,
    cache_key_in_path: bool,
    next_temp_id: AtomicU64,
}

impl DiskStore {
    /// Open the storage root of a zone
    ///
    /// The root directory must already exist. The first open records the
    /// zone's part size and layout in `settings.json`; later opens fail with
    /// `ConfigError` if the zone configuration no longer matches.
    pub async fn new(zone: &CacheZone) -> Result<Self> {
        if zone.part_size == 0 {
            return Err(StoreError::ConfigError(format!(
                "zone '{}': invalid part size 0",
                zone.id
            )));
        }

        match fs::metadata(&zone.path).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(StoreError::ConfigError(format!(
                    "disk storage path {} is not a directory",
                    zone.path.display()
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::ConfigError(format!(
                    "disk storage path {} should be created",
                    zone.path.display()
                )));
            }
            Err(e) => {
                return Err(StoreError::ConfigError(format!(
                    "cannot stat the disk storage path {}: {}",
                    zone.path.display(),
                    e
                )));
            }
        }

        let store = DiskStore {
            root: zone.path.clone(),
            part_size: zone.part_size,
            cache_key_in_path: zone.cache_key_in_path,
            next_temp_id: AtomicU64::new(0),
        };
        store.check_settings(&zone.id).await?;

        info!(
            "Disk storage for zone {} opened at {} (part size {})",
            zone.id,
            store.root.display(),
            store.part_size
        );
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn check_settings(&self, zone_id: &str) -> Result<()> {
        let wanted = StoreSettings {
            part_size: self.part_size,
            cache_key_in_path: self.cache_key_in_path,
        };
        let path = self.root.join(SETTINGS_FILE_NAME);

        match fs::read(&path).await {
            Ok(raw) => {
                let found: StoreSettings = serde_json::from_slice(&raw).map_err(|e| {
                    StoreError::ConfigError(format!(
                        "zone '{}': unreadable {}: {}",
                        zone_id,
                        path.display(),
                        e
                    ))
                })?;
                if found != wanted {
                    return Err(StoreError::ConfigError(format!(
                        "zone '{}': storage at {} was created with {:?}, configured {:?}",
                        zone_id,
                        self.root.display(),
                        found,
                        wanted
                    )));
                }
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let raw = serde_json::to_vec_pretty(&wanted)?;
                self.write_atomic(&path, &mut &raw[..], None).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Directory holding everything stored for `id`
    pub fn object_dir(&self, id: &ObjectId) -> PathBuf {
        let hash = object_hash(id);
        let mut dir = self.root.clone();
        if self.cache_key_in_path {
            dir.push(sanitize_path_segment(&id.cache_key));
        }
        dir.push(&hash[0..2]);
        dir.push(&hash[2..4]);
        dir.push(&hash);
        dir
    }

    fn metadata_path(&self, id: &ObjectId) -> PathBuf {
        self.object_dir(id).join(METADATA_FILE_NAME)
    }

    fn part_path(&self, index: &ObjectIndex) -> PathBuf {
        self.object_dir(&index.id).join(part_file_name(index.part))
    }

    fn temp_path(&self, path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(format!(".tmp.{}", self.temp_suffix()));
        PathBuf::from(name)
    }

    fn temp_suffix(&self) -> String {
        let seq = self.next_temp_id.fetch_add(1, Ordering::Relaxed);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();

        let mut seed = Vec::with_capacity(28);
        seed.extend_from_slice(&seq.to_le_bytes());
        seed.extend_from_slice(&std::process::id().to_le_bytes());
        seed.extend_from_slice(&nanos.to_le_bytes());
        format!("{:016x}", xxh3_64(&seed))
    }

    async fn create_dir(&self, dir: &Path) -> Result<()> {
        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(DIR_MODE);

        match builder.create(dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(StoreError::io(format!(
                "creating {}: {}",
                dir.display(),
                e
            ))),
        }
    }

    async fn create_temp_file(&self, path: &Path) -> Result<File> {
        let mut opts = OpenOptions::new();
        opts.write(true).create_new(true);
        #[cfg(unix)]
        opts.mode(FILE_MODE);

        opts.open(path)
            .await
            .map_err(|e| StoreError::io(format!("creating {}: {}", path.display(), e)))
    }

    /// Write `data` to a temp file next to `path` and rename it over `path`
    ///
    /// With `limit` set, more than `limit` bytes fail the write with
    /// `InvalidPartSize`. On any failure the temp file is removed and the
    /// result of that removal is attached to the returned error.
    async fn write_atomic(
        &self,
        path: &Path,
        data: &mut (dyn AsyncRead + Send + Unpin),
        limit: Option<u64>,
    ) -> Result<()> {
        if let Some(parent) = path.parent() {
            self.create_dir(parent).await?;
        }

        let tmp = self.temp_path(path);
        let mut file = self.create_temp_file(&tmp).await?;

        let written = match limit {
            Some(limit) => tokio::io::copy(&mut data.take(limit + 1), &mut file).await,
            None => tokio::io::copy(data, &mut file).await,
        };

        let failure = match written {
            Err(e) => Some(StoreError::io(format!("writing {}: {}", tmp.display(), e))),
            Ok(size) => match limit {
                Some(limit) if size > limit => Some(StoreError::InvalidPartSize { size, limit }),
                _ => None,
            },
        };
        let failure = match failure {
            Some(err) => Some(err),
            None => file
                .flush()
                .await
                .err()
                .map(|e| StoreError::io(format!("flushing {}: {}", tmp.display(), e))),
        };
        drop(file);

        if let Some(err) = failure {
            let cleanup = fs::remove_file(&tmp).await;
            return Err(err.with_cleanup([cleanup]));
        }

        if let Err(e) = fs::rename(&tmp, path).await {
            let cleanup = fs::remove_file(&tmp).await;
            return Err(
                StoreError::io(format!("renaming {}: {}", tmp.display(), e)).with_cleanup([cleanup])
            );
        }
        Ok(())
    }

    async fn read_metadata_file(&self, path: &Path) -> Result<ObjectMetadata> {
        let raw = fs::read(path).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn list_parts(&self, id: &ObjectId, dir: &Path) -> Result<Vec<ObjectIndex>> {
        let mut entries = fs::read_dir(dir).await?;
        let mut parts = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name == METADATA_FILE_NAME {
                continue;
            }
            if let Some(part) = parse_part_file_name(name) {
                parts.push(id.part(part));
            }
        }
        parts.sort();
        Ok(parts)
    }

    /// Directories whose children are object directories
    async fn shard_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut level = if self.cache_key_in_path {
            subdirs(&self.root, |_| true).await?
        } else {
            vec![self.root.clone()]
        };

        for _ in 0..2 {
            let mut next = Vec::new();
            for dir in &level {
                next.extend(subdirs(dir, is_shard_name).await?);
            }
            level = next;
        }
        Ok(level)
    }
}

#[async_trait]
impl Storage for DiskStore {
    fn part_size(&self) -> u64 {
        self.part_size
    }

    async fn get_metadata(&self, id: &ObjectId) -> Result<ObjectMetadata> {
        debug!("Getting metadata for {}", id);
        self.read_metadata_file(&self.metadata_path(id)).await
    }

    async fn get_part(&self, index: &ObjectIndex) -> Result<PartReader> {
        debug!("Getting part {}", index);
        let file = File::open(self.part_path(index)).await?;
        Ok(Box::new(file))
    }

    async fn get_available_parts(&self, id: &ObjectId) -> Result<Vec<ObjectIndex>> {
        self.list_parts(id, &self.object_dir(id)).await
    }

    async fn save_metadata(&self, metadata: &ObjectMetadata) -> Result<()> {
        debug!("Saving metadata for {}", metadata.id);
        let raw = serde_json::to_vec(metadata)?;
        self.write_atomic(&self.metadata_path(&metadata.id), &mut &raw[..], None)
            .await
    }

    async fn save_part(
        &self,
        index: &ObjectIndex,
        data: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<()> {
        debug!("Saving part {}", index);
        self.write_atomic(&self.part_path(index), data, Some(self.part_size))
            .await
    }

    async fn discard(&self, id: &ObjectId) -> Result<()> {
        debug!("Discarding {}", id);
        let dir = self.object_dir(id);
        let aside = self.temp_path(&dir);
        fs::rename(&dir, &aside).await?;
        fs::remove_dir_all(&aside)
            .await
            .map_err(|e| StoreError::io(format!("removing {}: {}", aside.display(), e)))
    }

    async fn discard_part(&self, index: &ObjectIndex) -> Result<()> {
        debug!("Discarding {}", index);
        Ok(fs::remove_file(self.part_path(index)).await?)
    }

    async fn iterate(&self, callback: &mut IterateCallback<'_>) -> Result<()> {
        for shard in self.shard_dirs().await? {
            for object_dir in subdirs(&shard, is_object_dir_name).await? {
                let meta_path = object_dir.join(METADATA_FILE_NAME);
                let metadata = match self.read_metadata_file(&meta_path).await {
                    Ok(metadata) => metadata,
                    Err(e) => {
                        error!("Error getting metadata from {}: {}", meta_path.display(), e);
                        continue;
                    }
                };

                let parts = match self.list_parts(&metadata.id, &object_dir).await {
                    Ok(parts) => parts,
                    Err(e) => {
                        error!("Error getting parts from {}: {}", object_dir.display(), e);
                        continue;
                    }
                };

                if !callback(metadata, parts) {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

/// Hex digest naming the directory of an object
pub fn object_hash(id: &ObjectId) -> String {
    let mut buf = Vec::with_capacity(id.cache_key.len() + id.path.len() + 1);
    buf.extend_from_slice(id.cache_key.as_bytes());
    buf.push(0);
    buf.extend_from_slice(id.path.as_bytes());
    format!("{:032x}", xxh3_128(&buf))
}

/// File name of a part, zero padded so names sort in part order
pub fn part_file_name(part: u32) -> String {
    format!("{:06}", part)
}

fn parse_part_file_name(name: &str) -> Option<u32> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

/// Make a cache key usable as a single directory name
fn sanitize_path_segment(key: &str) -> String {
    let cleaned: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        format!("_{}", cleaned)
    } else {
        cleaned
    }
}

fn is_hex_name(name: &str, len: usize) -> bool {
    name.len() == len && name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn is_shard_name(name: &str) -> bool {
    is_hex_name(name, SHARD_DIR_LEN)
}

fn is_object_dir_name(name: &str) -> bool {
    is_hex_name(name, OBJECT_DIR_LEN)
}

/// Child directories of `dir` whose names pass `filter`
async fn subdirs(dir: &Path, filter: impl Fn(&str) -> bool) -> Result<Vec<PathBuf>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        // Renamed aside by a concurrent discard
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut dirs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !filter(name) {
            continue;
        }
        match entry.file_type().await {
            Ok(t) if t.is_dir() => dirs.push(entry.path()),
            Ok(_) => {}
            Err(e) => warn!("Cannot stat {}: {}", entry.path().display(), e),
        }
    }
    dirs.sort();
    Ok(dirs)
}
