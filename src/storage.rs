//! Storage engine contract
//!
//! A storage engine persists object metadata and object parts of one cache
//! zone. Every zone owns its own instance, so zones with different backends
//! can run side by side.

use crate::error::Result;
use crate::models::{ObjectId, ObjectIndex, ObjectMetadata};
use async_trait::async_trait;
use tokio::io::AsyncRead;

/// Readable stream over the bytes of one stored part
pub type PartReader = Box<dyn AsyncRead + Send + Unpin>;

/// Callback invoked by [`Storage::iterate`] for every stored object.
/// Returning `false` stops the iteration.
pub type IterateCallback<'a> = dyn FnMut(ObjectMetadata, Vec<ObjectIndex>) -> bool + Send + 'a;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Maximum size of a stored part in bytes
    fn part_size(&self) -> u64;

    /// Metadata of the object, `NotFound` when it was never stored
    async fn get_metadata(&self, id: &ObjectId) -> Result<ObjectMetadata>;

    /// Open a stored part for reading, `NotFound` when absent
    async fn get_part(&self, index: &ObjectIndex) -> Result<PartReader>;

    /// All parts of the object currently on storage, in part order
    async fn get_available_parts(&self, id: &ObjectId) -> Result<Vec<ObjectIndex>>;

    /// Persist object metadata, replacing any previous version
    async fn save_metadata(&self, metadata: &ObjectMetadata) -> Result<()>;

    /// Persist one part. Fails with `InvalidPartSize` when `data` yields more
    /// than [`Storage::part_size`] bytes, leaving any previous version intact.
    async fn save_part(
        &self,
        index: &ObjectIndex,
        data: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<()>;

    /// Remove the object together with its metadata and all of its parts
    async fn discard(&self, id: &ObjectId) -> Result<()>;

    async fn discard_part(&self, index: &ObjectIndex) -> Result<()>;

    /// Walk every stored object, skipping objects whose metadata is unreadable
    async fn iterate(&self, callback: &mut IterateCallback<'_>) -> Result<()>;
}
