//! Fetch coordinator
//!
//! One actor per zone owns two in-flight tables: part downloads keyed by
//! `ObjectIndex` and header fetches keyed by `ObjectId`. Every request passes
//! through the actor loop:
//!
//! - An index already in flight gets the caller attached as another waiter,
//!   so concurrent requests cause a single upstream fetch.
//! - A cache hit opens the stored part in a spawned task and promotes it.
//! - A miss registers the caller as the first waiter and spawns a worker that
//!   fetches the part, stores it when cacheable and reports back.
//!
//! When a worker reports, the actor admits the stored part to the cache
//! algorithm, hands the same outcome to every waiter and clears the entry.
//! Workers keep running when their callers go away, so an abandoned fetch
//! still populates the cache.
//!
//! A separate drain task deletes evicted parts and expired or discarded
//! objects from storage, keeping disk latency out of the cache algorithm's
//! lock. The actor hands it every deletion and hears back when each one is
//! done. Until then a miss on the affected part or object is parked, and an
//! object deletion waits for the object's running downloads, so a deletion
//! never lands on a part that was stored again in the meantime.

use crate::cache_algorithm::CacheAlgorithm;
use crate::cacheability::CachePolicy;
use crate::error::{Result, StoreError};
use crate::expiry::ExpiryScheduler;
use crate::metrics::ZoneMetrics;
use crate::models::{unix_now, ObjectId, ObjectIndex, ObjectMetadata};
use crate::storage::{PartReader, Storage};
use crate::upstream::{Upstream, UpstreamResponse};
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Everything the coordinator needs from its zone
#[derive(Clone)]
pub struct ZoneServices {
    pub zone_id: String,
    pub storage: Arc<dyn Storage>,
    pub algorithm: Arc<dyn CacheAlgorithm>,
    pub upstream: Arc<dyn Upstream>,
    pub policy: Arc<dyn CachePolicy>,
    pub expiry: Arc<ExpiryScheduler>,
    pub metrics: Arc<ZoneMetrics>,
}

type PartReply = oneshot::Sender<Result<PartReader>>;
type HeadersReply = oneshot::Sender<Result<ObjectMetadata>>;
type DiscardReply = oneshot::Sender<Result<()>>;

/// Outcome of a part download
#[derive(Debug, Clone)]
struct FetchedPart {
    data: Bytes,
    /// Whether the part was written to storage
    stored: bool,
}

enum Message {
    Fetch {
        index: ObjectIndex,
        reply: PartReply,
        /// Set when a hit turned out to be missing on storage
        skip_lookup: bool,
    },
    FetchHeaders {
        id: ObjectId,
        reply: HeadersReply,
    },
    PartDone {
        index: ObjectIndex,
        result: Result<FetchedPart>,
    },
    HeadersDone {
        id: ObjectId,
        result: Result<ObjectMetadata>,
    },
    Discard {
        id: ObjectId,
        reply: DiscardReply,
    },
    PartRemoved {
        index: ObjectIndex,
    },
    ObjectRemoved {
        id: ObjectId,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Deletion work for the drain task
enum Removal {
    Part {
        index: ObjectIndex,
        /// False when the part was refused admission rather than evicted
        evicted: bool,
    },
    /// A whole object; without a reply it is an expiry
    Object {
        id: ObjectId,
        reply: Option<DiscardReply>,
    },
}

/// Single-flight access to the parts and headers of one zone
pub struct FetchCoordinator {
    tx: UnboundedSender<Message>,
    services: ZoneServices,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl FetchCoordinator {
    /// Start the coordinator actor and its drain task
    ///
    /// `removals` receives the indices evicted by the zone's cache algorithm
    /// and `expired` the objects whose TTL passed. Must be called from within
    /// a tokio runtime.
    pub fn start(
        services: ZoneServices,
        removals: UnboundedReceiver<ObjectIndex>,
        expired: UnboundedReceiver<ObjectId>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (jobs, jobs_rx) = mpsc::unbounded_channel();
        let drain = tokio::spawn(drain_removals(services.clone(), jobs_rx, tx.downgrade()));

        let actor = Actor {
            services: services.clone(),
            tx: tx.downgrade(),
            jobs,
            parts: HashMap::new(),
            headers: HashMap::new(),
            parked: HashSet::new(),
            removing_parts: HashMap::new(),
            removing_objects: HashMap::new(),
            held_removals: HashMap::new(),
            closing: Vec::new(),
        };
        let handle = tokio::spawn(actor.run(rx, removals, expired, drain));

        info!("Fetch coordinator for zone {} started", services.zone_id);
        FetchCoordinator {
            tx,
            services,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Get a readable stream over one part, from storage or from upstream
    ///
    /// Dropping the returned future abandons only this caller's wait.
    pub async fn fetch(&self, index: &ObjectIndex) -> Result<PartReader> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Message::Fetch {
                index: index.clone(),
                reply,
                skip_lookup: false,
            })
            .map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)?
    }

    /// Get the metadata of an object, from storage or from upstream
    pub async fn fetch_metadata(&self, id: &ObjectId) -> Result<ObjectMetadata> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Message::FetchHeaders {
                id: id.clone(),
                reply,
            })
            .map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)?
    }

    /// Get the stored origin headers of an object
    pub async fn fetch_headers(&self, id: &ObjectId) -> Result<HeaderMap> {
        Ok(self.fetch_metadata(id).await?.header_map())
    }

    /// Remove an object from the cache algorithm, the expiry schedule and
    /// storage
    ///
    /// Waits for downloads of the object that are already running.
    pub async fn discard(&self, id: &ObjectId) -> Result<()> {
        info!("Discarding {} from zone {}", id, self.services.zone_id);
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Message::Discard {
                id: id.clone(),
                reply,
            })
            .map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)?
    }

    /// Stop accepting requests, wait for in-flight fetches and pending
    /// removals, then stop the actor. Calling it again is a no-op.
    pub async fn close(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Message::Close { reply }).is_ok() {
            // The actor is gone when the reply is dropped
            let _ = rx.await;
        }

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| StoreError::InternalError(format!("coordinator task failed: {}", e)))?;
        }
        Ok(())
    }

    pub fn metrics(&self) -> &Arc<ZoneMetrics> {
        &self.services.metrics
    }

    pub fn algorithm(&self) -> &Arc<dyn CacheAlgorithm> {
        &self.services.algorithm
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.services.storage
    }
}

struct Actor {
    services: ZoneServices,
    tx: WeakUnboundedSender<Message>,
    jobs: UnboundedSender<Removal>,
    parts: HashMap<ObjectIndex, Vec<PartReply>>,
    headers: HashMap<ObjectId, Vec<HeadersReply>>,
    /// Misses whose download waits for a deletion to finish
    parked: HashSet<ObjectIndex>,
    /// Deletions handed to the drain and not yet reported done
    removing_parts: HashMap<ObjectIndex, usize>,
    removing_objects: HashMap<ObjectId, usize>,
    /// Object deletions waiting for the object's downloads to end
    held_removals: HashMap<ObjectId, Vec<Option<DiscardReply>>>,
    closing: Vec<oneshot::Sender<()>>,
}

impl Actor {
    async fn run(
        mut self,
        mut rx: UnboundedReceiver<Message>,
        mut removals: UnboundedReceiver<ObjectIndex>,
        mut expired: UnboundedReceiver<ObjectId>,
        drain: JoinHandle<()>,
    ) {
        loop {
            // Evictions decided while handling the last message are marked
            // before the next request is looked at
            while let Ok(index) = removals.try_recv() {
                self.on_evicted(index);
            }
            if self.can_stop() {
                break;
            }

            tokio::select! {
                message = rx.recv() => match message {
                    Some(message) => self.handle(message),
                    None => break,
                },
                Some(index) = removals.recv() => self.on_evicted(index),
                Some(id) = expired.recv() => self.remove_object(id, None),
            }
        }

        let Actor {
            services,
            jobs,
            closing,
            ..
        } = self;
        drop(jobs);
        if let Err(e) = drain.await {
            error!("Removal drain of zone {} failed: {}", services.zone_id, e);
        }

        info!("Fetch coordinator for zone {} stopped", services.zone_id);
        for reply in closing {
            let _ = reply.send(());
        }
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::Fetch {
                index,
                reply,
                skip_lookup,
            } => self.on_fetch(index, reply, skip_lookup),
            Message::FetchHeaders { id, reply } => self.on_fetch_headers(id, reply),
            Message::PartDone { index, result } => self.on_part_done(index, result),
            Message::HeadersDone { id, result } => self.on_headers_done(id, result),
            Message::Discard { id, reply } => {
                if self.closing.is_empty() {
                    self.remove_object(id, Some(reply));
                } else {
                    let _ = reply.send(Err(StoreError::Closed));
                }
            }
            Message::PartRemoved { index } => {
                release(&mut self.removing_parts, &index);
                self.resume_parked();
            }
            Message::ObjectRemoved { id } => {
                release(&mut self.removing_objects, &id);
                self.resume_parked();
            }
            Message::Close { reply } => {
                if self.closing.is_empty() {
                    info!(
                        "Closing fetch coordinator for zone {} ({} parts, {} headers in flight)",
                        self.services.zone_id,
                        self.parts.len(),
                        self.headers.len()
                    );
                }
                self.closing.push(reply);
            }
        }
    }

    fn can_stop(&self) -> bool {
        !self.closing.is_empty()
            && self.parts.is_empty()
            && self.headers.is_empty()
            && self.removing_parts.is_empty()
            && self.removing_objects.is_empty()
            && self.held_removals.is_empty()
    }

    fn on_fetch(&mut self, index: ObjectIndex, reply: PartReply, skip_lookup: bool) {
        if !self.closing.is_empty() {
            let _ = reply.send(Err(StoreError::Closed));
            return;
        }

        if let Some(waiters) = self.parts.get_mut(&index) {
            debug!("Joining in-flight fetch of {}", index);
            self.services.metrics.record_coalesced();
            waiters.push(reply);
            return;
        }

        if !skip_lookup && self.services.algorithm.lookup(&index) {
            self.services.metrics.record_cache_hit();
            self.services.algorithm.promote_object(&index);
            self.spawn_hit(index, reply);
            return;
        }

        debug!("Cache miss for {}", index);
        self.services.metrics.record_cache_miss();
        self.parts.insert(index.clone(), vec![reply]);

        if self.is_blocked(&index) {
            debug!("Fetch of {} waits for a pending deletion", index);
            self.parked.insert(index);
        } else {
            self.spawn_download(index);
        }
    }

    fn spawn_download(&self, index: ObjectIndex) {
        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        let services = self.services.clone();
        tokio::spawn(async move {
            let result = services.download_part(&index).await;
            let _ = tx.send(Message::PartDone { index, result });
        });
    }

    fn spawn_hit(&self, index: ObjectIndex, reply: PartReply) {
        let services = self.services.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            match services.storage.get_part(&index).await {
                Ok(reader) => {
                    let _ = reply.send(Ok(reader));
                }
                Err(e) if e.is_not_found() => {
                    // Resident in the algorithm but gone from storage
                    warn!("Part {} vanished from storage, fetching again", index);
                    services.algorithm.remove(&index);
                    match tx.upgrade() {
                        Some(tx) => {
                            if let Err(mpsc::error::SendError(message)) = tx.send(Message::Fetch {
                                index,
                                reply,
                                skip_lookup: true,
                            }) {
                                if let Message::Fetch { reply, .. } = message {
                                    let _ = reply.send(Err(StoreError::Closed));
                                }
                            }
                        }
                        None => {
                            let _ = reply.send(Err(StoreError::Closed));
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to open stored part {}: {}", index, e);
                    let _ = reply.send(Err(e));
                }
            }
        });
    }

    fn on_part_done(&mut self, index: ObjectIndex, result: Result<FetchedPart>) {
        let waiters = self.parts.remove(&index).unwrap_or_default();

        let outcome = match result {
            Ok(part) => {
                if part.stored {
                    self.admit(&index);
                }
                Ok(part.data)
            }
            Err(e) => {
                warn!("Fetching {} failed: {}", index, e);
                Err(e)
            }
        };

        debug!("Handing {} to {} waiter(s)", index, waiters.len());
        for waiter in waiters {
            let response: Result<PartReader> = match &outcome {
                Ok(data) => Ok(Box::new(Cursor::new(data.clone()))),
                Err(e) => Err(e.clone()),
            };
            // The caller may have given up waiting
            let _ = waiter.send(response);
        }

        if self.held_removals.contains_key(&index.id) && !self.downloading(&index.id) {
            for reply in self.held_removals.remove(&index.id).unwrap_or_default() {
                self.start_object_removal(index.id.clone(), reply);
            }
        }
    }

    /// Register a freshly stored part with the cache algorithm, or delete it
    /// when the algorithm does not want it
    fn admit(&mut self, index: &ObjectIndex) {
        let keep = self.services.algorithm.should_keep(index);
        if keep {
            match self.services.algorithm.add_object(index.clone()) {
                Ok(()) => return,
                Err(StoreError::AlreadyCached(_)) => {
                    debug!("Part {} is already cached", index);
                    return;
                }
                Err(e) => warn!("Cache algorithm refused {}: {}", index, e),
            }
        }

        self.services.metrics.record_rejected_part();
        self.start_part_removal(index.clone(), false);
    }

    fn on_evicted(&mut self, index: ObjectIndex) {
        self.start_part_removal(index, true);
    }

    fn start_part_removal(&mut self, index: ObjectIndex, evicted: bool) {
        *self.removing_parts.entry(index.clone()).or_insert(0) += 1;
        self.send_removal(Removal::Part { index, evicted });
    }

    fn remove_object(&mut self, id: ObjectId, reply: Option<DiscardReply>) {
        if self.downloading(&id) {
            debug!("Deletion of {} waits for its downloads", id);
            self.held_removals.entry(id).or_default().push(reply);
            return;
        }
        self.start_object_removal(id, reply);
    }

    fn start_object_removal(&mut self, id: ObjectId, reply: Option<DiscardReply>) {
        *self.removing_objects.entry(id.clone()).or_insert(0) += 1;
        self.send_removal(Removal::Object { id, reply });
    }

    fn send_removal(&mut self, removal: Removal) {
        let Err(mpsc::error::SendError(removal)) = self.jobs.send(removal) else {
            return;
        };

        // Only reachable if the drain task panicked
        error!("Removal drain of zone {} is gone", self.services.zone_id);
        match removal {
            Removal::Part { index, .. } => release(&mut self.removing_parts, &index),
            Removal::Object { id, reply } => {
                if let Some(reply) = reply {
                    let _ = reply.send(Err(StoreError::Closed));
                }
                release(&mut self.removing_objects, &id);
            }
        }
        self.resume_parked();
    }

    /// Whether a download of this part could race a pending deletion
    fn is_blocked(&self, index: &ObjectIndex) -> bool {
        self.removing_parts.contains_key(index)
            || self.removing_objects.contains_key(&index.id)
            || self.held_removals.contains_key(&index.id)
    }

    /// Whether a download of any part of the object is running
    fn downloading(&self, id: &ObjectId) -> bool {
        self.parts
            .keys()
            .any(|index| index.id == *id && !self.parked.contains(index))
    }

    fn resume_parked(&mut self) {
        let ready: Vec<ObjectIndex> = self
            .parked
            .iter()
            .filter(|index| !self.is_blocked(index))
            .cloned()
            .collect();
        for index in ready {
            self.parked.remove(&index);
            debug!("Resuming fetch of {}", index);
            self.spawn_download(index);
        }
    }

    fn on_fetch_headers(&mut self, id: ObjectId, reply: HeadersReply) {
        if !self.closing.is_empty() {
            let _ = reply.send(Err(StoreError::Closed));
            return;
        }

        if let Some(waiters) = self.headers.get_mut(&id) {
            self.services.metrics.record_coalesced();
            waiters.push(reply);
            return;
        }

        self.headers.insert(id.clone(), vec![reply]);
        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        let services = self.services.clone();
        tokio::spawn(async move {
            let result = services.load_metadata(&id).await;
            let _ = tx.send(Message::HeadersDone { id, result });
        });
    }

    fn on_headers_done(&mut self, id: ObjectId, result: Result<ObjectMetadata>) {
        if let Err(e) = &result {
            warn!("Fetching headers of {} failed: {}", id, e);
        }
        for waiter in self.headers.remove(&id).unwrap_or_default() {
            let _ = waiter.send(result.clone());
        }
    }
}

/// Count down one pending deletion of `key`
fn release<K: std::hash::Hash + Eq>(pending: &mut HashMap<K, usize>, key: &K) {
    if let Some(count) = pending.get_mut(key) {
        *count -= 1;
        if *count == 0 {
            pending.remove(key);
        }
    }
}

impl ZoneServices {
    /// Worker body of a part miss
    async fn download_part(&self, index: &ObjectIndex) -> Result<FetchedPart> {
        let part_size = self.storage.part_size();
        let range = index.byte_range(part_size);

        let response = match self.upstream.fetch_range(&index.id.path, range).await {
            Ok(response) => response,
            Err(e) => {
                self.metrics.record_upstream_fetch(None);
                return Err(e);
            }
        };
        self.metrics
            .record_upstream_fetch(Some(response.body.len() as u64));

        if response.body.len() as u64 > part_size {
            return Err(StoreError::InvalidPartSize {
                size: response.body.len() as u64,
                limit: part_size,
            });
        }

        let verdict = self.policy.evaluate(response.status, &response.headers);
        if !verdict.cacheable {
            debug!("Response for {} is not cacheable", index);
            self.metrics.record_rejected_part();
            return Ok(FetchedPart {
                data: response.body,
                stored: false,
            });
        }

        // Nothing is written for a part the algorithm would refuse, so a
        // zone that keeps nothing leaves no trace on disk
        if !self.algorithm.should_keep(index) {
            debug!("Cache algorithm of zone {} does not keep {}", self.zone_id, index);
            self.metrics.record_rejected_part();
            return Ok(FetchedPart {
                data: response.body,
                stored: false,
            });
        }

        let result = self.store_part(index, &response, verdict.expires_in).await;
        if let Err(e) = result {
            self.metrics.record_store_error();
            error!("Failed to store {}: {}", index, e);
            return Err(e);
        }

        self.metrics.record_part_stored();
        Ok(FetchedPart {
            data: response.body,
            stored: true,
        })
    }

    /// Persist a fetched part, writing the object's metadata first when it
    /// is missing, stale or describes another version of the object
    async fn store_part(
        &self,
        index: &ObjectIndex,
        response: &UpstreamResponse,
        expires_in: Option<std::time::Duration>,
    ) -> Result<()> {
        let id = &index.id;
        let now = unix_now();
        let size = response
            .object_size
            .unwrap_or(index.part as u64 * self.storage.part_size() + response.body.len() as u64);

        let current = match self.storage.get_metadata(id).await {
            Ok(metadata)
                if !metadata.is_expired(now)
                    && response.object_size.map_or(true, |s| s == metadata.size) =>
            {
                Some(metadata)
            }
            Ok(_) => {
                debug!("Replacing stale metadata of {}", id);
                self.forget_object(id).await.or_else(ignore_not_found)?;
                None
            }
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        if current.is_none() {
            let code = if response.status == StatusCode::PARTIAL_CONTENT {
                StatusCode::OK
            } else {
                response.status
            };
            let mut metadata =
                ObjectMetadata::new(id.clone(), code.as_u16(), size, &response.object_headers());
            metadata.expires_at = expires_in.map(|ttl| now + ttl.as_secs());
            self.storage.save_metadata(&metadata).await?;
            if let Some(ttl) = expires_in {
                self.expiry.set(id.clone(), ttl);
            }
        }

        self.storage
            .save_part(index, &mut &response.body[..])
            .await
    }

    /// Worker body of a header fetch
    async fn load_metadata(&self, id: &ObjectId) -> Result<ObjectMetadata> {
        let now = unix_now();
        let stale = match self.storage.get_metadata(id).await {
            Ok(metadata) if !metadata.is_expired(now) => return Ok(metadata),
            Ok(_) => true,
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e),
        };

        let response = self.upstream.fetch_headers(&id.path).await;
        self.metrics.record_header_fetch(response.is_ok());
        let response = response?;

        let verdict = self.policy.evaluate(response.status, &response.headers);
        let mut metadata = ObjectMetadata::new(
            id.clone(),
            response.status.as_u16(),
            response.object_size.unwrap_or(0),
            &response.object_headers(),
        );
        if !verdict.cacheable || !self.algorithm.should_keep(&id.part(0)) {
            return Ok(metadata);
        }

        if stale {
            self.forget_object(id).await.or_else(ignore_not_found)?;
        }
        metadata.expires_at = verdict.expires_in.map(|ttl| now + ttl.as_secs());
        if let Err(e) = self.storage.save_metadata(&metadata).await {
            self.metrics.record_store_error();
            return Err(e);
        }
        if let Some(ttl) = verdict.expires_in {
            self.expiry.set(id.clone(), ttl);
        }
        Ok(metadata)
    }

    /// Drop every trace of an object: resident parts, expiry and storage
    async fn forget_object(&self, id: &ObjectId) -> Result<()> {
        let parts = self
            .storage
            .get_available_parts(id)
            .await
            .or_else(|e| if e.is_not_found() { Ok(Vec::new()) } else { Err(e) })?;
        for part in &parts {
            self.algorithm.remove(part);
        }
        self.expiry.remove(id.clone());
        self.storage.discard(id).await
    }

    async fn remove_part(&self, index: &ObjectIndex, evicted: bool) {
        match self.storage.discard_part(index).await {
            Ok(()) if evicted => {
                debug!("Deleted evicted part {}", index);
                self.metrics.record_eviction(true);
            }
            Ok(()) => debug!("Deleted rejected part {}", index),
            Err(e) if e.is_not_found() => {
                debug!("Part {} was already gone", index);
            }
            Err(e) => {
                warn!("Failed to delete part {}: {}", index, e);
                if evicted {
                    self.metrics.record_eviction(false);
                }
            }
        }
    }

    async fn apply_expiry(&self, id: ObjectId) {
        self.metrics.record_expiration();
        match self.forget_object(&id).await {
            Ok(()) => debug!("Removed expired object {}", id),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!("Failed to remove expired object {}: {}", id, e),
        }
    }
}

fn ignore_not_found(err: StoreError) -> Result<()> {
    if err.is_not_found() {
        Ok(())
    } else {
        Err(err)
    }
}

/// Run deletions in the order the actor queued them, reporting each one
/// back, until the actor drops its end of the queue
async fn drain_removals(
    services: ZoneServices,
    mut jobs: UnboundedReceiver<Removal>,
    actor: WeakUnboundedSender<Message>,
) {
    while let Some(removal) = jobs.recv().await {
        let done = match removal {
            Removal::Part { index, evicted } => {
                services.remove_part(&index, evicted).await;
                Message::PartRemoved { index }
            }
            Removal::Object { id, reply: None } => {
                services.apply_expiry(id.clone()).await;
                Message::ObjectRemoved { id }
            }
            Removal::Object {
                id,
                reply: Some(reply),
            } => {
                let _ = reply.send(services.forget_object(&id).await);
                Message::ObjectRemoved { id }
            }
        };
        if let Some(actor) = actor.upgrade() {
            let _ = actor.send(done);
        }
    }
    debug!("Removal drain of zone {} stopped", services.zone_id);
}
