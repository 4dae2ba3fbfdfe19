//! TTL expiry of stored objects
//!
//! The scheduler is a small actor: it owns a min-heap of deadlines and sends
//! the id of every object whose deadline passes on its output channel. The
//! receiver decides what expiry means (the zone drops the object from its
//! cache algorithm and discards it from storage).

use crate::models::ObjectId;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

enum Command {
    Set(ObjectId, Duration),
    Remove(ObjectId),
    Contains(ObjectId, oneshot::Sender<bool>),
    Len(oneshot::Sender<usize>),
    Cleanup,
    Shutdown,
}

/// Deadline entry; `generation` tells replaced entries apart from live ones
type HeapEntry = Reverse<(Instant, u64, ObjectId)>;

struct ExpiryState {
    heap: BinaryHeap<HeapEntry>,
    live: HashMap<ObjectId, u64>,
    next_generation: u64,
    expired: mpsc::UnboundedSender<ObjectId>,
}

impl ExpiryState {
    fn set(&mut self, id: ObjectId, ttl: Duration) {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.live.insert(id.clone(), generation);
        self.heap.push(Reverse((Instant::now() + ttl, generation, id)));
    }

    fn next_deadline(&mut self) -> Option<Instant> {
        // Drop entries that were replaced or removed
        while let Some(Reverse((deadline, generation, id))) = self.heap.peek() {
            if self.live.get(id) == Some(generation) {
                return Some(*deadline);
            }
            self.heap.pop();
        }
        None
    }

    fn fire_due(&mut self) {
        let now = Instant::now();
        while let Some(Reverse((deadline, generation, id))) = self.heap.peek() {
            if *deadline > now {
                break;
            }
            let live = self.live.get(id) == Some(generation);
            let Some(Reverse((_, _, id))) = self.heap.pop() else {
                break;
            };
            if live {
                self.live.remove(&id);
                debug!("Object {} expired", id);
                if self.expired.send(id).is_err() {
                    warn!("Expiry receiver is gone");
                }
            }
        }
    }

    fn clear(&mut self) {
        self.heap.clear();
        self.live.clear();
    }
}

/// Schedules objects for removal once their TTL passes
pub struct ExpiryScheduler {
    tx: mpsc::UnboundedSender<Command>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ExpiryScheduler {
    /// Start the scheduler. Expired ids are sent on `expired`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(expired: mpsc::UnboundedSender<ObjectId>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = ExpiryState {
            heap: BinaryHeap::new(),
            live: HashMap::new(),
            next_generation: 0,
            expired,
        };
        let handle = tokio::spawn(run(state, rx));

        ExpiryScheduler {
            tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Expire `id` after `ttl`, replacing any earlier deadline for it
    pub fn set(&self, id: ObjectId, ttl: Duration) {
        let _ = self.tx.send(Command::Set(id, ttl));
    }

    /// Forget the deadline of `id`
    pub fn remove(&self, id: ObjectId) {
        let _ = self.tx.send(Command::Remove(id));
    }

    /// Forget every deadline
    pub fn cleanup(&self) {
        let _ = self.tx.send(Command::Cleanup);
    }

    pub async fn contains(&self, id: &ObjectId) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Contains(id.clone(), reply)).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Number of scheduled objects
    pub async fn len(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Len(reply)).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Stop the scheduler and wait for it to exit. Pending deadlines are
    /// dropped without firing.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Expiry scheduler task failed: {}", e);
            }
        }
    }
}

async fn run(mut state: ExpiryState, mut rx: mpsc::UnboundedReceiver<Command>) {
    loop {
        let deadline = state.next_deadline();

        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(Command::Set(id, ttl)) => state.set(id, ttl),
                Some(Command::Remove(id)) => {
                    state.live.remove(&id);
                }
                Some(Command::Contains(id, reply)) => {
                    let _ = reply.send(state.live.contains_key(&id));
                }
                Some(Command::Len(reply)) => {
                    let _ = reply.send(state.live.len());
                }
                Some(Command::Cleanup) => state.clear(),
                Some(Command::Shutdown) | None => break,
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                state.fire_due();
            }
        }
    }
    debug!("Expiry scheduler stopped");
}
