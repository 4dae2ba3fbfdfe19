//! Tiered LRU cache algorithm
//!
//! Resident parts live in one of N ordered tiers, each an LRU list:
//! - Tier 0 is probationary: every admitted part enters at its head
//! - A hit moves a part one tier up (capped at the top tier), at the head
//! - Capacity is a single budget in parts shared by all tiers
//!
//! When an admission needs room, the tail of the lowest non-empty tier is
//! taken. A tail taken from tier 0 is evicted and its index is sent on the
//! removal channel; a tail taken from a higher tier is demoted to the head
//! of the tier below instead. A part touched once therefore never pushes out
//! parts that are requested repeatedly.
//!
//! The tier state sits behind one mutex per zone. The lock only covers list
//! bookkeeping: evictions are reported through an unbounded channel and the
//! files are deleted elsewhere.

use crate::cache_algorithm::{CacheAlgorithm, CacheStats, RemovalSender};
use crate::config::CacheZone;
use crate::error::{Result, StoreError};
use crate::models::ObjectIndex;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Entry of the node arena, linked into exactly one tier list
struct Node {
    index: ObjectIndex,
    tier: usize,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug, Default, Clone, Copy)]
struct TierList {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

/// Everything guarded by the zone lock
///
/// Invariant: a slot named by `slots` or by any tier link holds a node, and
/// a slot in `free` holds none. `release` runs only after `unlink`, so the
/// accessors below cannot meet an empty slot.
struct TierState {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    slots: HashMap<ObjectIndex, usize>,
    tiers: Vec<TierList>,
    hits: u64,
    requests: u64,
}

impl TierState {
    fn new(tiers: usize) -> Self {
        TierState {
            nodes: Vec::new(),
            free: Vec::new(),
            slots: HashMap::new(),
            tiers: vec![TierList::default(); tiers],
            hits: 0,
            requests: 0,
        }
    }

    // Panics on an empty slot, which the invariant above rules out
    fn node(&self, slot: usize) -> &Node {
        self.nodes[slot].as_ref().expect("tier list points at a free slot")
    }

    fn node_mut(&mut self, slot: usize) -> &mut Node {
        self.nodes[slot].as_mut().expect("tier list points at a free slot")
    }

    fn alloc(&mut self, index: ObjectIndex) -> usize {
        let node = Node {
            index,
            tier: 0,
            prev: None,
            next: None,
        };
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, slot: usize) -> ObjectIndex {
        let node = self.nodes[slot].take().expect("released a free slot");
        self.free.push(slot);
        self.slots.remove(&node.index);
        node.index
    }

    fn unlink(&mut self, slot: usize) {
        let (tier, prev, next) = {
            let node = self.node(slot);
            (node.tier, node.prev, node.next)
        };

        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.tiers[tier].head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tiers[tier].tail = prev,
        }
        self.tiers[tier].len -= 1;

        let node = self.node_mut(slot);
        node.prev = None;
        node.next = None;
    }

    fn push_front(&mut self, slot: usize, tier: usize) {
        let old_head = self.tiers[tier].head;
        {
            let node = self.node_mut(slot);
            node.tier = tier;
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(h) => self.node_mut(h).prev = Some(slot),
            None => self.tiers[tier].tail = Some(slot),
        }
        self.tiers[tier].head = Some(slot);
        self.tiers[tier].len += 1;
    }

    /// Take one step towards freeing a slot. Returns the evicted index when
    /// the step discarded a part, `None` when it only demoted one.
    fn evict_step(&mut self) -> Option<ObjectIndex> {
        let tier = self.tiers.iter().position(|t| t.len > 0)?;
        let slot = self.tiers[tier].tail?;
        self.unlink(slot);

        if tier == 0 {
            Some(self.release(slot))
        } else {
            self.push_front(slot, tier - 1);
            None
        }
    }

    fn len(&self) -> usize {
        self.slots.len()
    }
}

/// Tiered LRU cache algorithm for one zone
pub struct TieredLruCache {
    id: String,
    part_size: u64,
    capacity: u64,
    state: Mutex<TierState>,
    removal: RemovalSender,
}

impl TieredLruCache {
    /// Create a tiered LRU for the zone
    ///
    /// # Arguments
    /// * `zone` - Zone configuration (capacity, part size and tier count)
    /// * `removal` - Channel receiving the index of every evicted part
    pub fn new(zone: &CacheZone, removal: RemovalSender) -> Result<Self> {
        Self::with_tiers(
            zone.id.clone(),
            zone.part_size,
            zone.capacity_parts(),
            zone.tiers,
            removal,
        )
    }

    pub fn with_tiers(
        id: impl Into<String>,
        part_size: u64,
        capacity: u64,
        tiers: usize,
        removal: RemovalSender,
    ) -> Result<Self> {
        if tiers < 2 {
            return Err(StoreError::ConfigError(format!(
                "tiered cache needs at least 2 tiers, got {}",
                tiers
            )));
        }

        Ok(TieredLruCache {
            id: id.into(),
            part_size,
            capacity,
            state: Mutex::new(TierState::new(tiers)),
            removal,
        })
    }

    fn state(&self) -> MutexGuard<'_, TierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of parts resident in each tier, lowest tier first
    pub fn tier_lengths(&self) -> Vec<usize> {
        self.state().tiers.iter().map(|t| t.len).collect()
    }

    /// Tier a resident part currently lives in
    pub fn tier_of(&self, index: &ObjectIndex) -> Option<usize> {
        let state = self.state();
        state.slots.get(index).map(|&slot| state.node(slot).tier)
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    fn notify_removal(&self, index: ObjectIndex) {
        debug!("Evicting {} from zone {}", index, self.id);
        if self.removal.send(index).is_err() {
            warn!("Removal queue of zone {} is closed", self.id);
        }
    }
}

impl CacheAlgorithm for TieredLruCache {
    fn lookup(&self, index: &ObjectIndex) -> bool {
        let mut state = self.state();
        state.requests += 1;
        if state.slots.contains_key(index) {
            state.hits += 1;
            true
        } else {
            false
        }
    }

    fn should_keep(&self, _index: &ObjectIndex) -> bool {
        self.capacity > 0
    }

    fn add_object(&self, index: ObjectIndex) -> Result<()> {
        if self.capacity == 0 {
            return Err(StoreError::ConfigError(format!(
                "zone {} has no capacity",
                self.id
            )));
        }

        let mut evicted = Vec::new();
        {
            let mut state = self.state();
            if state.slots.contains_key(&index) {
                return Err(StoreError::AlreadyCached(index.to_string()));
            }

            while state.len() as u64 >= self.capacity {
                if let Some(victim) = state.evict_step() {
                    evicted.push(victim);
                }
            }

            let slot = state.alloc(index.clone());
            state.slots.insert(index, slot);
            state.push_front(slot, 0);
        }

        for victim in evicted {
            self.notify_removal(victim);
        }
        Ok(())
    }

    fn promote_object(&self, index: &ObjectIndex) {
        let mut state = self.state();
        let Some(&slot) = state.slots.get(index) else {
            return;
        };
        let top = state.tiers.len() - 1;
        let target = (state.node(slot).tier + 1).min(top);
        state.unlink(slot);
        state.push_front(slot, target);
    }

    fn remove(&self, index: &ObjectIndex) -> bool {
        let mut state = self.state();
        let Some(&slot) = state.slots.get(index) else {
            return false;
        };
        state.unlink(slot);
        state.release(slot);
        true
    }

    fn consumed_size(&self) -> u64 {
        self.state().len() as u64 * self.part_size
    }

    fn stats(&self) -> CacheStats {
        let state = self.state();
        let objects = state.tiers.iter().map(|t| t.len as u64).sum::<u64>();
        CacheStats {
            id: self.id.clone(),
            hits: state.hits,
            requests: state.requests,
            objects,
            size: objects * self.part_size,
        }
    }
}
