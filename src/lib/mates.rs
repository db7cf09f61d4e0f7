//! Distant-mate resolution.
//!
//! A pair key needs the mate's unclipped 5' coordinate, and primary selection
//! needs the mate's quality score. When the mate lies beyond a shard's padded
//! window those values come from the shard that owns the mate: during the
//! scan stage every shard publishes a table of the records its neighbors will
//! ask about, and during the marking stage consumers block on the rendezvous
//! until the table is available.
//!
//! Both sides derive who-needs-whom from the deterministic shard geometry, so
//! a publisher knows its consumer count up front and the table is dropped as
//! soon as the last expected consumer has taken it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ahash::{AHashMap, AHashSet};
use parking_lot::{Condvar, Mutex};

use crate::errors::{MarkdupsError, Result};
use crate::shard::{Shard, ShardPlan};

/// What a shard needs to know about a mate it cannot see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MateInfo {
    /// Mate's reference index
    pub ref_id: usize,
    /// Mate's unclipped 5' position
    pub unclipped_5p: i64,
    /// Mate is on the reverse strand
    pub reversed: bool,
    /// Mate's base-quality score
    pub score: i64,
    /// Mate's flag word
    pub flags: u16,
}

/// Read name to mate metadata, published once per shard.
pub type MateTable = AHashMap<Vec<u8>, MateInfo>;

/// The mate bookkeeping one shard accumulates during the scan stage.
#[derive(Debug, Default)]
pub struct ShardMateState {
    /// Records other shards will ask about, keyed by read name.
    pub exported: MateTable,
    /// Shards whose tables this shard must consume.
    pub needed: AHashSet<u64>,
    /// Shards expected to consume this shard's table.
    pub consumers: AHashSet<u64>,
}

impl ShardMateState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one visible, paired, both-mapped record.
    ///
    /// `own` is the record's `(ref, aligned start)`, `mate` the mate's.
    /// The consumer side registers a needed publisher when the mate is
    /// invisible from this shard. The publisher side runs for owned records
    /// only: the record is exported for every shard that can see the mate's
    /// position but not this record's. A position is visible to its owner
    /// and at most the two neighboring shards (padding is smaller than a
    /// shard), and both sides evaluate the same geometry, so the needed and
    /// consumer sets agree exactly across shards.
    pub fn note_pair(
        &mut self,
        plan: &ShardPlan,
        shard: &Shard,
        name: &[u8],
        info: MateInfo,
        own: (usize, i64),
        mate: (usize, i64),
    ) {
        if !shard.in_padded_window(mate.0, mate.1) {
            self.needed.insert(plan.index_at(mate.0, mate.1));
        }

        if !shard.owns(own.0, own.1) {
            return;
        }
        let mate_owner = plan.index_at(mate.0, mate.1);
        let lo = mate_owner.saturating_sub(1);
        let hi = (mate_owner + 1).min(plan.num_shards() - 1);
        for candidate in lo..=hi {
            if candidate == shard.index {
                continue;
            }
            let candidate_shard = plan.shard(candidate);
            if candidate_shard.in_padded_window(mate.0, mate.1)
                && !candidate_shard.in_padded_window(own.0, own.1)
            {
                self.consumers.insert(candidate);
                self.exported.insert(name.to_vec(), info);
            }
        }
    }
}

#[derive(Debug, Default)]
struct Entry {
    published: bool,
    /// `None` once dropped after the countdown reached zero.
    table: Option<Arc<MateTable>>,
    remaining: AHashSet<u64>,
}

/// Publish/consume coordination between shards, keyed by shard index.
#[derive(Debug, Default)]
pub struct RendezvousRegistry {
    state: Mutex<AHashMap<u64, Entry>>,
    published: Condvar,
    cancelled: AtomicBool,
}

impl RendezvousRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a shard's exported table together with its expected consumers.
    ///
    /// A table with no expected consumers is dropped immediately.
    pub fn publish(&self, shard_index: u64, table: MateTable, consumers: AHashSet<u64>) {
        let mut state = self.state.lock();
        let entry = state.entry(shard_index).or_default();
        entry.published = true;
        entry.remaining = consumers;
        entry.table = if entry.remaining.is_empty() { None } else { Some(Arc::new(table)) };
        drop(state);
        self.published.notify_all();
    }

    /// Take the table published by `publisher`, blocking until it appears.
    ///
    /// Consuming counts down the publisher's expected consumers; the table is
    /// dropped from the registry when the count reaches zero. A consumer the
    /// publisher did not expect receives an empty table, which surfaces
    /// downstream as unresolved mates.
    pub fn consume(&self, publisher: u64, consumer: u64) -> Result<Arc<MateTable>> {
        let mut state = self.state.lock();
        loop {
            if self.cancelled.load(Ordering::Acquire) {
                return Err(MarkdupsError::Cancelled);
            }
            if let Some(entry) = state.get_mut(&publisher) {
                if entry.published {
                    let table = match &entry.table {
                        Some(table) => Arc::clone(table),
                        None => Arc::new(MateTable::new()),
                    };
                    entry.remaining.remove(&consumer);
                    if entry.remaining.is_empty() {
                        entry.table = None;
                    }
                    return Ok(table);
                }
            }
            self.published.wait(&mut state);
        }
    }

    /// Release every waiter with a cancellation error.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.published.notify_all();
    }

    /// True once `cancel` has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Whether a published table is still held, for tests and diagnostics.
    #[must_use]
    pub fn table_is_live(&self, shard_index: u64) -> bool {
        self.state.lock().get(&shard_index).is_some_and(|e| e.table.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::coordinate_sorted_header;

    fn info(score: i64) -> MateInfo {
        MateInfo { ref_id: 0, unclipped_5p: 0, reversed: false, score, flags: 0 }
    }

    #[test]
    fn test_note_pair_geometry_is_symmetric() {
        // Shards of width 100 with padding 10; the pair sits at 95 and 115.
        let header = coordinate_sorted_header(&[("chr1", 300)]);
        let plan = ShardPlan::new(&header, 100, 10).unwrap();

        // Shard 0 owns the read at 95; the mate at 115 is beyond its window,
        // but 95 is visible from shard 1, so nothing is exported.
        let mut state0 = ShardMateState::new();
        state0.note_pair(&plan, &plan.shard(0), b"p", info(1), (0, 95), (0, 115));
        assert!(state0.needed.contains(&1));
        assert!(state0.consumers.is_empty());
        assert!(state0.exported.is_empty());

        // Shard 1 owns the mate at 115, sees 95 in its padding, and knows
        // shard 0 cannot see 115, so it exports for shard 0.
        let mut state1 = ShardMateState::new();
        state1.note_pair(&plan, &plan.shard(1), b"p", info(2), (0, 115), (0, 95));
        assert!(state1.needed.is_empty());
        assert!(state1.consumers.contains(&0));
        assert_eq!(state1.exported.get(b"p".as_slice()), Some(&info(2)));
    }

    #[test]
    fn test_note_pair_far_apart_needs_both_directions() {
        let header = coordinate_sorted_header(&[("chr1", 1000)]);
        let plan = ShardPlan::new(&header, 100, 10).unwrap();

        let mut state0 = ShardMateState::new();
        state0.note_pair(&plan, &plan.shard(0), b"p", info(1), (0, 50), (0, 850));
        assert!(state0.needed.contains(&8));
        assert!(state0.consumers.contains(&8));
        assert_eq!(state0.exported.len(), 1);
    }

    #[test]
    fn test_note_pair_covers_padding_visible_consumers() {
        // q sits at 205, visible from shard 1's padding; its mate w sits at
        // 500. Shard 1 and shard 2 both bag q, so both need shard 5's table,
        // and shard 5 expects exactly those two consumers for w.
        let header = coordinate_sorted_header(&[("chr1", 1000)]);
        let plan = ShardPlan::new(&header, 100, 10).unwrap();

        let mut state1 = ShardMateState::new();
        state1.note_pair(&plan, &plan.shard(1), b"q", info(1), (0, 205), (0, 500));
        assert!(state1.needed.contains(&5));
        // q is not owned by shard 1, so nothing is exported from here.
        assert!(state1.exported.is_empty());

        let mut state2 = ShardMateState::new();
        state2.note_pair(&plan, &plan.shard(2), b"q", info(1), (0, 205), (0, 500));
        assert!(state2.needed.contains(&5));

        let mut state5 = ShardMateState::new();
        state5.note_pair(&plan, &plan.shard(5), b"q", info(9), (0, 500), (0, 205));
        assert_eq!(
            state5.consumers,
            [1u64, 2u64].into_iter().collect::<AHashSet<u64>>()
        );
        assert_eq!(state5.exported.len(), 1);
    }

    #[test]
    fn test_note_pair_local_mate_is_ignored() {
        let header = coordinate_sorted_header(&[("chr1", 300)]);
        let plan = ShardPlan::new(&header, 100, 10).unwrap();
        let mut state = ShardMateState::new();
        state.note_pair(&plan, &plan.shard(0), b"p", info(1), (0, 10), (0, 60));
        assert!(state.needed.is_empty());
        assert!(state.consumers.is_empty());
        assert!(state.exported.is_empty());
    }

    #[test]
    fn test_consume_blocks_until_publish() {
        let registry = Arc::new(RendezvousRegistry::new());
        let consumer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || registry.consume(3, 7).unwrap())
        };

        let mut table = MateTable::new();
        table.insert(b"read".to_vec(), info(5));
        let mut consumers = AHashSet::new();
        consumers.insert(7u64);
        registry.publish(3, table, consumers);

        let table = consumer.join().unwrap();
        assert_eq!(table.get(b"read".as_slice()), Some(&info(5)));
        // The only expected consumer has taken the table.
        assert!(!registry.table_is_live(3));
    }

    #[test]
    fn test_table_dropped_after_last_consumer() {
        let registry = RendezvousRegistry::new();
        let mut consumers = AHashSet::new();
        consumers.insert(1u64);
        consumers.insert(2u64);
        registry.publish(0, MateTable::new(), consumers);

        assert!(registry.table_is_live(0));
        registry.consume(0, 1).unwrap();
        assert!(registry.table_is_live(0));
        registry.consume(0, 2).unwrap();
        assert!(!registry.table_is_live(0));
    }

    #[test]
    fn test_publish_without_consumers_drops_immediately() {
        let registry = RendezvousRegistry::new();
        registry.publish(0, MateTable::new(), AHashSet::new());
        assert!(!registry.table_is_live(0));
    }

    #[test]
    fn test_unexpected_consumer_gets_empty_table() {
        let registry = RendezvousRegistry::new();
        let mut consumers = AHashSet::new();
        consumers.insert(1u64);
        let mut table = MateTable::new();
        table.insert(b"read".to_vec(), info(5));
        registry.publish(0, table, consumers);

        registry.consume(0, 1).unwrap();
        let table = registry.consume(0, 9).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_cancel_releases_waiters() {
        let registry = Arc::new(RendezvousRegistry::new());
        let waiter = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || registry.consume(99, 0))
        };
        // Give the waiter a moment to block, then cancel.
        std::thread::sleep(std::time::Duration::from_millis(20));
        registry.cancel();
        assert!(matches!(waiter.join().unwrap(), Err(MarkdupsError::Cancelled)));
    }
}
