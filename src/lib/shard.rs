//! Genome sharding: partitioning references into coordinate ranges that are
//! processed independently.
//!
//! A shard owns the half-open range `[(start_ref, start), (end_ref, end))` in
//! lexicographic `(ref, pos)` order and can additionally see `padding` bases
//! beyond each end, so read pairs crossing a boundary are visible from both
//! sides. The planner emits per-reference shards (a shard never spans two
//! references), but containment checks handle the general form.

use noodles::sam::Header;

use crate::errors::{MarkdupsError, Result};

/// A contiguous coordinate range owned by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shard {
    /// Reference of the range start
    pub start_ref: usize,
    /// 0-based inclusive start position
    pub start: i64,
    /// Reference of the range end
    pub end_ref: usize,
    /// 0-based exclusive end position
    pub end: i64,
    /// Bases of visible context beyond each end
    pub padding: i64,
    /// Position of this shard in planner order
    pub index: u64,
}

impl Shard {
    /// True when `(ref_id, pos)` falls inside the owned range.
    #[must_use]
    pub fn owns(&self, ref_id: usize, pos: i64) -> bool {
        (ref_id, pos) >= (self.start_ref, self.start) && (ref_id, pos) < (self.end_ref, self.end)
    }

    /// True when `(ref_id, pos)` falls inside the owned range or its padding.
    #[must_use]
    pub fn in_padded_window(&self, ref_id: usize, pos: i64) -> bool {
        (ref_id, pos) >= (self.start_ref, self.start - self.padding)
            && (ref_id, pos) < (self.end_ref, self.end + self.padding)
    }
}

/// Shard geometry for a reference dictionary.
///
/// The geometry is a pure function of the header and `(shard_size, padding)`,
/// so every worker derives identical shard bounds and shard indexes without
/// coordination.
#[derive(Debug, Clone)]
pub struct ShardPlan {
    ref_lens: Vec<i64>,
    /// First shard index on each reference.
    base_index: Vec<u64>,
    shard_size: i64,
    padding: i64,
    total: u64,
}

impl ShardPlan {
    /// Plan shards over every reference in the header.
    pub fn new(header: &Header, shard_size: i64, padding: i64) -> Result<Self> {
        if shard_size <= 0 {
            return Err(MarkdupsError::config("shard-size must be positive"));
        }
        if padding < 0 || padding >= shard_size {
            return Err(MarkdupsError::config("padding must be in [0, shard-size)"));
        }

        let ref_lens: Vec<i64> =
            header.reference_sequences().values().map(|m| m.length().get() as i64).collect();

        let mut base_index = Vec::with_capacity(ref_lens.len());
        let mut total = 0u64;
        for len in &ref_lens {
            base_index.push(total);
            total += (*len as u64).div_ceil(shard_size as u64);
        }

        Ok(Self { ref_lens, base_index, shard_size, padding, total })
    }

    /// Total number of planned shards.
    #[must_use]
    pub fn num_shards(&self) -> u64 {
        self.total
    }

    /// Index of the trailing pseudo-shard holding unplaced unmapped records.
    #[must_use]
    pub fn unmapped_index(&self) -> u64 {
        self.total
    }

    /// Reference length for `ref_id`.
    #[must_use]
    pub fn ref_len(&self, ref_id: usize) -> i64 {
        self.ref_lens[ref_id]
    }

    /// Number of references covered by the plan.
    #[must_use]
    pub fn num_refs(&self) -> usize {
        self.ref_lens.len()
    }

    /// The shard owning `(ref_id, pos)`; positions outside `[0, ref_len)` are
    /// clamped onto the reference.
    #[must_use]
    pub fn index_at(&self, ref_id: usize, pos: i64) -> u64 {
        let pos = pos.clamp(0, self.ref_lens[ref_id] - 1);
        self.base_index[ref_id] + (pos / self.shard_size) as u64
    }

    /// Reconstruct the shard descriptor for a shard index.
    #[must_use]
    pub fn shard(&self, index: u64) -> Shard {
        let ref_id = match self.base_index.binary_search(&index) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let start = (index - self.base_index[ref_id]) as i64 * self.shard_size;
        let end = (start + self.shard_size).min(self.ref_lens[ref_id]);
        Shard { start_ref: ref_id, start, end_ref: ref_id, end, padding: self.padding, index }
    }

    /// All shards in planner order.
    #[must_use]
    pub fn shards(&self) -> Vec<Shard> {
        (0..self.total).map(|i| self.shard(i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::coordinate_sorted_header;

    #[test]
    fn test_plan_rejects_bad_config() {
        let header = coordinate_sorted_header(&[("chr1", 100)]);
        assert!(ShardPlan::new(&header, 0, 0).is_err());
        assert!(ShardPlan::new(&header, 100, 100).is_err());
        assert!(ShardPlan::new(&header, 100, -1).is_err());
    }

    #[test]
    fn test_plan_covers_every_reference() {
        let header = coordinate_sorted_header(&[("chr1", 250), ("chr2", 100), ("chr3", 99)]);
        let plan = ShardPlan::new(&header, 100, 10).unwrap();
        let shards = plan.shards();
        // chr1: 3 shards, chr2: 1, chr3: 1
        assert_eq!(shards.len(), 5);
        assert_eq!(shards[2], Shard {
            start_ref: 0,
            start: 200,
            end_ref: 0,
            end: 250,
            padding: 10,
            index: 2
        });
        assert_eq!(shards[4].start_ref, 2);
        assert_eq!(shards[4].end, 99);
        for (i, shard) in shards.iter().enumerate() {
            assert_eq!(shard.index, i as u64);
        }
    }

    #[test]
    fn test_every_coordinate_owned_by_exactly_one_shard() {
        let header = coordinate_sorted_header(&[("chr1", 250), ("chr2", 95)]);
        let plan = ShardPlan::new(&header, 100, 10).unwrap();
        let shards = plan.shards();
        for ref_id in 0..plan.num_refs() {
            for pos in 0..plan.ref_len(ref_id) {
                let owners: Vec<_> =
                    shards.iter().filter(|s| s.owns(ref_id, pos)).map(|s| s.index).collect();
                assert_eq!(owners.len(), 1, "ref {ref_id} pos {pos}");
                assert_eq!(owners[0], plan.index_at(ref_id, pos));
            }
        }
    }

    #[test]
    fn test_index_at_clamps_out_of_range() {
        let header = coordinate_sorted_header(&[("chr1", 250)]);
        let plan = ShardPlan::new(&header, 100, 10).unwrap();
        assert_eq!(plan.index_at(0, -50), 0);
        assert_eq!(plan.index_at(0, 10_000), 2);
    }

    #[test]
    fn test_padded_window() {
        let header = coordinate_sorted_header(&[("chr1", 300)]);
        let plan = ShardPlan::new(&header, 100, 10).unwrap();
        let shard = plan.shard(1); // [100, 200)
        assert!(shard.in_padded_window(0, 90));
        assert!(shard.in_padded_window(0, 209));
        assert!(!shard.in_padded_window(0, 89));
        assert!(!shard.in_padded_window(0, 210));
        assert!(shard.owns(0, 100));
        assert!(!shard.owns(0, 99));
        assert!(!shard.owns(0, 200));
    }
}
