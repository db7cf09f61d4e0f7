//! Per-base coverage accounting and high-coverage subsampling.
//!
//! When `coverage_max` is set the engine runs two passes: pass 1 counts
//! per-base depth for the positions each shard owns, pass 2 subsamples reads
//! that touch intervals whose depth exceeds the cap. The keep/drop decision
//! hashes the read name with the run seed, so a read and its mate always
//! agree without coordination.

use std::io::Cursor;

use ahash::AHashMap;
use noodles::sam::alignment::RecordBuf;
use noodles::sam::alignment::record::cigar::op::Kind;

use crate::record_utils::{alignment_start, mate_alignment_start};
use crate::shard::{Shard, ShardPlan};

/// A maximal run of positions whose depth exceeds the configured cap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverageInterval {
    /// Reference index
    pub ref_id: usize,
    /// 0-based inclusive start
    pub start: i64,
    /// 0-based exclusive end
    pub end: i64,
    /// Mean depth across the interval
    pub mean_coverage: f64,
}

/// Shard-local per-base depth counters.
///
/// Arrays are allocated per reference on first touch and sized to the full
/// reference, so merging shard results never reindexes. Only positions the
/// shard owns are counted; a record overlapping a boundary contributes its
/// out-of-shard bases to the neighbor.
#[derive(Debug, Default)]
pub struct CoverageCounts {
    counts: AHashMap<usize, Vec<u32>>,
}

impl CoverageCounts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count the reference bases of `record` that fall inside `shard`.
    ///
    /// Unmapped records contribute nothing.
    pub fn process(&mut self, shard: &Shard, plan: &ShardPlan, record: &RecordBuf) {
        if record.flags().is_unmapped() {
            return;
        }
        let (Some(ref_id), Some(start)) = (record.reference_sequence_id(), alignment_start(record))
        else {
            return;
        };
        let ref_len = plan.ref_len(ref_id);
        let counts = self.counts.entry(ref_id).or_insert_with(|| vec![0; ref_len as usize]);

        let mut pos = start;
        for op in record.cigar().as_ref().iter() {
            let consumes_reference = matches!(
                op.kind(),
                Kind::Match
                    | Kind::SequenceMatch
                    | Kind::SequenceMismatch
                    | Kind::Deletion
                    | Kind::Skip
            );
            if !consumes_reference {
                continue;
            }
            for p in pos..pos + op.len() as i64 {
                if p >= 0 && p < ref_len && shard.owns(ref_id, p) {
                    counts[p as usize] += 1;
                }
            }
            pos += op.len() as i64;
        }
    }

    /// Add these counters into a run-wide accumulator.
    pub fn merge_into(&self, global: &mut AHashMap<usize, Vec<u32>>) {
        for (&ref_id, local) in &self.counts {
            let target = global.entry(ref_id).or_insert_with(|| vec![0; local.len()]);
            for (cell, value) in target.iter_mut().zip(local.iter()) {
                *cell += value;
            }
        }
    }

    /// Depth at a position, for tests.
    #[must_use]
    pub fn depth(&self, ref_id: usize, pos: i64) -> u32 {
        self.counts.get(&ref_id).map_or(0, |v| v[pos as usize])
    }
}

/// Extract every maximal interval whose depth exceeds `max_coverage`.
///
/// Output is sorted by reference and position.
#[must_use]
pub fn high_coverage_intervals(
    coverage: &AHashMap<usize, Vec<u32>>,
    max_coverage: u32,
) -> Vec<CoverageInterval> {
    let mut intervals = Vec::new();
    let mut ref_ids: Vec<usize> = coverage.keys().copied().collect();
    ref_ids.sort_unstable();

    for ref_id in ref_ids {
        let depths = &coverage[&ref_id];
        let mut start = 0usize;
        let mut total = 0u64;
        for pos in 0..depths.len() {
            if depths[pos] > max_coverage {
                if pos == 0 || depths[pos - 1] <= max_coverage {
                    start = pos;
                    total = 0;
                }
                total += u64::from(depths[pos]);
                if pos == depths.len() - 1 {
                    let end = pos + 1;
                    intervals.push(CoverageInterval {
                        ref_id,
                        start: start as i64,
                        end: end as i64,
                        mean_coverage: total as f64 / (end - start) as f64,
                    });
                }
            } else if pos > 0 && depths[pos - 1] > max_coverage {
                intervals.push(CoverageInterval {
                    ref_id,
                    start: start as i64,
                    end: pos as i64,
                    mean_coverage: total as f64 / (pos - start) as f64,
                });
            }
        }
    }
    intervals
}

/// High-coverage intervals arranged for fast intersection checks.
#[derive(Debug, Default)]
pub struct CoverageMap {
    per_ref: AHashMap<usize, Vec<CoverageInterval>>,
}

impl CoverageMap {
    /// Index intervals by reference, sorted by start.
    #[must_use]
    pub fn new(intervals: &[CoverageInterval]) -> Self {
        let mut per_ref: AHashMap<usize, Vec<CoverageInterval>> = AHashMap::new();
        for interval in intervals {
            per_ref.entry(interval.ref_id).or_default().push(*interval);
        }
        for list in per_ref.values_mut() {
            list.sort_by_key(|i| i.start);
        }
        Self { per_ref }
    }

    /// True when any interval is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.per_ref.is_empty()
    }

    /// Largest mean coverage among intervals overlapping `[start, end)`.
    ///
    /// An empty range is treated as the point `[start, start + 1)`.
    #[must_use]
    pub fn max_mean_overlapping(&self, ref_id: usize, start: i64, end: i64) -> Option<f64> {
        let end = end.max(start + 1);
        let list = self.per_ref.get(&ref_id)?;
        let from = list.partition_point(|i| i.end <= start);
        let mut best: Option<f64> = None;
        for interval in &list[from..] {
            if interval.start >= end {
                break;
            }
            best = Some(best.map_or(interval.mean_coverage, |b: f64| b.max(interval.mean_coverage)));
        }
        best
    }

    /// Largest mean coverage at the record's start or its mate's start, or
    /// `None` when neither lands in a high-coverage interval.
    ///
    /// Both positions are point lookups: a read and its mate evaluate the
    /// same two points, so they always derive the same keep probability.
    #[must_use]
    pub fn record_or_mate_mean(&self, record: &RecordBuf) -> Option<f64> {
        let mut best: Option<f64> = None;

        if !record.flags().is_unmapped() {
            if let (Some(ref_id), Some(start)) =
                (record.reference_sequence_id(), alignment_start(record))
            {
                if let Some(mean) = self.max_mean_overlapping(ref_id, start, start + 1) {
                    best = Some(mean);
                }
            }
        }

        if record.flags().is_segmented() && !record.flags().is_mate_unmapped() {
            if let (Some(mate_ref), Some(mate_start)) =
                (record.mate_reference_sequence_id(), mate_alignment_start(record))
            {
                if let Some(mean) = self.max_mean_overlapping(mate_ref, mate_start, mate_start + 1)
                {
                    best = Some(best.map_or(mean, |b: f64| b.max(mean)));
                }
            }
        }

        best
    }
}

/// Deterministic subsampling decision for a read name.
///
/// Hashes `(seed, name)` onto `[0, 1)` and keeps the read when the value
/// falls under `keep_fraction`. Both mates share the name and therefore the
/// decision.
#[must_use]
pub fn subsample_keep(seed: u32, name: &[u8], keep_fraction: f64) -> bool {
    let hash = murmur3::murmur3_32(&mut Cursor::new(name), seed).unwrap_or_default();
    (f64::from(hash) / f64::from(u32::MAX)) < keep_fraction
}
