//! High-coverage detection and subsampling, end to end.
//!
//! Builds two pileups well above the coverage cap and checks that reads
//! touching them are retained at roughly `cap / depth`, that reads outside
//! them are untouched, and that a read and its mate always agree.

use std::collections::HashMap;

use markdups_lib::builder::coordinate_sorted_header;
use markdups_lib::opts::Opts;

use crate::helpers::{name_of, pair, run, small_opts};

const NUM_PAIRS: usize = 10_000;
const COVERAGE_MAX: u32 = 3_000;

#[test]
fn test_subsample_high_coverage_regions() {
    let header = coordinate_sorted_header(&[("chr1", 10_000), ("chr2", 10_000)]);

    let mut records = Vec::new();
    records.extend(pair("A", 0, 5, 0, 5, 30));
    records.extend(pair("B", 0, 10, 0, 10, 30));
    // C and D pile up ~30,000 deep at chr1:11-14; the D mates add a second,
    // shallower pileup at chr2:100-103 and exercise the cross-reference
    // rendezvous at the same time.
    for i in 0..NUM_PAIRS {
        records.extend(pair(&format!("C{i}"), 0, 11, 0, 11, 30));
        records.extend(pair(&format!("D{i}"), 0, 11, 1, 100, 30));
    }
    records.extend(pair("E", 0, 15, 0, 15, 30));
    records.sort_by_key(|r| (r.reference_sequence_id(), r.alignment_start()));

    let opts = Opts {
        shard_size: 100,
        padding: 10,
        parallelism: 2,
        queue_length: 8,
        coverage_max: COVERAGE_MAX,
        seed: 1233,
        ..small_opts()
    };
    let (out, metrics) = run(header, records, &opts);

    // Both pileups are reported as high-coverage intervals. The reads are 4
    // bases long, so the deep pileup runs from 11 through 14; positions
    // 11-13 also carry the two B reads (depth 30,002) while 14 sits at
    // 30,000, giving a mean of 30,001.5.
    let mut intervals = metrics.high_coverage_intervals.clone();
    intervals.sort_by_key(|i| (i.ref_id, i.start));
    assert_eq!(intervals.len(), 2);
    assert_eq!((intervals[0].ref_id, intervals[0].start, intervals[0].end), (0, 11, 15));
    assert!((intervals[0].mean_coverage - 30_001.5).abs() < 1e-9);
    assert_eq!((intervals[1].ref_id, intervals[1].start, intervals[1].end), (1, 100, 104));
    assert!((intervals[1].mean_coverage - 10_000.0).abs() < 1e-9);

    let mut counts: HashMap<u8, usize> = HashMap::new();
    for record in &out {
        *counts.entry(name_of(record).as_bytes()[0]).or_default() += 1;
    }

    // Reads outside the intervals pass through untouched.
    assert_eq!(counts[&b'A'], 2);
    assert_eq!(counts[&b'B'], 2);
    assert_eq!(counts[&b'E'], 2);

    // Reads in the deep pileup are kept at about cap/depth.
    let expected = 2.0 * NUM_PAIRS as f64 * (f64::from(COVERAGE_MAX) / 30_001.5);
    for family in [b'C', b'D'] {
        let count = counts[&family] as f64;
        assert!(
            count > expected * 0.9 && count < expected * 1.1,
            "family {}: kept {count}, expected about {expected}",
            family as char
        );
    }
}

#[test]
fn test_subsampling_is_pair_consistent() {
    let header = coordinate_sorted_header(&[("chr1", 10_000), ("chr2", 10_000)]);
    let mut records = Vec::new();
    for i in 0..NUM_PAIRS {
        records.extend(pair(&format!("D{i}"), 0, 11, 1, 100, 30));
    }
    records.sort_by_key(|r| (r.reference_sequence_id(), r.alignment_start()));

    let opts = Opts {
        shard_size: 100,
        padding: 10,
        parallelism: 2,
        queue_length: 8,
        coverage_max: 500,
        seed: 99,
        ..small_opts()
    };
    let (out, _) = run(header, records, &opts);

    // Every surviving read's mate also survived.
    let mut seen: HashMap<String, usize> = HashMap::new();
    for record in &out {
        *seen.entry(name_of(record)).or_default() += 1;
    }
    assert!(!seen.is_empty());
    for (name, count) in seen {
        assert_eq!(count, 2, "read {name} lost its mate to subsampling");
    }
}

#[test]
fn test_coverage_disabled_keeps_everything() {
    let header = coordinate_sorted_header(&[("chr1", 10_000)]);
    let mut records = Vec::new();
    for i in 0..500 {
        records.extend(pair(&format!("C{i}"), 0, 11, 0, 11, 30));
    }
    let opts = Opts { shard_size: 100, padding: 10, coverage_max: 0, ..small_opts() };
    let (out, metrics) = run(header, records, &opts);
    assert_eq!(out.len(), 1000);
    assert!(metrics.high_coverage_intervals.is_empty());
}
