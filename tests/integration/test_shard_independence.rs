//! Shard geometry must not affect marking: pairs spanning shard boundaries
//! resolve through the mate rendezvous and come out flagged exactly as they
//! would in one giant shard.

use markdups_lib::builder::{RecordBuilder, coordinate_sorted_header};
use markdups_lib::opts::Opts;

use crate::helpers::{flags_by_name, pair, run, small_opts};

fn boundary_spanning_records() -> Vec<noodles::sam::alignment::RecordBuf> {
    let mut records = Vec::new();
    // Two duplicate pairs whose mates sit in adjacent shards (width 100).
    records.extend(pair("span1", 0, 95, 0, 115, 30));
    records.extend(pair("span2", 0, 95, 0, 115, 20));
    // Two duplicate pairs whose mates are several shards apart.
    records.extend(pair("far1", 0, 40, 0, 850, 25));
    records.extend(pair("far2", 0, 40, 0, 850, 35));
    // A lone pair and a lone fragment, never duplicates.
    records.extend(pair("lone", 0, 500, 0, 620, 30));
    records.push(RecordBuilder::new().name("frag").ref_id(0).start(710).build());
    records.sort_by_key(|r| r.alignment_start());
    records
}

#[test]
fn test_small_shards_match_single_shard_run() {
    let header = coordinate_sorted_header(&[("chr1", 1000)]);

    let small = Opts { shard_size: 100, padding: 10, ..small_opts() };
    let (out_small, metrics_small) = run(header.clone(), boundary_spanning_records(), &small);

    let big = Opts { shard_size: 10_000, padding: 100, ..small_opts() };
    let (out_big, metrics_big) = run(header, boundary_spanning_records(), &big);

    assert_eq!(flags_by_name(&out_small), flags_by_name(&out_big));
    assert_eq!(out_small.len(), out_big.len());
    assert_eq!(
        metrics_small.library_metrics["unknown"],
        metrics_big.library_metrics["unknown"]
    );
}

#[test]
fn test_cross_shard_pairs_marked_consistently() {
    let header = coordinate_sorted_header(&[("chr1", 1000)]);
    let opts = Opts { shard_size: 100, padding: 10, parallelism: 4, ..small_opts() };
    let (out, metrics) = run(header, boundary_spanning_records(), &opts);

    let flags = flags_by_name(&out);
    // span1/span2 tie on position; span2 has the lower score.
    assert!(!flags["span1"]);
    assert!(flags["span2"]);
    // far2 outscores far1.
    assert!(flags["far1"]);
    assert!(!flags["far2"]);
    assert!(!flags["lone"]);
    assert!(!flags["frag"]);

    let m = &metrics.library_metrics["unknown"];
    assert_eq!(m.read_pairs_examined, 10);
    assert_eq!(m.read_pair_dups, 4);
    assert_eq!(m.unpaired_reads, 1);
    // The 5' span of the far pairs dominates the alignment distance.
    assert!(metrics.max_align_dist >= 800);
}

#[test]
fn test_many_geometries_agree() {
    let header = coordinate_sorted_header(&[("chr1", 1000)]);
    let baseline = {
        let opts = Opts { shard_size: 10_000, padding: 100, ..small_opts() };
        let (out, _) = run(header.clone(), boundary_spanning_records(), &opts);
        flags_by_name(&out)
    };

    for (shard_size, padding) in [(50, 10), (100, 30), (250, 49), (999, 500)] {
        let opts = Opts { shard_size, padding, parallelism: 3, ..small_opts() };
        let (out, _) = run(header.clone(), boundary_spanning_records(), &opts);
        assert_eq!(
            flags_by_name(&out),
            baseline,
            "flags differ for shard_size={shard_size} padding={padding}"
        );
    }
}
