//! End-to-end marking scenarios over the in-memory provider.

use markdups_lib::builder::{RecordBuilder, coordinate_sorted_header, header_with_libraries};
use markdups_lib::metrics::{write_metrics_file, write_optical_histogram};
use markdups_lib::opts::Opts;

use crate::helpers::{flags_by_name, is_dup, name_of, pair, run, small_opts};

#[test]
fn test_two_unpaired_fragments() {
    let header = coordinate_sorted_header(&[("chr1", 1000)]);
    let records = vec![
        RecordBuilder::new().name("A_F").ref_id(0).start(100).build(),
        RecordBuilder::new().name("A_R").ref_id(0).start(100).build(),
    ];
    let (out, metrics) = run(header, records, &small_opts());

    assert_eq!(out.len(), 2);
    assert_eq!(out.iter().filter(|r| is_dup(r)).count(), 1);
    let m = &metrics.library_metrics["unknown"];
    assert_eq!(m.unpaired_reads, 2);
    assert_eq!(m.unpaired_dups, 1);
}

#[test]
fn test_duplicate_pairs_marked_together() {
    let header = coordinate_sorted_header(&[("chr1", 1000)]);
    let mut records = Vec::new();
    records.extend(pair("B", 0, 200, 0, 350, 30));
    records.extend(pair("C", 0, 200, 0, 350, 30));
    records.sort_by_key(|r| r.alignment_start());
    let (out, metrics) = run(header, records, &small_opts());

    assert_eq!(out.len(), 4);
    let flags = flags_by_name(&out);
    // Equal scores, so the lexicographically smaller name is kept.
    assert!(!flags["B"]);
    assert!(flags["C"]);

    let m = &metrics.library_metrics["unknown"];
    assert_eq!(m.read_pairs_examined, 4);
    assert_eq!(m.read_pair_dups, 2);
    assert_eq!(m.unpaired_reads, 0);
}

#[test]
fn test_higher_quality_pair_is_kept() {
    let header = coordinate_sorted_header(&[("chr1", 1000)]);
    let mut records = Vec::new();
    records.extend(pair("B", 0, 200, 0, 350, 20));
    records.extend(pair("C", 0, 200, 0, 350, 35));
    records.sort_by_key(|r| r.alignment_start());
    let (out, _) = run(header, records, &small_opts());

    let flags = flags_by_name(&out);
    assert!(flags["B"]);
    assert!(!flags["C"]);
}

#[test]
fn test_distinct_positions_are_not_duplicates() {
    let header = coordinate_sorted_header(&[("chr1", 1000)]);
    let mut records = Vec::new();
    records.extend(pair("B", 0, 200, 0, 350, 30));
    records.extend(pair("C", 0, 201, 0, 350, 30));
    records.sort_by_key(|r| r.alignment_start());
    let (out, metrics) = run(header, records, &small_opts());

    assert!(out.iter().all(|r| !is_dup(r)));
    assert_eq!(metrics.library_metrics["unknown"].read_pair_dups, 0);
}

#[test]
fn test_soft_clips_shift_the_key() {
    // One read is soft-clipped by 5; its unclipped 5' matches the other's.
    let header = coordinate_sorted_header(&[("chr1", 1000)]);
    let records = vec![
        RecordBuilder::new().name("plain").ref_id(0).start(100).sequence("ACGTACGTA").build(),
        RecordBuilder::new()
            .name("clipped")
            .ref_id(0)
            .start(105)
            .sequence("ACGTACGTA")
            .cigar("5S4M")
            .build(),
    ];
    let (out, _) = run(header, records, &small_opts());
    assert_eq!(out.iter().filter(|r| is_dup(r)).count(), 1);
}

#[test]
fn test_strand_separates_bags() {
    let header = coordinate_sorted_header(&[("chr1", 1000)]);
    // Same unclipped 5'? No: a reverse read's 5' is its end, so these two do
    // not share a key even though they share an alignment start.
    let records = vec![
        RecordBuilder::new().name("fwd").ref_id(0).start(100).build(),
        RecordBuilder::new().name("rev").ref_id(0).start(100).reverse(true).build(),
    ];
    let (out, _) = run(header, records, &small_opts());
    assert!(out.iter().all(|r| !is_dup(r)));
}

#[test]
fn test_libraries_do_not_share_bags() {
    let header = header_with_libraries(&[("rg1", Some("libA")), ("rg2", Some("libB"))]);
    let records = vec![
        RecordBuilder::new().name("a").ref_id(0).start(100).tag("RG", "rg1").build(),
        RecordBuilder::new().name("b").ref_id(0).start(100).tag("RG", "rg2").build(),
    ];
    let opts = Opts { shard_size: 1000, padding: 50, ..small_opts() };
    let (out, metrics) = run(header, records, &opts);

    assert!(out.iter().all(|r| !is_dup(r)));
    assert_eq!(metrics.library_metrics["libA"].unpaired_reads, 1);
    assert_eq!(metrics.library_metrics["libB"].unpaired_reads, 1);
}

#[test]
fn test_umis_partition_and_scavenge() {
    let dir = tempfile::tempdir().unwrap();
    let umi_path = dir.path().join("umis.txt");
    std::fs::write(&umi_path, "AAAA\nCCCC\n").unwrap();

    let header = coordinate_sorted_header(&[("chr1", 1000)]);
    let records = vec![
        RecordBuilder::new().name("a").ref_id(0).start(100).tag("RX", "AAAA").build(),
        // One mismatch away from AAAA: scavenged into the same class.
        RecordBuilder::new().name("b").ref_id(0).start(100).tag("RX", "AAAT").build(),
        RecordBuilder::new().name("c").ref_id(0).start(100).tag("RX", "CCCC").build(),
    ];
    let opts = Opts {
        use_umis: true,
        umi_file: Some(umi_path),
        scavenge_umis: 1,
        ..small_opts()
    };
    let (out, metrics) = run(header, records, &opts);

    // a/b collapse to one bag (one duplicate); c stands alone.
    assert_eq!(out.iter().filter(|r| is_dup(r)).count(), 1);
    assert_eq!(metrics.library_metrics["unknown"].unpaired_dups, 1);
}

#[test]
fn test_optical_duplicates_and_histogram() {
    let header = coordinate_sorted_header(&[("chr1", 1000)]);
    let mut records = Vec::new();
    // Bag one: same tile, 50 pixels apart -> optical.
    records.extend(pair("fc:1:FCA:1:1101:1000:1000", 0, 200, 0, 350, 30));
    records.extend(pair("fc:1:FCA:1:1101:1000:1050", 0, 200, 0, 350, 30));
    // Bag two: same tile, 200 pixels apart -> PCR only.
    records.extend(pair("fc:1:FCA:1:1101:2000:1000", 0, 500, 0, 650, 30));
    records.extend(pair("fc:1:FCA:1:1101:2000:1200", 0, 500, 0, 650, 30));
    records.sort_by_key(|r| r.alignment_start());

    let (out, metrics) = run(header, records, &small_opts());

    // One duplicate pair per bag, but only one of them is optical.
    let m = &metrics.library_metrics["unknown"];
    assert_eq!(m.read_pair_dups, 4);
    assert_eq!(m.read_pair_optical_dups, 2);
    assert_eq!(out.iter().filter(|r| is_dup(r)).count(), 4);

    // Histogram: a single entry for the bag-size-2 bucket at distance 50.
    assert_eq!(metrics.optical_distance[0][50], 1);
    assert_eq!(metrics.optical_distance[0].iter().sum::<u64>(), 1);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hist.txt");
    write_optical_histogram(&path, &metrics).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.lines().any(|l| l == "bagsize-2\t50\t1"));
}

#[test]
fn test_metrics_file_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.txt");

    let header = coordinate_sorted_header(&[("chr1", 1000)]);
    let mut records = vec![
        RecordBuilder::new().name("A_F").ref_id(0).start(100).build(),
        RecordBuilder::new().name("A_R").ref_id(0).start(100).build(),
    ];
    records.push(RecordBuilder::new().name("un").build());
    let (_, metrics) = run(header, records, &small_opts());

    write_metrics_file(&path, &metrics).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("ESTIMATED_LIBRARY_SIZE"));
    // unpaired=2, pairs=0, sec/supp=0, unmapped=1, unpaired dups=1.
    assert!(text.contains("unknown\t2\t0\t0\t1\t1\t0\t0\t50.000000\t0"));
}

#[test]
fn test_idempotent_remarking() {
    let header = coordinate_sorted_header(&[("chr1", 1000)]);
    let mut records = Vec::new();
    records.extend(pair("B", 0, 200, 0, 350, 30));
    records.extend(pair("C", 0, 200, 0, 350, 30));
    records.push(RecordBuilder::new().name("F1").ref_id(0).start(400).build());
    records.push(RecordBuilder::new().name("F2").ref_id(0).start(400).build());
    records.sort_by_key(|r| r.alignment_start());

    let header2 = header.clone();
    let (first, _) = run(header, records, &small_opts());
    let first_flags: Vec<bool> = first.iter().map(is_dup).collect();

    let (second, _) = run(header2, first.clone(), &small_opts());
    let second_flags: Vec<bool> = second.iter().map(is_dup).collect();

    assert_eq!(first.len(), second.len());
    assert_eq!(first_flags, second_flags);
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(name_of(a), name_of(b));
    }
}

#[test]
fn test_output_preserves_input_order() {
    let header = coordinate_sorted_header(&[("chr1", 1000)]);
    let mut records = Vec::new();
    for i in 0..50 {
        records.push(
            RecordBuilder::new().name(&format!("r{i:03}")).ref_id(0).start(i * 7).build(),
        );
    }
    let input_names: Vec<String> = records.iter().map(name_of).collect();
    let (out, _) = run(header, records, &small_opts());
    let output_names: Vec<String> = out.iter().map(name_of).collect();
    assert_eq!(input_names, output_names);
}

#[test]
fn test_exactly_one_primary_per_bag() {
    let header = coordinate_sorted_header(&[("chr1", 1000)]);
    let mut records = Vec::new();
    for i in 0..6 {
        records.push(
            RecordBuilder::new()
                .name(&format!("frag{i}"))
                .ref_id(0)
                .start(100)
                .quals(&[(10 + i) as u8; 4])
                .build(),
        );
    }
    let (out, _) = run(header, records, &small_opts());
    assert_eq!(out.iter().filter(|r| !is_dup(r)).count(), 1);
    assert_eq!(out.iter().filter(|r| is_dup(r)).count(), 5);
}
