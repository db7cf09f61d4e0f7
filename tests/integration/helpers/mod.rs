//! Shared scaffolding for engine integration tests.

use markdups_lib::builder::RecordBuilder;
use markdups_lib::engine::MarkDuplicates;
use markdups_lib::metrics::MetricsCollection;
use markdups_lib::opts::Opts;
use markdups_lib::provider::{FakeProvider, VecSink};
use noodles::sam::Header;
use noodles::sam::alignment::RecordBuf;

/// Options tuned for small in-memory inputs.
pub fn small_opts() -> Opts {
    Opts {
        bam_file: "in.bam".into(),
        shard_size: 100,
        padding: 10,
        parallelism: 2,
        queue_length: 4,
        ..Opts::default()
    }
}

/// Run the engine over in-memory records and return the output and metrics.
pub fn run(header: Header, records: Vec<RecordBuf>, opts: &Opts) -> (Vec<RecordBuf>, MetricsCollection) {
    let provider = FakeProvider::new(header, records);
    let engine = MarkDuplicates::new(&provider, opts).expect("valid options");
    let mut sink = VecSink::new();
    let metrics = engine.mark(&mut sink).expect("engine run");
    (sink.records, metrics)
}

/// Build both mates of a mapped pair with the given 0-based starts.
///
/// R1 is forward at `start1`, R2 reverse at `start2`, both with 4-base reads
/// and uniform qualities.
pub fn pair(name: &str, ref1: usize, start1: i64, ref2: usize, start2: i64, qual: u8) -> Vec<RecordBuf> {
    let r1 = RecordBuilder::new()
        .name(name)
        .ref_id(ref1)
        .start(start1)
        .quals(&[qual; 4])
        .first_of_pair(true)
        .mate(ref2, start2, true)
        .build();
    let r2 = RecordBuilder::new()
        .name(name)
        .ref_id(ref2)
        .start(start2)
        .reverse(true)
        .quals(&[qual; 4])
        .first_of_pair(false)
        .mate(ref1, start1, false)
        .build();
    vec![r1, r2]
}

pub fn is_dup(record: &RecordBuf) -> bool {
    record.flags().is_duplicate()
}

pub fn name_of(record: &RecordBuf) -> String {
    String::from_utf8_lossy(record.name().map(AsRef::as_ref).unwrap_or_default()).into_owned()
}

/// Duplicate flags keyed by read name (pair mates share the flag when
/// marking is pair-consistent, which `flags_by_name` asserts).
pub fn flags_by_name(records: &[RecordBuf]) -> std::collections::BTreeMap<String, bool> {
    let mut flags = std::collections::BTreeMap::new();
    for record in records {
        if record.flags().is_secondary() || record.flags().is_supplementary() {
            continue;
        }
        let name = name_of(record);
        if let Some(&existing) = flags.get(&name) {
            assert_eq!(
                existing,
                is_dup(record),
                "mates of '{name}' disagree on the duplicate flag"
            );
        }
        flags.insert(name, is_dup(record));
    }
    flags
}
