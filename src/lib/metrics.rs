//! Per-library duplication metrics, the optical-distance histogram, and the
//! report writers.
//!
//! Workers accumulate a shard-local `MetricsCollection` and merge it into the
//! run-wide collection when the shard completes; the merge is the only
//! critical section in the metrics path.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ahash::AHashMap;
use log::error;
use noodles::sam::Header;

use crate::coverage::CoverageInterval;
use crate::errors::{MarkdupsError, Result};
use crate::library_size::estimate_library_size;

/// Labels for the four bag-size histogram buckets.
pub const OPTICAL_BUCKETS: [&str; 4] = ["bagsize-2", "bagsize3-4", "bagsize5-7", "bagsize8-"];

/// Counters for one library, mirroring picard's duplication metrics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Metrics {
    /// Mapped reads examined without a mapped mate
    pub unpaired_reads: u64,
    /// Mapped primary reads examined whose mate is also mapped (per read;
    /// halved on output)
    pub read_pairs_examined: u64,
    /// Secondary or supplementary records seen
    pub secondary_supplementary: u64,
    /// Unmapped primary records seen
    pub unmapped_reads: u64,
    /// Unpaired reads marked duplicate
    pub unpaired_dups: u64,
    /// Paired reads marked duplicate (per read; halved on output)
    pub read_pair_dups: u64,
    /// Paired reads attributable to optical duplication (per read; halved on
    /// output)
    pub read_pair_optical_dups: u64,
}

impl Metrics {
    /// Add another library's counters into this one.
    pub fn add(&mut self, other: &Metrics) {
        self.unpaired_reads += other.unpaired_reads;
        self.read_pairs_examined += other.read_pairs_examined;
        self.secondary_supplementary += other.secondary_supplementary;
        self.unmapped_reads += other.unmapped_reads;
        self.unpaired_dups += other.unpaired_dups;
        self.read_pair_dups += other.read_pair_dups;
        self.read_pair_optical_dups += other.read_pair_optical_dups;
    }

    /// Format the library row of the metrics report.
    #[must_use]
    pub fn format_row(&self) -> String {
        let examined = self.unpaired_reads + self.read_pairs_examined;
        let percent_duplication = if examined == 0 {
            0.0
        } else {
            100.0 * (self.unpaired_dups + self.read_pair_dups) as f64 / examined as f64
        };

        let a = self.read_pairs_examined / 2 - self.read_pair_optical_dups / 2;
        let b = self.read_pairs_examined / 2 - self.read_pair_dups / 2;
        let library_size = match estimate_library_size(a, b) {
            Ok(size) => size.to_string(),
            Err(e) => {
                error!("estimating library size from ({a}, {b}): {e}");
                "0".to_string()
            }
        };

        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{:.6}\t{}",
            self.unpaired_reads,
            self.read_pairs_examined / 2,
            self.secondary_supplementary,
            self.unmapped_reads,
            self.unpaired_dups,
            self.read_pair_dups / 2,
            self.read_pair_optical_dups / 2,
            percent_duplication,
            library_size,
        )
    }
}

/// Run-wide metrics: per-library counters, the optical-distance histogram,
/// and high-coverage intervals.
#[derive(Debug, Default)]
pub struct MetricsCollection {
    /// Largest observed distance between the 5' positions of an examined
    /// same-reference pair
    pub max_align_dist: i64,
    /// Histogram: 4 bag-size buckets of per-distance counts
    pub optical_distance: [Vec<u64>; 4],
    /// Counters keyed by library name
    pub library_metrics: AHashMap<String, Metrics>,
    /// High-coverage intervals found during the coverage pass
    pub high_coverage_intervals: Vec<CoverageInterval>,
}

impl MetricsCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The counters for `library`, created on first use.
    pub fn get_mut(&mut self, library: &str) -> &mut Metrics {
        self.library_metrics.entry(library.to_string()).or_default()
    }

    /// Record the 5' distance of an examined pair.
    pub fn note_align_dist(&mut self, distance: i64) {
        self.max_align_dist = self.max_align_dist.max(distance);
    }

    /// Increment the histogram cell for a bag size and pixel distance.
    pub fn add_distance(&mut self, bag_size: usize, distance: i64) {
        let bucket = match bag_size {
            0..=2 => 0,
            3..=4 => 1,
            5..=7 => 2,
            _ => 3,
        };
        let distance = distance.max(0) as usize;
        if self.optical_distance[bucket].len() <= distance {
            self.optical_distance[bucket].resize(distance + 1, 0);
        }
        self.optical_distance[bucket][distance] += 1;
    }

    /// Merge a shard-local collection into this one.
    ///
    /// Counters are summed, histogram buckets are extended to the longer
    /// length and summed element-wise, and intervals are concatenated
    /// (sorting happens on write).
    pub fn merge(&mut self, other: &MetricsCollection) {
        self.max_align_dist = self.max_align_dist.max(other.max_align_dist);
        for (library, metrics) in &other.library_metrics {
            self.get_mut(library).add(metrics);
        }
        self.high_coverage_intervals.extend(other.high_coverage_intervals.iter().copied());
        for (bucket, other_bucket) in
            self.optical_distance.iter_mut().zip(other.optical_distance.iter())
        {
            if bucket.len() < other_bucket.len() {
                bucket.resize(other_bucket.len(), 0);
            }
            for (cell, value) in bucket.iter_mut().zip(other_bucket.iter()) {
                *cell += value;
            }
        }
    }
}

fn create(path: &Path, what: &str) -> Result<BufWriter<File>> {
    let file = File::create(path)
        .map_err(|e| MarkdupsError::io(format!("creating {what} {}", path.display()), e))?;
    Ok(BufWriter::new(file))
}

fn io_err<'a>(
    path: &'a Path,
    what: &'a str,
) -> impl Fn(std::io::Error) -> MarkdupsError + 'a {
    move |e| MarkdupsError::io(format!("writing {what} {}", path.display()), e)
}

/// Write the per-library duplication metrics report.
pub fn write_metrics_file(path: &Path, metrics: &MetricsCollection) -> Result<()> {
    let mut out = create(path, "metrics file")?;
    let err = io_err(path, "metrics file");

    writeln!(out, "# markdups").map_err(&err)?;
    writeln!(out, "# maximum 5' alignment distance: {}", metrics.max_align_dist).map_err(&err)?;
    writeln!(
        out,
        "LIBRARY\tUNPAIRED_READS_EXAMINED\tREAD_PAIRS_EXAMINED\t\
         SECONDARY_OR_SUPPLEMENTARY_RDS\tUNMAPPED_READS\tUNPAIRED_READ_DUPLICATES\t\
         READ_PAIR_DUPLICATES\tREAD_PAIR_OPTICAL_DUPLICATES\tPERCENT_DUPLICATION\t\
         ESTIMATED_LIBRARY_SIZE"
    )
    .map_err(&err)?;

    let mut libraries: Vec<&String> = metrics.library_metrics.keys().collect();
    libraries.sort();
    for library in libraries {
        writeln!(out, "{library}\t{}", metrics.library_metrics[library].format_row())
            .map_err(&err)?;
    }
    out.flush().map_err(&err)?;
    Ok(())
}

/// Write the high-coverage interval report. Positions are written 1-based.
pub fn write_high_coverage_intervals(
    path: &Path,
    header: &Header,
    metrics: &MetricsCollection,
) -> Result<()> {
    let mut out = create(path, "high coverage interval file")?;
    let err = io_err(path, "high coverage interval file");

    let mut intervals = metrics.high_coverage_intervals.clone();
    intervals.sort_by_key(|i| (i.ref_id, i.start, i.end));

    writeln!(out, "start_chr\tstart_chr_start\tend_chr\tend_chr_end\tmean_coverage")
        .map_err(&err)?;
    for interval in &intervals {
        let (name, _) = header
            .reference_sequences()
            .get_index(interval.ref_id)
            .expect("interval on a known reference");
        writeln!(
            out,
            "{name}\t{}\t{name}\t{}\t{:.3}",
            interval.start + 1,
            interval.end + 1,
            interval.mean_coverage,
        )
        .map_err(&err)?;
    }
    out.flush().map_err(&err)?;
    Ok(())
}

/// Write the optical-distance histogram.
pub fn write_optical_histogram(path: &Path, metrics: &MetricsCollection) -> Result<()> {
    let mut out = create(path, "optical histogram file")?;
    let err = io_err(path, "optical histogram file");

    writeln!(out, "#bag_size_range\toptical_dist\tcount").map_err(&err)?;
    for (bucket, label) in metrics.optical_distance.iter().zip(OPTICAL_BUCKETS) {
        for (distance, count) in bucket.iter().enumerate() {
            writeln!(out, "{label}\t{distance}\t{count}").map_err(&err)?;
        }
    }
    out.flush().map_err(&err)?;
    Ok(())
}
