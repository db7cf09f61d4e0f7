//! The `mark` command: flag PCR and optical duplicates in an indexed,
//! coordinate-sorted BAM.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;

use markdups_lib::bam_io::{BamSink, IndexedBamProvider};
use markdups_lib::engine::MarkDuplicates;
use markdups_lib::metrics::{
    write_high_coverage_intervals, write_metrics_file, write_optical_histogram,
};
use markdups_lib::opts::Opts;
use markdups_lib::provider::Provider;

use crate::commands::command::Command;

/// Mark PCR and optical duplicates.
#[derive(Debug, Parser)]
#[command(
    name = "mark",
    about = "Mark PCR and optical duplicates in a coordinate-sorted BAM",
    long_about = r#"
Marks duplicate reads in a coordinate-sorted, indexed BAM file.

The reference is split into shards processed in parallel; pairs whose mates
land in different shards are resolved through per-shard mate tables, so the
flags are identical to a single-threaded run regardless of shard size. Reads
sharing unclipped 5' coordinates, orientation, and library are grouped, the
highest-quality member of each group is kept, and the rest have the duplicate
flag (0x400) set. Duplicates within the configured pixel distance on the same
flowcell tile are additionally counted as optical.

With --coverage-max, regions whose depth exceeds the cap are detected in a
first pass and reads in them are deterministically subsampled in the second.
"#
)]
pub struct Mark {
    /// Input BAM file (coordinate-sorted)
    #[arg(short = 'i', long = "bam")]
    pub bam: PathBuf,

    /// Input BAI index; defaults to <bam>.bai
    #[arg(long = "index")]
    pub index: Option<PathBuf>,

    /// Output BAM file
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,

    /// Output container format
    #[arg(long = "format", default_value = "bam")]
    pub format: String,

    /// Shard width in bases
    #[arg(long = "shard-size", default_value = "5000000")]
    pub shard_size: i64,

    /// Bases of context visible beyond each shard boundary
    #[arg(long = "padding", default_value = "5000")]
    pub padding: i64,

    /// Worker threads (0 = all cores)
    #[arg(short = 't', long = "parallelism", default_value = "0")]
    pub parallelism: usize,

    /// Bound on the shard work queue
    #[arg(long = "queue-length", default_value = "64")]
    pub queue_length: usize,

    /// Path to write per-library duplication metrics
    #[arg(short = 'm', long = "metrics")]
    pub metrics: Option<PathBuf>,

    /// Path to write high-coverage intervals
    #[arg(long = "high-cov-intervals")]
    pub high_cov_intervals: Option<PathBuf>,

    /// Path to write the optical-distance histogram
    #[arg(long = "optical-histogram")]
    pub optical_histogram: Option<PathBuf>,

    /// Pixel distance at or under which same-tile duplicates are optical
    #[arg(long = "optical-distance", default_value = "100")]
    pub optical_distance: i64,

    /// Partition duplicate groups by UMI
    #[arg(long = "use-umis", default_value = "false")]
    pub use_umis: bool,

    /// File of allowed UMIs, one per line
    #[arg(long = "umi-file")]
    pub umi_file: Option<PathBuf>,

    /// Hamming radius for snapping unlisted UMIs to the allowed list (-1 disables)
    #[arg(long = "scavenge-umis", default_value = "-1", allow_hyphen_values = true)]
    pub scavenge_umis: i64,

    /// Per-base depth above which reads are subsampled (0 disables)
    #[arg(long = "coverage-max", default_value = "0")]
    pub coverage_max: u32,

    /// Base qualities below this value do not count toward read scores
    #[arg(long = "min-bases", default_value = "15")]
    pub min_bases: u8,

    /// Preserve auxiliary data fields on output records
    #[arg(long = "emit-unmodified-fields", default_value = "true")]
    pub emit_unmodified_fields: bool,

    /// Seed for the deterministic subsampling hash
    #[arg(long = "seed", default_value = "0")]
    pub seed: u32,
}

impl Mark {
    fn to_opts(&self) -> Opts {
        Opts {
            bam_file: self.bam.clone(),
            index_file: self.index.clone().unwrap_or_default(),
            shard_size: self.shard_size,
            padding: self.padding,
            parallelism: self.parallelism,
            queue_length: self.queue_length,
            format: self.format.clone(),
            output_path: self.output.clone(),
            metrics_file: self.metrics.clone(),
            high_coverage_interval_file: self.high_cov_intervals.clone(),
            optical_histogram: self.optical_histogram.clone(),
            optical_distance: self.optical_distance,
            use_umis: self.use_umis,
            umi_file: self.umi_file.clone(),
            scavenge_umis: self.scavenge_umis,
            coverage_max: self.coverage_max,
            min_bases: self.min_bases,
            emit_unmodified_fields: self.emit_unmodified_fields,
            seed: self.seed,
        }
    }
}

impl Command for Mark {
    fn execute(&self) -> Result<()> {
        let mut opts = self.to_opts();
        opts.validate()?;

        info!("Input: {}", opts.bam_file.display());
        info!("Index: {}", opts.index_file.display());
        info!("Output: {}", opts.output_path.display());
        info!("Workers: {}", opts.effective_parallelism());

        let provider = IndexedBamProvider::open(&opts.bam_file, &opts.index_file)?;
        let mut sink = BamSink::create(&opts.output_path, provider.header())?;

        let engine = MarkDuplicates::new(&provider, &opts)?;
        let metrics = engine.mark(&mut sink)?;

        if let Some(path) = &opts.metrics_file {
            write_metrics_file(path, &metrics)?;
            info!("Wrote metrics to {}", path.display());
        }
        if let Some(path) = &opts.high_coverage_interval_file {
            write_high_coverage_intervals(path, provider.header(), &metrics)?;
            info!("Wrote high-coverage intervals to {}", path.display());
        }
        if let Some(path) = &opts.optical_histogram {
            write_optical_histogram(path, &metrics)?;
            info!("Wrote optical histogram to {}", path.display());
        }

        for (library, m) in &metrics.library_metrics {
            info!(
                "{library}: {} pairs examined, {} pair duplicates ({} optical), \
                 {} unpaired duplicates",
                m.read_pairs_examined / 2,
                m.read_pair_dups / 2,
                m.read_pair_optical_dups / 2,
                m.unpaired_dups
            );
        }

        Ok(())
    }
}
