//! Engine configuration.

use std::path::PathBuf;

use crate::errors::{MarkdupsError, Result};

/// Output container formats supported by the record sink.
pub const SUPPORTED_FORMATS: &[&str] = &["bam"];

/// Configuration for a duplicate-marking run.
///
/// `validate()` applies every configuration rule before any shard is
/// scheduled; an engine run with an invalid `Opts` never touches the input.
#[derive(Debug, Clone)]
pub struct Opts {
    /// Input BAM path
    pub bam_file: PathBuf,
    /// Input BAI path; empty means `<bam_file>.bai`
    pub index_file: PathBuf,
    /// Shard width in bases
    pub shard_size: i64,
    /// Bases of context visible beyond each shard boundary
    pub padding: i64,
    /// Worker thread count (0 means all available cores)
    pub parallelism: usize,
    /// Bound on the shard work queue
    pub queue_length: usize,
    /// Output container format
    pub format: String,
    /// Output path for the flagged records
    pub output_path: PathBuf,
    /// Optional duplication metrics report path
    pub metrics_file: Option<PathBuf>,
    /// Optional high-coverage interval report path
    pub high_coverage_interval_file: Option<PathBuf>,
    /// Optional optical-distance histogram path
    pub optical_histogram: Option<PathBuf>,
    /// Euclidean pixel distance at or under which same-tile reads are optical
    pub optical_distance: i64,
    /// Partition bags by UMI
    pub use_umis: bool,
    /// Optional list of allowed UMIs, one per line
    pub umi_file: Option<PathBuf>,
    /// Hamming radius for snapping unlisted UMIs to the allowed list; -1 disables
    pub scavenge_umis: i64,
    /// Per-base depth above which reads are subsampled; 0 disables
    pub coverage_max: u32,
    /// Base qualities below this value do not count toward a read's score
    pub min_bases: u8,
    /// Preserve auxiliary data fields on emitted records
    pub emit_unmodified_fields: bool,
    /// Seed for the deterministic subsampling hash
    pub seed: u32,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            bam_file: PathBuf::new(),
            index_file: PathBuf::new(),
            shard_size: 5_000_000,
            padding: 5_000,
            parallelism: 0,
            queue_length: 64,
            format: "bam".to_string(),
            output_path: PathBuf::new(),
            metrics_file: None,
            high_coverage_interval_file: None,
            optical_histogram: None,
            optical_distance: 100,
            use_umis: false,
            umi_file: None,
            scavenge_umis: -1,
            coverage_max: 0,
            min_bases: 15,
            emit_unmodified_fields: true,
            seed: 0,
        }
    }
}

impl Opts {
    /// Check every option rule and fill in defaulted values.
    ///
    /// Defaults `index_file` to `<bam_file>.bai` when unset.
    pub fn validate(&mut self) -> Result<()> {
        if self.shard_size <= 0 {
            return Err(MarkdupsError::config("shard-size must be positive"));
        }
        if self.padding < 0 {
            return Err(MarkdupsError::config("padding must be non-negative"));
        }
        if self.padding >= self.shard_size {
            return Err(MarkdupsError::config("padding must be less than shard-size"));
        }
        if self.min_bases == 0 {
            return Err(MarkdupsError::config("min-bases must be positive"));
        }
        if self.index_file.as_os_str().is_empty() && !self.bam_file.as_os_str().is_empty() {
            let mut index = self.bam_file.clone().into_os_string();
            index.push(".bai");
            self.index_file = PathBuf::from(index);
        }
        if self.umi_file.is_some() && !self.use_umis {
            return Err(MarkdupsError::config("umi-file is set, but use-umis is false"));
        }
        if self.scavenge_umis > -1 && !self.use_umis {
            return Err(MarkdupsError::config("scavenge-umis is set, but use-umis is false"));
        }
        if self.scavenge_umis > -1 && self.umi_file.is_none() {
            return Err(MarkdupsError::config("scavenge-umis is set, but umi-file is empty"));
        }
        if !SUPPORTED_FORMATS.contains(&self.format.as_str()) {
            return Err(MarkdupsError::config(format!("unknown output format {}", self.format)));
        }
        Ok(())
    }

    /// Worker count after resolving 0 to the machine's parallelism.
    #[must_use]
    pub fn effective_parallelism(&self) -> usize {
        if self.parallelism > 0 {
            self.parallelism
        } else {
            std::thread::available_parallelism().map_or(1, std::num::NonZero::get)
        }
    }
}
