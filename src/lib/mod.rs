#![deny(unsafe_code)]
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::items_after_statements,
    clippy::too_many_lines
)]

//! # markdups - parallel sharded duplicate marking
//!
//! This library marks PCR and optical duplicates in coordinate-sorted BAM
//! files. The reference genome is partitioned into shards that are processed
//! by a pool of worker threads; read pairs whose mates fall outside a shard's
//! padded window are resolved through a publish/consume rendezvous between
//! shards, so the flags produced are identical to a single-threaded run.
//!
//! The main entry point is [`engine::MarkDuplicates`], driven by an
//! [`opts::Opts`] configuration and a [`provider::Provider`] record source.
//!
//! ## Module overview
//!
//! - [`shard`] - genome partitioning and shard geometry
//! - [`key`] - duplicate key derivation from unclipped 5' coordinates
//! - [`mates`] - distant-mate tables and the rendezvous registry
//! - [`bags`] - duplicate equivalence classes and primary selection
//! - [`optical`] - flowcell-proximity detection of optical duplicates
//! - [`coverage`] - per-base coverage and high-coverage subsampling
//! - [`metrics`] - per-library counters, histograms, and report writers
//! - [`engine`] - the two-stage parallel orchestrator
//! - [`provider`] - record sources and sinks (BAM-backed and in-memory)

pub mod bags;
pub mod bam_io;
pub mod builder;
pub mod coverage;
pub mod engine;
pub mod errors;
pub mod key;
pub mod library_size;
pub mod logging;
pub mod mates;
pub mod metrics;
pub mod optical;
pub mod opts;
pub mod progress;
pub mod provider;
pub mod record_utils;
pub mod reorder_buffer;
pub mod shard;
pub mod umi;

pub use errors::{MarkdupsError, Result};
