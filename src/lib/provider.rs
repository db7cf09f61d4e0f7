//! Record sources and sinks.
//!
//! The engine consumes records through the [`Provider`] trait and emits them
//! through [`RecordSink`], so the marking logic never touches container
//! formats directly. The BAM-backed implementations live in
//! [`crate::bam_io`]; the in-memory `FakeProvider`/`VecSink` pair drives the
//! test suite.

use noodles::sam::Header;
use noodles::sam::alignment::RecordBuf;

use crate::errors::Result;
use crate::record_utils::alignment_start;
use crate::shard::Shard;

/// A source of coordinate-sorted records.
pub trait Provider: Sync {
    /// Reference metadata for the input.
    fn header(&self) -> &Header;

    /// Records whose alignment start falls inside `shard`'s padded window,
    /// in input order. Placed unmapped records are yielded at their stored
    /// position; duplicate, secondary, and supplementary records are
    /// included.
    fn iter_shard(&self, shard: &Shard) -> Result<Box<dyn Iterator<Item = RecordBuf> + Send + '_>>;

    /// Unplaced unmapped records, after all mapped shards.
    fn iter_unplaced_unmapped(&self) -> Result<Box<dyn Iterator<Item = RecordBuf> + Send + '_>>;
}

/// A destination for flagged records.
///
/// Implementations may assume `shard_index` never decreases; the engine
/// reorders completed shards before writing.
pub trait RecordSink {
    /// Append one record belonging to `shard_index`.
    fn write(&mut self, shard_index: u64, record: &RecordBuf) -> Result<()>;

    /// Flush and finalize the output.
    fn close(&mut self) -> Result<()>;
}

/// In-memory provider over a pre-built record list.
///
/// Records must already be in coordinate order; the provider filters per
/// shard without re-sorting, mirroring the contract of the indexed reader.
pub struct FakeProvider {
    header: Header,
    records: Vec<RecordBuf>,
}

impl FakeProvider {
    #[must_use]
    pub fn new(header: Header, records: Vec<RecordBuf>) -> Self {
        Self { header, records }
    }
}

impl Provider for FakeProvider {
    fn header(&self) -> &Header {
        &self.header
    }

    fn iter_shard(&self, shard: &Shard) -> Result<Box<dyn Iterator<Item = RecordBuf> + Send + '_>> {
        let shard = *shard;
        Ok(Box::new(self.records.iter().filter_map(move |record| {
            let ref_id = record.reference_sequence_id()?;
            let start = alignment_start(record)?;
            shard.in_padded_window(ref_id, start).then(|| record.clone())
        })))
    }

    fn iter_unplaced_unmapped(&self) -> Result<Box<dyn Iterator<Item = RecordBuf> + Send + '_>> {
        Ok(Box::new(self.records.iter().filter_map(|record| {
            (record.reference_sequence_id().is_none() || record.alignment_start().is_none())
                .then(|| record.clone())
        })))
    }
}

/// Sink collecting records in memory, verifying shard order.
#[derive(Default)]
pub struct VecSink {
    /// Everything written, in emission order
    pub records: Vec<RecordBuf>,
    last_shard: Option<u64>,
}

impl VecSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordSink for VecSink {
    fn write(&mut self, shard_index: u64, record: &RecordBuf) -> Result<()> {
        assert!(
            self.last_shard.is_none_or(|last| last <= shard_index),
            "shard {shard_index} written after {:?}",
            self.last_shard
        );
        self.last_shard = Some(shard_index);
        self.records.push(record.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
