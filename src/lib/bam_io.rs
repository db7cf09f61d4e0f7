//! BAM-backed provider and sink.
//!
//! Input is an indexed, coordinate-sorted BAM; each shard iteration opens its
//! own reader and queries the BAI index for the shard's padded window, so
//! worker threads never share reader state. Output is written through a
//! single BGZF-compressed BAM writer.

use std::fs::File;
use std::path::{Path, PathBuf};

use noodles::bam;
use noodles::bam::bai;
use noodles::core::{Position, Region};
use noodles::sam::Header;
use noodles::sam::alignment::RecordBuf;
use noodles::sam::alignment::io::Write as _;

use crate::errors::{MarkdupsError, Result};
use crate::provider::{Provider, RecordSink};
use crate::record_utils::alignment_start;
use crate::shard::Shard;

/// Indexed BAM record source.
pub struct IndexedBamProvider {
    path: PathBuf,
    index: bai::Index,
    header: Header,
}

impl IndexedBamProvider {
    /// Open a coordinate-sorted BAM and its BAI index.
    pub fn open(bam_path: &Path, index_path: &Path) -> Result<Self> {
        let file = File::open(bam_path)
            .map_err(|e| MarkdupsError::io(format!("opening input BAM {}", bam_path.display()), e))?;
        let mut reader = bam::io::Reader::new(file);
        let header = reader.read_header().map_err(|e| {
            MarkdupsError::io(format!("reading header from {}", bam_path.display()), e)
        })?;

        let index = bai::read(index_path).map_err(|e| {
            MarkdupsError::io(format!("reading BAM index {}", index_path.display()), e)
        })?;

        Ok(Self { path: bam_path.to_path_buf(), index, header })
    }

    fn open_indexed(&self) -> Result<bam::io::IndexedReader<noodles::bgzf::Reader<File>>> {
        let mut reader = bam::io::indexed_reader::Builder::default()
            .set_index(self.index.clone())
            .build_from_path(&self.path)
            .map_err(|e| {
                MarkdupsError::io(format!("opening input BAM {}", self.path.display()), e)
            })?;
        // The header was validated at open; re-read to position the stream.
        reader.read_header().map_err(|e| {
            MarkdupsError::io(format!("reading header from {}", self.path.display()), e)
        })?;
        Ok(reader)
    }

    fn shard_region(&self, shard: &Shard) -> Result<Region> {
        let (name, reference) = self
            .header
            .reference_sequences()
            .get_index(shard.start_ref)
            .ok_or_else(|| MarkdupsError::config(format!("shard on unknown reference {}", shard.start_ref)))?;
        let ref_len = reference.length().get() as i64;

        // Padded window, clamped onto the reference and converted to the
        // 1-based inclusive interval regions use.
        let start = (shard.start - shard.padding).max(0) + 1;
        let end = (shard.end + shard.padding).min(ref_len);
        let start = Position::try_from(start as usize)
            .map_err(|_| MarkdupsError::config(format!("bad shard start {start}")))?;
        let end = Position::try_from(end as usize)
            .map_err(|_| MarkdupsError::config(format!("bad shard end {end}")))?;
        Ok(Region::new(name.clone(), start..=end))
    }
}

impl Provider for IndexedBamProvider {
    fn header(&self) -> &Header {
        &self.header
    }

    fn iter_shard(&self, shard: &Shard) -> Result<Box<dyn Iterator<Item = RecordBuf> + Send + '_>> {
        let region = self.shard_region(shard)?;
        let mut reader = self.open_indexed()?;
        let query = reader
            .query(&self.header, &region)
            .map_err(|e| MarkdupsError::io(format!("querying {region}"), e))?;

        // The index query returns everything overlapping the window; the
        // shard reader contract is records *starting* inside it.
        let mut records = Vec::new();
        for result in query {
            let record =
                result.map_err(|e| MarkdupsError::io(format!("reading record in {region}"), e))?;
            let record = RecordBuf::try_from_alignment_record(&self.header, &record)
                .map_err(|e| MarkdupsError::io(format!("decoding record in {region}"), e))?;
            let (Some(ref_id), Some(start)) =
                (record.reference_sequence_id(), alignment_start(&record))
            else {
                continue;
            };
            if shard.in_padded_window(ref_id, start) {
                records.push(record);
            }
        }
        Ok(Box::new(records.into_iter()))
    }

    fn iter_unplaced_unmapped(&self) -> Result<Box<dyn Iterator<Item = RecordBuf> + Send + '_>> {
        let mut reader = self.open_indexed()?;
        let query = reader
            .query_unmapped()
            .map_err(|e| MarkdupsError::io("querying unplaced records".to_string(), e))?;

        let mut records = Vec::new();
        for result in query {
            let record = result
                .map_err(|e| MarkdupsError::io("reading unplaced record".to_string(), e))?;
            let record = RecordBuf::try_from_alignment_record(&self.header, &record)
                .map_err(|e| MarkdupsError::io("decoding unplaced record".to_string(), e))?;
            records.push(record);
        }
        Ok(Box::new(records.into_iter()))
    }
}

/// BGZF-compressed BAM sink.
pub struct BamSink {
    writer: Option<bam::io::Writer<noodles::bgzf::Writer<File>>>,
    header: Header,
    path: PathBuf,
}

impl BamSink {
    /// Create the output file and write its header.
    pub fn create(path: &Path, header: &Header) -> Result<Self> {
        let file = File::create(path)
            .map_err(|e| MarkdupsError::io(format!("creating output BAM {}", path.display()), e))?;
        let mut writer = bam::io::Writer::new(file);
        writer.write_header(header).map_err(|e| {
            MarkdupsError::io(format!("writing header to {}", path.display()), e)
        })?;
        Ok(Self { writer: Some(writer), header: header.clone(), path: path.to_path_buf() })
    }
}

impl RecordSink for BamSink {
    fn write(&mut self, _shard_index: u64, record: &RecordBuf) -> Result<()> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            MarkdupsError::io(
                format!("writing to closed BAM {}", self.path.display()),
                std::io::Error::other("sink already closed"),
            )
        })?;
        writer.write_alignment_record(&self.header, record).map_err(|e| {
            MarkdupsError::io(format!("writing record to {}", self.path.display()), e)
        })
    }

    fn close(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            let bgzf = writer.into_inner();
            bgzf.finish().map_err(|e| {
                MarkdupsError::io(format!("finalizing output BAM {}", self.path.display()), e)
            })?;
        }
        Ok(())
    }
}
