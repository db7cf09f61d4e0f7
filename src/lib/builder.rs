//! Builders for alignment records and headers used throughout the test suite.
//!
//! `RecordBuilder` takes 0-based coordinates, matching the rest of the crate,
//! and converts to the 1-based positions records carry internally.

use bstr::BString;
use noodles::core::Position;
use noodles::sam::Header;
use noodles::sam::alignment::RecordBuf;
use noodles::sam::alignment::record::Flags;
use noodles::sam::alignment::record::cigar::Op;
use noodles::sam::alignment::record::cigar::op::Kind;
use noodles::sam::alignment::record::data::field::Tag;
use noodles::sam::alignment::record_buf::data::field::Value as BufValue;
use noodles::sam::alignment::record_buf::{QualityScores, Sequence};
use noodles::sam::header::record::value::Map;
use noodles::sam::header::record::value::map::read_group::tag as rg_tag;
use noodles::sam::header::record::value::map::{
    Header as HeaderRecord, Map as HeaderRecordMap, ReadGroup, ReferenceSequence,
};
use std::num::NonZeroUsize;

/// Default base quality for generated records.
pub const DEFAULT_BASE_QUALITY: u8 = 30;

/// Fluent builder for a single alignment record.
#[derive(Debug, Default)]
pub struct RecordBuilder {
    name: Option<String>,
    sequence: Option<String>,
    quals: Option<Vec<u8>>,
    ref_id: usize,
    start: Option<i64>,
    cigar: Option<String>,
    reverse: bool,
    paired: bool,
    first_of_pair: bool,
    mate: Option<(usize, i64, bool)>,
    mate_unmapped: bool,
    secondary: bool,
    supplementary: bool,
    duplicate: bool,
    attrs: Vec<(String, BufValue)>,
}

impl RecordBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { first_of_pair: true, ..Self::default() }
    }

    /// Sets the read name.
    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Sets the bases.
    #[must_use]
    pub fn sequence(mut self, sequence: &str) -> Self {
        self.sequence = Some(sequence.to_string());
        self
    }

    /// Sets the quality scores.
    #[must_use]
    pub fn quals(mut self, quals: &[u8]) -> Self {
        self.quals = Some(quals.to_vec());
        self
    }

    /// Sets the reference sequence index.
    #[must_use]
    pub fn ref_id(mut self, ref_id: usize) -> Self {
        self.ref_id = ref_id;
        self
    }

    /// Sets the 0-based alignment start. If never set, the read is unmapped.
    #[must_use]
    pub fn start(mut self, start: i64) -> Self {
        self.start = Some(start);
        self
    }

    /// Sets the CIGAR string.
    #[must_use]
    pub fn cigar(mut self, cigar: &str) -> Self {
        self.cigar = Some(cigar.to_string());
        self
    }

    /// Places the read on the reverse strand.
    #[must_use]
    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    /// Marks the read as paired without mate coordinates.
    #[must_use]
    pub fn paired(mut self) -> Self {
        self.paired = true;
        self
    }

    /// Selects the segment (true for R1, false for R2); implies paired.
    #[must_use]
    pub fn first_of_pair(mut self, first: bool) -> Self {
        self.paired = true;
        self.first_of_pair = first;
        self
    }

    /// Sets mate coordinates (0-based) and strand; implies paired.
    #[must_use]
    pub fn mate(mut self, ref_id: usize, start: i64, reverse: bool) -> Self {
        self.paired = true;
        self.mate = Some((ref_id, start, reverse));
        self
    }

    /// Marks the mate as unmapped; implies paired.
    #[must_use]
    pub fn mate_unmapped(mut self) -> Self {
        self.paired = true;
        self.mate_unmapped = true;
        self
    }

    /// Marks the read itself as unmapped.
    #[must_use]
    pub fn unmapped(mut self) -> Self {
        self.start = None;
        self
    }

    /// Marks the read as a secondary alignment.
    #[must_use]
    pub fn secondary(mut self) -> Self {
        self.secondary = true;
        self
    }

    /// Marks the read as a supplementary alignment.
    #[must_use]
    pub fn supplementary(mut self) -> Self {
        self.supplementary = true;
        self
    }

    /// Sets the duplicate flag on input (for idempotence tests).
    #[must_use]
    pub fn duplicate(mut self) -> Self {
        self.duplicate = true;
        self
    }

    /// Adds a data field.
    #[must_use]
    pub fn attr<V: Into<BufValue>>(mut self, tag: &str, value: V) -> Self {
        self.attrs.push((tag.to_string(), value.into()));
        self
    }

    /// Adds a string data field (e.g. RG or RX).
    #[must_use]
    pub fn tag(self, tag: &str, value: &str) -> Self {
        self.attr(tag, BufValue::String(BString::from(value)))
    }

    /// Builds the record.
    #[must_use]
    pub fn build(self) -> RecordBuf {
        let name = self.name.unwrap_or_else(|| "read".to_string());
        let sequence = self.sequence.unwrap_or_else(|| "ACGT".to_string());
        let quals = self.quals.unwrap_or_else(|| vec![DEFAULT_BASE_QUALITY; sequence.len()]);
        let cigar = self.cigar.unwrap_or_else(|| format!("{}M", sequence.len()));

        let mut rec = RecordBuf::default();
        *rec.name_mut() = Some(BString::from(name.as_bytes()));
        *rec.sequence_mut() = Sequence::from(sequence.as_bytes().to_vec());
        *rec.quality_scores_mut() = QualityScores::from(quals);

        let mut flags = Flags::empty();
        if self.start.is_none() {
            flags |= Flags::UNMAPPED;
        }
        if self.reverse {
            flags |= Flags::REVERSE_COMPLEMENTED;
        }
        if self.paired {
            flags |= Flags::SEGMENTED;
            flags |=
                if self.first_of_pair { Flags::FIRST_SEGMENT } else { Flags::LAST_SEGMENT };
        }
        if self.mate_unmapped {
            flags |= Flags::MATE_UNMAPPED;
        }
        if let Some((_, _, true)) = self.mate {
            flags |= Flags::MATE_REVERSE_COMPLEMENTED;
        }
        if self.secondary {
            flags |= Flags::SECONDARY;
        }
        if self.supplementary {
            flags |= Flags::SUPPLEMENTARY;
        }
        if self.duplicate {
            flags |= Flags::DUPLICATE;
        }
        *rec.flags_mut() = flags;

        if let Some(start) = self.start {
            *rec.reference_sequence_id_mut() = Some(self.ref_id);
            *rec.alignment_start_mut() =
                Some(Position::try_from((start + 1) as usize).expect("positive start"));
            *rec.cigar_mut() = parse_cigar(&cigar).into_iter().collect();
        }

        if let Some((mate_ref, mate_start, _)) = self.mate {
            *rec.mate_reference_sequence_id_mut() = Some(mate_ref);
            *rec.mate_alignment_start_mut() =
                Some(Position::try_from((mate_start + 1) as usize).expect("positive mate start"));
        }

        for (tag_str, value) in self.attrs {
            let bytes = tag_str.as_bytes();
            rec.data_mut().insert(Tag::new(bytes[0], bytes[1]), value);
        }

        rec
    }
}

/// Parses a CIGAR string into operations.
///
/// # Panics
///
/// Panics on malformed input; this is test scaffolding.
#[must_use]
pub fn parse_cigar(cigar_str: &str) -> Vec<Op> {
    let mut ops = Vec::new();
    let mut num = String::new();
    for c in cigar_str.chars() {
        if c.is_ascii_digit() {
            num.push(c);
        } else {
            let len: usize = num.parse().expect("invalid CIGAR: expected a number");
            let kind = match c {
                'M' => Kind::Match,
                'I' => Kind::Insertion,
                'D' => Kind::Deletion,
                'N' => Kind::Skip,
                'S' => Kind::SoftClip,
                'H' => Kind::HardClip,
                'P' => Kind::Pad,
                '=' => Kind::SequenceMatch,
                'X' => Kind::SequenceMismatch,
                _ => panic!("unknown CIGAR operation: {c}"),
            };
            ops.push(Op::new(kind, len));
            num.clear();
        }
    }
    ops
}

/// A coordinate-sorted header with the given `(name, length)` references.
#[must_use]
pub fn coordinate_sorted_header(refs: &[(&str, usize)]) -> Header {
    use noodles::sam::header::record::value::map::header::tag::Tag as HeaderTag;

    let HeaderTag::Other(sort_order) = HeaderTag::from([b'S', b'O']) else { unreachable!() };
    let header_map = HeaderRecordMap::<HeaderRecord>::builder()
        .insert(sort_order, "coordinate")
        .build()
        .expect("valid header map");

    let mut builder = Header::builder().set_header(header_map);
    for (name, len) in refs {
        let reference = Map::<ReferenceSequence>::new(
            NonZeroUsize::new(*len).expect("reference length must be non-zero"),
        );
        builder = builder.add_reference_sequence(BString::from(*name), reference);
    }
    builder.build()
}

/// A coordinate-sorted header with one reference and the given read groups.
#[must_use]
pub fn header_with_libraries(read_groups: &[(&str, Option<&str>)]) -> Header {
    use noodles::sam::header::record::value::map::header::tag::Tag as HeaderTag;

    let HeaderTag::Other(sort_order) = HeaderTag::from([b'S', b'O']) else { unreachable!() };
    let header_map = HeaderRecordMap::<HeaderRecord>::builder()
        .insert(sort_order, "coordinate")
        .build()
        .expect("valid header map");

    let reference = Map::<ReferenceSequence>::new(
        NonZeroUsize::new(10_000).expect("reference length must be non-zero"),
    );
    let mut builder = Header::builder()
        .set_header(header_map)
        .add_reference_sequence(BString::from("chr1"), reference);
    for (id, library) in read_groups {
        let rg = match library {
            Some(lb) => Map::<ReadGroup>::builder()
                .insert(rg_tag::LIBRARY, *lb)
                .build()
                .expect("valid read group"),
            None => Map::<ReadGroup>::default(),
        };
        builder = builder.add_read_group(BString::from(*id), rg);
    }
    builder.build()
}
