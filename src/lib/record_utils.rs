//! Alignment record helpers: clipping arithmetic, unclipped 5' positions,
//! quality scoring, and library resolution.
//!
//! All genomic coordinates in this crate are 0-based `i64` values. Unclipped
//! positions use raw arithmetic: a reverse-strand read whose soft clip extends
//! past the reference end, or a forward-strand clip before the origin, yields
//! a position outside `[0, ref_len)` and that value is used as-is in keys.

use std::collections::HashMap;
use std::sync::Arc;

use bstr::ByteSlice;
use noodles::sam::Header;
use noodles::sam::alignment::RecordBuf;
use noodles::sam::alignment::record::cigar::op::Kind;
use noodles::sam::alignment::record_buf::data::field::Value as DataValue;
use noodles::sam::header::record::value::map::read_group::tag as rg_tag;

/// Maps read group IDs to library names, built from the header's @RG lines.
pub type LibraryLookup = Arc<HashMap<String, Arc<str>>>;

/// Shared "unknown" library string.
static UNKNOWN_LIBRARY: std::sync::LazyLock<Arc<str>> =
    std::sync::LazyLock::new(|| Arc::from("unknown"));

/// Builds a library lookup table from a SAM header.
///
/// Read groups without an LB field map to "unknown".
#[must_use]
pub fn build_library_lookup(header: &Header) -> LibraryLookup {
    let mut lookup = HashMap::new();
    for (id, rg) in header.read_groups() {
        let library: Arc<str> = rg
            .other_fields()
            .get(&rg_tag::LIBRARY)
            .map_or_else(|| Arc::clone(&UNKNOWN_LIBRARY), |s| Arc::from(s.to_string()));
        lookup.insert(id.to_string(), library);
    }
    Arc::new(lookup)
}

/// Resolves a record's library from its RG tag.
#[must_use]
pub fn library_of(record: &RecordBuf, lookup: &LibraryLookup) -> Arc<str> {
    if let Some(DataValue::String(rg)) = record.data().get(b"RG") {
        if let Ok(rg) = rg.to_str() {
            if let Some(library) = lookup.get(rg) {
                return Arc::clone(library);
            }
        }
    }
    Arc::clone(&UNKNOWN_LIBRARY)
}

/// The record's read name, or an empty slice when absent.
#[must_use]
pub fn read_name(record: &RecordBuf) -> &[u8] {
    record.name().map_or(&[], |n| n.as_ref())
}

/// 0-based alignment start, or `None` for unplaced records.
#[must_use]
pub fn alignment_start(record: &RecordBuf) -> Option<i64> {
    record.alignment_start().map(|p| usize::from(p) as i64 - 1)
}

/// 0-based alignment start of the record's mate.
#[must_use]
pub fn mate_alignment_start(record: &RecordBuf) -> Option<i64> {
    record.mate_alignment_start().map(|p| usize::from(p) as i64 - 1)
}

/// Number of reference bases consumed by the CIGAR.
#[must_use]
pub fn reference_span(record: &RecordBuf) -> i64 {
    record
        .cigar()
        .as_ref()
        .iter()
        .filter(|op| {
            matches!(
                op.kind(),
                Kind::Match
                    | Kind::SequenceMatch
                    | Kind::SequenceMismatch
                    | Kind::Deletion
                    | Kind::Skip
            )
        })
        .map(|op| op.len() as i64)
        .sum()
}

/// 0-based exclusive alignment end.
#[must_use]
pub fn alignment_end(record: &RecordBuf) -> Option<i64> {
    alignment_start(record).map(|start| start + reference_span(record))
}

/// Length of the leading soft clip, ignoring hard clips outside it.
#[must_use]
pub fn leading_soft_clipping(record: &RecordBuf) -> i64 {
    record
        .cigar()
        .as_ref()
        .iter()
        .skip_while(|op| op.kind() == Kind::HardClip)
        .take_while(|op| op.kind() == Kind::SoftClip)
        .map(|op| op.len() as i64)
        .sum()
}

/// Length of the trailing soft clip, ignoring hard clips outside it.
#[must_use]
pub fn trailing_soft_clipping(record: &RecordBuf) -> i64 {
    record
        .cigar()
        .as_ref()
        .iter()
        .rev()
        .skip_while(|op| op.kind() == Kind::HardClip)
        .take_while(|op| op.kind() == Kind::SoftClip)
        .map(|op| op.len() as i64)
        .sum()
}

/// Unclipped 5' position of a read.
///
/// Forward strand: alignment start minus the leading soft clip. Reverse
/// strand: the last aligned position plus the trailing soft clip. Returns
/// `None` for unmapped records.
#[must_use]
pub fn unclipped_five_prime(record: &RecordBuf) -> Option<i64> {
    if record.flags().is_unmapped() {
        return None;
    }
    let start = alignment_start(record)?;
    if record.flags().is_reverse_complemented() {
        Some(start + reference_span(record) - 1 + trailing_soft_clipping(record))
    } else {
        Some(start - leading_soft_clipping(record))
    }
}

/// Sum of base qualities at or above `min_bases`.
///
/// This is the score used to rank bag members for primary selection; bases
/// below the threshold contribute nothing.
#[must_use]
pub fn base_quality_score(record: &RecordBuf, min_bases: u8) -> i64 {
    record
        .quality_scores()
        .as_ref()
        .iter()
        .filter(|&&q| q >= min_bases)
        .map(|&q| i64::from(q))
        .sum()
}

/// True when the header declares `SO:coordinate`.
#[must_use]
pub fn is_coordinate_sorted(header: &Header) -> bool {
    use noodles::sam::header::record::value::map::header::tag::Tag as HeaderTag;

    let HeaderTag::Other(sort_order) = HeaderTag::from([b'S', b'O']) else { unreachable!() };
    header
        .header()
        .and_then(|map| map.other_fields().get(&sort_order))
        .is_some_and(|value| value.as_bytes() == b"coordinate")
}
