//! Duplicate keys: the canonical tuple identifying a family of candidate
//! duplicates.
//!
//! Two reads (or read pairs) can only duplicate each other when they share
//! unclipped 5' coordinates and strand orientation, so the key is built from
//! those values. For pairs the lower-sorting side becomes `left`, making the
//! key identical no matter which mate a shard derives it from.

use std::fmt;

use noodles::sam::alignment::RecordBuf;

use crate::record_utils::unclipped_five_prime;

/// Strand orientation of a key: one letter per fragment end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    /// Forward single fragment
    F,
    /// Reverse single fragment
    R,
    /// Forward, forward pair
    FF,
    /// Forward, reverse pair
    FR,
    /// Reverse, forward pair
    RF,
    /// Reverse, reverse pair
    RR,
}

impl Orientation {
    /// True for the single-fragment orientations.
    #[must_use]
    pub fn is_single(self) -> bool {
        matches!(self, Orientation::F | Orientation::R)
    }

    /// Orientation of an unpaired fragment.
    #[must_use]
    pub fn single(reversed: bool) -> Self {
        if reversed { Orientation::R } else { Orientation::F }
    }

    /// Orientation of a pair, left side first.
    #[must_use]
    pub fn pair(left_reversed: bool, right_reversed: bool) -> Self {
        match (left_reversed, right_reversed) {
            (false, false) => Orientation::FF,
            (false, true) => Orientation::FR,
            (true, false) => Orientation::RF,
            (true, true) => Orientation::RR,
        }
    }
}

/// Library strand of the source molecule, derived from duplex-style UMIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Strand {
    /// No strand information
    #[default]
    None,
    /// The mate carrying the lexicographically smaller UMI half
    Top,
    /// The mate carrying the larger UMI half
    Bottom,
}

/// Library strand from a duplex `A-B` UMI; `Strand::None` for everything else.
///
/// Both mates of a template carry the same tag value, so the two shards that
/// see a split pair derive the same strand. Molecules read from opposite
/// strands carry the halves swapped and land on different strands.
#[must_use]
pub fn duplex_strand(umi: &str) -> Strand {
    match umi.split_once('-') {
        Some((a, b)) if a < b => Strand::Top,
        Some((a, b)) if a > b => Strand::Bottom,
        _ => Strand::None,
    }
}

/// One end of a key: where an unclipped 5' tip lands and on which strand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySide {
    /// Reference index
    pub ref_id: usize,
    /// Unclipped 5' position (raw arithmetic, may be negative)
    pub pos: i64,
    /// Reverse strand
    pub reversed: bool,
}

impl KeySide {
    /// Extract the side for a mapped record.
    #[must_use]
    pub fn from_record(record: &RecordBuf) -> Option<Self> {
        let ref_id = record.reference_sequence_id()?;
        let pos = unclipped_five_prime(record)?;
        Some(Self { ref_id, pos, reversed: record.flags().is_reverse_complemented() })
    }

    fn sort_key(&self) -> (i64, usize, bool) {
        (self.pos, self.ref_id, self.reversed)
    }
}

/// Unset reference sentinel for the right side of single-fragment keys.
const UNSET: i32 = -1;

/// The canonical identity of a duplicate family.
///
/// For pairs both sides are populated with the lower-sorting 5' position on
/// the left; single fragments populate only the left side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DuplicateKey {
    left_ref: i32,
    left_pos: i64,
    right_ref: i32,
    right_pos: i64,
    /// Strand orientation of the fragment ends
    pub orientation: Orientation,
    /// Library strand
    pub strand: Strand,
}

impl DuplicateKey {
    /// Key for an unpaired fragment or half-mapped pair.
    #[must_use]
    pub fn single(side: KeySide, strand: Strand) -> Self {
        Self {
            left_ref: side.ref_id as i32,
            left_pos: side.pos,
            right_ref: UNSET,
            right_pos: UNSET as i64,
            orientation: Orientation::single(side.reversed),
            strand,
        }
    }

    /// Key for a fully mapped pair.
    ///
    /// The side with the lower `(pos, ref, strand)` tuple becomes `left`, so
    /// both mates derive the same key.
    #[must_use]
    pub fn pair(a: KeySide, b: KeySide, strand: Strand) -> Self {
        let (left, right) = if a.sort_key() <= b.sort_key() { (a, b) } else { (b, a) };
        Self {
            left_ref: left.ref_id as i32,
            left_pos: left.pos,
            right_ref: right.ref_id as i32,
            right_pos: right.pos,
            orientation: Orientation::pair(left.reversed, right.reversed),
            strand,
        }
    }

    /// True for single-fragment keys.
    #[must_use]
    pub fn is_single(&self) -> bool {
        self.orientation.is_single()
    }

    /// The left coordinate, used for bag ownership and tie-breaking.
    #[must_use]
    pub fn left(&self) -> (usize, i64) {
        (self.left_ref as usize, self.left_pos)
    }
}

impl fmt::Display for DuplicateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({},{},{},{},{:?},{:?})",
            self.left_ref, self.left_pos, self.right_ref, self.right_pos, self.orientation,
            self.strand
        )
    }
}
