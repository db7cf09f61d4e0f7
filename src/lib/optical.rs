//! Optical duplicate detection.
//!
//! Reads that duplicate each other and sit within a few pixels on the same
//! flowcell tile were produced by the sequencer (pad hopping), not by PCR.
//! Within a bag, members on the same flowcell, lane, and tile are connected
//! when their pixel distance is at or under the threshold; every connected
//! component of size `k` contributes `k - 1` optical duplicates.

use bstr::ByteSlice;

/// Flowcell coordinates parsed from an Illumina-style read name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalLocation {
    /// Instrument, run, flowcell, and lane fields joined; members must match
    /// on this before pixel distances mean anything.
    pub group: String,
    /// Tile number
    pub tile: i64,
    /// X pixel coordinate
    pub x: i64,
    /// Y pixel coordinate
    pub y: i64,
}

impl PhysicalLocation {
    /// Squared pixel distance to another location on the same tile.
    #[must_use]
    pub fn squared_distance(&self, other: &Self) -> i64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

/// Parse `...:lane:tile:x:y` from a read name.
///
/// The last three colon-separated fields are tile, x, and y; everything
/// before them identifies the flowcell and lane. Returns `None` when the
/// name has fewer than five fields or the coordinates are not integers, in
/// which case the read is skipped for optical detection.
#[must_use]
pub fn parse_physical_location(name: &[u8]) -> Option<PhysicalLocation> {
    let fields: Vec<&[u8]> = name.split_str(":").collect();
    if fields.len() < 5 {
        return None;
    }
    let n = fields.len();
    let parse = |bytes: &[u8]| -> Option<i64> { bytes.to_str().ok()?.parse().ok() };
    let tile = parse(fields[n - 3])?;
    let x = parse(fields[n - 2])?;
    let y = parse(fields[n - 1])?;
    let group = fields[..n - 3].join(&b':');
    Some(PhysicalLocation { group: String::from_utf8_lossy(&group).into_owned(), tile, x, y })
}

/// The outcome of optical detection over one bag.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct OpticalDuplicates {
    /// Members attributable to optical duplication (sum of `k - 1` over
    /// connected components).
    pub count: u64,
    /// Truncated Euclidean distance for every pair inside a component, in
    /// histogram order.
    pub distances: Vec<i64>,
}

/// Detect optical duplicates among a bag's members.
///
/// `locations` parallels the bag's member list; members without a parsable
/// location are ignored. `max_distance` is the pixel threshold under which
/// two same-tile members are connected.
#[must_use]
pub fn find_optical_duplicates(
    locations: &[Option<PhysicalLocation>],
    max_distance: i64,
) -> OpticalDuplicates {
    let members: Vec<(usize, &PhysicalLocation)> =
        locations.iter().enumerate().filter_map(|(i, l)| l.as_ref().map(|l| (i, l))).collect();
    if members.len() < 2 {
        return OpticalDuplicates::default();
    }

    let n = members.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], i: usize) -> usize {
        let p = parent[i];
        if p == i {
            return i;
        }
        let root = find(parent, p);
        parent[i] = root;
        root
    }

    let threshold = max_distance * max_distance;
    for i in 0..n {
        for j in (i + 1)..n {
            let (a, b) = (members[i].1, members[j].1);
            if a.group == b.group && a.tile == b.tile && a.squared_distance(b) <= threshold {
                let (ra, rb) = (find(&mut parent, i), find(&mut parent, j));
                if ra != rb {
                    parent[rb] = ra;
                }
            }
        }
    }

    let mut result = OpticalDuplicates::default();
    let mut component_sizes = vec![0u64; n];
    for i in 0..n {
        let root = find(&mut parent, i);
        component_sizes[root] += 1;
    }
    for &size in &component_sizes {
        if size > 1 {
            result.count += size - 1;
        }
    }
    for i in 0..n {
        for j in (i + 1)..n {
            if find(&mut parent, i) == find(&mut parent, j) {
                let distance =
                    (members[i].1.squared_distance(members[j].1) as f64).sqrt() as i64;
                result.distances.push(distance);
            }
        }
    }
    result
}
