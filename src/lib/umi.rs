//! UMI equivalence: Hamming matching against an allowed list, scavenging of
//! sequencing-error UMIs, and within-bag clustering.

use std::fs;
use std::path::Path;

use crate::errors::{MarkdupsError, Result};

/// Hamming distance between two UMIs, or `None` when lengths differ.
#[must_use]
pub fn hamming_distance(a: &[u8], b: &[u8]) -> Option<usize> {
    if a.len() != b.len() {
        return None;
    }
    Some(a.iter().zip(b.iter()).filter(|(x, y)| x != y).count())
}

/// The set of allowed UMIs with optional error scavenging.
#[derive(Debug, Clone)]
pub struct UmiIndex {
    /// Sorted allowed UMIs; sorting makes scavenge tie-breaks lexicographic.
    allowed: Vec<String>,
    scavenge_radius: i64,
}

impl UmiIndex {
    /// Build an index over `allowed`, snapping unknown UMIs within
    /// `scavenge_radius` (-1 disables snapping).
    #[must_use]
    pub fn new(mut allowed: Vec<String>, scavenge_radius: i64) -> Self {
        allowed.sort_unstable();
        allowed.dedup();
        Self { allowed, scavenge_radius }
    }

    /// Load the allowed list from a file with one UMI per line.
    ///
    /// Blank lines and lines starting with `#` are skipped; UMIs are
    /// uppercased.
    pub fn from_file(path: &Path, scavenge_radius: i64) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| MarkdupsError::io(format!("reading umi file {}", path.display()), e))?;
        let allowed: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_uppercase)
            .collect();
        if allowed.is_empty() {
            return Err(MarkdupsError::config(format!(
                "umi file {} contains no UMIs",
                path.display()
            )));
        }
        Ok(Self::new(allowed, scavenge_radius))
    }

    /// Number of allowed UMIs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    /// True when the allowed list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }

    /// Resolve a raw UMI to an allowed UMI.
    ///
    /// Exact matches resolve to themselves. With scavenging enabled, an
    /// unknown UMI resolves to the nearest allowed UMI within the radius; at
    /// equal distance the lexicographically smallest wins. Returns `None`
    /// when the UMI cannot be resolved.
    #[must_use]
    pub fn assign(&self, umi: &str) -> Option<&str> {
        if let Ok(idx) = self.allowed.binary_search_by(|a| a.as_str().cmp(umi)) {
            return Some(self.allowed[idx].as_str());
        }
        if self.scavenge_radius < 0 {
            return None;
        }
        let mut best: Option<(usize, &str)> = None;
        for candidate in &self.allowed {
            if let Some(dist) = hamming_distance(candidate.as_bytes(), umi.as_bytes()) {
                if dist as i64 <= self.scavenge_radius
                    && best.is_none_or(|(best_dist, _)| dist < best_dist)
                {
                    best = Some((dist, candidate));
                }
            }
        }
        best.map(|(_, umi)| umi)
    }
}

/// Partition UMIs into equivalence classes.
///
/// Classes are connected components under "Hamming distance <= radius"
/// (single linkage); a negative radius degenerates to exact identity. The
/// result maps each input to its class id; class ids are assigned so that the
/// class containing the lexicographically smallest UMI has the smallest id,
/// keeping the partition independent of input order.
#[must_use]
pub fn cluster_umis(umis: &[&str], radius: i64) -> Vec<usize> {
    let n = umis.len();
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

    for i in 0..n {
        for j in (i + 1)..n {
            let equivalent = if radius < 0 {
                umis[i] == umis[j]
            } else {
                umis[i] == umis[j]
                    || hamming_distance(umis[i].as_bytes(), umis[j].as_bytes())
                        .is_some_and(|d| d as i64 <= radius)
            };
            if equivalent {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    // Order classes by their smallest member.
    let mut roots: Vec<(usize, &str)> = Vec::new();
    for i in 0..n {
        let root = find(&mut parent, i);
        match roots.iter_mut().find(|(r, _)| *r == root) {
            Some((_, min_umi)) => {
                if umis[i] < *min_umi {
                    *min_umi = umis[i];
                }
            }
            None => roots.push((root, umis[i])),
        }
    }
    roots.sort_by(|a, b| a.1.cmp(b.1));

    (0..n)
        .map(|i| {
            let root = find(&mut parent, i);
            roots.iter().position(|&(r, _)| r == root).expect("root present")
        })
        .collect()
}
