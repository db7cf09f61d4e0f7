//! Bags: duplicate equivalence classes and primary selection.
//!
//! A bag collects every record (or record pair) sharing a duplicate key, a
//! library, and a UMI class. Exactly one member stays unflagged; the ranking
//! is quality score descending, then read name, then the key's left
//! coordinate, which makes the choice reproducible and identical on every
//! shard that assembles the same bag.

use std::sync::Arc;

use ahash::AHashMap;

use crate::key::DuplicateKey;
use crate::umi::{UmiIndex, cluster_umis};

/// One member of a bag: a fragment or a whole pair.
#[derive(Debug, Clone)]
pub struct BagEntry {
    /// Read name shared by both mates
    pub name: Vec<u8>,
    /// Raw UMI, when tags are in play
    pub umi: Option<String>,
    /// Quality score: both mates summed for a pair
    pub score: i64,
    /// Final tie-break coordinate (the key's left side)
    pub pos: (usize, i64),
    /// Indices into the shard's record vector for the mates this shard owns
    pub owned: Vec<usize>,
    /// Pair-mode entry
    pub is_pair: bool,
}

/// Groups records into bags keyed by duplicate key and library.
#[derive(Debug, Default)]
pub struct Bagger {
    bags: AHashMap<(DuplicateKey, Arc<str>), AHashMap<Vec<u8>, BagEntry>>,
}

/// How UMIs partition bags.
#[derive(Debug, Default)]
pub struct UmiPolicy {
    /// Partition by UMI at all
    pub enabled: bool,
    /// Allowed-list index; `None` clusters raw UMIs instead
    pub index: Option<UmiIndex>,
    /// Hamming radius for clustering raw UMIs (negative means identity)
    pub radius: i64,
}

impl UmiPolicy {
    /// Class id per entry. Entries without a UMI share the empty class.
    fn classes(&self, entries: &[BagEntry]) -> Vec<usize> {
        if !self.enabled {
            return vec![0; entries.len()];
        }
        match &self.index {
            Some(index) => {
                // Snap each UMI onto the allowed list; unresolved UMIs keep
                // their raw value as a class of their own.
                let resolved: Vec<String> = entries
                    .iter()
                    .map(|e| {
                        let raw = e.umi.as_deref().unwrap_or("");
                        index.assign(raw).unwrap_or(raw).to_string()
                    })
                    .collect();
                let mut distinct: Vec<&String> = resolved.iter().collect();
                distinct.sort();
                distinct.dedup();
                resolved
                    .iter()
                    .map(|u| distinct.binary_search(&u).expect("resolved umi present"))
                    .collect()
            }
            None => {
                let raw: Vec<&str> =
                    entries.iter().map(|e| e.umi.as_deref().unwrap_or("")).collect();
                cluster_umis(&raw, self.radius)
            }
        }
    }
}

/// A finished bag with entries in primary-selection order.
#[derive(Debug)]
pub struct Bag {
    /// The shared duplicate key
    pub key: DuplicateKey,
    /// The shared library
    pub library: Arc<str>,
    /// Members; `entries[0]` is the primary
    pub entries: Vec<BagEntry>,
}

impl Bagger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record's membership.
    ///
    /// Mates of a pair arrive separately and merge into one entry by read
    /// name; both carry the same total score, so the merge only accumulates
    /// owned record indices.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &mut self,
        key: DuplicateKey,
        library: Arc<str>,
        name: &[u8],
        umi: Option<String>,
        score: i64,
        owned_index: Option<usize>,
        is_pair: bool,
    ) {
        let entry = self
            .bags
            .entry((key, library))
            .or_default()
            .entry(name.to_vec())
            .or_insert_with(|| BagEntry {
                name: name.to_vec(),
                umi,
                score,
                pos: key.left(),
                owned: Vec::new(),
                is_pair,
            });
        if let Some(index) = owned_index {
            entry.owned.push(index);
        }
    }

    /// Number of distinct `(key, library)` groups, for tests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bags.len()
    }

    /// True when nothing has been bagged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bags.is_empty()
    }

    /// Split by UMI class and order every bag for primary selection.
    #[must_use]
    pub fn into_bags(self, umis: &UmiPolicy) -> Vec<Bag> {
        let mut bags = Vec::new();
        for ((key, library), members) in self.bags {
            let entries: Vec<BagEntry> = members.into_values().collect();
            let classes = umis.classes(&entries);
            let num_classes = classes.iter().copied().max().map_or(1, |m| m + 1);

            let mut partitions: Vec<Vec<BagEntry>> = vec![Vec::new(); num_classes];
            for (entry, class) in entries.into_iter().zip(classes) {
                partitions[class].push(entry);
            }

            for mut entries in partitions {
                if entries.is_empty() {
                    continue;
                }
                entries.sort_by(|a, b| {
                    b.score
                        .cmp(&a.score)
                        .then_with(|| a.name.cmp(&b.name))
                        .then_with(|| a.pos.cmp(&b.pos))
                });
                bags.push(Bag { key, library: Arc::clone(&library), entries });
            }
        }
        bags
    }
}
