//! Classifying a snapshot against the stored history.

use std::collections::HashSet;
use crate::api::roa::{RoaSnapshot, RoaTuple};


//------------ SnapshotDiff --------------------------------------------------

/// A snapshot split into ROAs already known and ROAs seen for the first
/// time.
///
/// Each tuple appears at most once in the diff even if the snapshot
/// contains it several times. The number of such repetitions is kept in
/// [`duplicates`][Self::duplicates].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SnapshotDiff {
    /// Tuples already present in the store.
    known: Vec<RoaTuple>,

    /// Tuples not yet present in the store.
    unknown: Vec<RoaTuple>,

    /// The number of entries in the snapshot.
    fetched: usize,

    /// The number of entries dropped as repetitions.
    duplicates: usize,
}

impl SnapshotDiff {
    /// Classifies all entries of a snapshot.
    ///
    /// The set `stored` contains the tuples of all ROAs in the store. Each
    /// entry is normalized and then classified with a single lookup, so
    /// the result for a tuple doesn’t depend on the order of the entries.
    pub fn classify(
        snapshot: &RoaSnapshot, stored: &HashSet<RoaTuple>
    ) -> Self {
        let mut seen = HashSet::with_capacity(snapshot.len());
        let mut res = SnapshotDiff {
            fetched: snapshot.len(),
            .. Default::default()
        };

        for roa in &snapshot.roas {
            let tuple = roa.normalize();
            if seen.contains(&tuple) {
                res.duplicates += 1;
                continue
            }
            seen.insert(tuple.clone());

            if stored.contains(&tuple) {
                res.known.push(tuple)
            }
            else {
                res.unknown.push(tuple)
            }
        }
        res
    }

    pub fn known(&self) -> &[RoaTuple] {
        &self.known
    }

    pub fn unknown(&self) -> &[RoaTuple] {
        &self.unknown
    }

    pub fn fetched(&self) -> usize {
        self.fetched
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}


//============ Tests =========================================================
