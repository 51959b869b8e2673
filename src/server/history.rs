//! The persistent ROA history.

use std::collections::HashSet;
use std::str::FromStr;
use log::{debug, trace};
use url::Url;
use crate::api::roa::{RoaHistory, RoaHistoryInfo, RoaQuery, RoaTuple};
use crate::api::status::RunMarker;
use crate::commons::error::Error;
use crate::commons::storage::{
    Ident, KeyValueError, KeyValueStore, Transaction,
};
use crate::constants::{LAST_RUN_KEY, ROA_HISTORY_NS, ROAS_SCOPE};
use super::diff::SnapshotDiff;
use super::gate::RunGate;

const JSON_EXTENSION: &Ident = Ident::make("json");


//------------ RoaHistoryStore -----------------------------------------------

/// The store keeping the observation history of all ROAs.
///
/// # Key-value store usage
///
/// The store uses its own namespace `"roa_history"`. Each ROA is kept in
/// the scope `"roas"` under a key derived from its tuple: the ASN, trust
/// anchor, prefix, mask, and max length, converted via
/// [`IdentBuilder::push_converted_str`][crate::commons::storage::IdentBuilder::push_converted_str]
/// and followed by `.json`. Because the conversion can be reversed, the
/// set of known tuples can be rebuilt from the keys alone. The marker of
/// the last run is kept in the global scope under `last_run.json`.
#[derive(Debug)]
pub struct RoaHistoryStore {
    store: KeyValueStore,
}

impl RoaHistoryStore {
    /// Opens the history in the store with the given storage URI.
    pub fn create(storage_uri: &Url) -> Result<Self, Error> {
        Ok(RoaHistoryStore {
            store: KeyValueStore::create(storage_uri, ROA_HISTORY_NS)?,
        })
    }

    pub fn storage_uri(&self) -> &Url {
        self.store.storage_uri()
    }

    /// Returns the key for the given tuple.
    pub fn tuple_key(tuple: &RoaTuple) -> Box<Ident> {
        Ident::builder(&tuple.asn)
            .push_converted_str(&tuple.ta)
            .push_converted_str(&tuple.prefix)
            .push_converted_str(&tuple.mask.to_string())
            .push_converted_str(&tuple.max_length.to_string())
            .finish_with_extension(JSON_EXTENSION)
    }

    /// Returns the tuple for the given key.
    ///
    /// Returns `None` if the key wasn’t created by
    /// [`tuple_key`][Self::tuple_key].
    pub fn tuple_from_key(key: &Ident) -> Option<RoaTuple> {
        let parts = key.split_converted_with_extension(JSON_EXTENSION)?;
        let [asn, ta, prefix, mask, max_length] =
            <[String; 5]>::try_from(parts).ok()?;
        Some(RoaTuple {
            asn,
            ta,
            prefix,
            mask: u8::from_str(&mask).ok()?,
            max_length: u8::from_str(&max_length).ok()?,
        })
    }

    /// Returns the tuple for a key found in the ROA scope.
    fn stored_tuple(key: &Ident) -> Result<RoaTuple, Error> {
        Self::tuple_from_key(key).ok_or_else(|| {
            KeyValueError::deserialize(
                Some(ROAS_SCOPE), key, "key does not describe a ROA"
            ).into()
        })
    }
}

/// # Reading
impl RoaHistoryStore {
    /// Returns the tuples of all ROAs in the store.
    pub fn known_tuples(&self) -> Result<HashSet<RoaTuple>, Error> {
        let keys = self.store.list_keys(Some(ROAS_SCOPE))?;
        let mut res = HashSet::with_capacity(keys.len());
        for key in keys {
            res.insert(Self::stored_tuple(&key)?);
        }
        trace!("Found {} ROAs in the store", res.len());
        Ok(res)
    }

    /// Returns the number of ROAs in the store.
    pub fn roa_count(&self) -> Result<usize, Error> {
        Ok(self.store.list_keys(Some(ROAS_SCOPE))?.len())
    }

    /// Returns the marker of the last completed run if there was one.
    pub fn run_marker(&self) -> Result<Option<RunMarker>, Error> {
        self.store.get(None, LAST_RUN_KEY).map_err(Into::into)
    }

    /// Returns the history of a single ROA.
    pub fn get(&self, tuple: &RoaTuple) -> Result<Option<RoaHistory>, Error> {
        self.store.get(
            Some(ROAS_SCOPE), &Self::tuple_key(tuple)
        ).map_err(Into::into)
    }

    /// Returns the histories of all ROAs matching the query.
    ///
    /// The result is ordered by tuple. ROAs are selected by their key, so
    /// only the values of matching ROAs are read.
    pub fn query(
        &self, query: &RoaQuery
    ) -> Result<Vec<RoaHistoryInfo>, Error> {
        let mut res = self.store.execute(|txn| -> Result<_, Error> {
            let mut res = Vec::new();
            for key in txn.list_keys(Some(ROAS_SCOPE))? {
                let tuple = Self::stored_tuple(&key)?;
                if !query.matches(&tuple) {
                    continue
                }
                if let Some(history) = txn.get::<RoaHistory>(
                    Some(ROAS_SCOPE), &key
                )? {
                    res.push(history)
                }
            }
            Ok(res)
        })?;
        res.sort_by(|left, right| left.tuple().cmp(right.tuple()));
        Ok(res.iter().map(RoaHistory::as_info).collect())
    }
}

/// # Writing
impl RoaHistoryStore {
    /// Applies the result of a run.
    ///
    /// Every unknown tuple is inserted with the time of `marker` as its
    /// only observation and the time is appended to every known tuple.
    /// Finally, `marker` replaces the stored run marker. All of this
    /// happens in a single transaction: if any of it fails, nothing at all
    /// is changed.
    ///
    /// The stored run marker must still be `expected`, i.e., the marker
    /// the run was admitted with. If another run completed in the
    /// meantime, the run is refused through `gate`.
    ///
    /// Inserting a tuple that is already present, appending to a tuple
    /// that is missing, or appending a time that isn’t later than the
    /// last observation fail the whole run.
    ///
    /// With an on-disk store, the commit itself can fail after all changes
    /// have been written to the store’s journal but before they were all
    /// applied. An error is returned in this case, yet the journal is kept
    /// and the next access to the store completes the commit, run marker
    /// included. The run then counts as completed from that point on and
    /// the gate treats it accordingly.
    pub fn apply(
        &self,
        diff: &SnapshotDiff,
        expected: Option<&RunMarker>,
        marker: &RunMarker,
        gate: &RunGate,
    ) -> Result<(), Error> {
        self.store.execute(|txn| -> Result<(), Error> {
            Self::check_marker(txn, expected, gate)?;

            for tuple in diff.unknown() {
                let key = Self::tuple_key(tuple);
                if txn.has(Some(ROAS_SCOPE), &key)? {
                    return Err(Error::row(tuple, "ROA is already stored"))
                }
                txn.store(
                    Some(ROAS_SCOPE), &key,
                    &RoaHistory::first_seen(tuple.clone(), marker.time)
                )?;
            }

            for tuple in diff.known() {
                let key = Self::tuple_key(tuple);
                let mut history = txn.get::<RoaHistory>(
                    Some(ROAS_SCOPE), &key
                )?.ok_or_else(|| {
                    Error::row(tuple, "ROA is not stored")
                })?;
                history.observe(marker.time).map_err(|err| {
                    Error::row(tuple, err)
                })?;
                txn.store(Some(ROAS_SCOPE), &key, &history)?;
            }

            txn.store(None, LAST_RUN_KEY, marker)?;
            Ok(())
        })?;
        debug!(
            "Committed run {}: {} inserted, {} updated",
            marker.run_id, diff.unknown().len(), diff.known().len()
        );
        Ok(())
    }

    /// Checks that the stored marker is still the expected one.
    fn check_marker(
        txn: &Transaction<'_>,
        expected: Option<&RunMarker>,
        gate: &RunGate,
    ) -> Result<(), Error> {
        let current = txn.get::<RunMarker>(None, LAST_RUN_KEY)?;
        if current.as_ref() == expected {
            return Ok(())
        }
        match current {
            Some(current) => Err(gate.refuse(&current)),
            None => {
                Err(Error::internal("run marker disappeared from the store"))
            }
        }
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use chrono::{DateTime, TimeZone, Utc};
    use uuid::Uuid;
    use super::*;
    use crate::api::roa::{RawRoa, RoaSnapshot};

    fn mem_store() -> RoaHistoryStore {
        RoaHistoryStore::create(
            &Url::parse(&format!("memory:{}", rand::random::<u64>())).unwrap()
        ).unwrap()
    }

    fn gate() -> RunGate {
        RunGate::new(Duration::from_secs(55 * 60))
    }

    fn time(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    fn marker(time: DateTime<Utc>) -> RunMarker {
        RunMarker { run_id: Uuid::new_v4(), time, inserted: 0, updated: 0 }
    }

    fn snapshot(prefixes: &[&str]) -> RoaSnapshot {
        RoaSnapshot {
            roas: prefixes.iter().map(|prefix| {
                RawRoa::new("AS64500", *prefix, 24, "ARIN")
            }).collect()
        }
    }

    fn run(
        store: &RoaHistoryStore, snapshot: &RoaSnapshot, time: DateTime<Utc>
    ) -> Result<RunMarker, Error> {
        let expected = store.run_marker().unwrap();
        let diff = SnapshotDiff::classify(
            snapshot, &store.known_tuples().unwrap()
        );
        let marker = marker(time);
        store.apply(&diff, expected.as_ref(), &marker, &gate())?;
        Ok(marker)
    }

    #[test]
    fn keys_round_trip() {
        let tuples = [
            RawRoa::new("AS64500", "203.0.113.0/24", 24, "ARIN").normalize(),
            RawRoa::new("", "2001:db8::/32", 48, "RIPE NCC").normalize(),
            RawRoa::new("AS0", "10.0.0.0", 0, "").normalize(),
        ];
        for tuple in tuples {
            let key = RoaHistoryStore::tuple_key(&tuple);
            assert!(Ident::from_str(key.as_str()).is_ok());
            assert_eq!(RoaHistoryStore::tuple_from_key(&key), Some(tuple));
        }
        assert_eq!(
            RoaHistoryStore::tuple_key(
                &RawRoa::new("AS1", "10.0.0.0/8", 8, "X").normalize()
            ).as_str(),
            "+415331_+58_10.0.0.0_8_8.json"
        );
        assert!(
            RoaHistoryStore::tuple_from_key(Ident::make("last_run.json"))
                .is_none()
        );
        assert!(
            RoaHistoryStore::tuple_from_key(Ident::make("a_b_c_d_300.json"))
                .is_none()
        );
    }

    #[test]
    fn insert_then_append() {
        let store = mem_store();
        let snapshot = snapshot(&["10.0.0.0/24", "10.0.1.0/24"]);

        run(&store, &snapshot, time(0)).unwrap();
        assert_eq!(store.known_tuples().unwrap().len(), 2);
        assert_eq!(store.roa_count().unwrap(), 2);

        run(&store, &snapshot, time(1)).unwrap();
        let tuple = snapshot.roas[0].normalize();
        let history = store.get(&tuple).unwrap().unwrap();
        assert_eq!(history.observed(), &[time(0), time(1)]);
        assert_eq!(store.run_marker().unwrap().unwrap().time, time(1));
    }

    #[test]
    fn duplicate_insert_changes_nothing() {
        let store = mem_store();
        let first = run(&store, &snapshot(&["10.0.0.0/24"]), time(0)).unwrap();

        // Pretend the ROA is unknown so it gets inserted a second time.
        let diff = SnapshotDiff::classify(
            &snapshot(&["10.0.0.0/24", "10.0.1.0/24"]), &HashSet::new()
        );
        let res = store.apply(
            &diff, Some(&first), &marker(time(1)), &gate()
        );
        assert!(matches!(res, Err(Error::RowApplyFailure { .. })));

        assert_eq!(store.run_marker().unwrap(), Some(first));
        assert_eq!(store.known_tuples().unwrap().len(), 1);
        let tuple = snapshot(&["10.0.0.0/24"]).roas[0].normalize();
        assert_eq!(store.get(&tuple).unwrap().unwrap().observed(), &[time(0)]);
    }

    #[test]
    fn missing_record_changes_nothing() {
        let store = mem_store();
        let known: HashSet<_> =
            [snapshot(&["10.0.0.0/24"]).roas[0].normalize()].into();
        let diff = SnapshotDiff::classify(
            &snapshot(&["10.0.0.0/24", "10.0.1.0/24"]), &known
        );
        let res = store.apply(&diff, None, &marker(time(0)), &gate());
        assert!(matches!(res, Err(Error::RowApplyFailure { .. })));
        assert!(store.run_marker().unwrap().is_none());
        assert!(store.known_tuples().unwrap().is_empty());
    }

    #[test]
    fn stale_observation_changes_nothing() {
        let store = mem_store();
        let snapshot = snapshot(&["10.0.0.0/24"]);
        run(&store, &snapshot, time(2)).unwrap();
        assert!(matches!(
            run(&store, &snapshot, time(1)),
            Err(Error::RowApplyFailure { .. })
        ));
        assert_eq!(store.run_marker().unwrap().unwrap().time, time(2));
    }

    #[test]
    fn moved_marker_is_refused() {
        let store = mem_store();
        let snapshot = snapshot(&["10.0.0.0/24"]);
        let diff = SnapshotDiff::classify(&snapshot, &HashSet::new());

        // Another run completes between admission and commit.
        let other = run(&store, &snapshot, time(0)).unwrap();
        let res = store.apply(&diff, None, &marker(time(0)), &gate());
        match res {
            Err(Error::TooSoon { last_run, .. }) => {
                assert_eq!(last_run, other.time)
            }
            res => panic!("expected too soon, got {res:?}"),
        }
        assert_eq!(store.run_marker().unwrap(), Some(other));
    }

    #[test]
    fn case_differing_tuples_are_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let store = RoaHistoryStore::create(
            &Url::parse(&format!("local://{}", dir.path().display())).unwrap()
        ).unwrap();
        let snapshot = RoaSnapshot {
            roas: vec![
                RawRoa::new("AS64500", "10.0.0.0/24", 24, "ARIN"),
                RawRoa::new("as64500", "10.0.0.0/24", 24, "arin"),
            ]
        };
        run(&store, &snapshot, time(0)).unwrap();
        assert_eq!(store.roa_count().unwrap(), 2);
        for roa in &snapshot.roas {
            assert!(store.get(&roa.normalize()).unwrap().is_some());
        }
    }

    #[test]
    fn interrupted_commit_is_completed() {
        let dir = tempfile::tempdir().unwrap();
        let uri = Url::parse(
            &format!("local://{}", dir.path().display())
        ).unwrap();
        let store = RoaHistoryStore::create(&uri).unwrap();
        let snapshot = snapshot(&["10.0.0.0/24"]);
        run(&store, &snapshot, time(0)).unwrap();

        // The journal of a run whose commit didn’t get to apply it.
        let tuple = snapshot.roas[0].normalize();
        let mut history = RoaHistory::first_seen(tuple.clone(), time(0));
        history.observe(time(1)).unwrap();
        let interrupted = marker(time(1));
        let journal = serde_json::json!([
            {
                "scope": ROAS_SCOPE.as_str(),
                "key": RoaHistoryStore::tuple_key(&tuple).as_str(),
                "value": history,
            },
            {
                "scope": null,
                "key": LAST_RUN_KEY.as_str(),
                "value": interrupted,
            }
        ]);
        std::fs::write(
            dir.path().join(".journal/roa_history.json"),
            serde_json::to_vec(&journal).unwrap()
        ).unwrap();

        let store = RoaHistoryStore::create(&uri).unwrap();
        assert_eq!(store.run_marker().unwrap(), Some(interrupted));
        assert_eq!(
            store.get(&tuple).unwrap().unwrap().observed(),
            &[time(0), time(1)]
        );
    }

    #[test]
    fn query_histories() {
        let store = mem_store();
        let mut snapshot = snapshot(&["10.0.1.0/24", "10.0.0.0/24"]);
        snapshot.roas.push(RawRoa::new("AS64501", "10.0.0.0/16", 24, "RIPE"));
        run(&store, &snapshot, time(0)).unwrap();

        let all = store.query(&RoaQuery::default()).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|pair| {
            (&pair[0].asn, &pair[0].ta, &pair[0].prefix)
                <= (&pair[1].asn, &pair[1].ta, &pair[1].prefix)
        }));

        let by_asn = store.query(
            &RoaQuery::default().with_asn("AS64501")
        ).unwrap();
        assert_eq!(by_asn.len(), 1);
        assert_eq!(by_asn[0].range, "10.0.0.0/16 => 24");
        assert_eq!(by_asn[0].observed, vec![time(0)]);

        let by_prefix = store.query(
            &RoaQuery::default().with_prefix("10.0.0.0").unwrap()
        ).unwrap();
        assert_eq!(by_prefix.len(), 2);

        let none = store.query(
            &RoaQuery::default().with_asn("1")
        ).unwrap();
        assert!(none.is_empty());
    }
}
