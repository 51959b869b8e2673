//! Running ingestion and answering queries.

use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;
use crate::api::roa::{RoaHistoryInfo, RoaQuery};
use crate::api::status::{
    HistoryStatus, IngestReport, IngestStatus, RunMarker,
};
use crate::commons::error::Error;
use super::diff::SnapshotDiff;
use super::gate::RunGate;
use super::history::RoaHistoryStore;
use super::source::RoaSource;


//------------ RoaHistoryManager ---------------------------------------------

/// The central component tying together source, gate and store.
///
/// An ingestion run goes through the following steps: the run gate checks
/// the stored run marker, the source is fetched, the snapshot is
/// classified against the tuples in the store and the result is committed
/// together with a new run marker.
///
/// Runs are serialized through a lock held for the entire run. Because the
/// commit also checks that the run marker hasn’t changed since the gate
/// check, concurrent runs from another process are refused, too.
///
/// All store access happens on blocking threads.
pub struct RoaHistoryManager<S> {
    store: Arc<RoaHistoryStore>,
    source: S,
    gate: RunGate,
    run_lock: Mutex<()>,
}

impl<S: RoaSource> RoaHistoryManager<S> {
    pub fn new(store: RoaHistoryStore, source: S, gate: RunGate) -> Self {
        RoaHistoryManager {
            store: Arc::new(store),
            source,
            gate,
            run_lock: Mutex::new(()),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn gate(&self) -> &RunGate {
        &self.gate
    }
}

/// # Ingestion
impl<S: RoaSource> RoaHistoryManager<S> {
    /// Runs the ingestion now.
    pub async fn ingest(&self) -> Result<IngestReport, Error> {
        self.ingest_at(Utc::now()).await
    }

    /// Runs the ingestion with `now` as the time of the run.
    ///
    /// If the run is refused by the gate, the source is not contacted and
    /// nothing changes. If any step fails, the store is left as it was.
    pub async fn ingest_at(
        &self, now: DateTime<Utc>
    ) -> Result<IngestReport, Error> {
        let _lock = self.run_lock.lock().await;

        let expected = self.blocking(|store| store.run_marker()).await?;
        self.gate.check(expected.as_ref(), now)?;

        let snapshot = self.source.fetch().await?;

        let run_id = Uuid::new_v4();
        let gate = self.gate;
        self.blocking(move |store| {
            let diff = SnapshotDiff::classify(
                &snapshot, &store.known_tuples()?
            );
            let report = IngestReport {
                run_id,
                run_time: now,
                fetched: diff.fetched(),
                duplicates: diff.duplicates(),
                inserted: diff.unknown().len(),
                updated: diff.known().len(),
            };
            store.apply(&diff, expected.as_ref(), &report.marker(), &gate)?;
            Ok(report)
        }).await
    }

    /// Triggers a run now and returns its terminal status.
    pub async fn trigger(&self) -> IngestStatus {
        self.trigger_at(Utc::now()).await
    }

    /// Triggers a run at the given time and returns its terminal status.
    pub async fn trigger_at(&self, now: DateTime<Utc>) -> IngestStatus {
        ingest_status(self.ingest_at(now).await)
    }

    /// Triggers a run every `every` until the end of time.
    ///
    /// The first run is triggered immediately.
    pub async fn run_scheduler(self: Arc<Self>, every: Duration) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.trigger().await;
        }
    }
}

/// # Queries
impl<S: RoaSource> RoaHistoryManager<S> {
    /// Returns the marker of the last completed run.
    pub async fn run_marker(&self) -> Result<Option<RunMarker>, Error> {
        self.blocking(|store| store.run_marker()).await
    }

    /// Returns the current state of the history.
    pub async fn status(&self) -> Result<HistoryStatus, Error> {
        let gate = self.gate;
        self.blocking(move |store| {
            let last_run = store.run_marker()?;
            Ok(HistoryStatus {
                next_allowed: gate.next_allowed(last_run.as_ref()),
                last_run,
                roas: store.roa_count()?,
            })
        }).await
    }

    /// Returns the histories of all ROAs matching the query.
    pub async fn query(
        &self, query: RoaQuery
    ) -> Result<Vec<RoaHistoryInfo>, Error> {
        self.blocking(move |store| store.query(&query)).await
    }
}

impl<S> RoaHistoryManager<S> {
    /// Runs a store operation on a blocking thread.
    async fn blocking<F, T>(&self, op: F) -> Result<T, Error>
    where
        F: FnOnce(&RoaHistoryStore) -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || op(&store)).await?
    }
}


//------------ ingest_status -------------------------------------------------

/// Converts the result of a run into its terminal status.
///
/// The outcome is logged. A refusal by the gate is expected and only
/// logged at debug level.
pub fn ingest_status(res: Result<IngestReport, Error>) -> IngestStatus {
    match res {
        Ok(report) => {
            info!("Completed ROA ingestion {report}");
            IngestStatus::Ok { report }
        }
        Err(Error::TooSoon { last_run, next_allowed }) => {
            debug!(
                "Skipping ROA ingestion: last run at {}, next run \
                 allowed at {}",
                last_run.to_rfc3339(), next_allowed.to_rfc3339()
            );
            IngestStatus::TooSoon { last_run, next_allowed }
        }
        Err(err) => {
            if err.is_retryable() {
                warn!("ROA ingestion failed: {err}");
            }
            else {
                error!("ROA ingestion failed: {err}");
            }
            IngestStatus::Error { detail: err.to_string() }
        }
    }
}


//============ Tests =========================================================
