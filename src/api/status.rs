//! Status reporting of ingestion runs.

use std::collections::HashMap;
use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;


//------------ RunMarker -----------------------------------------------------

/// Information about the most recently completed ingestion run.
///
/// There is only ever one marker. It is replaced in the same transaction
/// that stores the changes of a run, so it always describes the data that
/// is actually in the store.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RunMarker {
    /// The identifier of the run.
    pub run_id: Uuid,

    /// The time of the run.
    ///
    /// This is also the observation time appended to all ROAs seen by the
    /// run.
    pub time: DateTime<Utc>,

    /// The number of ROAs seen for the first time.
    pub inserted: usize,

    /// The number of ROAs seen before.
    pub updated: usize,
}


//------------ IngestReport --------------------------------------------------

/// The outcome of a successful ingestion run.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct IngestReport {
    pub run_id: Uuid,
    pub run_time: DateTime<Utc>,

    /// The number of entries in the fetched snapshot.
    pub fetched: usize,

    /// The number of entries dropped because they repeated a tuple already
    /// present in the same snapshot.
    pub duplicates: usize,

    pub inserted: usize,
    pub updated: usize,
}

impl IngestReport {
    /// Returns the marker that a run with this report leaves behind.
    pub fn marker(&self) -> RunMarker {
        RunMarker {
            run_id: self.run_id,
            time: self.run_time,
            inserted: self.inserted,
            updated: self.updated,
        }
    }
}

impl fmt::Display for IngestReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f,
            "run {} at {}: fetched {}, inserted {}, updated {}, \
             duplicates {}",
            self.run_id, self.run_time.to_rfc3339(), self.fetched,
            self.inserted, self.updated, self.duplicates
        )
    }
}


//------------ IngestStatus --------------------------------------------------

/// The terminal status of one trigger of the ingestion.
///
/// This is what the trigger interface returns. It serializes as a JSON
/// object with a `status` field of `"ok"`, `"too_soon"`, or `"error"`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestStatus {
    Ok {
        #[serde(flatten)]
        report: IngestReport,
    },
    TooSoon {
        last_run: DateTime<Utc>,
        next_allowed: DateTime<Utc>,
    },
    Error {
        detail: String,
    },
}

impl IngestStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, IngestStatus::Ok { .. })
    }

    pub fn is_too_soon(&self) -> bool {
        matches!(self, IngestStatus::TooSoon { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, IngestStatus::Error { .. })
    }
}


//------------ HistoryStatus -------------------------------------------------

/// The current state of the history.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct HistoryStatus {
    /// The marker of the last completed run, if any.
    pub last_run: Option<RunMarker>,

    /// The earliest time the next run will be admitted.
    ///
    /// This is `None` if there never was a run.
    pub next_allowed: Option<DateTime<Utc>>,

    /// The number of ROAs in the history.
    pub roas: usize,
}


//------------ ErrorResponse -------------------------------------------------

/// The body of an error response of the HTTP API.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ErrorResponse {
    /// The error label.
    pub label: String,

    /// The error message.
    pub msg: String,

    /// Arguments with details about the error.
    pub args: HashMap<String, String>,
}

impl ErrorResponse {
    pub fn new(label: &str, msg: impl fmt::Display) -> Self {
        ErrorResponse {
            label: label.to_string(),
            msg: msg.to_string(),
            args: HashMap::new(),
        }
    }

    pub fn with_arg(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.args.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_cause(self, cause: impl fmt::Display) -> Self {
        self.with_arg("cause", cause)
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", &self.msg)
    }
}


//============ Tests =========================================================
