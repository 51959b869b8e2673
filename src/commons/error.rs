//! The errors of the ingestion pipeline.

use std::{error, fmt};
use chrono::{DateTime, Utc};
use hyper::StatusCode;
use crate::api::roa::RoaTuple;
use crate::api::status::ErrorResponse;
use crate::commons::httpclient;
use crate::commons::storage::KeyValueError;


//------------ Error ---------------------------------------------------------

/// An ingestion run did not complete.
///
/// Except for `TooSoon`, which is an expected refusal, all of these abort
/// the run before anything is committed.
#[derive(Debug)]
pub enum Error {
    /// The source could not be reached or returned an error status.
    ///
    /// Trying again later may succeed.
    SourceUnavailable(httpclient::Error),

    /// The source returned data that could not be decoded.
    MalformedPayload(String),

    /// The previous run was too recent.
    TooSoon {
        last_run: DateTime<Utc>,
        next_allowed: DateTime<Utc>,
    },

    /// The store could not be read or written.
    StoreUnavailable(KeyValueError),

    /// A single record could not be applied.
    RowApplyFailure {
        tuple: Box<RoaTuple>,
        reason: String,
    },

    /// The background task running the store operation went away.
    Internal(String),
}

impl Error {
    pub fn malformed(err: impl fmt::Display) -> Self {
        Error::MalformedPayload(err.to_string())
    }

    pub fn row(tuple: &RoaTuple, reason: impl fmt::Display) -> Self {
        Error::RowApplyFailure {
            tuple: Box::new(tuple.clone()),
            reason: reason.to_string(),
        }
    }

    pub fn internal(msg: impl fmt::Display) -> Self {
        Error::Internal(msg.to_string())
    }

    /// Returns whether the caller may try again with the same source.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::SourceUnavailable(_) | Error::TooSoon { .. })
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::SourceUnavailable(_) | Error::MalformedPayload(_) => {
                StatusCode::BAD_GATEWAY
            }
            Error::TooSoon { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::StoreUnavailable(_)
            | Error::RowApplyFailure { .. }
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_error_response(&self) -> ErrorResponse {
        match self {
            Error::SourceUnavailable(err) => {
                ErrorResponse::new("ingest-source-unavailable", self)
                    .with_cause(err)
            }
            Error::MalformedPayload(err) => {
                ErrorResponse::new("ingest-malformed-payload", self)
                    .with_cause(err)
            }
            Error::TooSoon { last_run, next_allowed } => {
                ErrorResponse::new("ingest-too-soon", self)
                    .with_arg("last_run", last_run.to_rfc3339())
                    .with_arg("next_allowed", next_allowed.to_rfc3339())
            }
            Error::StoreUnavailable(err) => {
                ErrorResponse::new("sys-store", self).with_cause(err)
            }
            Error::RowApplyFailure { tuple, reason } => {
                ErrorResponse::new("ingest-row-failure", self)
                    .with_arg("roa", tuple)
                    .with_cause(reason)
            }
            Error::Internal(msg) => {
                ErrorResponse::new("sys-internal", self).with_cause(msg)
            }
        }
    }
}

impl From<KeyValueError> for Error {
    fn from(err: KeyValueError) -> Self {
        Error::StoreUnavailable(err)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::internal(format!("store task failed: {err}"))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::SourceUnavailable(err) => {
                write!(f, "ROA source unavailable: {err}")
            }
            Error::MalformedPayload(err) => {
                write!(f, "Malformed ROA payload: {err}")
            }
            Error::TooSoon { last_run, next_allowed } => {
                write!(f,
                    "Last run at {} was too recent, next run allowed at {}",
                    last_run.to_rfc3339(), next_allowed.to_rfc3339()
                )
            }
            Error::StoreUnavailable(err) => {
                write!(f, "Store unavailable: {err}")
            }
            Error::RowApplyFailure { tuple, reason } => {
                write!(f, "Cannot apply ROA {tuple}: {reason}")
            }
            Error::Internal(msg) => {
                write!(f, "Internal error: {msg}")
            }
        }
    }
}

impl error::Error for Error { }


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use super::*;
    use crate::api::roa::RawRoa;

    #[test]
    fn error_responses() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let err = Error::TooSoon { last_run: t0, next_allowed: t0 };
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
        let res = err.to_error_response();
        assert_eq!(res.label, "ingest-too-soon");
        assert_eq!(res.args["last_run"], t0.to_rfc3339());
        assert!(err.is_retryable());

        let tuple = RawRoa::new("AS1", "10.0.0.0/8", 8, "X").normalize();
        let err = Error::row(&tuple, "duplicate");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let res = err.to_error_response();
        assert_eq!(res.args["roa"], "10.0.0.0/8 => AS1 (X)");
        assert_eq!(res.args["cause"], "duplicate");
        assert!(!err.is_retryable());

        let err = Error::malformed("eof");
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert!(!err.is_retryable());
    }
}
