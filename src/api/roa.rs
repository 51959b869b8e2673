//! Route origin authorizations as seen by the history.
//!
//! There are three shapes of a ROA in this crate. A [`RawRoa`] is what the
//! remote source publishes. A [`RoaTuple`] is the normalized form which
//! also serves as the identity of a ROA: two ROAs are the same if and only
//! if their tuples are equal. A [`RoaHistory`] is what we keep: the tuple
//! together with every point in time it was observed.

use std::{error, fmt};
use std::str::FromStr;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};


//------------ RoaSnapshot ---------------------------------------------------

/// The full set of ROAs published by the source at one point in time.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct RoaSnapshot {
    pub roas: Vec<RawRoa>,
}

impl RoaSnapshot {
    /// Parses a snapshot from its JSON representation.
    ///
    /// The whole snapshot is rejected if any part of it fails to parse, so
    /// that a truncated view never makes it into the history.
    pub fn from_json(json: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(json)
    }

    pub fn len(&self) -> usize {
        self.roas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roas.is_empty()
    }
}


//------------ RawRoa --------------------------------------------------------

/// A ROA entry as received from the source.
///
/// The prefix usually carries the mask length after a slash, e.g.
/// `"203.0.113.0/24"`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RawRoa {
    #[serde(default)]
    pub asn: String,

    pub prefix: String,

    #[serde(rename = "maxLength")]
    pub max_length: u8,

    pub ta: String,
}

impl RawRoa {
    pub fn new(
        asn: impl Into<String>,
        prefix: impl Into<String>,
        max_length: u8,
        ta: impl Into<String>,
    ) -> Self {
        RawRoa {
            asn: asn.into(),
            prefix: prefix.into(),
            max_length,
            ta: ta.into(),
        }
    }

    /// Converts the entry into its normalized tuple.
    ///
    /// This never fails. A prefix without a mask, or with a mask that is
    /// not a valid number, results in a mask length of zero. Anything after
    /// a second slash is ignored.
    pub fn normalize(&self) -> RoaTuple {
        let mut parts = self.prefix.split('/');
        let prefix = parts.next().unwrap_or_default();
        let mask = parts.next().and_then(|mask| {
            u8::from_str(mask.trim()).ok()
        }).unwrap_or(0);

        RoaTuple {
            asn: self.asn.clone(),
            ta: self.ta.clone(),
            prefix: prefix.to_string(),
            mask,
            max_length: self.max_length,
        }
    }
}


//------------ RoaTuple ------------------------------------------------------

/// The identity of a ROA.
///
/// Equality and hashing consider all five fields and nothing else, which
/// makes a tuple usable directly as the key for membership tests.
#[derive(
    Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct RoaTuple {
    /// The autonomous system, as published. May be empty.
    pub asn: String,

    /// The trust anchor the ROA was found under.
    pub ta: String,

    /// The network address of the prefix without the mask.
    pub prefix: String,

    /// The prefix length, zero if the source did not provide one.
    pub mask: u8,

    /// The maximum length of authorized announcements.
    #[serde(rename = "maxLength")]
    pub max_length: u8,
}

impl RoaTuple {
    /// Returns the prefix in `address/mask` notation.
    pub fn prefix_str(&self) -> String {
        format!("{}/{}", self.prefix, self.mask)
    }

    /// Returns the authorized range.
    ///
    /// This is just the prefix if the max length does not exceed the mask
    /// or `address/mask => max_length` otherwise.
    pub fn range_str(&self) -> String {
        if self.max_length > self.mask {
            format!("{}/{} => {}", self.prefix, self.mask, self.max_length)
        }
        else {
            self.prefix_str()
        }
    }

    /// Returns the AS number without a leading `AS` if it has one.
    pub fn asn_number(&self) -> &str {
        strip_as(&self.asn)
    }
}

impl fmt::Display for RoaTuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} => {} ({})", self.range_str(), self.asn, self.ta)
    }
}


//------------ RoaHistory ----------------------------------------------------

/// A ROA tuple with all the times it was observed.
///
/// The observations are in the order of the runs that saw the tuple and
/// are only ever appended to.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RoaHistory {
    #[serde(flatten)]
    tuple: RoaTuple,

    observed: Vec<DateTime<Utc>>,
}

impl RoaHistory {
    /// Creates the history for a tuple observed for the first time.
    pub fn first_seen(tuple: RoaTuple, when: DateTime<Utc>) -> Self {
        RoaHistory { tuple, observed: vec![when] }
    }

    pub fn tuple(&self) -> &RoaTuple {
        &self.tuple
    }

    pub fn observed(&self) -> &[DateTime<Utc>] {
        &self.observed
    }

    pub fn first_observed(&self) -> Option<DateTime<Utc>> {
        self.observed.first().copied()
    }

    pub fn last_observed(&self) -> Option<DateTime<Utc>> {
        self.observed.last().copied()
    }

    /// Appends an observation.
    ///
    /// The new observation must be strictly later than the last one.
    /// Otherwise the history is left alone and an error returned.
    pub fn observe(
        &mut self, when: DateTime<Utc>
    ) -> Result<(), ObservationOrderError> {
        if let Some(last) = self.last_observed() {
            if when <= last {
                return Err(ObservationOrderError { last, when })
            }
        }
        self.observed.push(when);
        Ok(())
    }

    /// Returns the representation used by the query API.
    pub fn as_info(&self) -> RoaHistoryInfo {
        RoaHistoryInfo {
            asn: self.tuple.asn.clone(),
            ta: self.tuple.ta.clone(),
            prefix: self.tuple.prefix.clone(),
            mask: self.tuple.mask,
            max_length: self.tuple.max_length,
            prefix_str: self.tuple.prefix_str(),
            range: self.tuple.range_str(),
            observed: self.observed.clone(),
        }
    }
}


//------------ RoaHistoryInfo ------------------------------------------------

/// A ROA history enriched with display fields.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RoaHistoryInfo {
    pub asn: String,
    pub ta: String,
    pub prefix: String,
    pub mask: u8,
    #[serde(rename = "maxLength")]
    pub max_length: u8,
    pub prefix_str: String,
    pub range: String,
    pub observed: Vec<DateTime<Utc>>,
}


//------------ RoaQuery ------------------------------------------------------

/// A filter for looking up ROA histories.
///
/// An empty query matches everything.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RoaQuery {
    asn: Option<String>,
    prefix: Option<(String, Option<u8>)>,
}

impl RoaQuery {
    /// Restricts the query to an AS number.
    ///
    /// A leading `AS` is ignored on both sides when comparing.
    pub fn with_asn(mut self, asn: &str) -> Self {
        self.asn = Some(strip_as(asn.trim()).to_string());
        self
    }

    /// Restricts the query to a prefix.
    ///
    /// If the string contains a mask, the mask has to match as well.
    pub fn with_prefix(
        mut self, prefix: &str
    ) -> Result<Self, RoaQueryError> {
        let prefix = prefix.trim();
        let (addr, mask) = match prefix.split_once('/') {
            Some((addr, mask)) => {
                let mask = u8::from_str(mask).map_err(|_| {
                    RoaQueryError(prefix.to_string())
                })?;
                (addr, Some(mask))
            }
            None => (prefix, None),
        };
        if addr.is_empty() {
            return Err(RoaQueryError(prefix.to_string()))
        }
        self.prefix = Some((addr.to_string(), mask));
        Ok(self)
    }

    /// Returns whether the query has no restrictions.
    pub fn is_empty(&self) -> bool {
        self.asn.is_none() && self.prefix.is_none()
    }

    /// Returns whether the tuple matches the query.
    pub fn matches(&self, tuple: &RoaTuple) -> bool {
        if let Some(asn) = self.asn.as_ref() {
            if !asn.eq_ignore_ascii_case(tuple.asn_number()) {
                return false
            }
        }
        if let Some((addr, mask)) = self.prefix.as_ref() {
            if !addr.eq_ignore_ascii_case(&tuple.prefix) {
                return false
            }
            if let Some(mask) = mask {
                if *mask != tuple.mask {
                    return false
                }
            }
        }
        true
    }
}


//------------ Helpers -------------------------------------------------------

fn strip_as(asn: &str) -> &str {
    match asn.get(..2) {
        Some(head) if head.eq_ignore_ascii_case("as") => &asn[2..],
        _ => asn
    }
}


//============ Error Types ===================================================

//------------ ObservationOrderError -----------------------------------------

/// An observation was not later than the previous one.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ObservationOrderError {
    pub last: DateTime<Utc>,
    pub when: DateTime<Utc>,
}

impl fmt::Display for ObservationOrderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f,
            "observation at {} is not later than last observation at {}",
            self.when.to_rfc3339(), self.last.to_rfc3339()
        )
    }
}

impl error::Error for ObservationOrderError { }


//------------ RoaQueryError -------------------------------------------------

/// A prefix given in a query could not be parsed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RoaQueryError(String);

impl fmt::Display for RoaQueryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Invalid prefix in query: {}", self.0)
    }
}

impl error::Error for RoaQueryError { }


//============ Tests =========================================================
