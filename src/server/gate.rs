//! Limiting how often ingestion runs.

use std::time::Duration;
use chrono::{DateTime, TimeDelta, Utc};
use crate::api::status::RunMarker;
use crate::commons::error::Error;


//------------ RunGate -------------------------------------------------------

/// Decides whether an ingestion run may start.
///
/// A run is allowed if there never was a run before or if the last
/// completed run is at least the minimum interval in the past.
#[derive(Clone, Copy, Debug)]
pub struct RunGate {
    min_interval: TimeDelta,
}

impl RunGate {
    /// Creates a gate with the given minimum interval between runs.
    ///
    /// Intervals too large to be represented are capped.
    pub fn new(min_interval: Duration) -> Self {
        RunGate {
            min_interval: TimeDelta::from_std(min_interval).unwrap_or(
                TimeDelta::MAX
            ),
        }
    }

    pub fn min_interval(&self) -> TimeDelta {
        self.min_interval
    }

    /// Returns the earliest time the next run is allowed.
    ///
    /// Returns `None` if there was no run yet.
    pub fn next_allowed(
        &self, marker: Option<&RunMarker>
    ) -> Option<DateTime<Utc>> {
        marker.map(|marker| {
            marker.time.checked_add_signed(self.min_interval).unwrap_or(
                DateTime::<Utc>::MAX_UTC
            )
        })
    }

    /// Checks whether a run may start at `now`.
    ///
    /// Returns an error of [`Error::TooSoon`] if not.
    pub fn check(
        &self, marker: Option<&RunMarker>, now: DateTime<Utc>
    ) -> Result<(), Error> {
        match (marker, self.next_allowed(marker)) {
            (Some(marker), Some(next_allowed)) if now < next_allowed => {
                Err(self.refuse(marker))
            }
            _ => Ok(())
        }
    }

    /// Returns the error refusing a run because of the given marker.
    pub fn refuse(&self, marker: &RunMarker) -> Error {
        Error::TooSoon {
            last_run: marker.time,
            next_allowed: self.next_allowed(Some(marker)).unwrap_or(
                marker.time
            ),
        }
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use uuid::Uuid;
    use super::*;

    fn marker(time: DateTime<Utc>) -> RunMarker {
        RunMarker { run_id: Uuid::new_v4(), time, inserted: 0, updated: 0 }
    }

    #[test]
    fn first_run_is_allowed() {
        let gate = RunGate::new(Duration::from_secs(55 * 60));
        assert!(gate.check(None, Utc::now()).is_ok());
        assert!(gate.next_allowed(None).is_none());
    }

    #[test]
    fn refuse_within_interval() {
        let gate = RunGate::new(Duration::from_secs(55 * 60));
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let marker = marker(t);

        match gate.check(Some(&marker), t + TimeDelta::minutes(30)) {
            Err(Error::TooSoon { last_run, next_allowed }) => {
                assert_eq!(last_run, t);
                assert_eq!(next_allowed, t + TimeDelta::minutes(55));
            }
            other => panic!("expected too soon, got {other:?}"),
        }
        assert!(gate.check(Some(&marker), t).is_err());
        assert!(
            gate.check(Some(&marker), t + TimeDelta::minutes(55)).is_ok()
        );
        assert!(
            gate.check(Some(&marker), t + TimeDelta::minutes(60)).is_ok()
        );
    }

    #[test]
    fn clock_going_backwards_is_refused() {
        let gate = RunGate::new(Duration::from_secs(60));
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert!(
            gate.check(Some(&marker(t)), t - TimeDelta::hours(2)).is_err()
        );
    }

    #[test]
    fn huge_interval_is_capped() {
        let gate = RunGate::new(Duration::MAX);
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert!(gate.check(Some(&marker(t)), t + TimeDelta::days(3650)).is_err());
    }
}
