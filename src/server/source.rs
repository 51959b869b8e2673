//! Sources of ROA snapshots.
//!
//! A source provides the complete set of ROAs currently published. The
//! history is built by fetching from it periodically. The source used in
//! production is [`HttpRoaSource`], which downloads the JSON export of a
//! relying party. [`StaticRoaSource`] serves snapshots held in memory.

use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use log::debug;
use url::Url;
use crate::api::roa::RoaSnapshot;
use crate::commons::error::Error;
use crate::commons::httpclient;


//------------ RoaSource -----------------------------------------------------

/// A type that can provide the current set of published ROAs.
pub trait RoaSource: Send + Sync + 'static {
    /// Fetches the complete current snapshot.
    ///
    /// Each call performs exactly one attempt. The result is either the
    /// complete snapshot or an error, never a partial snapshot.
    fn fetch(
        &self
    ) -> impl Future<Output = Result<RoaSnapshot, Error>> + Send;
}


//------------ HttpRoaSource -------------------------------------------------

/// A source downloading the JSON export of a relying party over HTTP.
///
/// The export is expected to be an object with a single member `roas`
/// containing an array of objects with the members `asn`, `prefix`,
/// `maxLength`, and `ta`.
#[derive(Clone, Debug)]
pub struct HttpRoaSource {
    /// The HTTP(S) URI of the export.
    uri: Url,

    /// The client used for requests.
    ///
    /// It carries the request timeout.
    client: reqwest::Client,
}

impl HttpRoaSource {
    /// Creates a new source for the given URI and request timeout.
    pub fn new(uri: Url, timeout: Duration) -> Result<Self, httpclient::Error> {
        let client = httpclient::client(uri.as_str(), timeout)?;
        Ok(HttpRoaSource { uri, client })
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }
}

impl RoaSource for HttpRoaSource {
    async fn fetch(&self) -> Result<RoaSnapshot, Error> {
        debug!("Fetching ROAs from {}", self.uri);
        let body = httpclient::get_bytes(
            &self.client, self.uri.as_str()
        ).await.map_err(Error::SourceUnavailable)?;
        let snapshot = RoaSnapshot::from_json(&body).map_err(|err| {
            Error::malformed(format!("{}: {}", self.uri, err))
        })?;
        debug!("Fetched {} ROAs from {}", snapshot.len(), self.uri);
        Ok(snapshot)
    }
}


//------------ StaticRoaSource -----------------------------------------------

/// A source serving a snapshot kept in memory.
///
/// The snapshot can be replaced at any time. If there is no snapshot, a
/// fetch fails as if the source was unreachable.
#[derive(Debug, Default)]
pub struct StaticRoaSource {
    snapshot: Mutex<Option<RoaSnapshot>>,
    fetches: AtomicUsize,
}

impl StaticRoaSource {
    pub fn new(snapshot: RoaSnapshot) -> Self {
        StaticRoaSource {
            snapshot: Mutex::new(Some(snapshot)),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Replaces the snapshot served from now on.
    pub fn set(&self, snapshot: RoaSnapshot) {
        *self.snapshot.lock().expect("poisoned lock") = Some(snapshot);
    }

    /// Makes all future fetches fail.
    pub fn clear(&self) {
        *self.snapshot.lock().expect("poisoned lock") = None;
    }

    /// Returns how often the source was fetched from.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

impl RoaSource for StaticRoaSource {
    async fn fetch(&self) -> Result<RoaSnapshot, Error> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.snapshot.lock().expect("poisoned lock").clone().ok_or_else(|| {
            Error::SourceUnavailable(
                httpclient::Error::execute("static:", "no snapshot available")
            )
        })
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::roa::RawRoa;

    #[tokio::test]
    async fn static_source() {
        let source = StaticRoaSource::new(RoaSnapshot {
            roas: vec![RawRoa::new("AS1", "10.0.0.0/8", 8, "X")]
        });
        assert_eq!(source.fetch().await.unwrap().len(), 1);

        source.clear();
        assert!(matches!(
            source.fetch().await, Err(Error::SourceUnavailable(_))
        ));
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn unreachable_http_source() {
        // Nothing listens on the discard port of the loopback address.
        let source = HttpRoaSource::new(
            Url::parse("http://127.0.0.1:9/json").unwrap(),
            Duration::from_secs(5)
        ).unwrap();
        assert!(matches!(
            source.fetch().await, Err(Error::SourceUnavailable(_))
        ));
    }
}
