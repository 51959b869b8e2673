#![allow(dead_code)] // Different tests use different parts.

use std::time::Duration;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;
use url::Url;
use roahist::api::roa::{RawRoa, RoaSnapshot};
use roahist::server::gate::RunGate;
use roahist::server::history::RoaHistoryStore;
use roahist::server::manager::RoaHistoryManager;
use roahist::server::source::StaticRoaSource;


/// Enables logging to stderr for debugging tests.
pub fn init_logging() {
    let _ = stderrlog::new().verbosity(3).init();
}

/// Returns a storage URI for a fresh in-memory store.
pub fn mem_storage() -> Url {
    Url::parse(
        &format!("memory:{}", hex::encode(rand::random::<[u8; 8]>()))
    ).unwrap()
}

/// Returns a storage URI for a fresh on-disk store.
///
/// The store lives for as long as the returned directory.
pub fn file_storage() -> (Url, TempDir) {
    let dir = TempDir::new().unwrap();
    let uri = Url::parse(
        &format!("local://{}", dir.path().display())
    ).unwrap();
    (uri, dir)
}

pub fn roa(asn: &str, prefix: &str, max_length: u8, ta: &str) -> RawRoa {
    RawRoa::new(asn, prefix, max_length, ta)
}

pub fn snapshot(roas: &[RawRoa]) -> RoaSnapshot {
    RoaSnapshot { roas: roas.to_vec() }
}

/// Returns a point in time on the first of January 2024.
pub fn time(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap()
}

/// Creates a manager with the default gate serving the given snapshot.
pub fn manager(
    storage_uri: &Url, snapshot: RoaSnapshot
) -> RoaHistoryManager<StaticRoaSource> {
    RoaHistoryManager::new(
        RoaHistoryStore::create(storage_uri).unwrap(),
        StaticRoaSource::new(snapshot),
        RunGate::new(Duration::from_secs(55 * 60)),
    )
}
