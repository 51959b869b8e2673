//! The _roahist_ library crate.
//!
//! Records the history of published Route Origin Authorizations by
//! periodically fetching the complete set of ROAs and appending an
//! observation to every ROA seen.

pub mod api;
pub mod commons;
pub mod config;
pub mod constants;
pub mod daemon;
pub mod server;
