//! The ingestion pipeline.

pub mod diff;
pub mod gate;
pub mod history;
pub mod manager;
pub mod source;
