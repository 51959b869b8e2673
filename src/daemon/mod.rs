//! The daemon.

pub mod http;
pub mod start;
