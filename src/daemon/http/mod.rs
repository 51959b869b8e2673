//! The HTTP interface of the daemon.

pub mod response;
pub mod server;
