//! Data types shared by the daemon, the store, and API clients.

pub mod roa;
pub mod status;
