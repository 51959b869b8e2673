//! Infrastructure shared by the server components.

pub mod error;
pub mod httpclient;
pub mod storage;
