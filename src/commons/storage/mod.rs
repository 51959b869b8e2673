//! Persistent storage of data.

pub use self::ident::{Ident, IdentBuilder, IdentError};
pub use self::store::{KeyValueError, KeyValueStore, Transaction};

mod backends;
mod ident;
mod store;
