//! The key-value store.

use std::{error, fmt};
use serde::de::DeserializeOwned;
use serde::ser::Serialize;
use url::Url;
use super::Ident;
use super::backends::{Backend, BackendSystem, Error as BackendError};
pub use super::backends::Transaction;


lazy_static::lazy_static! {
    static ref BACKENDS: BackendSystem = BackendSystem::default();
}


//------------ KeyValueStore -------------------------------------------------

/// A namespace in a key-value store.
///
/// Values are stored as JSON under a key, optionally inside a scope. All
/// access happens through transactions which are exclusive for the
/// namespace. The convenience methods each run their own transaction and
/// must not be used from inside the closure passed to
/// [`execute`][Self::execute].
#[derive(Debug)]
pub struct KeyValueStore {
    storage_uri: Url,
    backend: Backend,
}

impl KeyValueStore {
    /// Opens the namespace in the store identified by the storage URI.
    pub fn create(
        storage_uri: &Url, namespace: &Ident
    ) -> Result<Self, KeyValueError> {
        Ok(KeyValueStore {
            storage_uri: storage_uri.clone(),
            backend: BACKENDS.open(storage_uri, namespace)?,
        })
    }

    pub fn storage_uri(&self) -> &Url {
        &self.storage_uri
    }

    /// Executes `op` as a single transaction.
    ///
    /// Everything `op` writes through the transaction is applied together
    /// if and only if `op` returns `Ok(_)`. The closure can return its own
    /// error type, as long as store errors can be converted into it.
    pub fn execute<F, T, E>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, E>,
        E: From<KeyValueError>,
    {
        self.backend.execute(op)
    }
}

/// # Single Key Access
impl KeyValueStore {
    /// Returns whether a key exists.
    pub fn has(
        &self, scope: Option<&Ident>, key: &Ident
    ) -> Result<bool, KeyValueError> {
        self.execute(|txn| txn.has(scope, key))
    }

    /// Gets the value for a key.
    ///
    /// Returns an error if the value cannot be deserialized and `Ok(None)`
    /// if it cannot be found.
    pub fn get<V: DeserializeOwned>(
        &self, scope: Option<&Ident>, key: &Ident
    ) -> Result<Option<V>, KeyValueError> {
        self.execute(|txn| txn.get(scope, key))
    }

    /// Stores a value, overwriting an existing one.
    pub fn store<V: Serialize>(
        &self, scope: Option<&Ident>, key: &Ident, value: &V
    ) -> Result<(), KeyValueError> {
        self.execute(|txn| txn.store(scope, key, value))
    }

    /// Returns all keys of the given scope in order.
    pub fn list_keys(
        &self, scope: Option<&Ident>
    ) -> Result<Vec<Box<Ident>>, KeyValueError> {
        self.execute(|txn| txn.list_keys(scope))
    }
}


//------------ KeyValueError -------------------------------------------------

/// An error happened while accessing the key-value store.
#[derive(Debug)]
pub enum KeyValueError {
    UnknownScheme(String),
    Serialize {
        scope: Option<Box<Ident>>,
        key: Box<Ident>,
        err: String,
    },
    Deserialize {
        scope: Option<Box<Ident>>,
        key: Box<Ident>,
        err: String,
    },
    Inner(BackendError),
}

impl KeyValueError {
    pub fn serialize(
        scope: Option<&Ident>, key: &Ident, err: impl fmt::Display
    ) -> Self {
        KeyValueError::Serialize {
            scope: scope.map(Into::into),
            key: key.into(),
            err: err.to_string()
        }
    }

    pub fn deserialize(
        scope: Option<&Ident>, key: &Ident, err: impl fmt::Display
    ) -> Self {
        KeyValueError::Deserialize {
            scope: scope.map(Into::into),
            key: key.into(),
            err: err.to_string()
        }
    }
}

impl fmt::Display for KeyValueError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KeyValueError::UnknownScheme(scheme) => {
                write!(f, "unknown storage scheme: {scheme}")
            }
            KeyValueError::Serialize { scope, key, err } => {
                match scope {
                    Some(scope) => {
                        write!(f,
                            "failed to serialize value for key '{key}' \
                            in scope '{scope}': {err}"
                        )
                    }
                    None => {
                        write!(f,
                            "failed to serialize value for key '{key}' \
                            in global scope: {err}"
                        )
                    }
                }
            }
            KeyValueError::Deserialize { scope, key, err } => {
                match scope {
                    Some(scope) => {
                        write!(f,
                            "failed to deserialize value for key '{key}' \
                            in scope '{scope}': {err}"
                        )
                    }
                    None => {
                        write!(f,
                            "failed to deserialize value for key '{key}' \
                            in global scope: {err}"
                        )
                    }
                }
            }
            KeyValueError::Inner(err) => err.fmt(f),
        }
    }
}

impl error::Error for KeyValueError { }


//============ Tests =========================================================
