//! In-memory storage.

use std::{error, fmt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use log::trace;
use serde_json::Value;
use url::Url;
use crate::commons::storage::{Ident, KeyValueError};
use super::{Changes, Transaction as SuperTransaction};


//------------ System --------------------------------------------------------

/// All memory locations of the process.
///
/// Locations live for as long as the process, so opening the same
/// `memory:` URI twice gives access to the same data.
#[derive(Debug, Default)]
pub struct System {
    locations: Mutex<HashMap<Option<String>, Location>>,
}

impl System {
    pub fn location(&self, uri: &Url) -> Result<Option<Location>, Error> {
        let Some(name) = Self::parse_uri(uri)? else {
            return Ok(None)
        };
        let mut locations = self.locations.lock().expect("poisoned lock");
        Ok(Some(locations.entry(name).or_default().clone()))
    }

    /// Returns the location name for a `memory:` URI.
    ///
    /// Both `memory:` and `memory:name` are accepted. A name with a slash
    /// is rejected.
    fn parse_uri(uri: &Url) -> Result<Option<Option<String>>, Error> {
        if uri.scheme() != "memory" {
            return Ok(None)
        }
        let name = uri.path();
        if name.is_empty() {
            return Ok(Some(None))
        }
        if name.contains('/') || uri.has_host() {
            return Err(Error::BadUri(uri.to_string()))
        }
        Ok(Some(Some(name.into())))
    }
}


//------------ Location ------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct Location {
    namespaces: Arc<Mutex<HashMap<Box<Ident>, Arc<MemoryNamespace>>>>,
}

impl Location {
    pub fn open(
        &self, namespace: &Ident,
    ) -> Result<Store, Error> {
        let mut namespaces = self.namespaces.lock().expect("poisoned lock");
        Ok(Store::new(
            namespaces.entry(namespace.into()).or_default().clone()
        ))
    }
}


//------------ Store ---------------------------------------------------------

/// A storage backend keeping all values in memory.
///
/// A transaction holds the namespace’s transaction lock while it runs and
/// applies its changes while holding the value lock, so readers never see
/// a partially applied transaction.
#[derive(Debug)]
pub struct Store {
    namespace: Arc<MemoryNamespace>,
}

impl Store {
    fn new(namespace: Arc<MemoryNamespace>) -> Self {
        Store { namespace }
    }

    pub fn execute<F, T, E>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce(&mut SuperTransaction<'_>) -> Result<T, E>,
        E: From<KeyValueError>,
    {
        let _lock = self.namespace.transaction.lock().expect("poisoned lock");
        let mut transaction = SuperTransaction::from(self);
        let res = op(&mut transaction)?;
        self.commit(transaction.into_changes());
        Ok(res)
    }

    fn commit(&self, changes: Changes) {
        if changes.is_empty() {
            return
        }
        let mut scopes = self.namespace.scopes();
        for (scope, key, value) in changes.iter() {
            scopes.get_or_create(scope).insert(key.into(), value.clone());
        }
        trace!("committed {} changes to memory store", changes.len());
    }
}


/// # Reading
impl Store {
    /// Returns whether the store contains the given key.
    pub fn has(
        &self, scope: Option<&Ident>, key: &Ident
    ) -> Result<bool, Error> {
        Ok(
            self.namespace.scopes().get(scope).map(|scope| {
                scope.contains_key(key)
            }).unwrap_or(false)
        )
    }

    /// Returns the stored value with the given key.
    pub fn get_value(
        &self, scope: Option<&Ident>, key: &Ident
    ) -> Result<Option<Value>, Error> {
        Ok(
            self.namespace.scopes().get(scope).and_then(|scope| {
                scope.get(key).cloned()
            })
        )
    }

    /// Returns all the keys in the given scope.
    pub fn list_keys(
        &self, scope: Option<&Ident>
    ) -> Result<Vec<Box<Ident>>, Error> {
        let scopes = self.namespace.scopes();
        let Some(scope) = scopes.get(scope) else {
            return Ok(Vec::new())
        };
        Ok(scope.keys().cloned().collect())
    }
}


//------------ MemoryValues --------------------------------------------------

type MemoryValues = HashMap<Box<Ident>, Value>;


//------------ MemoryScopes --------------------------------------------------

#[derive(Debug, Default)]
struct MemoryScopes {
    global: MemoryValues,
    scopes: HashMap<Box<Ident>, MemoryValues>,
}

impl MemoryScopes {
    fn get(&self, scope: Option<&Ident>) -> Option<&MemoryValues> {
        match scope {
            Some(scope) => self.scopes.get(scope),
            None => Some(&self.global)
        }
    }

    fn get_or_create(&mut self, scope: Option<&Ident>) -> &mut MemoryValues {
        match scope {
            Some(scope) => self.scopes.entry(scope.into()).or_default(),
            None => &mut self.global
        }
    }
}


//------------ MemoryNamespace -----------------------------------------------

#[derive(Debug, Default)]
struct MemoryNamespace {
    scopes: Mutex<MemoryScopes>,
    transaction: Mutex<()>,
}

impl MemoryNamespace {
    fn scopes(&self) -> MutexGuard<'_, MemoryScopes> {
        self.scopes.lock().expect("poisoned lock")
    }
}


//------------ Error ---------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    BadUri(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::BadUri(uri) => {
                write!(f, "invalid memory storage URI '{uri}'")
            }
        }
    }
}

impl error::Error for Error { }


//============ Tests =========================================================
