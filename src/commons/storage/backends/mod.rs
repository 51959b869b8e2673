//! Storage backends.


//============ Modules =======================================================
//
// These need to be added to the macro invocation at the very bottom of this
// file.

mod disk;
mod memory;


//============ Backend Enum ==================================================

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use serde::de::DeserializeOwned;
use serde::ser::Serialize;
use url::Url;
use super::{Ident, KeyValueError};

macro_rules! store {
    ( $( ( $variant:ident, $module:ident ) )* ) => {

        //------------ BackendSystem -----------------------------------------

        /// All the backends available to the process.
        ///
        /// The system picks the backend for a storage URI by its scheme.
        #[derive(Debug, Default)]
        pub struct BackendSystem {
            $(
                $module: self::$module::System,
            )*
        }

        impl BackendSystem {
            fn location(
                &self, uri: &Url
            )  -> Result<Location, KeyValueError> {
                $(
                    match self.$module.location(uri) {
                        Ok(Some(location)) => {
                            return Ok(Location::$variant(location))
                        }
                        Ok(None) => { }
                        Err(err) => return Err(err.into())
                    }
                )*
                Err(KeyValueError::UnknownScheme(uri.scheme().into()))
            }

            pub fn open(
                &self, storage_uri: &Url, namespace: &Ident,
            ) -> Result<Backend, KeyValueError> {
                self.location(storage_uri)?.open(namespace)
            }
        }


        //------------ Location ----------------------------------------------

        #[derive(Debug)]
        enum Location {
            $(
                $variant( self::$module::Location ),
            )*
        }

        impl Location {
            fn open(
                &self, namespace: &Ident,
            ) -> Result<Backend, KeyValueError> {
                match self {
                    $(
                        Self::$variant(inner) => {
                            Ok(Backend(StoreInner::$variant(
                                inner.open(namespace)?
                            )))
                        }
                    )*
                }
            }
        }


        //------------ Backend -----------------------------------------------

        /// A namespace opened in one of the backends.
        #[derive(Debug)]
        pub struct Backend(StoreInner);

        #[derive(Debug)]
        enum StoreInner {
            $(
                $variant( self::$module::Store),
            )*
        }

        impl Backend {
            /// Executes `op` as a transaction.
            ///
            /// The transaction holds an exclusive lock on the namespace for
            /// its whole duration. Changes made through the transaction are
            /// only applied if `op` returns successfully. If it returns an
            /// error, nothing is changed.
            pub fn execute<F, T, E>(&self, op: F) -> Result<T, E>
            where
                F: FnOnce(&mut Transaction<'_>) -> Result<T, E>,
                E: From<KeyValueError>,
            {
                match &self.0 {
                    $(
                        StoreInner::$variant(inner) => inner.execute(op),
                    )*
                }
            }
        }


        //------------ Source ------------------------------------------------

        /// The committed state a transaction reads from.
        #[derive(Debug)]
        enum Source<'a> {
            $(
                $variant(&'a self::$module::Store),
            )*
        }

        $(
            impl<'a> From<&'a self::$module::Store> for Transaction<'a> {
                fn from(src: &'a self::$module::Store) -> Self {
                    Transaction::new(Source::$variant(src))
                }
            }
        )*

        impl Source<'_> {
            fn has(
                &self, scope: Option<&Ident>, key: &Ident
            ) -> Result<bool, KeyValueError> {
                match self {
                    $(
                        Self::$variant(inner) => Ok(inner.has(scope, key)?),
                    )*
                }
            }

            fn get_value(
                &self, scope: Option<&Ident>, key: &Ident
            ) -> Result<Option<Value>, KeyValueError> {
                match self {
                    $(
                        Self::$variant(inner) => {
                            Ok(inner.get_value(scope, key)?)
                        }
                    )*
                }
            }

            fn list_keys(
                &self, scope: Option<&Ident>
            ) -> Result<Vec<Box<Ident>>, KeyValueError> {
                match self {
                    $(
                        Self::$variant(inner) => Ok(inner.list_keys(scope)?),
                    )*
                }
            }
        }


        //------------ Error -------------------------------------------------

        #[derive(Debug)]
        pub struct Error(ErrorInner);

        #[derive(Debug)]
        enum ErrorInner {
            $(
                $variant(self::$module::Error),
            )*
        }

        $(
            impl From<self::$module::Error> for Error {
                fn from(src: self::$module::Error) -> Self {
                    Self(ErrorInner::$variant(src))
                }
            }

            impl From<self::$module::Error> for KeyValueError {
                fn from(src: self::$module::Error) -> Self {
                    KeyValueError::Inner(src.into())
                }
            }
        )*

        impl fmt::Display for Error {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                match &self.0 {
                    $(
                        ErrorInner::$variant(inner) => inner.fmt(f),
                    )*
                }
            }
        }
    }
}

store! {
    (Disk, disk)
    (Memory, memory)
}


//------------ Value ---------------------------------------------------------

pub type Value = serde_json::Value;


//------------ Transaction ---------------------------------------------------

/// Access to a namespace inside a transaction.
///
/// Reads see the committed state of the store overlaid with the changes
/// made earlier in the same transaction. Writes are only staged. They are
/// applied by the backend once the transaction finishes successfully.
#[derive(Debug)]
pub struct Transaction<'a> {
    source: Source<'a>,
    changes: Changes,
}

impl<'a> Transaction<'a> {
    fn new(source: Source<'a>) -> Self {
        Transaction { source, changes: Changes::default() }
    }

    fn into_changes(self) -> Changes {
        self.changes
    }
}

/// # Reading
impl Transaction<'_> {
    /// Returns whether the store contains the given key.
    pub fn has(
        &self, scope: Option<&Ident>, key: &Ident
    ) -> Result<bool, KeyValueError> {
        if self.changes.get(scope, key).is_some() {
            return Ok(true)
        }
        self.source.has(scope, key)
    }

    /// Returns the value stored under the given key.
    ///
    /// If the value does not exist, returns `Ok(None)`.
    pub fn get<T: DeserializeOwned>(
        &self, scope: Option<&Ident>, key: &Ident
    ) -> Result<Option<T>, KeyValueError> {
        let value = match self.changes.get(scope, key) {
            Some(value) => Some(value.clone()),
            None => self.source.get_value(scope, key)?,
        };
        value.map(|value| {
            serde_json::from_value(value).map_err(|err| {
                KeyValueError::deserialize(scope, key, err)
            })
        }).transpose()
    }

    /// Returns all the keys in the given scope in order.
    pub fn list_keys(
        &self, scope: Option<&Ident>
    ) -> Result<Vec<Box<Ident>>, KeyValueError> {
        let mut keys: BTreeSet<_> =
            self.source.list_keys(scope)?.into_iter().collect();
        keys.extend(self.changes.in_scope(scope).map(Into::into));
        Ok(keys.into_iter().collect())
    }
}

/// # Writing
impl Transaction<'_> {
    /// Stores a value under the given key.
    ///
    /// Quietly overwrites a possibly already existing value.
    pub fn store<T: Serialize>(
        &mut self, scope: Option<&Ident>, key: &Ident, value: &T
    ) -> Result<(), KeyValueError> {
        let value = serde_json::to_value(value).map_err(|err| {
            KeyValueError::serialize(scope, key, err)
        })?;
        self.changes.insert(scope, key, value);
        Ok(())
    }
}


//------------ Changes -------------------------------------------------------

/// The values stored by a transaction.
#[derive(Clone, Debug, Default)]
struct Changes(BTreeMap<(Option<Box<Ident>>, Box<Ident>), Value>);

impl Changes {
    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn get(&self, scope: Option<&Ident>, key: &Ident) -> Option<&Value> {
        let key: (Option<Box<Ident>>, Box<Ident>) = (
            scope.map(Into::into), key.into()
        );
        self.0.get(&key)
    }

    fn insert(&mut self, scope: Option<&Ident>, key: &Ident, value: Value) {
        self.0.insert((scope.map(Into::into), key.into()), value);
    }

    fn in_scope<'s>(
        &'s self, scope: Option<&'s Ident>
    ) -> impl Iterator<Item = &'s Ident> + 's {
        self.0.keys().filter_map(move |(change_scope, key)| {
            (change_scope.as_deref() == scope).then_some(key.as_ref())
        })
    }

    fn iter(&self) -> impl Iterator<Item = (Option<&Ident>, &Ident, &Value)> {
        self.0.iter().map(|((scope, key), value)| {
            (scope.as_deref(), key.as_ref(), value)
        })
    }
}
