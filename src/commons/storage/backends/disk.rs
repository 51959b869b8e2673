//! Filesystem-based storage.

use std::{error, fmt, fs, io};
use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use log::{trace, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use url::Url;
use crate::commons::storage::{Ident, KeyValueError};
use super::{Changes, Transaction as SuperTransaction};


//------------ Constants -----------------------------------------------------

/// The directory under the root that contains temporary files.
const TMP_FILE_DIR: &str = ".tmp";

/// The directory under the root that contains the lock files.
const LOCK_FILE_DIR: &str = ".locks";

/// The directory under the root that contains commit journals.
const JOURNAL_DIR: &str = ".journal";

/// The name of the lock file for a namespace.
pub const LOCK_FILE_NAME: &str = "lockfile.lock";


//------------ System --------------------------------------------------------

#[derive(Debug, Default)]
pub struct System(());

impl System {
    pub fn location(&self, uri: &Url) -> Result<Option<Location>, Error> {
        Ok(Uri::parse_uri(uri)?.map(|uri| Location { base: uri.path }))
    }
}


//------------ Location ------------------------------------------------------

#[derive(Debug)]
pub struct Location {
    /// The base directory.
    ///
    /// All the namespaces plus the temporary, lock, and journal directories
    /// are under this directory.
    base: PathBuf,
}

impl Location {
    pub fn open(
        &self, namespace: &Ident,
    ) -> Result<Store, Error> {
        Store::new(&self.base, namespace)
    }
}


//------------ Store ---------------------------------------------------------

/// A storage backend that uses the filesystem for storing values.
///
/// The backend uses files under a base directory. Each namespace will have
/// its own directory under this base. A key’s scope is translated into a
/// directory under the namespace directory and the key itself becomes the
/// file name. Values are stored in this file as JSON.
///
/// Every transaction takes an exclusive advisory lock on the file
/// `.locks/$(namespace)/lockfile.lock`, so transactions are serialized
/// across processes.
///
/// Changes are committed in two steps. First, all of them are written to
/// the journal file `.journal/$(namespace).json`, which replaces the
/// previous journal atomically. Then they are applied to the individual
/// files, each of which is also replaced atomically, and the journal is
/// removed. If the process dies in between, the next transaction finds the
/// journal and applies it again before doing anything else.
#[derive(Debug)]
pub struct Store {
    /// The root path for the namespace.
    root: PathBuf,

    /// The path for temporary files.
    ///
    /// This will be directly under the base directory and shared between
    /// namespaces.
    tmp: PathBuf,

    /// The path of the lock directory for this namespace.
    locks: PathBuf,

    /// The path of the journal file for this namespace.
    journal: PathBuf,
}

impl Store {
    fn new(
        path: &Path, namespace: &Ident,
    ) -> Result<Self, Error> {
        let root = path.join(namespace.as_str());
        let tmp = path.join(TMP_FILE_DIR);
        let mut locks = path.join(LOCK_FILE_DIR);
        locks.push(namespace.as_str());
        let mut journal = path.join(JOURNAL_DIR);
        Self::create_dirs(Some(&journal))?;
        journal.push(format!("{namespace}.json"));

        fs::create_dir_all(&tmp).map_err(|err| {
            Error::io(
                format!(
                    "failed to create temporary directory '{}'",
                    tmp.display()
                ),
                err
            )
        })?;

        Ok(Self { root, tmp, locks, journal })
    }

    pub fn execute<F, T, E>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce(&mut SuperTransaction<'_>) -> Result<T, E>,
        E: From<KeyValueError>,
    {
        let mut file_lock = FileLock::create(self.locks.clone())
            .map_err(KeyValueError::from)?;
        let _write_lock = file_lock.write().map_err(KeyValueError::from)?;

        self.replay_journal().map_err(KeyValueError::from)?;

        let mut transaction = SuperTransaction::from(self);
        let res = op(&mut transaction)?;
        self.commit(transaction.into_changes())
            .map_err(KeyValueError::from)?;
        Ok(res)
    }

    /// Returns the path for the given key.
    fn key_path(&self, scope: Option<&Ident>, key: &Ident) -> PathBuf {
        let mut path = self.scope_path(scope);
        path.push(key.as_str());
        path
    }

    /// Returns the path for the given scope.
    fn scope_path(&self, scope: Option<&Ident>) -> PathBuf {
        let mut res = self.root.clone();
        if let Some(scope) = scope {
            res.push(scope.as_str());
        }
        res
    }
}


/// # Committing
impl Store {
    fn commit(&self, changes: Changes) -> Result<(), Error> {
        if changes.is_empty() {
            return Ok(())
        }

        let journal: Vec<_> = changes.iter().map(|(scope, key, value)| {
            JournalEntry {
                scope: scope.map(|scope| scope.as_str().into()),
                key: key.as_str().into(),
                value: value.clone(),
            }
        }).collect();

        self.write_file(&self.journal, &journal)?;
        self.apply_journal(&journal)?;
        self.remove_journal()?;

        trace!(
            "committed {} changes to '{}'",
            journal.len(), self.root.display()
        );
        Ok(())
    }

    /// Applies a journal left behind by an unfinished commit.
    fn replay_journal(&self) -> Result<(), Error> {
        let journal: Vec<JournalEntry> = match Self::read_file(
            &self.journal
        )? {
            Some(journal) => journal,
            None => return Ok(())
        };

        warn!(
            "Completing interrupted commit of {} changes in '{}'",
            journal.len(), self.root.display()
        );
        self.apply_journal(&journal)?;
        self.remove_journal()
    }

    fn apply_journal(&self, journal: &[JournalEntry]) -> Result<(), Error> {
        for entry in journal {
            let scope = match entry.scope.as_ref() {
                Some(scope) => Some(Self::journal_ident(scope)?),
                None => None,
            };
            let key = Self::journal_ident(&entry.key)?;
            let path = self.key_path(scope, key);
            Self::create_dirs(path.parent())?;
            self.write_file(&path, &entry.value)?;
        }
        Ok(())
    }

    fn journal_ident(s: &str) -> Result<&Ident, Error> {
        Ident::from_str(s).map_err(|err| {
            Error::other(format!("invalid key '{s}' in journal: {err}"))
        })
    }

    fn remove_journal(&self) -> Result<(), Error> {
        fs::remove_file(&self.journal).map_err(|err| {
            Error::io(
                format!(
                    "failed to remove journal '{}'", self.journal.display()
                ),
                err
            )
        })
    }
}


/// # Reading
impl Store {
    /// Returns whether the store contains the given key.
    pub fn has(
        &self, scope: Option<&Ident>, key: &Ident
    ) -> Result<bool, Error> {
        self.key_path(scope, key).try_exists().map_err(|err| {
            Error::io(
                format!("failed to check existance of key '{key}'"),
                err
            )
        })
    }

    /// Returns the contents of the stored value with the given key.
    ///
    /// If the value does not exist, returns `Ok(None)`.
    pub fn get_value(
        &self, scope: Option<&Ident>, key: &Ident
    ) -> Result<Option<Value>, Error> {
        Self::read_file(&self.key_path(scope, key))
    }

    /// Returns all the keys in the given scope.
    ///
    /// Files with names that aren’t valid idents are ignored.
    pub fn list_keys(
        &self, scope: Option<&Ident>
    ) -> Result<Vec<Box<Ident>>, Error> {
        let path = self.scope_path(scope);
        let mut res = Vec::new();
        let dir = match fs::read_dir(&path) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(res);
            }
            Err(err) => {
                return Err(Error::io(
                    format!(
                        "failed to read directory '{}'", path.display()
                    ),
                    err
                ));
            }
        };
        for item in dir {
            let item = item.map_err(|err| {
                Error::io(
                    format!(
                        "failed to read directory '{}'", path.display()
                    ),
                    err
                )
            })?;
            let file_type = item.file_type().map_err(|err| {
                Error::io(
                    format!(
                        "failed to read directory '{}'", path.display()
                    ),
                    err
                )
            })?;
            if file_type.is_file() {
                if let Some(name) =
                    item.file_name().into_string().ok().and_then(|name| {
                        Ident::boxed_from_string(name).ok()
                    })
                {
                    res.push(name)
                }
            }
        }

        Ok(res)
    }
}


/// # Files
impl Store {
    /// Reads a JSON file.
    ///
    /// Returns `Ok(None)` if the file doesn’t exist.
    fn read_file<T: for<'de> Deserialize<'de>>(
        path: &Path
    ) -> Result<Option<T>, Error> {
        let file = match File::open(path) {
            Ok(file) => io::BufReader::new(file),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(None)
            }
            Err(err) => {
                return Err(Error::io(
                    format!("failed to open file '{}'", path.display()),
                    err
                ))
            }
        };
        match serde_json::from_reader(file) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                if err.is_io() {
                    Err(Error::io(
                        format!(
                            "failed to read stored file '{}'",
                            path.display()
                        ),
                        err.into()
                    ))
                }
                else {
                    Err(Error::deserialize(path, err))
                }
            }
        }
    }

    /// Atomically replaces a file with the JSON of `value`.
    fn write_file<T: Serialize>(
        &self, path: &Path, value: &T
    ) -> Result<(), Error> {
        // Write to a temporary file first to ensure that the file can be
        // written entirely.
        //
        // tempfile ensures that the temporary file is cleaned up in case it
        // would be left behind because of some issue.
        let mut tmp_file = NamedTempFile::new_in(&self.tmp).map_err(|err| {
            Error::io(
                format!(
                    "writing temp file failed for '{}'", path.display()
                ),
                err,
            )
        })?;

        if let Err(err) = Self::write_json(&mut tmp_file, value) {
            if err.is_io() {
                return Err(Error::io(
                    format!(
                        "failed to write temp file '{}' for '{}'",
                        tmp_file.as_ref().display(),
                        path.display()
                    ),
                    err.into(),
                ))
            }
            else {
                return Err(Error::serialize(path, err))
            }
        }

        tmp_file.as_file().sync_all().map_err(|err| {
            Error::io(
                format!(
                    "failed to sync temp file '{}' for '{}'",
                    tmp_file.as_ref().display(),
                    path.display()
                ),
                err,
            )
        })?;

        // Move the temporary file to its final location.
        tmp_file.persist(path).map_err(|err| {
            Error::io(
                format!(
                    "failed to rename temp file '{}' to '{}'",
                    err.file.path().display(),
                    path.display()
                ),
                err.error,
            )
        })?;

        Ok(())
    }

    /// Writes the JSON of `value` to `target`.
    ///
    /// Only returns successfully once everything has been handed to
    /// `target`.
    fn write_json<W: Write, T: Serialize>(
        target: W, value: &T
    ) -> Result<(), serde_json::Error> {
        let mut writer = io::BufWriter::new(target);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush().map_err(serde_json::Error::io)
    }

    /// Creates the given directory if necessary.
    fn create_dirs(path: Option<&Path>) -> Result<(), Error> {
        if let Some(path) = path {
            fs::create_dir_all(path).map_err(|err| {
                Error::io(
                    format!(
                        "Failed to create directory '{}'", path.display()
                    ),
                    err
                )
            })?;
        }
        Ok(())
    }
}


//------------ JournalEntry --------------------------------------------------

/// One value recorded in the commit journal.
#[derive(Clone, Debug, Deserialize, Serialize)]
struct JournalEntry {
    scope: Option<String>,
    key: String,
    value: Value,
}


//------------ FileLock ------------------------------------------------------

#[derive(Debug)]
struct FileLock {
    lock: fd_lock::RwLock<File>,
}

impl FileLock {
    fn create(path: PathBuf) -> Result<Self, Error> {
        let lock_path = path.join(LOCK_FILE_NAME);
        Store::create_dirs(Some(&path))?;

        let mut options = OpenOptions::new();
        options.create(true).truncate(false).read(true).write(true);
        let lock_file = options.open(&lock_path).map_err(|err| {
            Error::io(
                format!(
                    "failed to open lock file '{}'", lock_path.display(),
                ),
                err
            )
        })?;

        Ok(FileLock { lock: fd_lock::RwLock::new(lock_file) })
    }

    fn write(&mut self) -> Result<fd_lock::RwLockWriteGuard<'_, File>, Error> {
        self.lock
            .write()
            .map_err(|e| Error::other(format!("Cannot get file lock: {e}")))
    }
}


//------------ Uri -----------------------------------------------------------

/// A `local:` or `file:` storage URI.
///
/// The path may be relative in which case the host part of the URI is
/// its first component, i.e., `local://./data` refers to the directory
/// `./data` and `local:///var/lib/roahist` to `/var/lib/roahist`.
#[derive(Clone, Debug, PartialEq)]
pub struct Uri {
    path: PathBuf,
}

impl Uri {
    pub fn parse_uri(uri: &Url) -> Result<Option<Uri>, Error> {
        if uri.scheme() != "file" && uri.scheme() != "local" {
            return Ok(None)
        }

        let path = format!(
            "{}{}", uri.host_str().unwrap_or_default(), uri.path()
        );
        if path.is_empty() {
            return Err(Error::other(format!(
                "missing path in storage URI '{uri}'"
            )))
        }
        Ok(Some(Uri { path: path.into() }))
    }
}


//------------ Error ---------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    Io {
        context: Cow<'static, str>,
        err: io::Error,
    },
    Deserialize {
        path: PathBuf,
        err: String,
    },
    Serialize {
        path: PathBuf,
        err: String,
    },
    Other(String),
}

impl Error {
    fn io(context: impl Into<Cow<'static, str>>, err: io::Error) -> Self {
        Error::Io { context: context.into(), err }
    }

    fn deserialize(path: &Path, err: impl fmt::Display) -> Self {
        Error::Deserialize { path: path.into(), err: err.to_string() }
    }

    fn serialize(path: &Path, err: impl fmt::Display) -> Self {
        Error::Serialize { path: path.into(), err: err.to_string() }
    }

    fn other(info: impl Into<String>) -> Self {
        Error::Other(info.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io { context, err } => {
                write!(f, "{context}: {err}")
            }
            Error::Deserialize { path, err } => {
                write!(f,
                    "failed to deserialize file '{}': {}",
                    path.display(), err
                )
            }
            Error::Serialize { path, err } => {
                write!(f,
                    "failed to serialize value for '{}': {}",
                    path.display(), err
                )
            }
            Error::Other(s) => f.write_str(s)
        }
    }
}

impl error::Error for Error { }


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commons::storage::KeyValueStore;

    fn uri(dir: &Path) -> Url {
        Url::parse(&format!("local://{}", dir.display())).unwrap()
    }

    #[test]
    fn parse_uris() {
        let uri = Url::parse("local://./data").unwrap();
        assert_eq!(
            Uri::parse_uri(&uri).unwrap().unwrap().path,
            PathBuf::from("./data")
        );
        let uri = Url::parse("local:///var/lib/roahist").unwrap();
        assert_eq!(
            Uri::parse_uri(&uri).unwrap().unwrap().path,
            PathBuf::from("/var/lib/roahist")
        );
        let uri = Url::parse("memory:").unwrap();
        assert!(Uri::parse_uri(&uri).unwrap().is_none());
    }

    #[test]
    fn store_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let ns = Ident::make("test");
        let scope = Ident::make("scope");
        let key = Ident::make("key.json");

        let store = KeyValueStore::create(&uri(dir.path()), ns).unwrap();
        assert!(store.list_keys(None).unwrap().is_empty());
        store.store(Some(scope), key, &"value").unwrap();
        store.store(None, key, &42u32).unwrap();

        let store = KeyValueStore::create(&uri(dir.path()), ns).unwrap();
        assert_eq!(
            store.get::<String>(Some(scope), key).unwrap().as_deref(),
            Some("value")
        );
        assert_eq!(store.get::<u32>(None, key).unwrap(), Some(42));
        assert!(dir.path().join("test/scope/key.json").is_file());
        assert!(!dir.path().join(".journal/test.json").exists());
    }

    #[test]
    fn failed_transaction_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyValueStore::create(
            &uri(dir.path()), Ident::make("test")
        ).unwrap();
        let key = Ident::make("key");

        let res: Result<(), KeyValueError> = store.execute(|txn| {
            txn.store(None, key, &1u8)?;
            Err(KeyValueError::deserialize(None, key, "failed"))
        });
        assert!(res.is_err());
        assert!(!store.has(None, key).unwrap());
        assert!(!dir.path().join("test").join("key").exists());
    }

    /// A writer that accepts nothing, like a full disk.
    struct FullDisk;

    impl io::Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("no space left on device"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_buffered_write_is_reported() {
        // Small enough to stay in the buffer until the final flush.
        let err = Store::write_json(FullDisk, &"x".repeat(3000)).unwrap_err();
        assert!(err.is_io());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn full_device_is_reported() {
        let Ok(file) = OpenOptions::new().write(true).open("/dev/full") else {
            return
        };
        assert!(Store::write_json(file, &"value").is_err());
    }

    #[test]
    fn replay_unfinished_commit() {
        let dir = tempfile::tempdir().unwrap();
        let ns = Ident::make("test");
        let store = KeyValueStore::create(&uri(dir.path()), ns).unwrap();
        store.store(None, Ident::make("kept"), &0u8).unwrap();

        // Leave a journal behind as if the process died while committing.
        let journal = vec![
            JournalEntry {
                scope: Some("scope".into()),
                key: "key".into(),
                value: Value::from(7),
            },
            JournalEntry {
                scope: None,
                key: "kept".into(),
                value: Value::from(1),
            },
        ];
        fs::write(
            dir.path().join(".journal/test.json"),
            serde_json::to_vec(&journal).unwrap()
        ).unwrap();

        let store = KeyValueStore::create(&uri(dir.path()), ns).unwrap();
        assert_eq!(
            store.get::<u8>(Some(Ident::make("scope")), Ident::make("key"))
                .unwrap(),
            Some(7)
        );
        assert_eq!(store.get::<u8>(None, Ident::make("kept")).unwrap(), Some(1));
        assert!(!dir.path().join(".journal/test.json").exists());
    }
}
