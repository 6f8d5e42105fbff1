use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use cookie::Cookie;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{CookieStore, KeyValueStore, is_removal, lock};
use crate::error::Error;

/// A JSON object persisted to a single file, rewritten on every change.
#[derive(Debug)]
struct JsonFile<T> {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, T>>,
}

impl<T: Serialize + DeserializeOwned + Clone> JsonFile<T> {
    fn open(path: PathBuf) -> Result<Self, Error> {
        let entries = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(Error::Storage(format!("{}: {e}", path.display()))),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn get(&self, key: &str) -> Option<T> {
        lock(&self.entries).get(key).cloned()
    }

    fn update(&self, f: impl FnOnce(&mut BTreeMap<String, T>)) -> Result<(), Error> {
        let mut entries = lock(&self.entries);
        f(&mut entries);
        let bytes = serde_json::to_vec_pretty(&*entries)?;
        write_replace(&self.path, &bytes)
    }
}

/// Write to a sibling temp file, then rename over the target.
fn write_replace(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let storage_err = |e: std::io::Error| Error::Storage(format!("{}: {e}", path.display()));
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(storage_err)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(storage_err)?;
    fs::rename(&tmp, path).map_err(storage_err)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCookie {
    value: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    secure: bool,
}

/// Cookie store persisted as a JSON file.
#[derive(Debug)]
pub struct FileCookieStore {
    file: JsonFile<StoredCookie>,
}

impl FileCookieStore {
    /// Open (or lazily create) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the file exists but cannot be read, or
    /// [`Error::Serialization`] if its contents are not a valid store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        Ok(Self {
            file: JsonFile::open(path.into())?,
        })
    }

    /// Open `cookies.json` inside `dir`.
    ///
    /// # Errors
    ///
    /// See [`FileCookieStore::open`].
    pub fn in_dir(dir: impl AsRef<Path>) -> Result<Self, Error> {
        Self::open(dir.as_ref().join("cookies.json"))
    }

    /// Full cookie as stored, including its attributes.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<Cookie<'static>> {
        self.file.get(name).map(|stored| {
            let mut cookie = Cookie::new(name.to_string(), stored.value);
            if let Some(path) = stored.path {
                cookie.set_path(path);
            }
            cookie.set_secure(stored.secure);
            cookie
        })
    }
}

impl CookieStore for FileCookieStore {
    fn get(&self, name: &str) -> Option<String> {
        self.file.get(name).map(|stored| stored.value)
    }

    fn add(&self, cookie: Cookie<'static>) -> Result<(), Error> {
        let name = cookie.name().to_string();
        if is_removal(&cookie) {
            return self.file.update(|entries| {
                entries.remove(&name);
            });
        }
        let stored = StoredCookie {
            value: cookie.value().to_string(),
            path: cookie.path().map(str::to_string),
            secure: cookie.secure().unwrap_or(false),
        };
        self.file.update(|entries| {
            entries.insert(name, stored);
        })
    }
}

/// Key-value store persisted as a JSON file.
#[derive(Debug)]
pub struct FileKeyValueStore {
    file: JsonFile<String>,
}

impl FileKeyValueStore {
    /// Open (or lazily create) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the file exists but cannot be read, or
    /// [`Error::Serialization`] if its contents are not a valid store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        Ok(Self {
            file: JsonFile::open(path.into())?,
        })
    }

    /// Open `storage.json` inside `dir`.
    ///
    /// # Errors
    ///
    /// See [`FileKeyValueStore::open`].
    pub fn in_dir(dir: impl AsRef<Path>) -> Result<Self, Error> {
        Self::open(dir.as_ref().join("storage.json"))
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Option<String> {
        self.file.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        self.file.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), Error> {
        self.file.update(|entries| {
            entries.remove(key);
        })
    }
}
