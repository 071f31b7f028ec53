//! JSON file store with atomic writes.

use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::Store;
use crate::error::{Error, Result};

/// Write `data` to `path` through a temp file in the same directory and an
/// atomic rename.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Store persisted as a single JSON object on disk.
///
/// The whole object is kept in memory; each write batch rewrites the file
/// atomically.
pub struct JsonFileStore {
    path: PathBuf,
    values: RwLock<Map<String, Value>>,
}

impl JsonFileStore {
    /// Open the store at `path`, creating parent directories as needed. A
    /// missing file is an empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let values = if path.exists() {
            let content = fs::read_to_string(&path)?;
            match serde_json::from_str::<Value>(&content)? {
                Value::Object(map) => map,
                _ => {
                    return Err(Error::Config(format!(
                        "state file {:?} is not a JSON object",
                        path
                    )))
                }
            }
        } else {
            Map::new()
        };

        log::debug!("Opened state file {:?} ({} keys)", path, values.len());

        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, values: &Map<String, Value>) -> Result<()> {
        let content = serde_json::to_vec_pretty(values)?;
        write_atomic(&self.path, &content)
    }
}

impl Store for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, items: Vec<(String, Value)>) -> Result<()> {
        let mut guard = self.values.write();
        let mut next = guard.clone();
        for (key, value) in items {
            next.insert(key, value);
        }
        self.flush(&next)?;
        *guard = next;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut guard = self.values.write();
        if !guard.contains_key(key) {
            return Ok(());
        }
        let mut next = guard.clone();
        next.remove(key);
        self.flush(&next)?;
        *guard = next;
        Ok(())
    }
}
