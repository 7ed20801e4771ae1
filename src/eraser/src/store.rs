//! Metadata store implementations for the persisted cycle record.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::collaborators::MetadataStore;
use crate::error::{EraserError, EraserResult};

/// One file per key; writes go to a temporary file that is synced and renamed.
#[derive(Debug, Clone)]
pub struct FileMetadataStore {
    dir: PathBuf,
}

impl FileMetadataStore {
    pub fn new(dir: impl Into<PathBuf>) -> EraserResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| EraserError::io(format!("creating {}", dir.display()), e))?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        Self::record_path(&self.dir, key)
    }

    /// Where a store rooted at `dir` keeps `key`. Touches nothing on disk.
    pub fn record_path(dir: &Path, key: &str) -> PathBuf {
        dir.join(format!("{key}.bin"))
    }

    /// Reads a record directly from `path`, without a store.
    pub fn read_path(path: &Path) -> EraserResult<Vec<u8>> {
        fs::read(path).map_err(|e| EraserError::io(format!("reading {}", path.display()), e))
    }
}

impl MetadataStore for FileMetadataStore {
    fn get(&self, key: &str) -> EraserResult<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EraserError::io(format!("reading {}", path.display()), e)),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> EraserResult<()> {
        let path = self.path_for(key);
        let tmp = self.dir.join(format!("{key}.tmp"));

        let mut file = File::create(&tmp)
            .map_err(|e| EraserError::io(format!("creating {}", tmp.display()), e))?;
        file.write_all(value)
            .and_then(|_| file.sync_all())
            .map_err(|e| EraserError::io(format!("writing {}", tmp.display()), e))?;
        drop(file);

        fs::rename(&tmp, &path)
            .map_err(|e| EraserError::io(format!("renaming to {}", path.display()), e))?;
        sync_dir(&self.dir)
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> EraserResult<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| EraserError::io(format!("syncing {}", dir.display()), e))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> EraserResult<()> {
    Ok(())
}

/// Volatile store, for engines without durable metadata and for tests.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    records: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn get(&self, key: &str) -> EraserResult<Option<Vec<u8>>> {
        let records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(records.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> EraserResult<()> {
        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.insert(key.to_string(), value.to_vec());
        Ok(())
    }
}
