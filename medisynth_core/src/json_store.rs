//! File-backed record store with atomic writes and file locking.
//!
//! All collections live in a single JSON document. Every mutation loads the
//! document, applies the change and atomically replaces the file, so a
//! reader never sees a half-written document. Multi-document edits hold
//! [`RecordStore::lock`], an exclusive advisory lock on a sibling lock file,
//! to keep concurrent processes from interleaving.

use crate::store::{Collections, Delta, RecordStore, StoreLock};
use crate::{Entity, EntityKind, Error, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const RECORDS_FILE: &str = "records.json";
const LOCK_FILE: &str = "records.lock";

/// Record store persisted as `records.json` in a data directory
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonStore {
    /// Open (or lazily create) a store rooted at `data_dir`
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            path: data_dir.join(RECORDS_FILE),
            lock_path: data_dir.join(LOCK_FILE),
        })
    }

    /// Path of the records document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every collection
    ///
    /// Returns empty collections if the file doesn't exist yet. Unlike a
    /// preferences file, a corrupted records file is an error: silently
    /// starting empty would drop every allocation.
    fn load(&self) -> Result<Collections> {
        if !self.path.exists() {
            tracing::debug!("No records file at {:?}, starting empty", self.path);
            return Ok(Collections::default());
        }

        let file = File::open(&self.path)?;
        let mut contents = String::new();
        std::io::BufReader::new(&file).read_to_string(&mut contents)?;

        let records = serde_json::from_str::<Collections>(&contents).map_err(|e| {
            tracing::warn!("Failed to parse records file {:?}: {}", self.path, e);
            Error::Store(format!("corrupted records file {:?}: {}", self.path, e))
        })?;
        Ok(records)
    }

    /// Atomically replace the records file:
    /// 1. Write to a temp file in the same directory
    /// 2. Sync to disk
    /// 3. Rename over the original
    fn save(&self, records: &Collections) -> Result<()> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| Error::Store(format!("records path {:?} has no parent", self.path)))?;
        let temp = NamedTempFile::new_in(parent)?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string(records)?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        tracing::trace!("Saved records to {:?}", self.path);
        Ok(())
    }

    fn modify<T>(&self, f: impl FnOnce(&mut Collections) -> Result<T>) -> Result<T> {
        let mut records = self.load()?;
        let out = f(&mut records)?;
        self.save(&records)?;
        Ok(out)
    }
}

impl RecordStore for JsonStore {
    fn find_one(&self, kind: EntityKind, key: &str) -> Result<Option<Entity>> {
        Ok(self.load()?.find(kind, key))
    }

    fn list(&self, kind: EntityKind) -> Result<Vec<Entity>> {
        Ok(self.load()?.list(kind))
    }

    fn insert_one(&self, entity: Entity) -> Result<()> {
        self.modify(|records| records.insert(entity))
    }

    fn update_one(&self, kind: EntityKind, key: &str, delta: &Delta) -> Result<Entity> {
        self.modify(|records| records.apply(kind, key, delta))
    }

    fn delete_one(&self, kind: EntityKind, key: &str) -> Result<Entity> {
        self.modify(|records| records.remove(kind, key))
    }

    fn lock(&self) -> Result<StoreLock> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.lock_path)?;

        // Blocks until other writers release; released when the file is closed
        file.lock_exclusive()?;
        Ok(StoreLock::file(file))
    }
}
