//! Durable mirror of the machine registry.
//!
//! [`PersistenceStore`] is a key-value interface from the string form of a
//! machine id to its [`MachineRecord`]. Writes are staged with `put` /
//! `delete` and committed with `flush`, so callers can batch many changes
//! into one write.

use crate::serialize::{CodecError, MachineRecord, StoreDocument, StoreFormat};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("store codec error in {path}: {source}")]
    Codec {
        path: PathBuf,
        #[source]
        source: CodecError,
    },
}

/// Key-value storage for machine records.
pub trait PersistenceStore: Send {
    /// Read every committed record. A store that has never been written is
    /// empty, not an error.
    fn load_all(&mut self) -> Result<BTreeMap<String, MachineRecord>, StoreError>;

    /// Stage a record for `id`.
    fn put(&mut self, id: &str, record: MachineRecord);

    /// Stage removal of `id`.
    fn delete(&mut self, id: &str);

    /// Commit staged changes to durable media.
    fn flush(&mut self) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// A store whose "durable" state lives in memory. Clones share the committed
/// map, so a second registry can load what the first one flushed.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    committed: Arc<Mutex<BTreeMap<String, MachineRecord>>>,
    staged: BTreeMap<String, Option<MachineRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed records.
    pub fn committed_len(&self) -> usize {
        self.committed_map().len()
    }

    pub fn committed(&self, id: &str) -> Option<MachineRecord> {
        self.committed_map().get(id).cloned()
    }

    fn committed_map(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, MachineRecord>> {
        self.committed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PersistenceStore for MemoryStore {
    fn load_all(&mut self) -> Result<BTreeMap<String, MachineRecord>, StoreError> {
        Ok(self.committed_map().clone())
    }

    fn put(&mut self, id: &str, record: MachineRecord) {
        self.staged.insert(id.to_string(), Some(record));
    }

    fn delete(&mut self, id: &str) {
        self.staged.insert(id.to_string(), None);
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        let staged = std::mem::take(&mut self.staged);
        let mut committed = self.committed.lock().unwrap_or_else(PoisonError::into_inner);
        for (id, change) in staged {
            match change {
                Some(record) => committed.insert(id, record),
                None => committed.remove(&id),
            };
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File store
// ---------------------------------------------------------------------------

/// A store backed by a single document file.
///
/// The whole document is kept in memory; `flush` writes it to a sibling
/// temporary file and renames it over the target, so a crash mid-write
/// never leaves a truncated store behind.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    format: StoreFormat,
    records: BTreeMap<String, MachineRecord>,
    dirty: bool,
}

impl FileStore {
    /// A store at `path`, with the format picked from its extension.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = StoreFormat::from_path(&path);
        Self::with_format(path, format)
    }

    pub fn with_format(path: impl Into<PathBuf>, format: StoreFormat) -> Self {
        Self {
            path: path.into(),
            format,
            records: BTreeMap::new(),
            dirty: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> StoreFormat {
        self.format
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn codec_error(&self, source: CodecError) -> StoreError {
        StoreError::Codec {
            path: self.path.clone(),
            source,
        }
    }

    fn write_atomically(&self, data: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)
    }
}

impl PersistenceStore for FileStore {
    fn load_all(&mut self) -> Result<BTreeMap<String, MachineRecord>, StoreError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no machine store yet, starting empty");
                self.records.clear();
                return Ok(BTreeMap::new());
            }
            Err(e) => return Err(self.io_error(e)),
        };
        let doc = self.format.decode(&data).map_err(|e| self.codec_error(e))?;
        self.records = doc.machines;
        self.dirty = false;
        Ok(self.records.clone())
    }

    fn put(&mut self, id: &str, record: MachineRecord) {
        self.records.insert(id.to_string(), record);
        self.dirty = true;
    }

    fn delete(&mut self, id: &str) {
        if self.records.remove(id).is_some() {
            self.dirty = true;
        }
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }
        let doc = StoreDocument::new(self.records.clone());
        let data = self.format.encode(&doc).map_err(|e| self.codec_error(e))?;
        self.write_atomically(&data).map_err(|e| self.io_error(e))?;
        self.dirty = false;
        debug!(path = %self.path.display(), records = self.records.len(), "machine store flushed");
        Ok(())
    }
}
