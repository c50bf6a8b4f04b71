//! Historic job registry.
//!
//! Append-only map from RunId to artifact directory and original config.
//! Entries are written once and never modified.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

use thiserror::Error;
use tracing::{info, warn};
use trainrun_core::{HistoricRecord, RunId};

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("run {0} is already registered")]
    AlreadyRegistered(RunId),

    #[error("registry I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode registry record: {0}")]
    Json(#[from] serde_json::Error),
}

/// Lookup table consulted after a run ends.
pub trait HistoricRegistry: Send + Sync {
    /// Add a record. Fails if the RunId is already present.
    fn register(&self, record: HistoricRecord) -> Result<(), RegistryError>;

    fn lookup(&self, run_id: &RunId) -> Option<HistoricRecord>;

    /// Registered RunIds, oldest first.
    fn list(&self) -> Vec<RunId>;
}

/// In-process registry.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    inner: RwLock<Records>,
}

#[derive(Debug, Default)]
struct Records {
    order: Vec<RunId>,
    by_id: HashMap<RunId, HistoricRecord>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn contains(&self, run_id: &RunId) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .contains_key(run_id)
    }

    fn insert(&self, record: HistoricRecord) -> Result<(), RegistryError> {
        let mut records = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if records.by_id.contains_key(&record.run_id) {
            return Err(RegistryError::AlreadyRegistered(record.run_id));
        }
        records.order.push(record.run_id.clone());
        records.by_id.insert(record.run_id.clone(), record);
        Ok(())
    }
}

impl HistoricRegistry for MemoryRegistry {
    fn register(&self, record: HistoricRecord) -> Result<(), RegistryError> {
        self.insert(record)
    }

    fn lookup(&self, run_id: &RunId) -> Option<HistoricRecord> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .get(run_id)
            .cloned()
    }

    fn list(&self) -> Vec<RunId> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .clone()
    }
}

/// Registry persisted as one JSON record per line.
#[derive(Debug)]
pub struct JsonlRegistry {
    path: PathBuf,
    records: MemoryRegistry,
    /// Serializes appends to the file.
    writer: Mutex<()>,
}

impl JsonlRegistry {
    /// Open (or create on first register) the registry file at `path`.
    ///
    /// Malformed lines are skipped; for a duplicated RunId the first line wins.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let records = MemoryRegistry::new();

        match fs::File::open(&path) {
            Ok(file) => {
                for (lineno, line) in BufReader::new(file).lines().enumerate() {
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<HistoricRecord>(&line) {
                        Ok(record) => {
                            if let Err(e) = records.insert(record) {
                                warn!(line = lineno + 1, error = %e, "Skipping duplicate registry record");
                            }
                        }
                        Err(e) => {
                            warn!(line = lineno + 1, error = %e, "Skipping malformed registry record");
                        }
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        info!(path = %path.display(), runs = records.list().len(), "Historic registry loaded");
        Ok(Self {
            path,
            records,
            writer: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistoricRegistry for JsonlRegistry {
    fn register(&self, record: HistoricRecord) -> Result<(), RegistryError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if self.records.contains(&record.run_id) {
            return Err(RegistryError::AlreadyRegistered(record.run_id));
        }

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;

        self.records.insert(record)
    }

    fn lookup(&self, run_id: &RunId) -> Option<HistoricRecord> {
        self.records.lookup(run_id)
    }

    fn list(&self) -> Vec<RunId> {
        self.records.list()
    }
}
