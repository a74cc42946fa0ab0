use crate::backend::{Backend, BackendError};
use crate::context::RunContext;
use ns_core::ProvenanceRecord;
use ns_storage::{Describe, MaterialStore, StorageError, StoreMode, StoredValue};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("invalid mode {0:?}, expected \"r\" or \"w\"")]
    InvalidMode(String),
    #[error("store {file} is open in {actual} mode")]
    WrongMode { file: String, actual: &'static str },
    #[error("store {0} is closed")]
    ClosedStore(String),
    #[error("corrupt provenance record in {file}: {reason}")]
    CorruptRecord { file: String, reason: String },
    #[error("append is not supported by the tracking store")]
    AppendUnsupported,
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Read => "read",
            Mode::Write => "write",
        }
    }

    fn store_mode(self) -> StoreMode {
        match self {
            Mode::Read => StoreMode::Read,
            Mode::Write => StoreMode::Write,
        }
    }
}

impl FromStr for Mode {
    type Err = TrackError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "r" | "read" => Ok(Mode::Read),
            "w" | "write" => Ok(Mode::Write),
            other => Err(TrackError::InvalidMode(other.to_string())),
        }
    }
}

/// Provenance-tracking wrapper around a material store.
///
/// Opening for reading loads the file's provenance record and appends it to
/// the context's dependency ledger; opening for writing creates a fresh
/// record whose dependencies are a snapshot of the ledger at that moment.
/// Every put is reflected in the record's per-variable descriptions, and
/// close hands the finished record to the backend for durability.
///
/// The state machine is `Closed -> OpenRead | OpenWrite -> Closed`; a
/// closed store is terminal and a new instance is needed to reopen the
/// file. A single instance must not be shared across threads.
pub struct TrackingStore<'ctx, B: Backend> {
    ctx: &'ctx RunContext,
    filename: PathBuf,
    mode: Mode,
    backend: B,
    store: Option<MaterialStore>,
    record: ProvenanceRecord,
}

impl<'ctx, B: Backend> TrackingStore<'ctx, B> {
    /// Opens `filename` through `backend` in the given mode.
    ///
    /// The backend fetch runs first; a fetch failure aborts the open and no
    /// store is returned. In read mode a malformed or missing provenance
    /// record fails the open with [`TrackError::CorruptRecord`]. In write
    /// mode the fresh record is persisted immediately, so a reader opening
    /// the file mid-write still finds a well-formed record.
    pub fn open(
        ctx: &'ctx RunContext,
        filename: impl AsRef<Path>,
        mode: Mode,
        backend: B,
    ) -> Result<Self, TrackError> {
        let filename = filename.as_ref().to_path_buf();
        backend.fetch(&filename)?;
        let store = MaterialStore::open(&filename, mode.store_mode())?;

        let record = match mode {
            Mode::Read => {
                let text = store.get_info().map_err(|err| TrackError::CorruptRecord {
                    file: filename.display().to_string(),
                    reason: err.to_string(),
                })?;
                let record =
                    ProvenanceRecord::from_json(&text).map_err(|err| TrackError::CorruptRecord {
                        file: filename.display().to_string(),
                        reason: err.to_string(),
                    })?;
                ctx.record_dependency(record.clone());
                record
            }
            Mode::Write => {
                let record = ProvenanceRecord::new(
                    ctx.identity().clone(),
                    ctx.dependency_snapshot(),
                    &filename.display().to_string(),
                    backend.repo_info(),
                );
                let text = record
                    .to_json()
                    .map_err(|err| StorageError::Serialization(err.to_string()))?;
                store.put_info(&text)?;
                record
            }
        };

        debug!(file = %filename.display(), mode = mode.as_str(), "opened tracking store");
        Ok(Self {
            ctx,
            filename,
            mode,
            backend,
            store: Some(store),
            record,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// The record as currently accumulated (or as loaded, in read mode).
    pub fn record(&self) -> &ProvenanceRecord {
        &self.record
    }

    pub fn context(&self) -> &RunContext {
        self.ctx
    }

    pub fn get(&self, key: &str) -> Result<StoredValue, TrackError> {
        let store = self.require_mode(Mode::Read)?;
        Ok(store.get(key)?)
    }

    pub fn get_with_metadata(
        &self,
        key: &str,
    ) -> Result<(StoredValue, Option<Map<String, Value>>), TrackError> {
        let store = self.require_mode(Mode::Read)?;
        Ok(store.get_with_metadata(key)?)
    }

    pub fn has_metadata(&self, key: &str) -> Result<bool, TrackError> {
        let (_, metadata) = self.get_with_metadata(key)?;
        Ok(metadata.is_some())
    }

    pub fn keys(&self) -> Result<Vec<String>, TrackError> {
        let store = self.open_store()?;
        Ok(store.keys()?)
    }

    /// Stores `value` under `key` and records a human-readable description
    /// of it in the provenance record.
    pub fn put(
        &mut self,
        key: &str,
        value: &StoredValue,
        metadata: Option<&Map<String, Value>>,
    ) -> Result<(), TrackError> {
        self.require_mode(Mode::Write)?;
        let description = self.variable_description(key, value)?;
        self.record.variables.insert(key.to_string(), description);

        let store = self.open_store()?;
        match metadata {
            Some(metadata) => store.put_with_metadata(key, value, metadata)?,
            None => store.put(key, value)?,
        }
        Ok(())
    }

    /// Reserved for future use; fails loudly instead of silently dropping
    /// the value.
    pub fn append(&mut self, _key: &str, _value: &StoredValue) -> Result<(), TrackError> {
        Err(TrackError::AppendUnsupported)
    }

    /// Persists the record, closes the material store, then lets the
    /// backend finalize durability (realizing the content hash and
    /// committing). The store stays closed even when a backend step fails;
    /// the failure is surfaced to the caller. Read-mode close releases the
    /// store without touching the record.
    pub fn close(&mut self) -> Result<(), TrackError> {
        let store = self
            .store
            .take()
            .ok_or_else(|| TrackError::ClosedStore(self.filename.display().to_string()))?;

        if self.mode == Mode::Read {
            store.close()?;
            debug!(file = %self.filename.display(), "closed tracking store");
            return Ok(());
        }

        let text = self
            .record
            .to_json()
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        store.put_info(&text)?;
        store.close()?;
        self.backend.save_metadata(&self.filename, &mut self.record)?;
        self.backend.commit(&self.filename, None)?;
        debug!(file = %self.filename.display(), hash = %self.record.hash, "closed tracking store");
        Ok(())
    }

    fn open_store(&self) -> Result<&MaterialStore, TrackError> {
        self.store
            .as_ref()
            .ok_or_else(|| TrackError::ClosedStore(self.filename.display().to_string()))
    }

    fn require_mode(&self, expected: Mode) -> Result<&MaterialStore, TrackError> {
        let store = self.open_store()?;
        if self.mode != expected {
            return Err(TrackError::WrongMode {
                file: self.filename.display().to_string(),
                actual: self.mode.as_str(),
            });
        }
        Ok(store)
    }

    /// Builds the per-variable description. Exactly one source of detail
    /// contributes, in priority order: the already-stored object's
    /// self-description, the input's self-description, the input's shape,
    /// or nothing (logged as a warning).
    fn variable_description(&self, key: &str, value: &StoredValue) -> Result<String, TrackError> {
        let mut description = format!("Object of class: {}", value.class_name());

        // The unwrap-aware read, so a re-put array key is seen as the
        // array it holds, not as its wrapped columnar form.
        let stored_detail = match self.open_store()?.get(key) {
            Ok(stored) => stored.describe(),
            Err(_) => None,
        };
        let detail = stored_detail
            .or_else(|| value.describe())
            .or_else(|| value.shape().map(|shape| format!("Shape: {shape:?}")));

        match detail {
            Some(detail) => {
                description.push('\n');
                description.push_str(&detail);
            }
            None => warn!(key, "cannot determine info for variable"),
        }
        Ok(description)
    }
}
