use ns_core::{ProvenanceRecord, HASH_PLACEHOLDER};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Content-addressed object directory kept inside a versioned backend's
/// working tree.
pub const OBJECTS_DIR: &str = ".ns-objects";

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to fetch {file}: {reason}")]
    Fetch { file: String, reason: String },
    #[error("commit failed for {file}: {reason}")]
    Commit { file: String, reason: String },
    #[error("file {file} is outside the backend working tree")]
    OutsideWorkTree { file: String },
    #[error("git error: {0}")]
    Git(#[from] git2::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Durability and availability capabilities behind a tracking store.
///
/// One instance is bound to one file root for its lifetime. `repo_info`
/// is embedded verbatim into every record written through the backend and
/// must not fail.
pub trait Backend {
    /// Ensures the named file is locally readable before the material
    /// store opens it.
    fn fetch(&self, filename: &Path) -> Result<(), BackendError>;

    /// Backend-identifying location metadata for the provenance record.
    fn repo_info(&self) -> Map<String, Value>;

    /// Persists `record` as a durable sidecar, replacing the placeholder
    /// hash with the real content digest when the backend can provide one.
    fn save_metadata(
        &self,
        filename: &Path,
        record: &mut ProvenanceRecord,
    ) -> Result<(), BackendError>;

    /// Finalizes durability for the file and its sidecar.
    fn commit(&self, filename: &Path, message: Option<&str>) -> Result<(), BackendError>;
}

/// Pass-through backend for local experimentation; offers no tracking
/// guarantees beyond the record stored inside the data file itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFilesBackend;

impl Backend for LocalFilesBackend {
    fn fetch(&self, _filename: &Path) -> Result<(), BackendError> {
        Ok(())
    }

    fn repo_info(&self) -> Map<String, Value> {
        Map::new()
    }

    fn save_metadata(
        &self,
        _filename: &Path,
        _record: &mut ProvenanceRecord,
    ) -> Result<(), BackendError> {
        Ok(())
    }

    fn commit(&self, _filename: &Path, _message: Option<&str>) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Writes the provenance record as a JSON sidecar next to the data file.
/// The hash stays at the placeholder; layer a hashing backend on top when
/// content addressing is needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSidecarBackend;

impl Backend for JsonSidecarBackend {
    fn fetch(&self, _filename: &Path) -> Result<(), BackendError> {
        Ok(())
    }

    fn repo_info(&self) -> Map<String, Value> {
        let mut info = Map::new();
        info.insert(
            "backend".to_string(),
            Value::String("json-sidecar".to_string()),
        );
        info
    }

    fn save_metadata(
        &self,
        filename: &Path,
        record: &mut ProvenanceRecord,
    ) -> Result<(), BackendError> {
        let sidecar = filename.with_extension("json");
        std::fs::write(&sidecar, record.to_json()?)?;
        debug!(sidecar = %sidecar.display(), "wrote provenance sidecar");
        Ok(())
    }

    fn commit(&self, _filename: &Path, _message: Option<&str>) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Content-addressable, version-controlled backend bound to one git
/// working tree.
///
/// Data files live in the working tree; a copy of every finalized file is
/// kept under [`OBJECTS_DIR`] keyed by its SHA-256 digest, so `fetch` can
/// restore a deleted file from its sidecar's hash. `commit` records both
/// the data file and the sidecar in a real git commit.
pub struct VersionedBackend {
    root: PathBuf,
    repo: git2::Repository,
}

impl VersionedBackend {
    /// Opens (or initializes) the git working tree at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let root = root.into();
        let repo = match git2::Repository::open(&root) {
            Ok(repo) => repo,
            Err(_) => git2::Repository::init(&root)?,
        };
        std::fs::create_dir_all(root.join(OBJECTS_DIR))?;
        Ok(Self { root, repo })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, filename: &Path) -> PathBuf {
        if filename.is_absolute() {
            filename.to_path_buf()
        } else {
            self.root.join(filename)
        }
    }

    fn object_path(&self, hash: &str) -> PathBuf {
        self.root.join(OBJECTS_DIR).join(hash)
    }

    fn stage(&self, path: &Path) -> Result<(), BackendError> {
        let workdir = self.repo.workdir().unwrap_or(&self.root);
        // The workdir reported by git may be a canonicalized form of the
        // root we were opened with; accept either as a prefix.
        let relative = path
            .strip_prefix(workdir)
            .or_else(|_| path.strip_prefix(&self.root))
            .map_err(|_| BackendError::OutsideWorkTree {
                file: path.display().to_string(),
            })?;
        let mut index = self.repo.index()?;
        index.add_path(relative)?;
        index.write()?;
        Ok(())
    }
}

impl Backend for VersionedBackend {
    fn fetch(&self, filename: &Path) -> Result<(), BackendError> {
        let target = self.resolve(filename);
        if target.exists() {
            return Ok(());
        }
        // Without a sidecar there is nothing to retrieve: the file is new
        // and a write-open will create it.
        let sidecar = target.with_extension("json");
        let text = match std::fs::read_to_string(&sidecar) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => {
                return Err(BackendError::Fetch {
                    file: filename.display().to_string(),
                    reason: format!("unreadable sidecar: {err}"),
                })
            }
        };
        let record = ProvenanceRecord::from_json(&text).map_err(|err| BackendError::Fetch {
            file: filename.display().to_string(),
            reason: format!("unreadable sidecar: {err}"),
        })?;
        if record.hash == HASH_PLACEHOLDER {
            return Err(BackendError::Fetch {
                file: filename.display().to_string(),
                reason: "sidecar carries no content hash".to_string(),
            });
        }
        let object = self.object_path(&record.hash);
        if !object.exists() {
            return Err(BackendError::Fetch {
                file: filename.display().to_string(),
                reason: format!("content {} not present in object store", record.hash),
            });
        }
        std::fs::copy(&object, &target)?;
        debug!(file = %target.display(), hash = %record.hash, "restored file from object store");
        Ok(())
    }

    fn repo_info(&self) -> Map<String, Value> {
        let mut info = Map::new();
        info.insert(
            "backend".to_string(),
            Value::String("versioned".to_string()),
        );
        info.insert(
            "working_tree_dir".to_string(),
            Value::String(self.root.display().to_string()),
        );
        info
    }

    fn save_metadata(
        &self,
        filename: &Path,
        record: &mut ProvenanceRecord,
    ) -> Result<(), BackendError> {
        let target = self.resolve(filename);
        let digest = sha256_file_hex(&target)?;
        let object = self.object_path(&digest);
        if !object.exists() {
            std::fs::copy(&target, &object)?;
        }
        record.hash = digest;

        let sidecar = target.with_extension("json");
        std::fs::write(&sidecar, record.to_json()?)?;
        self.stage(&target)?;
        self.stage(&sidecar)?;
        Ok(())
    }

    fn commit(&self, filename: &Path, message: Option<&str>) -> Result<(), BackendError> {
        let argv0 = std::env::args().next().unwrap_or_default();
        let mut text = format!("Ran {argv0}. Added {}. ", filename.display());
        if let Some(extra) = message {
            text.push_str(extra);
        }

        let commit = || -> Result<(), git2::Error> {
            let mut index = self.repo.index()?;
            let tree_id = index.write_tree()?;
            let tree = self.repo.find_tree(tree_id)?;
            let signature = self
                .repo
                .signature()
                .or_else(|_| git2::Signature::now("neuroseries", "neuroseries@localhost"))?;
            let parent = self
                .repo
                .head()
                .ok()
                .and_then(|head| head.target())
                .and_then(|oid| self.repo.find_commit(oid).ok());
            let parents: Vec<&git2::Commit> = parent.iter().collect();
            self.repo
                .commit(Some("HEAD"), &signature, &signature, &text, &tree, &parents)?;
            Ok(())
        };
        commit().map_err(|err| BackendError::Commit {
            file: filename.display().to_string(),
            reason: err.to_string(),
        })?;
        debug!(file = %filename.display(), "committed data file and sidecar");
        Ok(())
    }
}

fn sha256_file_hex(path: &Path) -> Result<String, BackendError> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let digest = hasher.finalize();
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest {
        output.push_str(&format!("{byte:02x}"));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ns_core::RunIdentity;
    use tempfile::TempDir;

    fn record(file: &str) -> ProvenanceRecord {
        let identity = RunIdentity {
            uuid: "test-run".to_string(),
            run_time: "2026-08-30T09:00:00Z".to_string(),
            entry_point: "/opt/analysis/run".to_string(),
            args: Vec::new(),
            repos: Vec::new(),
            config: Map::new(),
            venv: Map::new(),
            os: Map::new(),
            memory: Map::new(),
        };
        ProvenanceRecord::new(identity, Vec::new(), file, Map::new())
    }

    #[test]
    fn sidecar_backend_writes_record_next_to_file() {
        let dir = TempDir::new().expect("temp dir");
        let data = dir.path().join("session.h5");
        std::fs::write(&data, b"payload").expect("write data");

        let backend = JsonSidecarBackend;
        let mut rec = record("session.h5");
        backend.save_metadata(&data, &mut rec).expect("save metadata");

        assert_eq!(rec.hash, HASH_PLACEHOLDER);
        let sidecar = std::fs::read_to_string(dir.path().join("session.json")).expect("sidecar");
        let parsed = ProvenanceRecord::from_json(&sidecar).expect("parse sidecar");
        assert_eq!(parsed.file, "session.h5");
    }

    #[test]
    fn versioned_backend_realizes_hash_and_stores_object() {
        let dir = TempDir::new().expect("temp dir");
        let backend = VersionedBackend::open(dir.path()).expect("open backend");
        let data = dir.path().join("session.h5");
        std::fs::write(&data, b"payload").expect("write data");

        let mut rec = record("session.h5");
        backend.save_metadata(&data, &mut rec).expect("save metadata");

        assert_ne!(rec.hash, HASH_PLACEHOLDER);
        assert_eq!(rec.hash.len(), 64);
        assert!(backend.object_path(&rec.hash).exists());
        assert!(dir.path().join("session.json").exists());

        backend.commit(Path::new("session.h5"), Some("nightly run")).expect("commit");
        let repo = git2::Repository::open(dir.path()).expect("open repo");
        let head = repo.head().expect("head").peel_to_commit().expect("commit");
        let message = head.message().unwrap_or_default();
        assert!(message.contains("Added session.h5"));
        assert!(message.ends_with("nightly run"));
    }

    #[test]
    fn versioned_backend_restores_missing_file_from_objects() {
        let dir = TempDir::new().expect("temp dir");
        let backend = VersionedBackend::open(dir.path()).expect("open backend");
        let data = dir.path().join("session.h5");
        std::fs::write(&data, b"payload").expect("write data");

        let mut rec = record("session.h5");
        backend.save_metadata(&data, &mut rec).expect("save metadata");
        std::fs::remove_file(&data).expect("remove data");

        backend.fetch(Path::new("session.h5")).expect("fetch");
        assert_eq!(std::fs::read(&data).expect("read restored"), b"payload");
    }

    #[test]
    fn fetch_of_a_new_file_is_a_no_op() {
        let dir = TempDir::new().expect("temp dir");
        let backend = VersionedBackend::open(dir.path()).expect("open backend");
        backend.fetch(Path::new("absent.h5")).expect("fetch");
        assert!(!dir.path().join("absent.h5").exists());
    }

    #[test]
    fn fetch_fails_when_content_is_gone_from_the_object_store() {
        let dir = TempDir::new().expect("temp dir");
        let backend = VersionedBackend::open(dir.path()).expect("open backend");
        let data = dir.path().join("session.h5");
        std::fs::write(&data, b"payload").expect("write data");

        let mut rec = record("session.h5");
        backend.save_metadata(&data, &mut rec).expect("save metadata");
        std::fs::remove_file(&data).expect("remove data");
        std::fs::remove_file(backend.object_path(&rec.hash)).expect("remove object");

        let result = backend.fetch(Path::new("session.h5"));
        assert!(matches!(result, Err(BackendError::Fetch { .. })));
    }

    #[test]
    fn local_backend_is_a_no_op() {
        let backend = LocalFilesBackend;
        backend.fetch(Path::new("anything.h5")).expect("fetch");
        assert!(backend.repo_info().is_empty());
        let mut rec = record("anything.h5");
        backend
            .save_metadata(Path::new("anything.h5"), &mut rec)
            .expect("save metadata");
        assert_eq!(rec.hash, HASH_PLACEHOLDER);
        backend.commit(Path::new("anything.h5"), None).expect("commit");
    }
}
