pub mod config;
pub mod provenance;
pub mod repo;
pub mod run;

pub use config::{ConfigError, TrackerConfig, CONFIG_ENV_VAR, CONFIG_FILE_NAME};
pub use provenance::{ProvenanceRecord, HASH_PLACEHOLDER};
pub use repo::{repo_state, RepoError, RepoState};
pub use run::{capture, CaptureError, CaptureOptions, RunIdentity, NOTEBOOK_ENTRY_POINT};
