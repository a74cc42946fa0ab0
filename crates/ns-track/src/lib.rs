pub mod backend;
pub mod context;
pub mod store;

pub use backend::{
    Backend, BackendError, JsonSidecarBackend, LocalFilesBackend, VersionedBackend, OBJECTS_DIR,
};
pub use context::{DependencyLedger, RunContext};
pub use store::{Mode, TrackError, TrackingStore};
