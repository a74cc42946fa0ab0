use crate::run::RunIdentity;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Hash value carried by a record for the whole open-for-write session.
/// Replaced by the real digest only when a backend finalizes durability.
pub const HASH_PLACEHOLDER: &str = "NULL";

/// The lineage record attached to one tracked file.
///
/// Every top-level field is required; a stored record missing any of them
/// fails to parse and surfaces as a corrupt-record error in the tracking
/// layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvenanceRecord {
    /// Identity of the run that opened the file for writing.
    pub run: RunIdentity,
    pub date_created: String,
    /// Records consumed via reads before this file was opened for writing,
    /// in consumption order. Duplicates are allowed.
    pub dependencies: Vec<ProvenanceRecord>,
    pub file: String,
    pub hash: String,
    /// Backend-defined location metadata, opaque to the tracking layer.
    pub repo_info: Map<String, Value>,
    /// Stored-object key to human-readable description of that object.
    pub variables: BTreeMap<String, String>,
}

impl ProvenanceRecord {
    pub fn new(
        run: RunIdentity,
        dependencies: Vec<ProvenanceRecord>,
        file: &str,
        repo_info: Map<String, Value>,
    ) -> Self {
        Self {
            run,
            date_created: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            dependencies,
            file: file.to_string(),
            hash: HASH_PLACEHOLDER.to_string(),
            repo_info,
            variables: BTreeMap::new(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
