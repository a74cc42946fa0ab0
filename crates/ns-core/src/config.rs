use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_ENV_VAR: &str = "NEUROSERIES_CONFIG";
pub const CONFIG_FILE_NAME: &str = "neuroseries.yml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Tracker configuration loaded from the first matching `neuroseries.yml`.
///
/// Unknown keys are preserved in `extra` so the full configuration can be
/// embedded verbatim into the captured run identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TrackerConfig {
    /// Repository paths checked for dirtiness and recorded alongside the
    /// entry-point repository.
    #[serde(default)]
    pub extra_repos: Vec<PathBuf>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl TrackerConfig {
    /// Builds the config search path, first match wins:
    /// current directory, repository root, user home, then the path named
    /// by `NEUROSERIES_CONFIG`.
    pub fn candidates(repo_root: Option<&Path>) -> Vec<PathBuf> {
        let mut out = vec![PathBuf::from(".").join(CONFIG_FILE_NAME)];
        if let Some(root) = repo_root {
            out.push(root.join(CONFIG_FILE_NAME));
        }
        if let Some(home) = dirs::home_dir() {
            out.push(home.join(".neuroseries").join("config.yml"));
        }
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            out.push(PathBuf::from(path));
        }
        out
    }

    /// Runs the first-match loop over `candidates`.
    ///
    /// A missing candidate moves the loop along; a candidate that exists but
    /// fails to parse aborts the load. When no candidate exists the default
    /// (empty) configuration is returned with no source path.
    pub fn load(candidates: &[PathBuf]) -> Result<(Self, Option<PathBuf>), ConfigError> {
        for candidate in candidates {
            let text = match std::fs::read_to_string(candidate) {
                Ok(text) => text,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(source) => {
                    return Err(ConfigError::Io {
                        path: candidate.clone(),
                        source,
                    })
                }
            };
            let config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: candidate.clone(),
                source,
            })?;
            return Ok((config, Some(candidate.clone())));
        }
        Ok((Self::default(), None))
    }
}
