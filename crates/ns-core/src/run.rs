use crate::config::{ConfigError, TrackerConfig};
use crate::repo::{repo_state, RepoError, RepoState};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Entry-point sentinel recorded for interactive sessions.
pub const NOTEBOOK_ENTRY_POINT: &str = "###notebook";

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("repository at {path} is dirty, commit your changes before running")]
    DirtyRepository { path: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("dependency repository check failed: {0}")]
    Repo(#[from] RepoError),
}

/// Inputs to [`capture`] that come from outside the process: whether an
/// interactive context was detected, and how strictly repository state is
/// enforced.
#[derive(Debug, Clone, Default)]
pub struct CaptureOptions {
    /// Signal from an external interactive/notebook detector.
    pub interactive: bool,
    /// When set, a dirty tracked repository aborts the capture. The
    /// entry-point repository is exempted for interactive sessions; extra
    /// configured repositories never are.
    pub strict_repo_check: bool,
    /// Skip entry-point repository discovery entirely and record an empty
    /// repository state in its place.
    pub skip_entry_repo: bool,
    /// Overrides `argv[0]` as the entry point. Used by embedding callers
    /// and tests.
    pub entry_point: Option<PathBuf>,
    /// Explicit configuration file, bypassing the search path.
    pub config_path: Option<PathBuf>,
}

/// Everything known about the running process at capture time.
/// Captured once per process, before any store is opened, and immutable
/// afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunIdentity {
    pub uuid: String,
    pub run_time: String,
    pub entry_point: String,
    pub args: Vec<String>,
    pub repos: Vec<RepoState>,
    pub config: Map<String, Value>,
    pub venv: Map<String, Value>,
    pub os: Map<String, Value>,
    pub memory: Map<String, Value>,
}

/// Captures the identity and environment of the current run.
///
/// Not memoized: a second call yields a different uuid and run time. The
/// single-call-per-process discipline belongs to the caller, which is
/// expected to hold the result in a `RunContext` for the process lifetime.
///
/// All-or-nothing: a malformed config file or a dirty repository under
/// strict checking fails the whole capture; no partial identity escapes.
pub fn capture(options: &CaptureOptions) -> Result<RunIdentity, CaptureError> {
    let uuid = Uuid::new_v4().to_string();
    let run_time = Utc::now().to_rfc3339();

    let (entry_point, args) = if options.interactive {
        (NOTEBOOK_ENTRY_POINT.to_string(), Vec::new())
    } else {
        let argv: Vec<String> = std::env::args().collect();
        let raw = options
            .entry_point
            .clone()
            .or_else(|| argv.first().map(PathBuf::from))
            .unwrap_or_default();
        let resolved = raw.canonicalize().unwrap_or(raw);
        (
            resolved.display().to_string(),
            argv.into_iter().skip(1).collect(),
        )
    };

    let mut repos = Vec::new();
    let mut repo_root = None;
    if options.skip_entry_repo {
        repos.push(RepoState::default());
    } else {
        // An interactive session has no script path; its repository is
        // wherever the session is running.
        let entry_dir = if options.interactive {
            PathBuf::from(".")
        } else {
            Path::new(&entry_point)
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        };
        match repo_state(&entry_dir) {
            Ok((state, _repo)) => {
                if options.strict_repo_check && state.is_dirty && !options.interactive {
                    return Err(CaptureError::DirtyRepository {
                        path: state.working_tree_dir,
                    });
                }
                repo_root = Some(PathBuf::from(&state.working_tree_dir));
                repos.push(state);
            }
            // An entry point outside any repository is recorded as an
            // empty state rather than failing the capture.
            Err(RepoError::NotFound { .. }) => repos.push(RepoState::default()),
            Err(err) => return Err(err.into()),
        }
    }

    let candidates = match &options.config_path {
        Some(path) => vec![path.clone()],
        None => TrackerConfig::candidates(repo_root.as_deref()),
    };
    let (config, _source) = TrackerConfig::load(&candidates)?;

    for extra in &config.extra_repos {
        let (state, _repo) = repo_state(extra)?;
        if options.strict_repo_check && state.is_dirty {
            return Err(CaptureError::DirtyRepository {
                path: state.working_tree_dir,
            });
        }
        repos.push(state);
    }

    let config = match serde_json::to_value(&config) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };

    Ok(RunIdentity {
        uuid,
        run_time,
        entry_point,
        args,
        repos,
        config,
        venv: environment_snapshot(),
        os: os_snapshot(),
        memory: memory_snapshot(),
    })
}

/// Free-form snapshot of the process environment, keys sorted for stable
/// serialization.
fn environment_snapshot() -> Map<String, Value> {
    let vars: BTreeMap<String, String> = std::env::vars().collect();
    let mut out = Map::new();
    out.insert(
        "variables".to_string(),
        Value::Object(
            vars.into_iter()
                .map(|(key, value)| (key, Value::String(value)))
                .collect(),
        ),
    );
    out
}

fn os_snapshot() -> Map<String, Value> {
    let mut out = Map::new();
    out.insert(
        "os".to_string(),
        Value::String(std::env::consts::OS.to_string()),
    );
    out.insert(
        "arch".to_string(),
        Value::String(std::env::consts::ARCH.to_string()),
    );
    out.insert(
        "family".to_string(),
        Value::String(std::env::consts::FAMILY.to_string()),
    );
    if let Ok(hostname) = std::env::var("HOSTNAME") {
        out.insert("hostname".to_string(), Value::String(hostname));
    }
    out
}

/// Best-effort memory totals from /proc/meminfo; empty on platforms
/// without it. Never fails the capture.
fn memory_snapshot() -> Map<String, Value> {
    let mut out = Map::new();
    if let Ok(text) = std::fs::read_to_string("/proc/meminfo") {
        for line in text.lines() {
            if let Some((name, rest)) = line.split_once(':') {
                if matches!(
                    name,
                    "MemTotal" | "MemFree" | "MemAvailable" | "SwapTotal" | "SwapFree"
                ) {
                    out.insert(name.to_string(), Value::String(rest.trim().to_string()));
                }
            }
        }
    }
    out
}
