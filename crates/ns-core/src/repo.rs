use git2::{Repository, StatusOptions};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("no git repository found at {path}")]
    NotFound { path: String },
    #[error("git error for {path}: {source}")]
    Git {
        path: String,
        #[source]
        source: git2::Error,
    },
}

/// State of one tracked working tree at capture time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoState {
    pub working_tree_dir: String,
    pub is_dirty: bool,
    /// HEAD commit id; empty for an unborn HEAD.
    pub commit: String,
}

/// Discovers the repository containing `path` and reports its state.
///
/// Dirtiness counts staged, unstaged, and untracked entries; ignored files
/// are excluded. The repository handle is returned alongside the state so
/// callers that need deeper introspection can reuse the open repository.
pub fn repo_state(path: &Path) -> Result<(RepoState, Repository), RepoError> {
    let repo = Repository::discover(path).map_err(|source| {
        if source.code() == git2::ErrorCode::NotFound {
            RepoError::NotFound {
                path: path.display().to_string(),
            }
        } else {
            RepoError::Git {
                path: path.display().to_string(),
                source,
            }
        }
    })?;

    let working_tree_dir = repo
        .workdir()
        .map(|dir| dir.display().to_string())
        .unwrap_or_default();

    let commit = repo
        .head()
        .ok()
        .and_then(|head| head.target())
        .map(|oid| oid.to_string())
        .unwrap_or_default();

    // The status list borrows the repository; keep it scoped so the
    // handle can be returned afterwards.
    let is_dirty = {
        let mut options = StatusOptions::new();
        options.include_untracked(true).include_ignored(false);
        let statuses = repo
            .statuses(Some(&mut options))
            .map_err(|source| RepoError::Git {
                path: path.display().to_string(),
                source,
            })?;
        !statuses.is_empty()
    };

    let state = RepoState {
        working_tree_dir,
        is_dirty,
        commit,
    };
    Ok((state, repo))
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;
    use tempfile::TempDir;

    fn commit_all(repo: &Repository, file: &str) {
        let mut index = repo.index().expect("index");
        index.add_path(Path::new(file)).expect("add");
        index.write().expect("write index");
        let tree_id = index.write_tree().expect("write tree");
        let tree = repo.find_tree(tree_id).expect("find tree");
        let signature = Signature::now("tester", "tester@example.com").expect("signature");
        repo.commit(Some("HEAD"), &signature, &signature, "initial", &tree, &[])
            .expect("commit");
    }

    #[test]
    fn untracked_file_marks_repo_dirty() {
        let dir = TempDir::new().expect("temp dir");
        Repository::init(dir.path()).expect("init");
        std::fs::write(dir.path().join("data.txt"), "hello").expect("write");

        let (state, _repo) = repo_state(dir.path()).expect("repo state");
        assert!(state.is_dirty);
        assert!(state.commit.is_empty());
    }

    #[test]
    fn committed_repo_is_clean_with_head_commit() {
        let dir = TempDir::new().expect("temp dir");
        let repo = Repository::init(dir.path()).expect("init");
        std::fs::write(dir.path().join("data.txt"), "hello").expect("write");
        commit_all(&repo, "data.txt");

        let (state, repo) = repo_state(dir.path()).expect("repo state");
        assert!(!state.is_dirty);
        assert_eq!(state.commit.len(), 40);

        // The returned handle stays usable alongside the state.
        let head = repo.head().expect("head").target().expect("target");
        assert_eq!(head.to_string(), state.commit);
    }

    #[test]
    fn missing_repo_reports_not_found() {
        let dir = TempDir::new().expect("temp dir");
        let result = repo_state(dir.path());
        assert!(matches!(result, Err(RepoError::NotFound { .. })));
    }
}
