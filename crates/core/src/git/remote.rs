//! Remote store interfaces.
//!
//! The orchestrator reads through [`ContentProvider`]; the synthesizer writes
//! through [`ObjectStoreWriter`]. Both are async because every call is a
//! network round trip, and both are object safe so callers can hold them as
//! `Arc<dyn ...>`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{ContentError, GitHubError};
pub use crate::models::FileMode;
use crate::models::RepoSlug;

/// Result of a three-dot comparison `base...head`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comparison {
    pub merge_base_sha: String,
    /// Tip of the base branch.
    pub base_sha: String,
    /// Tree of the base branch tip.
    pub base_tree_sha: String,
    /// Tip of the head branch.
    pub head_sha: String,
    /// Files changed on head since the merge base, in remote order.
    pub files: Vec<ChangedFile>,
    /// `false` when the remote capped its file list, so `files` may miss
    /// changes.
    pub files_complete: bool,
}

/// A file listed by a comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: String,
    /// Remote change kind (`added`, `modified`, `removed`, ...). Informational.
    pub status: String,
}

impl ChangedFile {
    pub fn new(path: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            status: status.into(),
        }
    }
}

/// Read access to a remote repository.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Compare `base...head`: merge base, both tips and the changed paths.
    async fn compare(
        &self,
        repo: &RepoSlug,
        base: &str,
        head: &str,
    ) -> Result<Comparison, GitHubError>;

    /// Text content of `path` at `git_ref`, or `None` if the file does not
    /// exist there.
    async fn get_blob_content(
        &self,
        repo: &RepoSlug,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<String>, ContentError>;

    /// Modes of `paths` in the tree of commit `commit_sha`. Paths absent
    /// from that tree are left out of the map.
    async fn file_modes(
        &self,
        repo: &RepoSlug,
        commit_sha: &str,
        paths: &[String],
    ) -> Result<HashMap<String, FileMode>, GitHubError>;
}

/// One change to apply on top of a base tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: String,
    pub mode: FileMode,
    /// Blob to place at `path`; `None` removes the path.
    pub blob_sha: Option<String>,
}

impl TreeEntry {
    pub fn blob(path: impl Into<String>, sha: impl Into<String>, mode: FileMode) -> Self {
        Self {
            path: path.into(),
            mode,
            blob_sha: Some(sha.into()),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: FileMode::Regular,
            blob_sha: None,
        }
    }
}

/// Outcome of a conditional ref update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefUpdate {
    Updated,
    /// The ref no longer points at the expected commit.
    Conflict { actual: String },
}

/// Write access to a remote object store.
///
/// There is no transaction spanning these calls. Objects created before a
/// failed step stay behind unreferenced; only `update_ref` makes anything
/// visible.
#[async_trait]
pub trait ObjectStoreWriter: Send + Sync {
    async fn create_blob(&self, repo: &RepoSlug, content: &str) -> Result<String, GitHubError>;

    async fn create_tree(
        &self,
        repo: &RepoSlug,
        entries: &[TreeEntry],
        base_tree: &str,
    ) -> Result<String, GitHubError>;

    async fn create_commit(
        &self,
        repo: &RepoSlug,
        tree: &str,
        message: &str,
        parents: [String; 2],
    ) -> Result<String, GitHubError>;

    /// Move `branch` from `expected_old` to `new`, only if it still points
    /// at `expected_old`.
    async fn update_ref(
        &self,
        repo: &RepoSlug,
        branch: &str,
        expected_old: &str,
        new: &str,
    ) -> Result<RefUpdate, GitHubError>;
}
