//! In-memory remote store.
//!
//! A deterministic implementation of [`ContentProvider`] and
//! [`ObjectStoreWriter`] holding content-addressed blobs, flat trees and
//! commits, plus a per-repository ref table with compare-and-swap updates.
//! Object ids are SHA-256 over `"<kind> <len>\0<payload>"`.
//!
//! Individual steps can be made to fail, and every write is recorded, so
//! tests can check exactly what reached the store.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::remote::{
    ChangedFile, Comparison, ContentProvider, FileMode, ObjectStoreWriter, RefUpdate, TreeEntry,
};
use crate::errors::{ContentError, GitHubError};
use crate::models::RepoSlug;

/// In-memory remote shared across clones.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    blobs: HashMap<String, String>,
    trees: HashMap<String, Tree>,
    commits: HashMap<String, CommitObject>,
    /// (repo, branch) -> commit id
    refs: HashMap<(String, String), String>,
    fail_on: Option<FailOn>,
    unreadable: HashSet<(String, String)>,
    writes: Vec<RecordedWrite>,
}

/// path -> (mode, blob id)
type Tree = BTreeMap<String, (FileMode, String)>;

/// A stored commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitObject {
    pub tree: String,
    pub parents: Vec<String>,
    pub message: String,
}

/// Which operation should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    Compare,
    CreateBlob,
    CreateTree,
    CreateCommit,
    UpdateRef,
}

/// A write that reached the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedWrite {
    Blob { sha: String },
    Tree { sha: String, entries: usize },
    Commit { sha: String, parents: Vec<String> },
    Ref { branch: String, from: String, to: String },
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means another test thread panicked.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the given operation fail until cleared.
    pub fn fail_on(&self, op: FailOn) {
        self.lock().fail_on = Some(op);
    }

    pub fn clear_failure(&self) {
        self.lock().fail_on = None;
    }

    /// Make reads of `path` at commit `commit_sha` fail.
    pub fn make_unreadable(&self, path: &str, commit_sha: &str) {
        self.lock()
            .unreadable
            .insert((path.to_string(), commit_sha.to_string()));
    }

    /// Writes recorded through the [`ObjectStoreWriter`] interface.
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.lock().writes.clone()
    }

    /// Current tip of `branch`.
    pub fn branch_tip(&self, repo: &RepoSlug, branch: &str) -> Option<String> {
        self.lock()
            .refs
            .get(&(repo.to_string(), branch.to_string()))
            .cloned()
    }

    pub fn commit(&self, sha: &str) -> Option<CommitObject> {
        self.lock().commits.get(sha).cloned()
    }

    /// Files of a commit's tree, with their text.
    pub fn files_at(&self, commit_sha: &str) -> Option<BTreeMap<String, String>> {
        let inner = self.lock();
        let commit = inner.commits.get(commit_sha)?;
        let tree = inner.trees.get(&commit.tree)?;
        Some(
            tree.iter()
                .filter_map(|(path, (_, blob))| {
                    Some((path.clone(), inner.blobs.get(blob)?.clone()))
                })
                .collect(),
        )
    }

    /// Mode of `path` in a commit's tree.
    pub fn mode_at(&self, commit_sha: &str, path: &str) -> Option<FileMode> {
        self.lock()
            .tree_of(commit_sha)
            .and_then(|tree| tree.get(path))
            .map(|(mode, _)| *mode)
    }

    /// Seed a commit holding exactly `files` on `branch` of `repo`.
    ///
    /// The branch's current tip becomes the first parent; `extra_parent`
    /// is appended when given. Seeding is not recorded as a write.
    pub fn seed_commit(
        &self,
        repo: &RepoSlug,
        branch: &str,
        files: &[(&str, &str)],
        extra_parent: Option<&str>,
    ) -> String {
        let files: Vec<(&str, &str, FileMode)> = files
            .iter()
            .map(|(path, content)| (*path, *content, FileMode::Regular))
            .collect();
        self.seed_commit_with_modes(repo, branch, &files, extra_parent)
    }

    /// [`seed_commit`](Self::seed_commit) with an explicit mode per file.
    pub fn seed_commit_with_modes(
        &self,
        repo: &RepoSlug,
        branch: &str,
        files: &[(&str, &str, FileMode)],
        extra_parent: Option<&str>,
    ) -> String {
        let mut inner = self.lock();
        let mut tree = Tree::new();
        for (path, content, mode) in files {
            let sha = inner.put_blob(content);
            tree.insert(path.to_string(), (*mode, sha));
        }
        let tree_sha = inner.put_tree(tree);
        let key = (repo.to_string(), branch.to_string());
        let mut parents: Vec<String> = inner.refs.get(&key).cloned().into_iter().collect();
        parents.extend(extra_parent.map(str::to_string));
        let sha = inner.put_commit(CommitObject {
            tree: tree_sha,
            parents,
            message: format!("seed {}", branch),
        });
        inner.refs.insert(key, sha.clone());
        sha
    }

    /// Point `new_branch` at the tip of `from` (a fresh branch).
    pub fn branch_from(&self, repo: &RepoSlug, from: &str, new_branch: &str) {
        let mut inner = self.lock();
        if let Some(tip) = inner.refs.get(&(repo.to_string(), from.to_string())).cloned() {
            inner
                .refs
                .insert((repo.to_string(), new_branch.to_string()), tip);
        }
    }
}

impl Inner {
    fn put_blob(&mut self, content: &str) -> String {
        let sha = object_id("blob", content.as_bytes());
        self.blobs.insert(sha.clone(), content.to_string());
        sha
    }

    fn put_tree(&mut self, tree: Tree) -> String {
        let payload: String = tree
            .iter()
            .map(|(path, (mode, sha))| format!("{} {}\0{}\n", mode, path, sha))
            .collect();
        let sha = object_id("tree", payload.as_bytes());
        self.trees.insert(sha.clone(), tree);
        sha
    }

    fn put_commit(&mut self, commit: CommitObject) -> String {
        let mut payload = format!("tree {}\n", commit.tree);
        for parent in &commit.parents {
            payload.push_str(&format!("parent {}\n", parent));
        }
        payload.push('\n');
        payload.push_str(&commit.message);
        let sha = object_id("commit", payload.as_bytes());
        self.commits.insert(sha.clone(), commit);
        sha
    }

    fn check(&self, op: FailOn) -> Result<(), GitHubError> {
        if self.fail_on == Some(op) {
            return Err(GitHubError::ApiError {
                status: 500,
                body: format!("injected failure: {:?}", op),
            });
        }
        Ok(())
    }

    /// Resolve a branch name or commit id.
    fn resolve(&self, repo: &RepoSlug, git_ref: &str) -> Option<String> {
        if self.commits.contains_key(git_ref) {
            return Some(git_ref.to_string());
        }
        self.refs
            .get(&(repo.to_string(), git_ref.to_string()))
            .cloned()
    }

    /// Ancestors of `sha` (inclusive) in breadth-first order.
    fn ancestry(&self, sha: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([sha.to_string()]);
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            if let Some(commit) = self.commits.get(&next) {
                queue.extend(commit.parents.iter().cloned());
            }
            order.push(next);
        }
        order
    }

    fn tree_of(&self, commit_sha: &str) -> Option<&Tree> {
        let commit = self.commits.get(commit_sha)?;
        self.trees.get(&commit.tree)
    }
}

fn object_id(kind: &str, payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{} {}\0", kind, payload.len()).as_bytes());
    hasher.update(payload);
    hex::encode(hasher.finalize())
}

fn not_found(what: String) -> GitHubError {
    GitHubError::NotFound(what)
}

#[async_trait]
impl ContentProvider for MemoryRemote {
    async fn compare(
        &self,
        repo: &RepoSlug,
        base: &str,
        head: &str,
    ) -> Result<Comparison, GitHubError> {
        let inner = self.lock();
        inner.check(FailOn::Compare)?;
        let base_sha = inner
            .resolve(repo, base)
            .ok_or_else(|| not_found(format!("{}: ref '{}'", repo, base)))?;
        let head_sha = inner
            .resolve(repo, head)
            .ok_or_else(|| not_found(format!("{}: ref '{}'", repo, head)))?;

        let base_ancestry: HashSet<String> = inner.ancestry(&base_sha).into_iter().collect();
        let merge_base_sha = inner
            .ancestry(&head_sha)
            .into_iter()
            .find(|sha| base_ancestry.contains(sha))
            .ok_or_else(|| GitHubError::ApiError {
                status: 404,
                body: format!("no common ancestor between {} and {}", base, head),
            })?;

        let empty = Tree::new();
        let ancestor_tree = inner.tree_of(&merge_base_sha).unwrap_or(&empty);
        let head_tree = inner.tree_of(&head_sha).unwrap_or(&empty);
        let mut files = Vec::new();
        for (path, entry) in head_tree {
            match ancestor_tree.get(path) {
                None => files.push(ChangedFile::new(path, "added")),
                Some(old) if old != entry => files.push(ChangedFile::new(path, "modified")),
                Some(_) => {}
            }
        }
        for path in ancestor_tree.keys() {
            if !head_tree.contains_key(path) {
                files.push(ChangedFile::new(path, "removed"));
            }
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let base_tree_sha = inner
            .commits
            .get(&base_sha)
            .map(|c| c.tree.clone())
            .unwrap_or_default();
        debug!(%repo, base, head, files = files.len(), "memory compare");
        Ok(Comparison {
            merge_base_sha,
            base_sha,
            base_tree_sha,
            head_sha,
            files,
            files_complete: true,
        })
    }

    async fn get_blob_content(
        &self,
        repo: &RepoSlug,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<String>, ContentError> {
        let inner = self.lock();
        let Some(commit_sha) = inner.resolve(repo, git_ref) else {
            return Err(ContentError::Unreadable {
                path: path.to_string(),
                reason: format!("unknown ref '{}'", git_ref),
            });
        };
        if inner
            .unreadable
            .contains(&(path.to_string(), commit_sha.clone()))
        {
            return Err(ContentError::Unreadable {
                path: path.to_string(),
                reason: "injected read failure".into(),
            });
        }
        Ok(inner
            .tree_of(&commit_sha)
            .and_then(|tree| tree.get(path))
            .and_then(|(_, blob)| inner.blobs.get(blob))
            .cloned())
    }

    async fn file_modes(
        &self,
        _repo: &RepoSlug,
        commit_sha: &str,
        paths: &[String],
    ) -> Result<HashMap<String, FileMode>, GitHubError> {
        let inner = self.lock();
        let tree = inner
            .tree_of(commit_sha)
            .ok_or_else(|| not_found(format!("commit {}", commit_sha)))?;
        Ok(paths
            .iter()
            .filter_map(|path| tree.get(path).map(|(mode, _)| (path.clone(), *mode)))
            .collect())
    }
}

#[async_trait]
impl ObjectStoreWriter for MemoryRemote {
    async fn create_blob(&self, _repo: &RepoSlug, content: &str) -> Result<String, GitHubError> {
        let mut inner = self.lock();
        inner.check(FailOn::CreateBlob)?;
        let sha = inner.put_blob(content);
        inner.writes.push(RecordedWrite::Blob { sha: sha.clone() });
        Ok(sha)
    }

    async fn create_tree(
        &self,
        _repo: &RepoSlug,
        entries: &[TreeEntry],
        base_tree: &str,
    ) -> Result<String, GitHubError> {
        let mut inner = self.lock();
        inner.check(FailOn::CreateTree)?;
        let mut tree = inner
            .trees
            .get(base_tree)
            .cloned()
            .ok_or_else(|| not_found(format!("tree {}", base_tree)))?;
        for entry in entries {
            match &entry.blob_sha {
                Some(sha) if !inner.blobs.contains_key(sha) => {
                    return Err(GitHubError::ApiError {
                        status: 422,
                        body: format!("blob {} does not exist", sha),
                    });
                }
                Some(sha) => {
                    tree.insert(entry.path.clone(), (entry.mode, sha.clone()));
                }
                None => {
                    tree.remove(&entry.path);
                }
            }
        }
        let sha = inner.put_tree(tree);
        inner.writes.push(RecordedWrite::Tree {
            sha: sha.clone(),
            entries: entries.len(),
        });
        Ok(sha)
    }

    async fn create_commit(
        &self,
        _repo: &RepoSlug,
        tree: &str,
        message: &str,
        parents: [String; 2],
    ) -> Result<String, GitHubError> {
        let mut inner = self.lock();
        inner.check(FailOn::CreateCommit)?;
        if !inner.trees.contains_key(tree) {
            return Err(not_found(format!("tree {}", tree)));
        }
        let parents = parents.to_vec();
        let sha = inner.put_commit(CommitObject {
            tree: tree.to_string(),
            parents: parents.clone(),
            message: message.to_string(),
        });
        inner.writes.push(RecordedWrite::Commit {
            sha: sha.clone(),
            parents,
        });
        Ok(sha)
    }

    async fn update_ref(
        &self,
        repo: &RepoSlug,
        branch: &str,
        expected_old: &str,
        new: &str,
    ) -> Result<RefUpdate, GitHubError> {
        let mut inner = self.lock();
        inner.check(FailOn::UpdateRef)?;
        let key = (repo.to_string(), branch.to_string());
        let actual = inner
            .refs
            .get(&key)
            .cloned()
            .ok_or_else(|| not_found(format!("{}: branch '{}'", repo, branch)))?;
        if actual != expected_old {
            return Ok(RefUpdate::Conflict { actual });
        }
        inner.refs.insert(key, new.to_string());
        inner.writes.push(RecordedWrite::Ref {
            branch: branch.to_string(),
            from: actual,
            to: new.to_string(),
        });
        Ok(RefUpdate::Updated)
    }
}
