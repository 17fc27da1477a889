//! Conflict detection across a base/head comparison.
//!
//! The [`ConflictDetector`] compares two branches, fetches every changed file
//! at the merge base, the base tip and the head tip, and classifies each file
//! into a [`ConflictFileReport`]. Trivial cases are settled without running
//! the merge engine.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::config::LimitsConfig;
use crate::conflict::merger::Merger;
use crate::errors::{ComparisonError, ContentError};
use crate::git::remote::ContentProvider;
use crate::models::{
    split_lines, ConflictFileReport, FileMode, Hunk, MergeConflictSession, Position, RepoSlug,
};

/// Fetches comparisons and builds merge conflict sessions.
#[derive(Clone)]
pub struct ConflictDetector {
    provider: Arc<dyn ContentProvider>,
    limits: LimitsConfig,
}

/// Commits a file's three versions are read at.
#[derive(Debug, Clone)]
struct Revisions {
    ancestor: String,
    base: String,
    head: String,
}

/// A file's mode at each position (`None` = absent there).
#[derive(Debug, Clone, Copy, Default)]
struct Modes {
    ancestor: Option<FileMode>,
    base: Option<FileMode>,
    head: Option<FileMode>,
}

impl ConflictDetector {
    pub fn new(provider: Arc<dyn ContentProvider>, limits: LimitsConfig) -> Self {
        Self { provider, limits }
    }

    /// Compare `base...head` in `repo` and merge every changed file.
    ///
    /// Only a failed comparison is fatal. Files that cannot be read at some
    /// position are treated as absent there and the position is recorded on
    /// the report. Reports are ordered by path regardless of fetch order.
    ///
    /// Dropping the returned future aborts all outstanding fetches.
    #[instrument(skip(self), fields(repo = %repo))]
    pub async fn fetch_merge_conflicts(
        &self,
        repo: &RepoSlug,
        base: &str,
        head: &str,
    ) -> Result<MergeConflictSession, ComparisonError> {
        let comparison = self.provider.compare(repo, base, head).await.map_err(|e| {
            warn!(error = %e, "comparison unavailable");
            ComparisonError::from(e)
        })?;

        let total_changed_files = comparison.files.len();
        let truncated = !comparison.files_complete || total_changed_files > self.limits.max_files;
        if truncated {
            warn!(
                total = total_changed_files,
                max_files = self.limits.max_files,
                remote_complete = comparison.files_complete,
                "comparison truncated"
            );
        }

        let revisions = Arc::new(Revisions {
            ancestor: comparison.merge_base_sha.clone(),
            base: comparison.base_sha.clone(),
            head: comparison.head_sha.clone(),
        });
        let paths: Vec<String> = comparison
            .files
            .iter()
            .take(self.limits.max_files)
            .map(|f| f.path.clone())
            .collect();
        let mut modes = self.fetch_modes(repo, &revisions, &paths).await?;

        let permits = self
            .limits
            .max_concurrent_fetches
            .clamp(1, Semaphore::MAX_PERMITS);
        let semaphore = Arc::new(Semaphore::new(permits));
        let max_hunks = self.limits.max_hunks_per_file;

        let mut tasks = JoinSet::new();
        for path in paths {
            let provider = Arc::clone(&self.provider);
            let semaphore = Arc::clone(&semaphore);
            let revisions = Arc::clone(&revisions);
            let repo = repo.clone();
            let file_modes = modes.remove(&path).unwrap_or_default();
            tasks.spawn(async move {
                load_file(provider, semaphore, &repo, path, &revisions, file_modes, max_hunks)
                    .await
            });
        }

        let mut files = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => files.push(report),
                Err(e) => {
                    return Err(ComparisonError::Unavailable {
                        reason: format!("file task failed: {}", e),
                        http_status: Some(500),
                    });
                }
            }
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let conflicted = files.iter().filter(|f| f.has_conflicts).count();
        info!(
            files = files.len(),
            conflicted,
            truncated,
            "merge conflicts fetched"
        );

        Ok(MergeConflictSession {
            repo: repo.clone(),
            merge_base_sha: comparison.merge_base_sha,
            base_branch: base.to_string(),
            head_branch: head.to_string(),
            base_sha: comparison.base_sha,
            base_tree_sha: comparison.base_tree_sha,
            head_sha: comparison.head_sha,
            files,
            truncated,
            total_changed_files,
            fetched_at: Utc::now(),
        })
    }

    /// Look up every path's mode at the three commits.
    async fn fetch_modes(
        &self,
        repo: &RepoSlug,
        revisions: &Revisions,
        paths: &[String],
    ) -> Result<HashMap<String, Modes>, ComparisonError> {
        if paths.is_empty() {
            return Ok(HashMap::new());
        }
        let (ancestor, base, head) = tokio::try_join!(
            self.provider.file_modes(repo, &revisions.ancestor, paths),
            self.provider.file_modes(repo, &revisions.base, paths),
            self.provider.file_modes(repo, &revisions.head, paths),
        )
        .map_err(|e| {
            warn!(error = %e, "file modes unavailable");
            ComparisonError::from(e)
        })?;
        Ok(paths
            .iter()
            .map(|path| {
                let modes = Modes {
                    ancestor: ancestor.get(path).copied(),
                    base: base.get(path).copied(),
                    head: head.get(path).copied(),
                };
                (path.clone(), modes)
            })
            .collect())
    }
}

async fn load_file(
    provider: Arc<dyn ContentProvider>,
    semaphore: Arc<Semaphore>,
    repo: &RepoSlug,
    path: String,
    revisions: &Revisions,
    modes: Modes,
    max_hunks: usize,
) -> ConflictFileReport {
    let (ancestor, base, head) = tokio::join!(
        fetch(&*provider, &semaphore, repo, &path, &revisions.ancestor),
        fetch(&*provider, &semaphore, repo, &path, &revisions.base),
        fetch(&*provider, &semaphore, repo, &path, &revisions.head),
    );

    let mut unreadable = Vec::new();
    let mut settle = |position: Position, fetched: Result<Option<String>, ContentError>| {
        match fetched {
            Ok(text) => text.map(|t| split_lines(&t)),
            Err(e) => {
                warn!(path = %path, %position, error = %e, "content unreadable, treating as absent");
                unreadable.push(position);
                None
            }
        }
    };
    let ancestor = settle(Position::Ancestor, ancestor);
    let base = settle(Position::Base, base);
    let head = settle(Position::Head, head);

    let mode = merge_mode(modes.ancestor, modes.base, modes.head);
    let mut report = classify(&path, ancestor, base, head).with_modes(mode, modes.base);
    report.unreadable = unreadable;
    if report.hunks.len() > max_hunks {
        warn!(path = %path, hunks = report.hunks.len(), max_hunks, "file flagged as oversized");
        report.oversized = true;
    }
    report
}

async fn fetch(
    provider: &dyn ContentProvider,
    semaphore: &Semaphore,
    repo: &RepoSlug,
    path: &str,
    git_ref: &str,
) -> Result<Option<String>, ContentError> {
    let _permit = semaphore
        .acquire()
        .await
        .map_err(|e| ContentError::Unreadable {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
    provider.get_blob_content(repo, path, git_ref).await
}

/// Classify one file from its three versions (`None` = absent), cheapest
/// case first. Only when both sides changed is the merge engine invoked.
pub fn classify(
    path: &str,
    ancestor: Option<Vec<String>>,
    base: Option<Vec<String>>,
    head: Option<Vec<String>>,
) -> ConflictFileReport {
    let hunks = match (&ancestor, &base, &head) {
        (None, None, Some(head)) => {
            debug!(path, "added on head only");
            whole(head)
        }
        (None, Some(base), None) => {
            debug!(path, "added on base only");
            whole(base)
        }
        (_, None, None) => {
            debug!(path, "absent on both sides");
            Vec::new()
        }
        _ => {
            let empty = Vec::new();
            let ancestor_lines = ancestor.as_ref().unwrap_or(&empty);
            let base_lines = base.as_ref().unwrap_or(&empty);
            let head_lines = head.as_ref().unwrap_or(&empty);

            if base_lines == ancestor_lines {
                debug!(path, "only head changed");
                whole(head_lines)
            } else if head_lines == ancestor_lines || head_lines == base_lines {
                debug!(path, "only base changed, or both changed identically");
                whole(base_lines)
            } else {
                debug!(path, "both sides changed, running three-way merge");
                Merger::merge(ancestor_lines, base_lines, head_lines).hunks
            }
        }
    };
    ConflictFileReport::new(path, hunks).with_base_lines(base)
}

/// Three-way merge of a file's mode. A side that kept the ancestor's mode
/// yields to the other; when both changed it differently, base wins. Any
/// symlink or submodule position makes the result that non-file mode.
pub fn merge_mode(
    ancestor: Option<FileMode>,
    base: Option<FileMode>,
    head: Option<FileMode>,
) -> FileMode {
    if let Some(special) = [head, base, ancestor]
        .into_iter()
        .flatten()
        .find(|m| !m.is_text_file())
    {
        return special;
    }
    match (base, head) {
        (Some(b), Some(h)) if b == h => b,
        (Some(b), Some(h)) if Some(b) == ancestor => h,
        (Some(b), _) => b,
        (None, Some(h)) => h,
        (None, None) => ancestor.unwrap_or_default(),
    }
}

fn whole(lines: &[String]) -> Vec<Hunk> {
    if lines.is_empty() {
        Vec::new()
    } else {
        vec![Hunk::clean(lines.to_vec())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(v: &[&str]) -> Option<Vec<String>> {
        Some(v.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_added_on_head_only() {
        let report = classify("new.rs", None, None, lines(&["fn main() {}", ""]));
        assert!(report.auto_resolved);
        assert_eq!(
            report.hunks,
            vec![Hunk::clean(lines(&["fn main() {}", ""]).unwrap())]
        );
        assert!(report.base_lines.is_none());
    }

    #[test]
    fn test_added_on_base_only() {
        let report = classify("b.rs", None, lines(&["x"]), None);
        assert!(report.auto_resolved);
        assert_eq!(report.hunks, vec![Hunk::clean(lines(&["x"]).unwrap())]);
    }

    #[test]
    fn test_deleted_on_both_sides() {
        let report = classify("gone.rs", lines(&["x"]), None, None);
        assert!(report.auto_resolved);
        assert!(report.hunks.is_empty());
    }

    #[test]
    fn test_only_one_side_changed() {
        let report = classify("a", lines(&["a"]), lines(&["a"]), lines(&["b"]));
        assert_eq!(report.hunks, vec![Hunk::clean(lines(&["b"]).unwrap())]);

        let report = classify("a", lines(&["a"]), lines(&["c"]), lines(&["a"]));
        assert_eq!(report.hunks, vec![Hunk::clean(lines(&["c"]).unwrap())]);
    }

    #[test]
    fn test_neither_side_changed() {
        let report = classify("a", lines(&["a", "b"]), lines(&["a", "b"]), lines(&["a", "b"]));
        assert!(report.auto_resolved);
        assert_eq!(report.hunks, vec![Hunk::clean(lines(&["a", "b"]).unwrap())]);
    }

    #[test]
    fn test_head_deletes_unchanged_file() {
        let report = classify("a", lines(&["a"]), lines(&["a"]), None);
        assert!(report.auto_resolved);
        assert!(report.hunks.is_empty());
        assert_eq!(report.base_lines, lines(&["a"]));
    }

    #[test]
    fn test_delete_versus_edit_conflicts() {
        let report = classify("a", lines(&["a", "b"]), lines(&["a", "X"]), None);
        assert!(report.has_conflicts);
        assert!(report.hunks.iter().any(|h| matches!(
            h,
            Hunk::Conflict { head_lines, .. } if head_lines.is_empty()
        )));
    }

    #[test]
    fn test_both_changed_delegates_to_merge() {
        let report = classify(
            "a",
            lines(&["a", "b", "c"]),
            lines(&["a", "X", "c"]),
            lines(&["a", "Y", "c"]),
        );
        assert!(report.has_conflicts);
        assert!(!report.auto_resolved);
        assert_eq!(report.conflict_count(), 1);
    }

    #[test]
    fn test_merge_mode() {
        use FileMode::{Executable, Regular, Symlink};
        assert_eq!(merge_mode(Some(Regular), Some(Regular), Some(Executable)), Executable);
        assert_eq!(merge_mode(Some(Regular), Some(Executable), Some(Regular)), Executable);
        assert_eq!(merge_mode(Some(Executable), Some(Executable), Some(Executable)), Executable);
        assert_eq!(merge_mode(None, None, Some(Executable)), Executable);
        assert_eq!(merge_mode(Some(Executable), Some(Executable), None), Executable);
        assert_eq!(merge_mode(None, None, None), Regular);
        assert_eq!(merge_mode(Some(Regular), Some(Symlink), Some(Regular)), Symlink);
    }

    #[test]
    fn test_add_add_with_different_content_conflicts() {
        let report = classify("a", None, lines(&["one"]), lines(&["two"]));
        assert!(report.has_conflicts);
        assert_eq!(
            report.hunks,
            vec![Hunk::Conflict {
                base_lines: lines(&["one"]).unwrap(),
                head_lines: lines(&["two"]).unwrap(),
            }]
        );
    }
}
