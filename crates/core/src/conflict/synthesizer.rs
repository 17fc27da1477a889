//! Merge commit synthesis.
//!
//! Turns a fully resolved session into a two-parent merge commit on the
//! remote: blobs for changed files, one tree on top of the base tree, one
//! commit, then a conditional ref update.
//!
//! The remote has no transaction spanning these steps. Blobs, trees and
//! commits created before a failure stay behind unreferenced; only the final
//! ref update makes anything visible, and it is skipped unless every earlier
//! step succeeded. Re-running always starts from scratch.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::conflict::resolver::{FileResolution, ResolutionState};
use crate::errors::{GitHubError, SynthesisError, SynthesisStep};
use crate::git::remote::{ObjectStoreWriter, RefUpdate, TreeEntry};
use crate::models::{join_lines, ConflictFileReport, FileMode, MergeConflictSession};

/// What a synthesis will do to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedChange {
    Write {
        path: String,
        content: String,
        mode: FileMode,
    },
    Delete {
        path: String,
    },
}

impl PlannedChange {
    pub fn path(&self) -> &str {
        match self {
            Self::Write { path, .. } | Self::Delete { path } => path,
        }
    }
}

/// Result of a successful synthesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitOutcome {
    pub commit_sha: String,
    pub tree_sha: String,
    pub files_written: Vec<String>,
    pub files_deleted: Vec<String>,
    /// Files left as on base because some version could not be read, or
    /// because they are symlinks or submodules.
    pub files_skipped: Vec<String>,
}

/// Writes merge commits through an [`ObjectStoreWriter`].
#[derive(Clone)]
pub struct MergeCommitSynthesizer {
    writer: Arc<dyn ObjectStoreWriter>,
}

impl MergeCommitSynthesizer {
    pub fn new(writer: Arc<dyn ObjectStoreWriter>) -> Self {
        Self { writer }
    }

    /// Decide every file's change without touching the remote.
    ///
    /// Fails if the session is truncated or any file is still pending. Files
    /// whose merged content and mode equal the base version are left out.
    /// Files with an unreadable version, and symlinks and submodules, are
    /// returned separately as skipped.
    pub fn plan(
        session: &MergeConflictSession,
        state: &ResolutionState,
    ) -> Result<(Vec<PlannedChange>, Vec<String>), SynthesisError> {
        if session.truncated {
            return Err(SynthesisError::IncompleteSession {
                covered: session.files.len(),
                total: session.total_changed_files,
            });
        }

        let mut changes = Vec::new();
        let mut skipped = Vec::new();
        for report in &session.files {
            let lines = state
                .resolved_lines(&report.path)
                .ok_or_else(|| SynthesisError::Unresolved {
                    path: report.path.clone(),
                })?;
            if !report.unreadable.is_empty() || !report.mode.is_text_file() {
                skipped.push(report.path.clone());
                continue;
            }
            let base = report.base_lines.as_deref().and_then(join_lines);
            let same_mode = report.base_mode.unwrap_or_default() == report.mode;
            match join_lines(&lines) {
                Some(content) if same_mode && base.as_deref() == Some(content.as_str()) => {}
                Some(content) => changes.push(PlannedChange::Write {
                    path: report.path.clone(),
                    content,
                    mode: report.mode,
                }),
                None if base.is_some() => changes.push(PlannedChange::Delete {
                    path: report.path.clone(),
                }),
                None => {}
            }
        }
        Ok((changes, skipped))
    }

    /// Write the merge commit and advance `session.base_branch` to it.
    ///
    /// The ref only moves if the branch still points at `session.base_sha`.
    #[instrument(skip(self, session, state, message), fields(repo = %session.repo, branch = %session.base_branch))]
    pub async fn commit_resolution(
        &self,
        session: &MergeConflictSession,
        state: &ResolutionState,
        message: &str,
    ) -> Result<CommitOutcome, SynthesisError> {
        let (changes, files_skipped) = Self::plan(session, state)?;
        info!(
            changes = changes.len(),
            skipped = files_skipped.len(),
            "synthesizing merge commit"
        );

        let mut entries = self.write_blobs(session, &changes).await?;
        entries.extend(changes.iter().filter_map(|c| match c {
            PlannedChange::Delete { path } => Some(TreeEntry::delete(path.clone())),
            PlannedChange::Write { .. } => None,
        }));
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        let tree_sha = if entries.is_empty() {
            debug!("no file changes, reusing base tree");
            session.base_tree_sha.clone()
        } else {
            self.writer
                .create_tree(&session.repo, &entries, &session.base_tree_sha)
                .await
                .map_err(step(SynthesisStep::CreateTree))?
        };

        let commit_sha = self
            .writer
            .create_commit(
                &session.repo,
                &tree_sha,
                message,
                [session.base_sha.clone(), session.head_sha.clone()],
            )
            .await
            .map_err(step(SynthesisStep::CreateCommit))?;

        let update = self
            .writer
            .update_ref(
                &session.repo,
                &session.base_branch,
                &session.base_sha,
                &commit_sha,
            )
            .await
            .map_err(step(SynthesisStep::UpdateRef))?;
        if let RefUpdate::Conflict { actual } = update {
            warn!(expected = %session.base_sha, actual = %actual, "target branch moved");
            return Err(SynthesisError::RefConflict {
                branch: session.base_branch.clone(),
                expected: session.base_sha.clone(),
                actual,
            });
        }

        let (mut files_written, mut files_deleted) = (Vec::new(), Vec::new());
        for change in changes {
            match change {
                PlannedChange::Write { path, .. } => files_written.push(path),
                PlannedChange::Delete { path } => files_deleted.push(path),
            }
        }
        info!(commit = %commit_sha, "merge commit published");
        Ok(CommitOutcome {
            commit_sha,
            tree_sha,
            files_written,
            files_deleted,
            files_skipped,
        })
    }

    /// Create one blob per written file, concurrently. The first failure
    /// aborts the rest.
    async fn write_blobs(
        &self,
        session: &MergeConflictSession,
        changes: &[PlannedChange],
    ) -> Result<Vec<TreeEntry>, SynthesisError> {
        let mut tasks = JoinSet::new();
        for change in changes {
            if let PlannedChange::Write {
                path,
                content,
                mode,
            } = change
            {
                let writer = Arc::clone(&self.writer);
                let repo = session.repo.clone();
                let path = path.clone();
                let content = content.clone();
                let mode = *mode;
                tasks.spawn(async move {
                    let sha = writer.create_blob(&repo, &content).await?;
                    Ok::<_, GitHubError>(TreeEntry::blob(path, sha, mode))
                });
            }
        }

        let mut entries = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            let entry = joined
                .map_err(|e| GitHubError::ApiError {
                    status: 500,
                    body: format!("blob task failed: {}", e),
                })
                .and_then(|r| r)
                .map_err(step(SynthesisStep::CreateBlob))?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

fn step(step: SynthesisStep) -> impl Fn(GitHubError) -> SynthesisError {
    move |source| {
        warn!(%step, error = %source, "synthesis step failed");
        SynthesisError::StepFailed { step, source }
    }
}

/// Unified diff from the base version to the resolved content, for review
/// before committing. `None` while the file has pending hunks.
pub fn preview_patch(report: &ConflictFileReport, resolution: &FileResolution) -> Option<String> {
    let merged = resolution.resolved_lines()?;
    let base = report
        .base_lines
        .as_deref()
        .and_then(join_lines)
        .unwrap_or_default();
    let merged = join_lines(&merged).unwrap_or_default();
    let patch = diffy::create_patch(&base, &merged).to_string();

    // Replace diffy's generic file headers with the file's path.
    let body = patch.splitn(3, '\n').nth(2).unwrap_or_default();
    Some(format!(
        "--- a/{path}\n+++ b/{path}\n{body}",
        path = report.path,
        body = body
    ))
}
