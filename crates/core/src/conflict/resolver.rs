//! Per-hunk resolution tracking.
//!
//! [`ResolutionState`] is an immutable mapping from path to
//! [`FileResolution`]. Every transition goes through [`ResolutionState::apply`],
//! which returns a new state and leaves the old one untouched.
//! [`ConflictResolver`] pairs a session with its current state and offers the
//! named operations (accept base, accept head, ...).

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ResolveError;
use crate::models::{ConflictFileReport, Hunk, MergeConflictSession};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Resolution status of a single hunk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HunkStatus {
    /// Conflict awaiting a decision.
    Pending,
    AcceptedBase,
    AcceptedHead,
    /// Base lines followed by head lines.
    AcceptedBoth,
    Custom,
}

impl std::fmt::Display for HunkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::AcceptedBase => write!(f, "accepted_base"),
            Self::AcceptedHead => write!(f, "accepted_head"),
            Self::AcceptedBoth => write!(f, "accepted_both"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HunkResolution {
    pub status: HunkStatus,
    /// Whether the hunk is a conflict (clean hunks are fixed).
    pub conflict: bool,
    /// Lines this hunk contributes to the merged file. Empty while pending.
    pub resolved_lines: Vec<String>,
}

/// Aggregate status of a file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Merged without conflicts; never needed input.
    AutoResolved,
    /// At least one hunk is pending.
    Pending,
    /// Every conflict hunk has been decided.
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileResolution {
    pub status: FileStatus,
    /// One entry per hunk of the file's report, in the same order.
    pub hunks: Vec<HunkResolution>,
}

/// A transition applied to one hunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum HunkAction {
    AcceptBase,
    AcceptHead,
    AcceptBoth,
    Custom { lines: Vec<String> },
}

/// Which side a bulk operation takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Base,
    Head,
}

/// Counts over a whole session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolutionSummary {
    pub files: usize,
    pub auto_resolved_files: usize,
    pub resolved_files: usize,
    pub pending_files: usize,
    pub conflict_hunks: usize,
    pub pending_hunks: usize,
}

// ---------------------------------------------------------------------------
// File resolution
// ---------------------------------------------------------------------------

impl FileResolution {
    /// Initial resolution of a report: clean hunks are accepted as-is,
    /// conflicts start pending.
    pub fn from_report(report: &ConflictFileReport) -> Self {
        let hunks: Vec<HunkResolution> = report
            .hunks
            .iter()
            .map(|hunk| match hunk {
                Hunk::Clean { resolved_lines } => HunkResolution {
                    status: HunkStatus::AcceptedBase,
                    conflict: false,
                    resolved_lines: resolved_lines.clone(),
                },
                Hunk::Conflict { .. } => HunkResolution {
                    status: HunkStatus::Pending,
                    conflict: true,
                    resolved_lines: Vec::new(),
                },
            })
            .collect();
        let status = if report.has_conflicts {
            FileStatus::Pending
        } else {
            FileStatus::AutoResolved
        };
        Self { status, hunks }.recomputed()
    }

    fn recomputed(mut self) -> Self {
        if self.status != FileStatus::AutoResolved {
            self.status = if self.pending_hunks() > 0 {
                FileStatus::Pending
            } else {
                FileStatus::Resolved
            };
        }
        self
    }

    pub fn pending_hunks(&self) -> usize {
        self.hunks
            .iter()
            .filter(|h| h.status == HunkStatus::Pending)
            .count()
    }

    pub fn is_complete(&self) -> bool {
        self.status != FileStatus::Pending
    }

    /// Index of the first pending hunk.
    pub fn first_unresolved(&self) -> Option<usize> {
        self.hunks.iter().position(|h| h.status == HunkStatus::Pending)
    }

    /// The merged file: every hunk's lines concatenated in order. `None`
    /// while any hunk is pending.
    pub fn resolved_lines(&self) -> Option<Vec<String>> {
        if !self.is_complete() {
            return None;
        }
        Some(
            self.hunks
                .iter()
                .flat_map(|h| h.resolved_lines.iter().cloned())
                .collect(),
        )
    }
}

// ---------------------------------------------------------------------------
// Session resolution state
// ---------------------------------------------------------------------------

/// Resolution of every file in a session, keyed by path.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolutionState {
    files: BTreeMap<String, FileResolution>,
}

impl ResolutionState {
    pub fn new(session: &MergeConflictSession) -> Self {
        let files = session
            .files
            .iter()
            .map(|report| (report.path.clone(), FileResolution::from_report(report)))
            .collect();
        Self { files }
    }

    pub fn file(&self, path: &str) -> Option<&FileResolution> {
        self.files.get(path)
    }

    pub fn files(&self) -> impl Iterator<Item = (&str, &FileResolution)> {
        self.files.iter().map(|(p, f)| (p.as_str(), f))
    }

    /// Apply `action` to hunk `index` of `report`, returning the new state.
    ///
    /// Any decided hunk may be re-decided (including re-editing custom
    /// lines); nothing returns a hunk to pending.
    pub fn apply(
        &self,
        report: &ConflictFileReport,
        index: usize,
        action: &HunkAction,
    ) -> Result<Self, ResolveError> {
        let current = self
            .files
            .get(&report.path)
            .ok_or_else(|| ResolveError::UnknownFile(report.path.clone()))?;
        let hunk = report
            .hunks
            .get(index)
            .ok_or_else(|| ResolveError::HunkOutOfRange {
                path: report.path.clone(),
                index,
                len: report.hunks.len(),
            })?;
        let Hunk::Conflict {
            base_lines,
            head_lines,
        } = hunk
        else {
            return Err(ResolveError::NotAConflict {
                path: report.path.clone(),
                index,
            });
        };

        let (status, resolved_lines) = match action {
            HunkAction::AcceptBase => (HunkStatus::AcceptedBase, base_lines.clone()),
            HunkAction::AcceptHead => (HunkStatus::AcceptedHead, head_lines.clone()),
            HunkAction::AcceptBoth => (
                HunkStatus::AcceptedBoth,
                base_lines.iter().chain(head_lines).cloned().collect(),
            ),
            HunkAction::Custom { lines } => (HunkStatus::Custom, lines.clone()),
        };
        let resolution = HunkResolution {
            status,
            conflict: true,
            resolved_lines,
        };
        debug!(path = %report.path, index, status = %resolution.status, "hunk resolved");

        let mut file = current.clone();
        file.hunks[index] = resolution;
        let mut next = self.clone();
        next.files.insert(report.path.clone(), file.recomputed());
        Ok(next)
    }

    /// Take one side for every pending hunk of `report`. Already decided
    /// hunks are left alone.
    pub fn apply_all(&self, report: &ConflictFileReport, side: Side) -> Result<Self, ResolveError> {
        let current = self
            .files
            .get(&report.path)
            .ok_or_else(|| ResolveError::UnknownFile(report.path.clone()))?;
        let action = match side {
            Side::Base => HunkAction::AcceptBase,
            Side::Head => HunkAction::AcceptHead,
        };
        let pending: Vec<usize> = current
            .hunks
            .iter()
            .enumerate()
            .filter(|(_, h)| h.status == HunkStatus::Pending)
            .map(|(i, _)| i)
            .collect();

        let mut next = self.clone();
        for index in pending {
            next = next.apply(report, index, &action)?;
        }
        Ok(next)
    }

    /// Whether every file is resolved or auto-resolved.
    pub fn is_complete(&self) -> bool {
        self.files.values().all(FileResolution::is_complete)
    }

    /// First pending hunk in path order.
    pub fn first_unresolved(&self) -> Option<(&str, usize)> {
        self.files
            .iter()
            .find_map(|(path, f)| f.first_unresolved().map(|i| (path.as_str(), i)))
    }

    pub fn resolved_lines(&self, path: &str) -> Option<Vec<String>> {
        self.files.get(path)?.resolved_lines()
    }

    pub fn summary(&self) -> ResolutionSummary {
        let mut summary = ResolutionSummary {
            files: self.files.len(),
            ..Default::default()
        };
        for file in self.files.values() {
            match file.status {
                FileStatus::AutoResolved => summary.auto_resolved_files += 1,
                FileStatus::Resolved => summary.resolved_files += 1,
                FileStatus::Pending => summary.pending_files += 1,
            }
            summary.conflict_hunks += file.hunks.iter().filter(|h| h.conflict).count();
            summary.pending_hunks += file.pending_hunks();
        }
        summary
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// A session together with its current resolution state.
///
/// Each operation computes the next [`ResolutionState`] and swaps it in; a
/// failed operation leaves the state unchanged.
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    session: Arc<MergeConflictSession>,
    state: ResolutionState,
}

impl ConflictResolver {
    pub fn new(session: Arc<MergeConflictSession>) -> Self {
        let state = ResolutionState::new(&session);
        Self { session, state }
    }

    pub fn session(&self) -> &Arc<MergeConflictSession> {
        &self.session
    }

    pub fn state(&self) -> &ResolutionState {
        &self.state
    }

    fn report(&self, path: &str) -> Result<&ConflictFileReport, ResolveError> {
        self.session
            .file(path)
            .ok_or_else(|| ResolveError::UnknownFile(path.to_string()))
    }

    /// Apply a single-hunk action.
    pub fn resolve(&mut self, path: &str, index: usize, action: HunkAction) -> Result<(), ResolveError> {
        let next = self.state.apply(self.report(path)?, index, &action)?;
        self.state = next;
        Ok(())
    }

    pub fn accept_base(&mut self, path: &str, index: usize) -> Result<(), ResolveError> {
        info!(path, index, "resolving hunk: accept base");
        self.resolve(path, index, HunkAction::AcceptBase)
    }

    pub fn accept_head(&mut self, path: &str, index: usize) -> Result<(), ResolveError> {
        info!(path, index, "resolving hunk: accept head");
        self.resolve(path, index, HunkAction::AcceptHead)
    }

    pub fn accept_both(&mut self, path: &str, index: usize) -> Result<(), ResolveError> {
        info!(path, index, "resolving hunk: accept both");
        self.resolve(path, index, HunkAction::AcceptBoth)
    }

    pub fn set_custom(
        &mut self,
        path: &str,
        index: usize,
        lines: Vec<String>,
    ) -> Result<(), ResolveError> {
        info!(path, index, lines = lines.len(), "resolving hunk: custom lines");
        self.resolve(path, index, HunkAction::Custom { lines })
    }

    pub fn accept_all(&mut self, path: &str, side: Side) -> Result<(), ResolveError> {
        info!(path, ?side, "resolving all pending hunks");
        let next = self.state.apply_all(self.report(path)?, side)?;
        self.state = next;
        Ok(())
    }

    pub fn accept_all_base(&mut self, path: &str) -> Result<(), ResolveError> {
        self.accept_all(path, Side::Base)
    }

    pub fn accept_all_head(&mut self, path: &str) -> Result<(), ResolveError> {
        self.accept_all(path, Side::Head)
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_complete()
    }
}
