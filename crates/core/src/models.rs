//! Domain model types used throughout mergeway.
//!
//! These types bridge the merge engine, the resolution tracker, the
//! synthesizer and the web API.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Line sequences
// ---------------------------------------------------------------------------

/// Split text strictly on `\n`.
///
/// A trailing newline yields a trailing empty element, so any existing text
/// (even the empty string) produces at least one line. An empty sequence
/// therefore always means "file absent".
pub fn split_lines(text: &str) -> Vec<String> {
    text.split('\n').map(str::to_string).collect()
}

/// Inverse of [`split_lines`]. Returns `None` for the empty sequence.
pub fn join_lines(lines: &[String]) -> Option<String> {
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

// ---------------------------------------------------------------------------
// Repository coordinates
// ---------------------------------------------------------------------------

/// A repository in `owner/name` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoSlug {
    pub owner: String,
    pub name: String,
}

impl RepoSlug {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoSlug {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(owner, name))
            }
            _ => Err(format!("'{}' is not in 'owner/repo' format", s)),
        }
    }
}

// ---------------------------------------------------------------------------
// Hunks
// ---------------------------------------------------------------------------

/// A contiguous region of merge output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Hunk {
    /// Both sides agree; needs no input.
    Clean { resolved_lines: Vec<String> },
    /// The sides disagree over this region.
    Conflict {
        base_lines: Vec<String>,
        head_lines: Vec<String>,
    },
}

impl Hunk {
    pub fn clean(lines: Vec<String>) -> Self {
        Self::Clean {
            resolved_lines: lines,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

// ---------------------------------------------------------------------------
// File reports
// ---------------------------------------------------------------------------

/// One of the three versions a file is fetched at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Ancestor,
    Base,
    Head,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ancestor => write!(f, "ancestor"),
            Self::Base => write!(f, "base"),
            Self::Head => write!(f, "head"),
        }
    }
}

/// The merge outcome for one changed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictFileReport {
    pub path: String,
    pub hunks: Vec<Hunk>,
    pub has_conflicts: bool,
    pub auto_resolved: bool,
    /// Hunk count exceeded the configured ceiling.
    #[serde(default)]
    pub oversized: bool,
    /// Positions whose content could not be read and were treated as absent.
    #[serde(default)]
    pub unreadable: Vec<Position>,
    /// Mode the merged file is written with.
    #[serde(default)]
    pub mode: FileMode,
    /// The base branch version, used to decide whether a blob must be written.
    #[serde(skip)]
    pub base_lines: Option<Vec<String>>,
    #[serde(skip)]
    pub base_mode: Option<FileMode>,
}

impl ConflictFileReport {
    /// Build a report, deriving both flags from the hunks so they can never
    /// contradict each other.
    pub fn new(path: impl Into<String>, hunks: Vec<Hunk>) -> Self {
        let has_conflicts = hunks.iter().any(Hunk::is_conflict);
        Self {
            path: path.into(),
            hunks,
            has_conflicts,
            auto_resolved: !has_conflicts,
            oversized: false,
            unreadable: Vec::new(),
            mode: FileMode::Regular,
            base_lines: None,
            base_mode: None,
        }
    }

    pub fn with_base_lines(mut self, base_lines: Option<Vec<String>>) -> Self {
        self.base_lines = base_lines;
        self
    }

    pub fn with_modes(mut self, mode: FileMode, base_mode: Option<FileMode>) -> Self {
        self.mode = mode;
        self.base_mode = base_mode;
        self
    }

    pub fn conflict_count(&self) -> usize {
        self.hunks.iter().filter(|h| h.is_conflict()).count()
    }
}

/// Git mode of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FileMode {
    #[default]
    #[serde(rename = "100644")]
    Regular,
    #[serde(rename = "100755")]
    Executable,
    #[serde(rename = "120000")]
    Symlink,
    #[serde(rename = "160000")]
    Submodule,
}

impl FileMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regular => "100644",
            Self::Executable => "100755",
            Self::Symlink => "120000",
            Self::Submodule => "160000",
        }
    }

    /// Parse a git mode string. Trees (`040000`) and unknown modes give `None`.
    pub fn parse(mode: &str) -> Option<Self> {
        match mode {
            "100644" => Some(Self::Regular),
            "100755" => Some(Self::Executable),
            "120000" => Some(Self::Symlink),
            "160000" => Some(Self::Submodule),
            _ => None,
        }
    }

    /// Whether the entry is an ordinary file whose text can be merged.
    pub fn is_text_file(&self) -> bool {
        matches!(self, Self::Regular | Self::Executable)
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A single base/head comparison with the merge report of every changed
/// file. Immutable once fetched: re-comparing creates a new session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConflictSession {
    pub repo: RepoSlug,
    pub merge_base_sha: String,
    pub base_branch: String,
    pub head_branch: String,
    /// Base branch tip at comparison time; the ref update is conditioned on it.
    pub base_sha: String,
    /// Tree of the base branch tip.
    pub base_tree_sha: String,
    /// Head branch tip at comparison time.
    pub head_sha: String,
    /// Reports, ordered by path.
    pub files: Vec<ConflictFileReport>,
    /// Whether the changed-file list was cut, either at the configured cap
    /// or by the remote itself.
    pub truncated: bool,
    /// Changed files the remote reported. A lower bound when the remote cut
    /// its own list.
    pub total_changed_files: usize,
    pub fetched_at: DateTime<Utc>,
}

impl MergeConflictSession {
    pub fn file(&self, path: &str) -> Option<&ConflictFileReport> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn has_conflicts(&self) -> bool {
        self.files.iter().any(|f| f.has_conflicts)
    }
}
