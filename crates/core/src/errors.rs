//! Error types for the mergeway core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    GitHub(#[from] GitHubError),

    #[error(transparent)]
    Comparison(#[from] ComparisonError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CoreError {
    /// The HTTP status a caller should report for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::GitHub(e) => e.http_status().unwrap_or(502),
            Self::Comparison(e) => e.http_status(),
            Self::Resolve(_) => 400,
            Self::Synthesis(e) => e.http_status(),
            Self::Config(_) => 500,
        }
    }
}

// ---------------------------------------------------------------------------
// GitHub API errors
// ---------------------------------------------------------------------------

/// Errors from GitHub REST API interactions.
#[derive(Debug, Error)]
pub enum GitHubError {
    /// HTTP-level transport error (network, TLS, etc.).
    #[error("GitHub HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The API returned a non-success status code.
    #[error("GitHub API error (HTTP {status}): {body}")]
    ApiError { status: u16, body: String },

    /// Authentication token is missing or invalid.
    #[error("GitHub authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The requested resource does not exist (or is not visible to the token).
    #[error("GitHub resource not found: {0}")]
    NotFound(String),

    /// Rate limit exceeded.
    #[error("GitHub rate limit exceeded, resets at {reset_at}")]
    RateLimited { reset_at: String },

    /// A response body could not be interpreted.
    #[error("GitHub response parse error: {0}")]
    ParseError(String),
}

impl GitHubError {
    /// The remote HTTP status behind this error, when there was one.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::HttpError(e) => e.status().map(|s| s.as_u16()),
            Self::ApiError { status, .. } => Some(*status),
            Self::AuthenticationFailed(_) => Some(401),
            Self::NotFound(_) => Some(404),
            Self::RateLimited { .. } => Some(429),
            Self::ParseError(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Content errors
// ---------------------------------------------------------------------------

/// A single file could not be read at one position. Never fatal: the
/// orchestrator treats the file as absent there.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("content of '{path}' could not be read: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("content of '{path}' is not UTF-8 text")]
    Binary { path: String },
}

// ---------------------------------------------------------------------------
// Comparison errors
// ---------------------------------------------------------------------------

/// The base/head comparison itself could not be computed.
#[derive(Debug, Error)]
pub enum ComparisonError {
    #[error("comparison unavailable: {reason}")]
    Unavailable {
        reason: String,
        http_status: Option<u16>,
    },
}

impl ComparisonError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unavailable { http_status, .. } => http_status.unwrap_or(502),
        }
    }
}

impl From<GitHubError> for ComparisonError {
    fn from(err: GitHubError) -> Self {
        Self::Unavailable {
            http_status: err.http_status(),
            reason: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution errors
// ---------------------------------------------------------------------------

/// Errors from resolution state transitions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// The path is not part of the session.
    #[error("file '{0}' is not part of this merge session")]
    UnknownFile(String),

    /// The hunk index does not exist in the file.
    #[error("hunk {index} out of range for '{path}' ({len} hunks)")]
    HunkOutOfRange {
        path: String,
        index: usize,
        len: usize,
    },

    /// Clean hunks need no input and cannot be resolved.
    #[error("hunk {index} of '{path}' is not a conflict")]
    NotAConflict { path: String, index: usize },
}

// ---------------------------------------------------------------------------
// Synthesis errors
// ---------------------------------------------------------------------------

/// Errors from merge commit synthesis.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// A file still has pending hunks; nothing was written.
    #[error("file '{path}' still has unresolved conflicts")]
    Unresolved { path: String },

    /// The comparison was truncated, so the session does not cover every
    /// changed file; nothing was written.
    #[error("comparison covers {covered} of {total} changed files; cannot synthesize a partial merge")]
    IncompleteSession { covered: usize, total: usize },

    /// The target branch moved since the comparison was taken.
    #[error("branch '{branch}' moved from {expected} to {actual}; refresh and re-resolve")]
    RefConflict {
        branch: String,
        expected: String,
        actual: String,
    },

    /// One step of the blob/tree/commit/ref sequence failed. The ref was not
    /// moved; objects written before the failure are unreferenced.
    #[error("merge commit synthesis failed while {step}: {source}")]
    StepFailed {
        step: SynthesisStep,
        #[source]
        source: GitHubError,
    },
}

impl SynthesisError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unresolved { .. } | Self::IncompleteSession { .. } => 400,
            Self::RefConflict { .. } => 409,
            Self::StepFailed { source, .. } => source.http_status().unwrap_or(502),
        }
    }

    /// Whether re-invoking the commit from scratch may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StepFailed { .. })
    }
}

/// The write step a synthesis failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisStep {
    CreateBlob,
    CreateTree,
    CreateCommit,
    UpdateRef,
}

impl std::fmt::Display for SynthesisStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateBlob => write!(f, "creating blobs"),
            Self::CreateTree => write!(f, "creating the tree"),
            Self::CreateCommit => write!(f, "creating the commit"),
            Self::UpdateRef => write!(f, "updating the branch ref"),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing { var: String, field: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
