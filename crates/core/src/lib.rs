//! mergeway core library.
//!
//! This crate provides the pieces behind inline merge conflict resolution:
//! a line differencer and three-way merge engine, a detector that merges
//! every file of a branch comparison, a per-hunk resolution tracker, and a
//! synthesizer that publishes the result as a merge commit through the
//! remote host's object API.

pub mod config;
pub mod conflict;
pub mod errors;
pub mod git;
pub mod models;

// Re-exports for convenience.
pub use config::AppConfig;
pub use conflict::{ConflictDetector, ConflictResolver, MergeCommitSynthesizer};
pub use git::{GitHubClient, MemoryRemote};
