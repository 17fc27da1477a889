//! Three-way merging, resolution tracking and merge commit synthesis.
//!
//! The conflict subsystem is responsible for:
//! 1. **Diffing** -- edit scripts between line sequences.
//! 2. **Merging** -- splitting a file into clean and conflicting hunks.
//! 3. **Detection** -- fetching a comparison and merging every changed file.
//! 4. **Resolution** -- tracking per-hunk decisions.
//! 5. **Synthesis** -- publishing the result as a two-parent merge commit.

pub mod detector;
pub mod diff;
pub mod merger;
pub mod resolver;
pub mod synthesizer;

pub use detector::{classify, merge_mode, ConflictDetector};
pub use diff::{diff, EditOp, EditScript};
pub use merger::{MergeResult, Merger};
pub use resolver::{
    ConflictResolver, FileResolution, FileStatus, HunkAction, HunkResolution, HunkStatus,
    ResolutionState, ResolutionSummary, Side,
};
pub use synthesizer::{preview_patch, CommitOutcome, MergeCommitSynthesizer, PlannedChange};
