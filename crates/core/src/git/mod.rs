//! Remote repository access.

pub mod github;
pub mod memory;
pub mod remote;

pub use github::GitHubClient;
pub use memory::MemoryRemote;
pub use remote::{ContentProvider, ObjectStoreWriter, RefUpdate, TreeEntry};
