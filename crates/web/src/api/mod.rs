//! REST API endpoint modules.

pub mod sessions;
pub mod status;
