//! Error code constants
//!
//! Stable identifiers attached to run outcomes so front ends can localise the
//! human-readable message without parsing it.

/// rsync could not be started
pub const ERR_SPAWN_FAILED: &str = "ERR_SPAWN_FAILED";

/// rsync exited with a non-zero status
pub const ERR_PROCESS_EXIT: &str = "ERR_PROCESS_EXIT";

/// The run was interrupted by the user
pub const ERR_INTERRUPTED: &str = "ERR_INTERRUPTED";

/// rsync is not installed or not on PATH
pub const ERR_RSYNC_NOT_FOUND: &str = "ERR_RSYNC_NOT_FOUND";
