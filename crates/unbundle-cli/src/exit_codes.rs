//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

/// Success - operation completed without errors
#[allow(dead_code)]
pub const SUCCESS: i32 = 0;

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Configuration error - invalid namespace, filter, provider or reference
pub const CONFIG_ERROR: i32 = 2;

/// Resolution error - package, channel or version not found in a catalog
pub const RESOLUTION_ERROR: i32 = 3;

/// Retrieval error - registry unreachable, unauthorized, or bad layer content
pub const RETRIEVAL_ERROR: i32 = 4;

/// Bundle error - invalid bundle content or provisioning failure
pub const BUNDLE_ERROR: i32 = 5;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 6;

/// Cancelled - interrupted by Ctrl-C or the deadline passed
pub const CANCELLED: i32 = 130;
