//! Stable exit codes for `matrix-lab` commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid configuration, unknown plugin, or other fatal errors.
pub const INVALID: i32 = 1;
/// A stored snapshot could not be loaded while resuming.
pub const CHECKPOINT: i32 = 2;
/// `--strict` run finished with at least one failed (item, combination) pair.
pub const FAILED_PAIRS: i32 = 3;
