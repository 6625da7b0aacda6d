//! Stable exit codes for `rff` CLI commands.

/// Command succeeded, or `rff solve` produced an accepted answer.
pub const OK: i32 = 0;
/// Command failed due to invalid config/arguments, a malformed task, or
/// repeated model failures.
pub const INVALID: i32 = 1;
/// `rff solve` stopped without an accepted answer (iteration budget exhausted).
pub const NOT_ACCEPTED: i32 = 2;
