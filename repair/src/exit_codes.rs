//! Stable exit codes for `repair` CLI commands.

/// The cycle repaired the code and the final run passed, or `repair fix` patched the file.
pub const SUCCESS: i32 = 0;
/// Invalid config, setup failure, or a cycle aborted by a launch or I/O error.
pub const INVALID: i32 = 1;
/// The initial run passed; nothing to repair.
pub const CLEAN: i32 = 2;
/// The oracle could not produce or apply a patch.
pub const REPAIR_FAILED: i32 = 3;
/// The patch was applied but the suite still fails.
pub const REGRESSED: i32 = 4;
/// The cycle was interrupted (Ctrl-C).
pub const CANCELLED: i32 = 130;
