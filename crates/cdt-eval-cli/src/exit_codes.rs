//! Process exit codes. Part of the public contract; scripts and CI depend on them.

pub const EXIT_SUCCESS: i32 = 0;
/// At least one evaluated case is not passing, or the catalog references unknown codes.
pub const EXIT_CASES_FAILED: i32 = 1;
/// Bad configuration or broken infrastructure (service unreachable, store corrupt).
pub const EXIT_CONFIG_ERROR: i32 = 2;
