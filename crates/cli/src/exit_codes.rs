//! CLI Exit Code Registry
//!
//! Single source of truth for `cmap` exit codes. Scripts and schedulers
//! rely on them.
//!
//! | Code | Meaning                                                   |
//! |------|-----------------------------------------------------------|
//! | 0    | Success                                                   |
//! | 1    | General error (unspecified)                               |
//! | 2    | Usage error (bad args, unreadable input file)             |
//! | 3    | Configuration could not be parsed or failed validation    |
//! | 4    | Store could not be opened, read or written                |
//! | 5    | Batch finished but one or more sites failed               |
//! | 6    | Defect: an eligible site ended without any assignment     |
//!
//! When a run has both failed sites and defects, 5 wins.

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing or unreadable input.
pub const EXIT_USAGE: u8 = 2;

/// Config parse or validation error.
pub const EXIT_CONFIG: u8 = 3;

/// Store open/read/write error.
pub const EXIT_STORE: u8 = 4;

/// At least one site failed during `run` or `refresh`.
pub const EXIT_SITES_FAILED: u8 = 5;

/// At least one eligible site came out with no assignment.
pub const EXIT_DEFECT: u8 = 6;
