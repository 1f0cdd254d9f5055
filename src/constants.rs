//! Numeric constants of the target.
//!
//! These are compile-time parameters of the core; no target currently
//! deviates from the x86_64 System-V values.

/// sizeof a byte. Always 1, included for consistency.
pub const BYTE_WIDTH: u64 = 1;
pub const SHORT_WIDTH: u64 = 2;
pub const INT_WIDTH: u64 = 4;
pub const LONG_WIDTH: u64 = 8;
pub const FLOAT_WIDTH: u64 = 4;
pub const DOUBLE_WIDTH: u64 = 8;
/// sizeof a pointer; no wider than [`LONG_WIDTH`].
pub const POINTER_WIDTH: u64 = 8;
/// sizeof a char; no narrower than [`BYTE_WIDTH`].
pub const CHAR_WIDTH: u64 = 1;
/// sizeof a wchar; no narrower than [`INT_WIDTH`].
pub const WCHAR_WIDTH: u64 = 4;
/// sizeof a general-purpose register; no narrower than [`LONG_WIDTH`].
pub const REGISTER_WIDTH: u64 = 8;
