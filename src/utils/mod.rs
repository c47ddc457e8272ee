//! Shared utility functions.
//!
//! - Atomic file replacement, advisory locks, log tailing and rotation
//! - String truncation (UTF-8 safe)
//! - Duration and size formatting

mod file_ops;
mod format;
mod string;

pub use file_ops::{
    FileLock, append_line, lock_path_for, remove_stale_temp, rotate_file, tail_lines, write_atomic,
    write_atomic_async,
};
pub use format::{format_bytes, format_duration_secs};
pub use string::{single_line, truncate_chars, truncate_with_marker};
