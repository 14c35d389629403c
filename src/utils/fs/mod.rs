//! Filesystem helpers: atomic replacement of small records and directory
//! moves used by the install layout.

pub mod atomic;
pub mod dirs;

pub use atomic::{atomic_write, atomic_write_json};
pub use dirs::{ensure_dir, remove_dir_if_exists, remove_file_if_exists, rename_if_exists};
