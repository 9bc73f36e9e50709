//! JSON persistence helpers shared by the lock file and workspace config.

mod atomic;

pub use atomic::{atomic_read_json, atomic_write_json};
