//! Per-path locking and atomic/append write helpers shared by every on-disk
//! store in the bot (session log store, conversation store).

pub mod atomic;
pub mod error;
pub mod lock;

pub use atomic::{append_line_fsync, atomic_write};
pub use error::{FsError, Result};
pub use lock::LockManager;
