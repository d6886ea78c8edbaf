//! Small time helper shared by the inode layer.
//!
//! Grounded on `utils/src/util.rs`'s `get_timestamp`.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as seconds since the epoch, truncated to `u32`
/// (matches the on-disk inode's 32-bit timestamp fields).
pub fn now_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as u32
}
