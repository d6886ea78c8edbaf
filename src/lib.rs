//! A user-space EXT2-style filesystem engine: on-disk codec, bitmap
//! allocator, inode cache, directory tree, and the POSIX operation set,
//! all independent of any particular host (FUSE, a test harness, or
//! otherwise).

pub mod bitmap;
pub mod block;
pub mod codec;
pub mod error;
pub mod inode;
pub mod mount;
pub mod ops;
pub mod tree;
pub mod util;

#[cfg(feature = "fuse-host")]
pub mod fuse_glue;

pub use error::{FsError, FsResult};
pub use mount::Mount;
