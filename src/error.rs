//! The crate's typed error model.
//!
//! Internal layers (bitmap allocator, codec, inode cache, tree, mount,
//! operations) all return `Result<T, FsError>` instead of the teacher's
//! CLI-style `io::Result` + process-exit pattern, since a mounted
//! filesystem must recover from a failed operation rather than abort.

use std::io;

/// An error produced by the filesystem core.
///
/// Each variant maps to exactly one POSIX errno via [`FsError::to_errno`].
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    /// A path or path component does not exist.
    #[error("no such file or directory")]
    NotFound,
    /// A creation target already exists.
    #[error("file exists")]
    AlreadyExists,
    /// The inode or data-block bitmap is exhausted, or the request would
    /// exceed the maximum file size.
    #[error("no space left on device")]
    NoSpace,
    /// The operation requires a regular file but found a directory.
    #[error("is a directory")]
    IsDirectory,
    /// The operation requires a directory but found a regular file.
    #[error("not a directory")]
    NotDirectory,
    /// `rmdir` on a non-empty directory.
    #[error("directory not empty")]
    NotEmpty,
    /// A malformed path, empty base name, or out-of-range argument.
    #[error("invalid argument")]
    InvalidArgument,
    /// The underlying block device reported an error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FsError {
    /// Returns the positive POSIX errno this error corresponds to, for use
    /// with the FUSE reply API (which expects a positive errno, not the
    /// negated value the on-disk operation table in the specification is
    /// expressed in).
    pub fn to_errno(&self) -> i32 {
        match self {
            Self::NotFound => libc::ENOENT,
            Self::AlreadyExists => libc::EEXIST,
            Self::NoSpace => libc::ENOSPC,
            Self::IsDirectory => libc::EISDIR,
            Self::NotDirectory => libc::ENOTDIR,
            Self::NotEmpty => libc::ENOTEMPTY,
            Self::InvalidArgument => libc::EINVAL,
            Self::Io(_) => libc::EIO,
        }
    }
}

/// Convenience alias used throughout the core engine.
pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(FsError::NotFound.to_errno(), libc::ENOENT);
        assert_eq!(FsError::AlreadyExists.to_errno(), libc::EEXIST);
        assert_eq!(FsError::NoSpace.to_errno(), libc::ENOSPC);
        assert_eq!(FsError::NotEmpty.to_errno(), libc::ENOTEMPTY);
        let io_err = FsError::from(io::Error::new(io::ErrorKind::Other, "boom"));
        assert_eq!(io_err.to_errno(), libc::EIO);
    }
}
