//! errors of the namespace and inode layer

use thiserror::Error;

use super::InodeId;

/// result of every filesystem operation
pub type FsResult<T> = Result<T, FsError>;

/// what can go wrong in namespace, directory and inode operations.
///
/// a failed operation has already rolled back its own side effects
/// by the time one of these is returned
#[derive(Debug, Error)]
pub enum FsError {
    /// name or inode absent
    #[error("no such file or directory")]
    NotFound,

    /// name already present in the target directory
    #[error("entry already exists")]
    AlreadyExists,

    /// directory holds entries besides `.` and `..`
    #[error("directory {0} is not empty")]
    NotEmpty(InodeId),

    /// no free data block, or the directory can't grow any further
    #[error("no space left on device")]
    NoSpace,

    #[error("no free inode left")]
    NoFreeInode,

    /// entry name or symlink target longer than the on-disk record allows
    #[error("name is too long: {len} bytes, at most {max} allowed")]
    NameTooLong { len: usize, max: usize },

    /// a directory operation on something else
    #[error("inode {0} is not a directory")]
    NotADirectory(InodeId),

    #[error("inode {0} is a directory")]
    IsADirectory(InodeId),

    /// `readlink` on something other than a symbolic link
    #[error("inode {0} is not a symbolic link")]
    NotASymlink(InodeId),

    /// the caller may not apply the requested change
    #[error("operation not permitted")]
    PermissionDenied,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// an on-disk invariant is violated, never repaired here
    #[error("filesystem is corrupt: {0}")]
    Corrupt(String),

    #[error("device I/O failed")]
    Io(#[from] std::io::Error),
}

impl FsError {
    /// the errno reported through FUSE
    pub fn errno(&self) -> libc::c_int {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::AlreadyExists => libc::EEXIST,
            FsError::NotEmpty(_) => libc::ENOTEMPTY,
            FsError::NoSpace | FsError::NoFreeInode => libc::ENOSPC,
            FsError::NameTooLong { .. } => libc::ENAMETOOLONG,
            FsError::NotADirectory(_) => libc::ENOTDIR,
            FsError::IsADirectory(_) => libc::EISDIR,
            FsError::NotASymlink(_) => libc::EINVAL,
            FsError::PermissionDenied => libc::EPERM,
            FsError::InvalidArgument(_) => libc::EINVAL,
            FsError::Corrupt(_) | FsError::Io(_) => libc::EIO,
        }
    }

    /// one of the wrong-kind errors
    pub fn is_invalid_kind(&self) -> bool {
        matches!(
            self,
            FsError::NotADirectory(_) | FsError::IsADirectory(_) | FsError::NotASymlink(_)
        )
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        FsError::Corrupt(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        FsError::InvalidArgument(msg.into())
    }
}
