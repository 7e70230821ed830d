use thiserror::Error;

pub type Result<T> = std::result::Result<T, VfsError>;

/// Filesystem-domain failures, returned to the caller as values.
///
/// These are recoverable runtime conditions, never panics; the
/// errno-facing adapter maps them 1:1 via [`VfsError::errno`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VfsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("file exists")]
    AlreadyExists,
    #[error("directory not empty")]
    NotEmpty,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("bad file descriptor")]
    BadDescriptor,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("device or resource busy")]
    Busy,
    #[error("operation not supported")]
    NotSupported,
}

impl VfsError {
    /// Conventional errno value for this error.
    pub fn errno(&self) -> i32 {
        match self {
            VfsError::NotFound => libc::ENOENT,
            VfsError::AlreadyExists => libc::EEXIST,
            VfsError::NotEmpty => libc::ENOTEMPTY,
            VfsError::NotADirectory => libc::ENOTDIR,
            VfsError::IsADirectory => libc::EISDIR,
            VfsError::BadDescriptor => libc::EBADF,
            VfsError::InvalidArgument => libc::EINVAL,
            VfsError::Busy => libc::EBUSY,
            VfsError::NotSupported => libc::ENOSYS,
        }
    }
}
