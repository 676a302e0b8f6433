use thiserror::Error;

pub type Result<T> = std::result::Result<T, VfsError>;

/// Filesystem errors, worded the way a shell user expects to see them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VfsError {
    #[error("No such file or directory")]
    NotFound,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("File exists")]
    AlreadyExists,

    #[error("Not a directory")]
    NotADirectory,

    #[error("Is a directory")]
    IsADirectory,

    #[error("Directory not empty")]
    DirectoryNotEmpty,

    #[error("Invalid argument: not a symbolic link")]
    NotASymlink,

    #[error("Too many levels of symbolic links")]
    SymlinkLoop,

    #[error("No space left on device")]
    NoSpace,

    #[error("Invalid cross-device link")]
    CrossDevice,

    #[error("Bad file descriptor")]
    BadFileDescriptor,

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("no filesystem mounted for {0}")]
    NotMounted(String),

    #[error("not opened for {0}")]
    BadAccess(&'static str),

    #[error("{0}")]
    Io(String),
}
