use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShellError>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ShellError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("syntax error: unterminated quote")]
    UnterminatedQuote,

    #[error("syntax error: unterminated command substitution")]
    UnterminatedSubstitution,

    #[error("{0}: command not found")]
    CommandNotFound(String),

    #[error(transparent)]
    Vfs(#[from] coral_vfs::VfsError),
}
