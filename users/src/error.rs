use thiserror::Error;

pub type Result<T> = std::result::Result<T, UserError>;

#[derive(Error, Debug)]
pub enum UserError {
    #[error("user already exists: {0}")]
    UserExists(String),

    #[error("no such user: {0}")]
    UnknownUser(String),

    #[error("authentication failed")]
    AuthFailed,

    #[error(transparent)]
    Vfs(#[from] coral_vfs::VfsError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
