use thiserror::Error;

use crate::Pid;

pub type Result<T> = std::result::Result<T, ProcError>;

#[derive(Error, Debug)]
pub enum ProcError {
    #[error("no such process: {0}")]
    NoSuchProcess(Pid),

    #[error("process already started")]
    AlreadyStarted,

    #[error(transparent)]
    Vfs(#[from] coral_vfs::VfsError),
}
