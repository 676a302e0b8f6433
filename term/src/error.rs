use thiserror::Error;

pub type Result<T> = std::result::Result<T, TermError>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TermError {
    /// Ctrl-C while the line editor (or a reader) was waiting.
    #[error("interrupted")]
    Interrupted,

    /// Ctrl-D on an empty line: the session is over.
    #[error("end of input")]
    Eof,

    #[error(transparent)]
    Stream(#[from] coral_streams::StreamError),
}
