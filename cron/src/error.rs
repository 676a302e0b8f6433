use thiserror::Error;

pub type Result<T> = std::result::Result<T, CronError>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CronError {
    #[error("cron expression must have 5 or 6 fields, got {0}")]
    WrongFieldCount(usize),

    #[error("invalid cron field {field:?}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("crontab line has no command: {0}")]
    MissingCommand(String),
}

impl CronError {
    pub(crate) fn field(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
