use thiserror::Error;

pub type Result<T> = std::result::Result<T, StreamError>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StreamError {
    /// The reader or writer side is already locked by another consumer.
    /// Streams are single-consumer; release the existing guard first.
    #[error("stream is already locked by another consumer")]
    AlreadyLocked,

    /// The far end of the stream has gone away; no further bytes can be
    /// written. Analogous to EPIPE.
    #[error("stream closed")]
    Closed,

    /// The stream was cancelled; reads observe end-of-stream from now on.
    #[error("stream cancelled")]
    Cancelled,
}
