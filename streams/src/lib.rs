//! Byte stream primitives shared by every part of the runtime.
//!
//! A [`ReadableStream`] produces a lazy, finite sequence of byte chunks; a
//! [`WritableStream`] accepts one. Both are single-consumer: callers must
//! acquire a reader/writer guard before touching the bytes, and the guard
//! releases the lock on every exit path. Pipes connect a writer to a reader
//! with backpressure; a [`Fanout`] delivers every published chunk to each
//! live subscriber in order.

#![deny(clippy::print_stdout, clippy::print_stderr)]

mod error;
mod fanout;
mod lines;
mod pipe;
mod readable;
mod writable;

pub use error::Result;
pub use error::StreamError;
pub use fanout::Fanout;
pub use lines::LineReader;
pub use pipe::PIPE_CAPACITY;
pub use pipe::pipe;
pub use pipe::pipe_with_capacity;
pub use readable::ReadableStream;
pub use readable::StreamReader;
pub use readable::tee;
pub use writable::StreamWriter;
pub use writable::WritableStream;

use bytes::Bytes;

/// Copies every chunk from `reader` into `writer` until end-of-stream.
///
/// A closed destination is not an error: like a broken pipe, it simply stops
/// the copy. Returns the number of bytes transferred.
pub async fn copy(reader: &mut StreamReader, writer: &mut StreamWriter) -> u64 {
    let mut transferred = 0u64;
    while let Some(chunk) = reader.read().await {
        transferred += chunk.len() as u64;
        if writer.write(chunk).await.is_err() {
            break;
        }
    }
    transferred
}

/// Reads the remainder of `reader` into a single buffer.
pub async fn collect(reader: &mut StreamReader) -> Vec<u8> {
    let mut buf = Vec::new();
    while let Some(chunk) = reader.read().await {
        buf.extend_from_slice(&chunk);
    }
    buf
}

/// Splits `data` into `chunk_size` pieces, the way a real producer would.
pub fn chunks_of(data: &[u8], chunk_size: usize) -> Vec<Bytes> {
    data.chunks(chunk_size.max(1))
        .map(Bytes::copy_from_slice)
        .collect()
}
