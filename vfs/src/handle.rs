use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use coral_streams::ReadableStream;
use coral_streams::WritableStream;
use tokio::task::JoinHandle;

use crate::FileSystem;
use crate::OpenFlags;
use crate::Result;
use crate::VfsError;

/// How much a streaming pump reads from a file per chunk.
const STREAM_CHUNK_SIZE: usize = 16 * 1024;

/// An open file: a cursor over a backend node. Owned by exactly one FD
/// table; must be closed before its process exits.
pub struct FileHandle {
    fd: u32,
    /// Path as the caller resolved it, for diagnostics.
    path: String,
    /// Mount-relative path handed to the backend.
    local: String,
    fs: Arc<dyn FileSystem>,
    flags: OpenFlags,
    position: AtomicU64,
    closed: AtomicBool,
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("fd", &self.fd)
            .field("path", &self.path)
            .field("flags", &self.flags)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl FileHandle {
    pub(crate) fn new(
        fd: u32,
        path: String,
        local: String,
        fs: Arc<dyn FileSystem>,
        flags: OpenFlags,
        position: u64,
    ) -> Self {
        Self {
            fd,
            path,
            local,
            fs,
            flags,
            position: AtomicU64::new(position),
            closed: AtomicBool::new(false),
        }
    }

    pub fn fd(&self) -> u32 {
        self.fd
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(VfsError::BadFileDescriptor)
        } else {
            Ok(())
        }
    }

    /// Reads up to `len` bytes at the cursor and advances it. An empty chunk
    /// is end-of-file.
    pub async fn read(&self, len: usize) -> Result<Bytes> {
        self.ensure_open()?;
        if !self.flags.read {
            return Err(VfsError::BadAccess("reading"));
        }
        let pos = self.position.load(Ordering::Acquire);
        let chunk = self.fs.read_at(&self.local, pos, len).await?;
        self.position
            .fetch_add(chunk.len() as u64, Ordering::AcqRel);
        Ok(chunk)
    }

    /// Positional read; does not move the cursor.
    pub async fn read_at(&self, pos: u64, len: usize) -> Result<Bytes> {
        self.ensure_open()?;
        if !self.flags.read {
            return Err(VfsError::BadAccess("reading"));
        }
        self.fs.read_at(&self.local, pos, len).await
    }

    /// Writes at the cursor (or end-of-file when opened for append) and
    /// advances it.
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        if !self.flags.write {
            return Err(VfsError::BadAccess("writing"));
        }
        let pos = self.position.load(Ordering::Acquire);
        let written = self
            .fs
            .write_at(&self.local, pos, data, self.flags.append)
            .await?;
        self.position.fetch_add(written as u64, Ordering::AcqRel);
        Ok(written)
    }

    /// Positional write; does not move the cursor.
    pub async fn write_at(&self, pos: u64, data: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        if !self.flags.write {
            return Err(VfsError::BadAccess("writing"));
        }
        self.fs.write_at(&self.local, pos, data, false).await
    }

    pub async fn truncate(&self, len: u64) -> Result<()> {
        self.ensure_open()?;
        if !self.flags.write {
            return Err(VfsError::BadAccess("writing"));
        }
        self.fs.truncate(&self.local, len).await
    }

    /// Closes the handle. Closing twice is an error the FD table logs and
    /// swallows.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            Err(VfsError::BadFileDescriptor)
        } else {
            Ok(())
        }
    }

    /// Streams the file's remaining contents. The pump stops at end-of-file,
    /// when the consumer cancels, or when the handle is closed under it.
    pub fn reader_stream(self: &Arc<Self>) -> ReadableStream {
        let (writable, readable) = coral_streams::pipe();
        let handle = Arc::clone(self);
        tokio::spawn(async move {
            let Ok(mut writer) = writable.lock() else {
                return;
            };
            loop {
                match handle.read(STREAM_CHUNK_SIZE).await {
                    Ok(chunk) if chunk.is_empty() => break,
                    Ok(chunk) => {
                        if writer.write(chunk).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            writer.close();
        });
        readable
    }

    /// Returns a writable stream that lands in the file, plus the pump task
    /// to await before closing the handle, so buffered chunks are not lost.
    pub fn writer_stream(self: &Arc<Self>) -> (WritableStream, JoinHandle<()>) {
        let (writable, readable) = coral_streams::pipe();
        let handle = Arc::clone(self);
        let pump = tokio::spawn(async move {
            let Ok(mut reader) = readable.lock() else {
                return;
            };
            while let Some(chunk) = reader.read().await {
                if handle.write(&chunk).await.is_err() {
                    reader.cancel();
                    break;
                }
            }
        });
        (writable, pump)
    }
}
