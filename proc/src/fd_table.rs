use std::collections::HashMap;
use std::sync::Arc;

use coral_streams::ReadableStream;
use coral_streams::WritableStream;
use coral_vfs::FileHandle;
use tracing::warn;

/// Per-process standard streams plus every file handle the process has
/// opened. Closing the table closes each tracked handle exactly once;
/// close errors are logged and swallowed, never propagated.
#[derive(Debug, Default)]
pub struct FdTable {
    stdin: Option<ReadableStream>,
    stdout: Option<WritableStream>,
    stderr: Option<WritableStream>,
    stdin_is_tty: bool,
    open_handles: HashMap<u32, Arc<FileHandle>>,
}

impl FdTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stdin(&mut self, stream: Option<ReadableStream>, is_tty: bool) {
        self.stdin = stream;
        self.stdin_is_tty = is_tty;
    }

    pub fn set_stdout(&mut self, stream: Option<WritableStream>) {
        self.stdout = stream;
    }

    pub fn set_stderr(&mut self, stream: Option<WritableStream>) {
        self.stderr = stream;
    }

    /// After this, stderr *is* stdout: one underlying stream identity, a
    /// byte written to either appears exactly once.
    pub fn redirect_stderr_to_stdout(&mut self) {
        self.stderr = self.stdout.clone();
    }

    pub fn stdin(&self) -> Option<&ReadableStream> {
        self.stdin.as_ref()
    }

    pub fn stdout(&self) -> Option<&WritableStream> {
        self.stdout.as_ref()
    }

    pub fn stderr(&self) -> Option<&WritableStream> {
        self.stderr.as_ref()
    }

    pub fn stdin_is_tty(&self) -> bool {
        self.stdin_is_tty
    }

    /// Tracks `handle` for cleanup. Idempotent: re-adding an fd leaves a
    /// single tracked entry.
    pub fn track_file_handle(&mut self, handle: Arc<FileHandle>) {
        self.open_handles.insert(handle.fd(), handle);
    }

    pub fn untrack_file_handle(&mut self, fd: u32) -> Option<Arc<FileHandle>> {
        self.open_handles.remove(&fd)
    }

    pub fn open_handle_count(&self) -> usize {
        self.open_handles.len()
    }

    /// Closes every tracked handle. Every close is attempted; failures are
    /// logged; the set is empty afterwards no matter what.
    pub fn close_file_handles(&mut self) {
        for (fd, handle) in self.open_handles.drain() {
            if let Err(err) = handle.close() {
                warn!("closing fd {fd} ({}): {err}", handle.path());
            }
        }
    }

    /// End-of-process cleanup: closes tracked handles but leaves the
    /// standard streams alone; they may be shared with the parent or the
    /// terminal.
    pub fn cleanup(&mut self) {
        self.close_file_handles();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use coral_vfs::Credentials;
    use coral_vfs::MemFs;
    use coral_vfs::OpenFlags;
    use coral_vfs::Vfs;
    use pretty_assertions::assert_eq;

    async fn open_handle(vfs: &Vfs, path: &str) -> Arc<FileHandle> {
        let root = Credentials::root();
        vfs.write_file(path, b"x", &root).await.expect("write");
        vfs.open(path, OpenFlags::read_only(), &root)
            .await
            .expect("open")
    }

    #[tokio::test]
    async fn tracking_is_idempotent_and_cleanup_closes_once() {
        let vfs = Vfs::new();
        vfs.mount("/", std::sync::Arc::new(MemFs::new()))
            .await
            .expect("mount");
        let handle = open_handle(&vfs, "/f").await;

        let mut table = FdTable::new();
        table.track_file_handle(Arc::clone(&handle));
        table.track_file_handle(Arc::clone(&handle));
        assert_eq!(table.open_handle_count(), 1);

        table.cleanup();
        assert_eq!(table.open_handle_count(), 0);
        assert!(handle.is_closed());

        // A second cleanup has nothing left to close.
        table.cleanup();
        assert_eq!(table.open_handle_count(), 0);
    }

    #[tokio::test]
    async fn cleanup_swallows_close_errors() {
        let vfs = Vfs::new();
        vfs.mount("/", std::sync::Arc::new(MemFs::new()))
            .await
            .expect("mount");
        let handle = open_handle(&vfs, "/g").await;
        handle.close().expect("close");

        let mut table = FdTable::new();
        table.track_file_handle(handle);
        // Already closed: the close error is logged, not raised.
        table.cleanup();
        assert_eq!(table.open_handle_count(), 0);
    }

    #[tokio::test]
    async fn stderr_redirect_shares_identity() {
        let (out, _rx) = coral_streams::pipe();
        let (err, _erx) = coral_streams::pipe();
        let mut table = FdTable::new();
        table.set_stdout(Some(out.clone()));
        table.set_stderr(Some(err));
        table.redirect_stderr_to_stdout();
        let stderr = table.stderr().expect("stderr");
        assert!(stderr.same_identity(&out));
    }
}
