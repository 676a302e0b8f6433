use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use coral_streams::ReadableStream;
use coral_streams::WritableStream;
use coral_vfs::FileHandle;
use coral_vfs::FsView;
use coral_vfs::OpenFlags;
use tokio::sync::Mutex;
use tokio::sync::broadcast;

use crate::CancelToken;
use crate::FdTable;
use crate::Result;
use crate::error::ProcError;

pub type Pid = u32;

/// Exit code used when a foreground process is interrupted, following the
/// 128+SIGINT shell convention.
pub const INTERRUPT_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Created,
    Running,
    Paused,
    Stopped,
    Exited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessEvent {
    Start,
    Exit(i32),
    Stop,
    Pause,
    Resume,
}

/// Everything an entry function receives when its process starts.
pub struct ProcessEntryParams {
    pub process: Arc<Process>,
    pub command: String,
    pub args: Vec<String>,
    pub cwd: String,
    pub stdin: Option<ReadableStream>,
    pub stdout: Option<WritableStream>,
    pub stderr: Option<WritableStream>,
    pub stdin_is_tty: bool,
    pub cancel: CancelToken,
}

/// The body of a process: an async function from the entry envelope to an
/// exit code. An `Err` return exits the process with code 1.
pub type ProcessEntry = Box<
    dyn FnOnce(ProcessEntryParams) -> Pin<Box<dyn Future<Output = anyhow::Result<i32>> + Send>>
        + Send,
>;

/// One hosted process. Created by the [`crate::ProcessManager`]; runs its
/// entry function as a task; cleans up its FD table before the exit event
/// fires. A process that has exited never transitions again.
pub struct Process {
    pid: Pid,
    uid: u32,
    gid: u32,
    parent: Option<Pid>,
    command: String,
    args: Vec<String>,
    cwd: String,
    fs: FsView,
    status: Mutex<ProcessStatus>,
    exit_code: Mutex<Option<i32>>,
    fd_table: Mutex<FdTable>,
    keep_alive: AtomicBool,
    entry_returned: AtomicBool,
    entry: Mutex<Option<ProcessEntry>>,
    events: broadcast::Sender<ProcessEvent>,
    cancel: CancelToken,
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("command", &self.command)
            .field("args", &self.args)
            .finish()
    }
}

impl Process {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        pid: Pid,
        uid: u32,
        gid: u32,
        parent: Option<Pid>,
        command: String,
        args: Vec<String>,
        cwd: String,
        fs: FsView,
        fd_table: FdTable,
        entry: ProcessEntry,
    ) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            pid,
            uid,
            gid,
            parent,
            command,
            args,
            cwd,
            fs,
            status: Mutex::new(ProcessStatus::Created),
            exit_code: Mutex::new(None),
            fd_table: Mutex::new(fd_table),
            keep_alive: AtomicBool::new(false),
            entry_returned: AtomicBool::new(false),
            entry: Mutex::new(Some(entry)),
            events,
            cancel: CancelToken::new(),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    pub fn parent(&self) -> Option<Pid> {
        self.parent
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    pub fn fs(&self) -> &FsView {
        &self.fs
    }

    pub async fn status(&self) -> ProcessStatus {
        *self.status.lock().await
    }

    pub async fn exit_code(&self) -> Option<i32> {
        *self.exit_code.lock().await
    }

    pub fn fd_table(&self) -> &Mutex<FdTable> {
        &self.fd_table
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        self.events.subscribe()
    }

    /// Marks the process to stay running after its entry function returns.
    /// Daemons that install listeners call this; they exit only via an
    /// explicit `exit` or a manager `stop`.
    pub fn keep_alive(&self) {
        self.keep_alive.store(true, Ordering::Release);
    }

    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive.load(Ordering::Acquire)
    }

    pub(crate) fn mark_entry_returned(&self) {
        self.entry_returned.store(true, Ordering::Release);
    }

    pub(crate) fn entry_has_returned(&self) -> bool {
        self.entry_returned.load(Ordering::Acquire)
    }

    pub(crate) async fn take_entry(&self) -> Option<ProcessEntry> {
        self.entry.lock().await.take()
    }

    /// Opens a file through the process's filesystem view and tracks the
    /// handle for cleanup.
    pub async fn open(&self, path: &str, flags: OpenFlags) -> Result<Arc<FileHandle>> {
        let handle = self.fs.open(path, flags).await?;
        self.fd_table
            .lock()
            .await
            .track_file_handle(Arc::clone(&handle));
        Ok(handle)
    }

    /// Closes a tracked handle and removes it from the FD table.
    pub async fn close(&self, handle: &FileHandle) -> Result<()> {
        self.fd_table.lock().await.untrack_file_handle(handle.fd());
        handle.close().map_err(ProcError::from)
    }

    pub(crate) async fn set_status(&self, status: ProcessStatus) {
        *self.status.lock().await = status;
    }

    pub(crate) fn emit(&self, event: ProcessEvent) {
        let _ = self.events.send(event);
    }

    pub async fn pause(&self) {
        let mut status = self.status.lock().await;
        if *status == ProcessStatus::Running {
            *status = ProcessStatus::Paused;
            drop(status);
            self.emit(ProcessEvent::Pause);
        }
    }

    pub async fn resume(&self) {
        let mut status = self.status.lock().await;
        if *status == ProcessStatus::Paused {
            *status = ProcessStatus::Running;
            drop(status);
            self.emit(ProcessEvent::Resume);
        }
    }

    /// Terminal transition: cleans up the FD table, records the exit code,
    /// then fires the exit event. Idempotent.
    pub(crate) async fn finish(&self, code: i32) -> bool {
        {
            let mut status = self.status.lock().await;
            if *status == ProcessStatus::Exited {
                return false;
            }
            self.fd_table.lock().await.cleanup();
            *self.exit_code.lock().await = Some(code);
            *status = ProcessStatus::Exited;
        }
        self.emit(ProcessEvent::Exit(code));
        true
    }

    /// Awaits the process's exit and returns its code.
    pub async fn wait(&self) -> i32 {
        let mut events = self.subscribe();
        if let Some(code) = self.exit_code().await {
            return code;
        }
        loop {
            match events.recv().await {
                Ok(ProcessEvent::Exit(code)) => return code,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    if let Some(code) = self.exit_code().await {
                        return code;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return self.exit_code().await.unwrap_or(1);
                }
            }
        }
    }

    /// Builds the envelope handed to the entry function.
    pub(crate) async fn entry_params(self: &Arc<Self>) -> ProcessEntryParams {
        let table = self.fd_table.lock().await;
        ProcessEntryParams {
            process: Arc::clone(self),
            command: self.command.clone(),
            args: self.args.clone(),
            cwd: self.cwd.clone(),
            stdin: table.stdin().cloned(),
            stdout: table.stdout().cloned(),
            stderr: table.stderr().cloned(),
            stdin_is_tty: table.stdin_is_tty(),
            cancel: self.cancel.clone(),
        }
    }
}
