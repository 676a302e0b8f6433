use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use coral_streams::ReadableStream;
use coral_streams::WritableStream;
use coral_vfs::Credentials;
use coral_vfs::Vfs;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::FdTable;
use crate::INTERRUPT_EXIT_CODE;
use crate::Pid;
use crate::Process;
use crate::ProcessEntry;
use crate::ProcessEvent;
use crate::ProcessStatus;
use crate::Result;
use crate::error::ProcError;

/// Everything needed to create a process. Streams default to none; the
/// shell supplies pipe ends and the terminal's streams as it wires a
/// pipeline.
pub struct ProcessOptions {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: String,
    pub uid: u32,
    pub gid: u32,
    pub parent: Option<Pid>,
    pub stdin: Option<ReadableStream>,
    pub stdin_is_tty: bool,
    pub stdout: Option<WritableStream>,
    pub stderr: Option<WritableStream>,
    pub entry: ProcessEntry,
}

struct ManagerInner {
    vfs: Vfs,
    table: Mutex<HashMap<Pid, Arc<Process>>>,
    next_pid: AtomicU32,
}

/// Owns the `pid → process` map. Pids are monotonic and never reused; a
/// pid file `/run/<pid>` exists while the process runs.
#[derive(Clone)]
pub struct ProcessManager {
    inner: Arc<ManagerInner>,
}

impl ProcessManager {
    pub fn new(vfs: Vfs) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                vfs,
                table: Mutex::new(HashMap::new()),
                next_pid: AtomicU32::new(1),
            }),
        }
    }

    /// Instantiates a process in `Created` state with its FD table
    /// pre-populated. `start` actually runs it.
    pub async fn create(&self, options: ProcessOptions) -> Arc<Process> {
        let pid = self.inner.next_pid.fetch_add(1, Ordering::AcqRel);
        let mut fd_table = FdTable::new();
        fd_table.set_stdin(options.stdin, options.stdin_is_tty);
        fd_table.set_stdout(options.stdout);
        fd_table.set_stderr(options.stderr);

        let fs = self
            .inner
            .vfs
            .with_credentials(Credentials::new(options.uid, options.gid));
        let process = Arc::new(Process::new(
            pid,
            options.uid,
            options.gid,
            options.parent,
            options.command,
            options.args,
            options.cwd,
            fs,
            fd_table,
            options.entry,
        ));
        self.inner
            .table
            .lock()
            .await
            .insert(pid, Arc::clone(&process));
        process
    }

    /// Runs the entry function as a task. On return, unless the process
    /// asked to be kept alive, the FD table is cleaned up, the exit code
    /// recorded (an `Err` exits 1) and the exit event fired.
    pub async fn start(&self, process: &Arc<Process>) -> Result<JoinHandle<i32>> {
        let Some(entry) = process.take_entry().await else {
            return Err(ProcError::AlreadyStarted);
        };
        process.set_status(ProcessStatus::Running).await;
        process.emit(ProcessEvent::Start);
        self.write_pid_file(process.pid()).await;

        let params = process.entry_params().await;
        let inner = Arc::clone(&self.inner);
        let process = Arc::clone(process);
        Ok(tokio::spawn(async move {
            let stderr = params.stderr.clone();
            let command = params.command.clone();
            let code = match entry(params).await {
                Ok(code) => code,
                Err(err) => {
                    report_entry_error(stderr.as_ref(), &command, &err).await;
                    1
                }
            };
            process.mark_entry_returned();
            if !process.is_keep_alive() {
                Self::reap(&inner, &process, code).await;
            } else {
                debug!("pid {} kept alive after entry return", process.pid());
            }
            code
        }))
    }

    /// Convenience: create, start and await a process to completion.
    pub async fn run(&self, options: ProcessOptions) -> Result<i32> {
        let process = self.create(options).await;
        let handle = self.start(&process).await?;
        Ok(handle.await.unwrap_or(1))
    }

    pub async fn get(&self, pid: Pid) -> Option<Arc<Process>> {
        self.inner.table.lock().await.get(&pid).cloned()
    }

    /// Live processes, ordered by pid.
    pub async fn list(&self) -> Vec<Arc<Process>> {
        let table = self.inner.table.lock().await;
        let mut processes: Vec<Arc<Process>> = table.values().cloned().collect();
        processes.sort_by_key(|p| p.pid());
        processes
    }

    /// Requests a cooperative stop: fires the stop event and the cancel
    /// token. A process whose entry already returned (daemons) is reaped
    /// immediately; a running entry is expected to observe cancellation and
    /// return on its own.
    pub async fn stop(&self, pid: Pid) -> Result<()> {
        let process = self.get(pid).await.ok_or(ProcError::NoSuchProcess(pid))?;
        process.emit(ProcessEvent::Stop);
        process.cancel_token().cancel();
        if process.entry_has_returned() || process.status().await == ProcessStatus::Created {
            Self::reap(&self.inner, &process, INTERRUPT_EXIT_CODE).await;
        }
        Ok(())
    }

    /// Explicit exit for kept-alive processes.
    pub async fn exit(&self, pid: Pid, code: i32) -> Result<()> {
        let process = self.get(pid).await.ok_or(ProcError::NoSuchProcess(pid))?;
        Self::reap(&self.inner, &process, code).await;
        Ok(())
    }

    async fn reap(inner: &Arc<ManagerInner>, process: &Arc<Process>, code: i32) {
        if process.finish(code).await {
            let pid = process.pid();
            inner.table.lock().await.remove(&pid);
            let root = Credentials::root();
            if let Err(err) = inner.vfs.unlink(&format!("/run/{pid}"), &root).await {
                debug!("removing pid file for {pid}: {err}");
            }
        }
    }

    async fn write_pid_file(&self, pid: Pid) {
        let root = Credentials::root();
        if let Err(err) = self
            .inner
            .vfs
            .write_file(&format!("/run/{pid}"), b"", &root)
            .await
        {
            warn!("creating pid file for {pid}: {err}");
        }
    }
}

async fn report_entry_error(
    stderr: Option<&WritableStream>,
    command: &str,
    err: &anyhow::Error,
) {
    if let Some(stderr) = stderr {
        if let Ok(mut writer) = stderr.lock() {
            let _ = writer.write_line(&format!("{command}: {err}")).await;
            return;
        }
    }
    error!("{command}: {err}");
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use coral_vfs::MemFs;
    use pretty_assertions::assert_eq;

    async fn manager() -> ProcessManager {
        let vfs = Vfs::new();
        vfs.mount("/", Arc::new(MemFs::new())).await.expect("mount");
        let root = Credentials::root();
        vfs.mkdir("/run", false, &root).await.expect("mkdir");
        ProcessManager::new(vfs)
    }

    fn entry_returning(code: i32) -> ProcessEntry {
        Box::new(move |_params| Box::pin(async move { Ok(code) }))
    }

    fn options(command: &str, entry: ProcessEntry) -> ProcessOptions {
        ProcessOptions {
            command: command.to_string(),
            args: Vec::new(),
            cwd: "/".to_string(),
            uid: 0,
            gid: 0,
            parent: None,
            stdin: None,
            stdin_is_tty: false,
            stdout: None,
            stderr: None,
            entry,
        }
    }

    #[tokio::test]
    async fn pids_are_monotonic() {
        let manager = manager().await;
        let a = manager.create(options("a", entry_returning(0))).await;
        let b = manager.create(options("b", entry_returning(0))).await;
        assert!(b.pid() > a.pid());
    }

    #[tokio::test]
    async fn exit_cleans_fd_table_before_event() {
        let manager = manager().await;
        let process = manager
            .create(options(
                "opener",
                Box::new(|params| {
                    Box::pin(async move {
                        params
                            .process
                            .open("/run/scratch", coral_vfs::OpenFlags::write_only())
                            .await?;
                        Ok(7)
                    })
                }),
            ))
            .await;

        let mut events = process.subscribe();
        let handle = manager.start(&process).await.expect("start");
        assert_eq!(handle.await.expect("join"), 7);

        // By the time the exit event is observable the table must be empty.
        loop {
            match events.recv().await.expect("event") {
                ProcessEvent::Exit(code) => {
                    assert_eq!(code, 7);
                    break;
                }
                _ => continue,
            }
        }
        assert_eq!(process.fd_table().lock().await.open_handle_count(), 0);
        assert_eq!(process.status().await, ProcessStatus::Exited);
        assert_eq!(process.exit_code().await, Some(7));
    }

    #[tokio::test]
    async fn entry_error_exits_one() {
        let manager = manager().await;
        let process = manager
            .create(options(
                "failing",
                Box::new(|_params| {
                    Box::pin(async move { Err(anyhow::anyhow!("deliberate failure")) })
                }),
            ))
            .await;
        let handle = manager.start(&process).await.expect("start");
        assert_eq!(handle.await.expect("join"), 1);
        assert_eq!(process.exit_code().await, Some(1));
    }

    #[tokio::test]
    async fn keep_alive_survives_entry_return() {
        let manager = manager().await;
        let process = manager
            .create(options(
                "daemon",
                Box::new(|params| {
                    Box::pin(async move {
                        params.process.keep_alive();
                        Ok(0)
                    })
                }),
            ))
            .await;
        let pid = process.pid();
        let handle = manager.start(&process).await.expect("start");
        handle.await.expect("join");

        assert_eq!(process.status().await, ProcessStatus::Running);
        assert!(manager.get(pid).await.is_some());

        manager.stop(pid).await.expect("stop");
        assert_eq!(process.status().await, ProcessStatus::Exited);
        assert_eq!(process.exit_code().await, Some(INTERRUPT_EXIT_CODE));
        assert!(manager.get(pid).await.is_none());
    }

    #[tokio::test]
    async fn pid_files_appear_and_disappear() {
        let manager = manager().await;
        let vfs = manager.inner.vfs.clone();
        let root = Credentials::root();

        let gate = Arc::new(tokio::sync::Notify::new());
        let release = Arc::clone(&gate);
        let process = manager
            .create(options(
                "gated",
                Box::new(move |_params| {
                    Box::pin(async move {
                        release.notified().await;
                        Ok(0)
                    })
                }),
            ))
            .await;
        let pid = process.pid();
        let handle = manager.start(&process).await.expect("start");

        tokio::task::yield_now().await;
        assert!(vfs.exists(&format!("/run/{pid}"), &root).await);

        gate.notify_waiters();
        handle.await.expect("join");
        assert!(!vfs.exists(&format!("/run/{pid}"), &root).await);
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let manager = manager().await;
        let process = manager.create(options("once", entry_returning(0))).await;
        let handle = manager.start(&process).await.expect("start");
        handle.await.expect("join");
        assert!(matches!(
            manager.start(&process).await,
            Err(ProcError::AlreadyStarted)
        ));
    }

    #[tokio::test]
    async fn wait_returns_exit_code_even_after_the_fact() {
        let manager = manager().await;
        let process = manager.create(options("w", entry_returning(3))).await;
        let handle = manager.start(&process).await.expect("start");
        handle.await.expect("join");
        assert_eq!(process.wait().await, 3);
    }
}
