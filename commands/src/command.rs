use std::sync::Arc;

use async_trait::async_trait;
use coral_proc::CancelToken;
use coral_proc::Process;
use coral_proc::ProcessManager;
use coral_socket::SocketService;
use coral_streams::ReadableStream;
use coral_streams::StreamWriter;
use coral_term::Terminal;
use coral_users::UserDb;
use coral_vfs::FsView;
use indexmap::IndexMap;

use crate::args::OptSpec;
use crate::args::ParsedArgs;

/// Kernel services a command may reach.
#[derive(Clone)]
pub struct Services {
    pub manager: ProcessManager,
    pub terminal: Terminal,
    pub users: UserDb,
    pub sockets: SocketService,
    /// Names registered in the command registry, for `which`.
    pub registry_names: Arc<std::sync::RwLock<Vec<String>>>,
}

impl Services {
    pub fn new(
        manager: ProcessManager,
        terminal: Terminal,
        users: UserDb,
        sockets: SocketService,
    ) -> Self {
        Self {
            manager,
            terminal,
            users,
            sockets,
            registry_names: Arc::new(std::sync::RwLock::new(Vec::new())),
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registry_names
            .read()
            .map(|names| names.iter().any(|n| n == name))
            .unwrap_or(false)
    }
}

/// Everything a running command sees: parsed arguments, its process, the
/// wired streams and the service handles.
pub struct Invocation {
    pub process: Arc<Process>,
    pub services: Services,
    pub args: ParsedArgs,
    pub cwd: String,
    pub env: IndexMap<String, String>,
    pub stdin: Option<ReadableStream>,
    pub stdin_is_tty: bool,
    stdout: Option<coral_streams::WritableStream>,
    stderr: Option<coral_streams::WritableStream>,
    pub cancel: CancelToken,
}

impl Invocation {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        process: Arc<Process>,
        services: Services,
        args: ParsedArgs,
        cwd: String,
        env: IndexMap<String, String>,
        stdin: Option<ReadableStream>,
        stdin_is_tty: bool,
        stdout: Option<coral_streams::WritableStream>,
        stderr: Option<coral_streams::WritableStream>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            process,
            services,
            args,
            cwd,
            env,
            stdin,
            stdin_is_tty,
            stdout,
            stderr,
            cancel,
        }
    }

    pub fn fs(&self) -> &FsView {
        self.process.fs()
    }

    /// Resolves a (possibly relative) operand against the command's cwd.
    pub fn resolve(&self, operand: &str) -> String {
        coral_vfs::path::absolutize(&self.cwd, operand)
    }

    /// Writes one line to stdout. Locks per call, so interleaved stderr
    /// writes work even when `2>&1` made the two streams one.
    pub async fn writeln_stdout(&self, line: &str) {
        if let Some(stream) = &self.stdout {
            if let Ok(mut writer) = stream.lock() {
                let _ = writer.write_line(line).await;
            }
        }
    }

    pub async fn writeln_stderr(&self, line: &str) {
        if let Some(stream) = &self.stderr {
            if let Ok(mut writer) = stream.lock() {
                let _ = writer.write_line(line).await;
            }
        }
    }

    pub async fn write_stdout(&self, text: &str) {
        if let Some(stream) = &self.stdout {
            if let Ok(mut writer) = stream.lock() {
                let _ = writer.write_str(text).await;
            }
        }
    }

    /// Locks stdout for bulk streaming; the guard must be dropped before
    /// the per-line helpers work again.
    pub fn stdout_writer(&self) -> Option<StreamWriter> {
        self.stdout.as_ref().and_then(|s| s.lock().ok())
    }

    /// True once the terminal has interrupted this command; loops should
    /// poll between units of work and unwind with exit code 130.
    pub fn interrupted(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A registered command. The registry parses argv against `options()`
/// before `run` is called; `--help` never reaches `run`.
#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn usage_line(&self) -> &'static str {
        ""
    }

    fn options(&self) -> &'static [OptSpec] {
        &[]
    }

    async fn run(&self, inv: &mut Invocation) -> anyhow::Result<i32>;
}
