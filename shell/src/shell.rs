use std::sync::Arc;
use std::sync::atomic::AtomicI32;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use coral_proc::Pid;
use coral_proc::ProcessManager;
use coral_streams::ReadableStream;
use coral_streams::WritableStream;
use coral_term::Terminal;
use coral_vfs::Credentials;
use coral_vfs::FsView;
use coral_vfs::Vfs;
use indexmap::IndexMap;
use tokio::sync::Mutex;
use tokio::sync::RwLock;
use tracing::debug;

use crate::ShellConfig;

/// Default search path when the environment does not provide one.
pub const DEFAULT_PATH: &str = "/bin:/usr/bin:/usr/local/bin:/usr/local/sbin:/usr/sbin:/sbin";

/// Streams and context handed to a dispatched (non-builtin) command.
pub struct ExecContext {
    /// `argv[0]` is the command name.
    pub argv: Vec<String>,
    /// Effective environment: the session's plus per-command overrides.
    pub env: IndexMap<String, String>,
    pub cwd: String,
    pub stdin: Option<ReadableStream>,
    pub stdin_is_tty: bool,
    pub stdout: Option<WritableStream>,
    pub stderr: Option<WritableStream>,
}

/// The command registry seen from the shell: name lookup for dispatch and
/// completion, and invocation.
#[async_trait]
pub trait CommandResolver: Send + Sync {
    fn contains(&self, name: &str) -> bool;
    fn names(&self) -> Vec<String>;
    async fn dispatch(&self, shell: &Shell, ctx: ExecContext) -> anyhow::Result<i32>;
}

pub struct ShellOptions {
    pub vfs: Vfs,
    pub manager: ProcessManager,
    pub terminal: Terminal,
    pub credentials: Credentials,
    pub username: String,
    pub hostname: String,
    pub home: String,
    /// The login shell's process id, reported by `$$`.
    pub pid: Pid,
    pub config: ShellConfig,
    /// `KEY=VALUE` pairs from `/etc/env`, applied over the built-in
    /// defaults.
    pub env_seed: Vec<(String, String)>,
}

pub(crate) struct ShellInner {
    pub(crate) vfs: Vfs,
    pub(crate) fs: FsView,
    pub(crate) manager: ProcessManager,
    pub(crate) terminal: Terminal,
    pub(crate) resolver: RwLock<Option<Arc<dyn CommandResolver>>>,
    pub(crate) env: Mutex<IndexMap<String, String>>,
    pub(crate) cwd: Mutex<String>,
    pub(crate) last_status: AtomicI32,
    /// Stack of positional-parameter frames; scripts push on entry and pop
    /// on return so `$1` inside a script never leaks out.
    pub(crate) positional: Mutex<Vec<Vec<String>>>,
    pub(crate) aliases: Mutex<IndexMap<String, String>>,
    pub(crate) exited: Mutex<Option<i32>>,
    pub(crate) pid: Pid,
    pub(crate) username: String,
    pub(crate) hostname: String,
    pub(crate) home: String,
    pub(crate) config: ShellConfig,
}

/// One interactive session: environment, working directory, positional
/// parameters, aliases, history, and the machinery to parse and run command
/// lines.
#[derive(Clone)]
pub struct Shell {
    pub(crate) inner: Arc<ShellInner>,
}

impl Shell {
    pub fn new(options: ShellOptions) -> Self {
        let mut env = IndexMap::new();
        env.insert("HOME".to_string(), options.home.clone());
        env.insert(
            "PATH".to_string(),
            format!("{}/bin:{DEFAULT_PATH}", options.home),
        );
        env.insert("USER".to_string(), options.username.clone());
        env.insert("HOSTNAME".to_string(), options.hostname.clone());
        env.insert("SHELL".to_string(), "/bin/sh".to_string());
        env.insert("TERM".to_string(), "xterm-256color".to_string());
        for (key, value) in options.env_seed {
            env.insert(key, value);
        }

        let fs = options.vfs.with_credentials(options.credentials);
        Self {
            inner: Arc::new(ShellInner {
                vfs: options.vfs,
                fs,
                manager: options.manager,
                terminal: options.terminal,
                resolver: RwLock::new(None),
                env: Mutex::new(env),
                cwd: Mutex::new(options.home.clone()),
                last_status: AtomicI32::new(0),
                positional: Mutex::new(Vec::new()),
                aliases: Mutex::new(IndexMap::new()),
                exited: Mutex::new(None),
                pid: options.pid,
                username: options.username,
                hostname: options.hostname,
                home: options.home,
                config: options.config,
            }),
        }
    }

    pub async fn set_resolver(&self, resolver: Arc<dyn CommandResolver>) {
        *self.inner.resolver.write().await = Some(resolver);
    }

    pub(crate) async fn resolver(&self) -> Option<Arc<dyn CommandResolver>> {
        self.inner.resolver.read().await.clone()
    }

    pub fn fs(&self) -> &FsView {
        &self.inner.fs
    }

    pub fn vfs(&self) -> &Vfs {
        &self.inner.vfs
    }

    pub fn terminal(&self) -> &Terminal {
        &self.inner.terminal
    }

    pub fn manager(&self) -> &ProcessManager {
        &self.inner.manager
    }

    pub fn pid(&self) -> Pid {
        self.inner.pid
    }

    pub fn username(&self) -> &str {
        &self.inner.username
    }

    pub fn home(&self) -> &str {
        &self.inner.home
    }

    pub fn config(&self) -> &ShellConfig {
        &self.inner.config
    }

    // --- environment -------------------------------------------------------

    pub async fn env_get(&self, key: &str) -> Option<String> {
        self.inner.env.lock().await.get(key).cloned()
    }

    pub async fn env_set(&self, key: &str, value: &str) {
        self.inner
            .env
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
    }

    pub async fn env_unset(&self, key: &str) {
        self.inner.env.lock().await.shift_remove(key);
    }

    /// The environment in insertion order, as `env` lists it.
    pub async fn env_snapshot(&self) -> IndexMap<String, String> {
        self.inner.env.lock().await.clone()
    }

    pub async fn path_dirs(&self) -> Vec<String> {
        let path = self
            .env_get("PATH")
            .await
            .unwrap_or_else(|| DEFAULT_PATH.to_string());
        path.split(':').filter(|d| !d.is_empty()).map(String::from).collect()
    }

    // --- cwd ---------------------------------------------------------------

    pub async fn cwd(&self) -> String {
        self.inner.cwd.lock().await.clone()
    }

    pub(crate) async fn set_cwd(&self, path: String) {
        *self.inner.cwd.lock().await = path;
    }

    /// Expands a leading `~` against `$HOME`. Exposed so utilities treat
    /// user-supplied paths uniformly.
    pub async fn expand_tilde(&self, input: &str) -> String {
        if input == "~" {
            return self.home_dir().await;
        }
        match input.strip_prefix("~/") {
            Some(rest) => format!("{}/{rest}", self.home_dir().await),
            None => input.to_string(),
        }
    }

    async fn home_dir(&self) -> String {
        self.env_get("HOME")
            .await
            .unwrap_or_else(|| self.inner.home.clone())
    }

    // --- status ------------------------------------------------------------

    pub fn last_status(&self) -> i32 {
        self.inner.last_status.load(Ordering::Acquire)
    }

    pub(crate) fn set_last_status(&self, status: i32) {
        self.inner.last_status.store(status, Ordering::Release);
    }

    pub(crate) async fn request_exit(&self, code: i32) {
        let mut exited = self.inner.exited.lock().await;
        if exited.is_none() {
            *exited = Some(code);
        }
    }

    pub async fn exit_code(&self) -> Option<i32> {
        *self.inner.exited.lock().await
    }

    // --- positional parameters ---------------------------------------------

    /// Binds `$0..$n` for a script invocation.
    pub async fn set_positional_parameters(&self, params: Vec<String>) {
        self.inner.positional.lock().await.push(params);
    }

    /// Restores the previous frame's view.
    pub async fn clear_positional_parameters(&self) {
        self.inner.positional.lock().await.pop();
    }

    pub async fn positional(&self, index: usize) -> Option<String> {
        let frames = self.inner.positional.lock().await;
        frames.last().and_then(|frame| frame.get(index).cloned())
    }

    /// `$#`: count of parameters excluding `$0`.
    pub async fn positional_count(&self) -> usize {
        let frames = self.inner.positional.lock().await;
        frames
            .last()
            .map(|frame| frame.len().saturating_sub(1))
            .unwrap_or(0)
    }

    /// Replaces the current frame (the `set --` builtin).
    pub(crate) async fn replace_positional(&self, mut params: Vec<String>) {
        let mut frames = self.inner.positional.lock().await;
        match frames.last_mut() {
            Some(frame) => {
                let zero = frame.first().cloned().unwrap_or_default();
                params.insert(0, zero);
                *frame = params;
            }
            None => {
                params.insert(0, "sh".to_string());
                frames.push(params);
            }
        }
    }

    // --- aliases -----------------------------------------------------------

    pub async fn alias_get(&self, name: &str) -> Option<String> {
        self.inner.aliases.lock().await.get(name).cloned()
    }

    pub async fn alias_set(&self, name: &str, value: &str) {
        self.inner
            .aliases
            .lock()
            .await
            .insert(name.to_string(), value.to_string());
    }

    pub async fn alias_unset(&self, name: &str) -> bool {
        self.inner.aliases.lock().await.shift_remove(name).is_some()
    }

    pub async fn aliases(&self) -> IndexMap<String, String> {
        self.inner.aliases.lock().await.clone()
    }

    // --- history -----------------------------------------------------------

    fn history_path(&self) -> String {
        format!("{}/.shell_history", self.inner.home)
    }

    /// Seeds the terminal's history from `$HOME/.shell_history`.
    pub async fn load_history(&self) {
        let Ok(content) = self.inner.fs.read_to_string(&self.history_path()).await else {
            return;
        };
        let keep = self.inner.config.history_size;
        let lines: Vec<String> = content.lines().map(String::from).collect();
        let start = lines.len().saturating_sub(keep);
        self.inner.terminal.set_history(lines[start..].to_vec()).await;
    }

    /// Records an executed line in terminal history and on disk.
    pub async fn append_history(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        self.inner.terminal.push_history(line).await;
        let entry = format!("{line}\n");
        if let Err(err) = self
            .inner
            .fs
            .append_file(&self.history_path(), entry.as_bytes())
            .await
        {
            debug!("appending shell history: {err}");
        }
    }

    // --- prompt ------------------------------------------------------------

    /// Renders the prompt: `PS1` if set, else the configured template.
    /// Supports `\u` (user), `\h` (host), `\w` (cwd, `~`-abbreviated) and
    /// `\$` (`#` for root).
    pub async fn prompt(&self) -> String {
        let template = match self.env_get("PS1").await {
            Some(ps1) => ps1,
            None => self.inner.config.prompt.clone(),
        };
        let cwd = self.cwd().await;
        let home = self.home_dir().await;
        let display_cwd = if cwd == home {
            "~".to_string()
        } else {
            match cwd.strip_prefix(&format!("{home}/")) {
                Some(rest) => format!("~/{rest}"),
                None => cwd,
            }
        };
        let dollar = if self.inner.fs.credentials().is_root() {
            "#"
        } else {
            "$"
        };

        let mut out = String::new();
        let mut chars = template.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('u') => out.push_str(&self.inner.username),
                Some('h') => out.push_str(&self.inner.hostname),
                Some('w') => out.push_str(&display_cwd),
                Some('$') => out.push_str(dollar),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        }
        out
    }
}
