//! Executing parsed command lists: pipeline wiring, redirections, builtin
//! dispatch, registry dispatch and PATH scripts.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use coral_streams::ReadableStream;
use coral_streams::WritableStream;
use coral_vfs::Access;
use coral_vfs::FileHandle;
use coral_vfs::OpenFlags;
use coral_vfs::path;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::ExecContext;
use crate::Result;
use crate::Shell;
use crate::builtins;
use crate::lexer::tokenize;
use crate::lexer::Token;
use crate::parser::ChainOp;
use crate::parser::CommandList;
use crate::parser::Pipeline;
use crate::parser::Redirect;
use crate::parser::SimpleCommand;
use crate::parser::parse;

/// Where a pipeline's outer streams come from.
#[derive(Clone)]
pub(crate) enum StdinMode {
    /// Subscribe to the terminal (interactive foreground).
    Terminal,
    /// No stdin; filters see instant EOF.
    Null,
    /// An inherited stream (scripts, sourced files).
    Stream(ReadableStream),
}

#[derive(Clone)]
pub(crate) struct ExecDefaults {
    pub(crate) stdin: StdinMode,
    pub(crate) stdout: WritableStream,
    pub(crate) stderr: WritableStream,
}

/// The wired streams one stage runs with.
pub(crate) struct StageIo {
    pub(crate) stdin: Option<ReadableStream>,
    pub(crate) stdin_is_tty: bool,
    pub(crate) stdout: WritableStream,
    pub(crate) stderr: WritableStream,
}

impl Shell {
    pub(crate) fn default_io(&self) -> ExecDefaults {
        ExecDefaults {
            stdin: StdinMode::Terminal,
            stdout: self.terminal().writer(),
            stderr: self.terminal().writer(),
        }
    }

    /// Parses and runs one input line with terminal-backed streams,
    /// returning (and recording) its exit status.
    pub async fn execute_line(&self, line: &str) -> i32 {
        let io = self.default_io();
        self.execute_line_with(line, &io).await
    }

    /// Like [`Shell::execute_line`] but without a controlling stdin: output
    /// still reaches the terminal, input reads see end-of-file. This is how
    /// cron jobs and other non-interactive callers run lines.
    pub async fn execute_detached(&self, line: &str) -> i32 {
        let io = ExecDefaults {
            stdin: StdinMode::Null,
            stdout: self.terminal().writer(),
            stderr: self.terminal().writer(),
        };
        self.execute_line_with(line, &io).await
    }

    pub(crate) async fn execute_line_with(&self, line: &str, io: &ExecDefaults) -> i32 {
        match parse(line) {
            Ok(list) if list.is_empty() => self.last_status(),
            Ok(list) => self.execute_list(&list, io).await,
            Err(err) => {
                self.write_stderr(io, &format!("coral: {err}")).await;
                self.set_last_status(2);
                2
            }
        }
    }

    pub(crate) async fn execute_list(&self, list: &CommandList, io: &ExecDefaults) -> i32 {
        let mut status = self.last_status();
        for item in &list.items {
            match item.op {
                ChainOp::Always => {}
                ChainOp::IfSuccess if status != 0 => continue,
                ChainOp::IfFailure if status == 0 => continue,
                _ => {}
            }
            if item.background {
                let shell = self.clone();
                let pipeline = item.pipeline.clone();
                let mut background_io = io.clone();
                // Background pipelines never own the keyboard.
                background_io.stdin = StdinMode::Null;
                tokio::spawn(async move {
                    let code = shell.execute_pipeline(&pipeline, &background_io).await;
                    debug!("background pipeline finished with {code}");
                });
                status = 0;
            } else {
                status = self.execute_pipeline(&item.pipeline, io).await;
            }
            self.set_last_status(status);
            if self.exit_code().await.is_some() {
                break;
            }
        }
        status
    }

    /// Wires N-1 pipes between N stages, starts every stage concurrently,
    /// and returns the last stage's exit status.
    pub(crate) async fn execute_pipeline(&self, pipeline: &Pipeline, io: &ExecDefaults) -> i32 {
        let count = pipeline.commands.len();
        let mut tasks: Vec<JoinHandle<i32>> = Vec::with_capacity(count);
        let mut prev_reader: Option<ReadableStream> = None;
        let mut terminal_stdin: Option<ReadableStream> = None;

        for (index, command) in pipeline.commands.iter().enumerate() {
            let (stdin, stdin_is_tty) = if index == 0 {
                match &io.stdin {
                    StdinMode::Terminal => {
                        let stream = self.terminal().input_stream().await;
                        terminal_stdin = Some(stream.clone());
                        (Some(stream), true)
                    }
                    StdinMode::Null => (None, false),
                    StdinMode::Stream(stream) => (Some(stream.clone()), false),
                }
            } else {
                (prev_reader.take(), false)
            };

            let stdout = if index + 1 < count {
                let (writable, readable) = coral_streams::pipe();
                prev_reader = Some(readable);
                writable
            } else {
                io.stdout.clone()
            };

            let stage = StageIo {
                stdin,
                stdin_is_tty,
                stdout,
                stderr: io.stderr.clone(),
            };
            tasks.push(tokio::spawn(stage_task(
                self.clone(),
                command.clone(),
                stage,
            )));
        }

        let mut status = 0;
        for task in tasks {
            status = task.await.unwrap_or(1);
        }
        if let Some(stream) = terminal_stdin {
            stream.cancel();
        }
        status
    }

    /// Runs one simple command with its wired streams.
    async fn execute_stage(&self, command: SimpleCommand, mut io: StageIo) -> i32 {
        // Expansion happens before redirection, per the expansion order.
        let assignments = match self.expand_assignments(&command).await {
            Ok(assignments) => assignments,
            Err(err) => return self.stage_error(&io, &format!("coral: {err}"), 1).await,
        };

        let argv = match self.expand_argv(&command).await {
            Ok(argv) => argv,
            Err(err) => return self.stage_error(&io, &format!("coral: {err}"), 1).await,
        };

        // A bare assignment mutates the session environment.
        if argv.is_empty() {
            for (key, value) in assignments {
                self.env_set(&key, &value).await;
            }
            return 0;
        }

        let mut cleanup = RedirectCleanup::default();
        if let Err(err) = self.apply_redirects(&command, &mut io, &mut cleanup).await {
            let status = self.stage_error(&io, &format!("coral: {err}"), 1).await;
            cleanup.finish().await;
            return status;
        }

        let name = argv[0].clone();
        let status = if builtins::is_builtin(&name) {
            builtins::run(self, &argv, &io).await
        } else {
            self.dispatch_external(&name, argv, assignments, &io).await
        };

        // Drop our stream handles before draining redirect pumps so file
        // writers observe end-of-stream. Dropping (not cancelling) stdin
        // matters: an inherited stream may be shared with later commands.
        drop(io);
        cleanup.finish().await;
        status
    }

    async fn dispatch_external(
        &self,
        name: &str,
        argv: Vec<String>,
        assignments: Vec<(String, String)>,
        io: &StageIo,
    ) -> i32 {
        let mut env = self.env_snapshot().await;
        for (key, value) in assignments {
            env.insert(key, value);
        }

        if let Some(resolver) = self.resolver().await {
            if resolver.contains(name) {
                let ctx = ExecContext {
                    argv,
                    env,
                    cwd: self.cwd().await,
                    stdin: io.stdin.clone(),
                    stdin_is_tty: io.stdin_is_tty,
                    stdout: Some(io.stdout.clone()),
                    stderr: Some(io.stderr.clone()),
                };
                return match resolver.dispatch(self, ctx).await {
                    Ok(code) => code,
                    Err(err) => {
                        self.stage_error(io, &format!("{name}: {err}"), 1).await
                    }
                };
            }
        }

        match self.find_executable(name).await {
            Some(script) => {
                let script_io = ExecDefaults {
                    stdin: match &io.stdin {
                        Some(stream) => StdinMode::Stream(stream.clone()),
                        None => StdinMode::Null,
                    },
                    stdout: io.stdout.clone(),
                    stderr: io.stderr.clone(),
                };
                self.execute_script(&script, argv[1..].to_vec(), &script_io)
                    .await
            }
            None => {
                self.stage_error(io, &format!("{name}: command not found"), 127)
                    .await
            }
        }
    }

    /// PATH resolution on the VFS: explicit paths are used as-is, bare
    /// names search each `$PATH` directory for an executable regular file.
    pub async fn find_executable(&self, name: &str) -> Option<String> {
        let cwd = self.cwd().await;
        let creds = self.fs().credentials().clone();
        if name.contains('/') {
            let candidate = path::absolutize(&cwd, name);
            let meta = self.fs().stat(&candidate).await.ok()?;
            if meta.is_file() && creds.check(&meta, Access::Execute).is_ok() {
                return Some(candidate);
            }
            return None;
        }
        for dir in self.path_dirs().await {
            let candidate = path::absolutize(&cwd, &format!("{dir}/{name}"));
            let Ok(meta) = self.fs().stat(&candidate).await else {
                continue;
            };
            if meta.is_file() && creds.check(&meta, Access::Execute).is_ok() {
                return Some(candidate);
            }
        }
        None
    }

    /// Runs a script file line by line in this session, with positional
    /// parameters bound to the invocation.
    pub async fn run_script(&self, script: &str, args: Vec<String>) -> i32 {
        let io = self.default_io();
        self.execute_script(script, args, &io).await
    }

    pub(crate) async fn execute_script(
        &self,
        script: &str,
        args: Vec<String>,
        io: &ExecDefaults,
    ) -> i32 {
        let content = match self.fs().read_to_string(script).await {
            Ok(content) => content,
            Err(err) => {
                self.write_stderr(io, &format!("coral: {script}: {err}")).await;
                return 1;
            }
        };

        let mut params = vec![script.to_string()];
        params.extend(args);
        self.set_positional_parameters(params).await;

        let mut status = 0;
        for (idx, line) in content.lines().enumerate() {
            if idx == 0 && line.starts_with("#!") {
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }
            status = self.execute_line_with(line, io).await;
            if self.exit_code().await.is_some() {
                break;
            }
        }
        self.clear_positional_parameters().await;
        status
    }

    /// Runs `input` in a capture context: stdout collected into a string
    /// with trailing newlines stripped, i.e. command substitution.
    pub(crate) fn run_capture<'a>(
        &'a self,
        input: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let list = parse(input)?;
            if list.is_empty() {
                return Ok(String::new());
            }

            let (writable, readable) = coral_streams::pipe();
            let collector = tokio::spawn(async move {
                match readable.lock() {
                    Ok(mut reader) => coral_streams::collect(&mut reader).await,
                    Err(_) => Vec::new(),
                }
            });

            let io = ExecDefaults {
                stdin: StdinMode::Null,
                stdout: writable,
                stderr: self.terminal().writer(),
            };
            self.execute_list(&list, &io).await;
            drop(io);

            let bytes = collector.await.unwrap_or_default();
            let mut output = String::from_utf8_lossy(&bytes).into_owned();
            while output.ends_with('\n') {
                output.pop();
            }
            Ok(output)
        })
    }

    // --- stage helpers -----------------------------------------------------

    async fn expand_assignments(
        &self,
        command: &SimpleCommand,
    ) -> Result<Vec<(String, String)>> {
        let mut assignments = Vec::with_capacity(command.assignments.len());
        for (key, value) in &command.assignments {
            assignments.push((key.clone(), self.expand_word_single(value).await?));
        }
        Ok(assignments)
    }

    async fn expand_argv(&self, command: &SimpleCommand) -> Result<Vec<String>> {
        let mut words = command.words.clone();

        // Alias substitution applies to an unquoted first word.
        if let Some(first) = words.first() {
            if first.is_unquoted() {
                if let Some(alias) = self.alias_get(&first.flat_text()).await {
                    if let Ok(tokens) = tokenize(&alias) {
                        let mut replacement: Vec<_> = tokens
                            .into_iter()
                            .filter_map(|t| match t {
                                Token::Word(w) => Some(w),
                                _ => None,
                            })
                            .collect();
                        replacement.extend(words.drain(1..));
                        words = replacement;
                    }
                }
            }
        }

        let mut argv = Vec::new();
        for word in &words {
            argv.extend(self.expand_word_fields(word).await?);
        }
        Ok(argv)
    }

    async fn apply_redirects(
        &self,
        command: &SimpleCommand,
        io: &mut StageIo,
        cleanup: &mut RedirectCleanup,
    ) -> Result<()> {
        let cwd = self.cwd().await;
        for redirect in &command.redirects {
            match redirect {
                Redirect::In(target) => {
                    let target = self.redirect_path(&cwd, target).await?;
                    let handle = self.fs().open(&target, OpenFlags::read_only()).await?;
                    let stream = handle.reader_stream();
                    cleanup.readers.push((handle, stream.clone()));
                    io.stdin = Some(stream);
                    io.stdin_is_tty = false;
                }
                Redirect::Out(target) => {
                    let target = self.redirect_path(&cwd, target).await?;
                    let handle = self.fs().open(&target, OpenFlags::write_only()).await?;
                    let (writable, pump) = handle.writer_stream();
                    cleanup.writers.push((handle, pump));
                    io.stdout = writable;
                }
                Redirect::Append(target) => {
                    let target = self.redirect_path(&cwd, target).await?;
                    let handle = self.fs().open(&target, OpenFlags::append_only()).await?;
                    let (writable, pump) = handle.writer_stream();
                    cleanup.writers.push((handle, pump));
                    io.stdout = writable;
                }
                Redirect::Err(target) => {
                    let target = self.redirect_path(&cwd, target).await?;
                    let handle = self.fs().open(&target, OpenFlags::write_only()).await?;
                    let (writable, pump) = handle.writer_stream();
                    cleanup.writers.push((handle, pump));
                    io.stderr = writable;
                }
                Redirect::ErrToOut => {
                    io.stderr = io.stdout.clone();
                }
            }
        }
        Ok(())
    }

    async fn redirect_path(&self, cwd: &str, target: &crate::lexer::Word) -> Result<String> {
        let expanded = self.expand_word_single(target).await?;
        Ok(path::absolutize(cwd, &expanded))
    }

    async fn stage_error(&self, io: &StageIo, message: &str, status: i32) -> i32 {
        if let Ok(mut writer) = io.stderr.lock() {
            let _ = writer.write_line(message).await;
        }
        status
    }

    async fn write_stderr(&self, io: &ExecDefaults, message: &str) {
        if let Ok(mut writer) = io.stderr.lock() {
            let _ = writer.write_line(message).await;
        }
    }
}

/// Handles and pump tasks opened for redirections; drained and closed after
/// the stage finishes so no buffered byte is lost and no handle leaks.
#[derive(Default)]
struct RedirectCleanup {
    writers: Vec<(Arc<FileHandle>, JoinHandle<()>)>,
    readers: Vec<(Arc<FileHandle>, ReadableStream)>,
}

impl RedirectCleanup {
    async fn finish(self) {
        for (handle, pump) in self.writers {
            let _ = pump.await;
            if let Err(err) = handle.close() {
                debug!("closing redirect target {}: {err}", handle.path());
            }
        }
        for (handle, stream) in self.readers {
            stream.cancel();
            if let Err(err) = handle.close() {
                debug!("closing redirect source {}: {err}", handle.path());
            }
        }
    }
}

fn stage_task(
    shell: Shell,
    command: SimpleCommand,
    io: StageIo,
) -> Pin<Box<dyn Future<Output = i32> + Send>> {
    Box::pin(async move { shell.execute_stage(command, io).await })
}
