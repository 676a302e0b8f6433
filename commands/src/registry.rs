use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use coral_proc::INTERRUPT_EXIT_CODE;
use coral_proc::ProcessOptions;
use coral_shell::CommandResolver;
use coral_shell::ExecContext;
use coral_shell::Shell;
use coral_term::TermEvent;
use tracing::debug;

use crate::Command;
use crate::Invocation;
use crate::Services;
use crate::args;

/// Name → command map plus the dispatch path: every invocation becomes a
/// process with wired streams, schema-parsed arguments and an interrupt
/// subscription.
pub struct CommandRegistry {
    commands: HashMap<&'static str, Arc<dyn Command>>,
    services: Services,
}

impl CommandRegistry {
    pub fn new(services: Services) -> Self {
        Self {
            commands: HashMap::new(),
            services,
        }
    }

    /// The full standard set.
    pub fn standard(services: Services) -> Self {
        let mut registry = Self::new(services);
        for command in crate::util::standard_commands() {
            registry.register(command);
        }
        registry
    }

    pub fn register(&mut self, command: Arc<dyn Command>) {
        if let Ok(mut names) = self.services.registry_names.write() {
            names.push(command.name().to_string());
        }
        self.commands.insert(command.name(), command);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.commands.get(name).cloned()
    }

    pub fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.keys().map(|s| s.to_string()).collect();
        names.sort();
        names
    }
}

#[async_trait]
impl CommandResolver for CommandRegistry {
    fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    fn names(&self) -> Vec<String> {
        self.command_names()
    }

    async fn dispatch(&self, shell: &Shell, ctx: ExecContext) -> anyhow::Result<i32> {
        let name = ctx.argv[0].clone();
        let Some(command) = self.get(&name) else {
            anyhow::bail!("{name}: not registered");
        };

        let creds = shell.fs().credentials().clone();
        let services = self.services.clone();
        let ExecContext {
            argv,
            env,
            cwd,
            stdin,
            stdin_is_tty,
            stdout,
            stderr,
        } = ctx;

        let services_for_closure = services.clone();
        let process = services
            .manager
            .create(ProcessOptions {
                command: name.clone(),
                args: argv[1..].to_vec(),
                cwd: cwd.clone(),
                uid: creds.uid,
                gid: creds.gid,
                parent: Some(shell.pid()),
                stdin,
                stdin_is_tty,
                stdout,
                stderr,
                entry: Box::new(move |params| {
                    Box::pin(async move {
                        let parsed = match args::parse(&params.args, command.options()) {
                            Ok(parsed) => parsed,
                            Err(err) => {
                                write_usage_error(&params, &name, &err.to_string()).await;
                                return Ok(2);
                            }
                        };
                        if parsed.help {
                            let text = args::usage(
                                command.name(),
                                command.description(),
                                command.usage_line(),
                                command.options(),
                            );
                            if let Some(stdout) = &params.stdout {
                                if let Ok(mut writer) = stdout.lock() {
                                    let _ = writer.write_str(&text).await;
                                }
                            }
                            return Ok(0);
                        }

                        let mut inv = Invocation::new(
                            Arc::clone(&params.process),
                            services_for_closure,
                            parsed,
                            params.cwd.clone(),
                            env,
                            params.stdin.clone(),
                            params.stdin_is_tty,
                            params.stdout.clone(),
                            params.stderr.clone(),
                            params.cancel.clone(),
                        );
                        command.run(&mut inv).await
                    })
                }),
            })
            .await;

        // Terminal interrupts cancel the command cooperatively.
        let cancel = process.cancel_token();
        let mut events = self.services.terminal.subscribe_events();
        let watcher = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(TermEvent::Interrupt) => {
                        cancel.cancel();
                        break;
                    }
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
        });

        let handle = self.services.manager.start(&process).await?;
        let status = handle.await.unwrap_or(1);
        watcher.abort();
        debug!("{} exited with {status}", process.command());
        Ok(status)
    }
}

async fn write_usage_error(
    params: &coral_proc::ProcessEntryParams,
    name: &str,
    message: &str,
) {
    if let Some(stderr) = &params.stderr {
        if let Ok(mut writer) = stderr.lock() {
            let _ = writer
                .write_line(&format!("{name}: {message}\nTry '{name} --help'."))
                .await;
        }
    }
}

/// Maps a cancelled run onto the conventional interrupt exit code; commands
/// call this when they notice the token mid-loop.
pub fn interrupt_status() -> i32 {
    INTERRUPT_EXIT_CODE
}
