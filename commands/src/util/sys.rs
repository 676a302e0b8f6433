//! Process, environment and session commands.

use async_trait::async_trait;
use coral_proc::INTERRUPT_EXIT_CODE;
use coral_proc::ProcessStatus;
use coral_users::User;

use crate::Command;
use crate::Invocation;
use crate::args::OptSpec;

pub struct True;

#[async_trait]
impl Command for True {
    fn name(&self) -> &'static str {
        "true"
    }

    fn description(&self) -> &'static str {
        "Exit successfully"
    }

    async fn run(&self, _inv: &mut Invocation) -> anyhow::Result<i32> {
        Ok(0)
    }
}

pub struct False;

#[async_trait]
impl Command for False {
    fn name(&self) -> &'static str {
        "false"
    }

    fn description(&self) -> &'static str {
        "Exit unsuccessfully"
    }

    async fn run(&self, _inv: &mut Invocation) -> anyhow::Result<i32> {
        Ok(1)
    }
}

pub struct Clear;

#[async_trait]
impl Command for Clear {
    fn name(&self) -> &'static str {
        "clear"
    }

    fn description(&self) -> &'static str {
        "Clear the terminal screen"
    }

    async fn run(&self, inv: &mut Invocation) -> anyhow::Result<i32> {
        inv.write_stdout(&coral_term::ansi::clear_screen()).await;
        Ok(0)
    }
}

pub struct EnvCmd;

#[async_trait]
impl Command for EnvCmd {
    fn name(&self) -> &'static str {
        "env"
    }

    fn description(&self) -> &'static str {
        "Print the environment, one KEY=VALUE per line"
    }

    async fn run(&self, inv: &mut Invocation) -> anyhow::Result<i32> {
        let entries: Vec<String> = inv
            .env
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        for entry in entries {
            inv.writeln_stdout(&entry).await;
        }
        Ok(0)
    }
}

pub struct Sleep;

#[async_trait]
impl Command for Sleep {
    fn name(&self) -> &'static str {
        "sleep"
    }

    fn description(&self) -> &'static str {
        "Pause for a number of seconds"
    }

    fn usage_line(&self) -> &'static str {
        "SECONDS"
    }

    async fn run(&self, inv: &mut Invocation) -> anyhow::Result<i32> {
        let Some(spec) = inv.args.positionals().first() else {
            inv.writeln_stderr("sleep: missing operand").await;
            return Ok(2);
        };
        let Ok(seconds) = spec.parse::<f64>() else {
            inv.writeln_stderr(&format!("sleep: invalid time interval: {spec}")).await;
            return Ok(1);
        };
        let duration = std::time::Duration::from_secs_f64(seconds.max(0.0));
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(0),
            _ = inv.cancel.cancelled() => Ok(INTERRUPT_EXIT_CODE),
        }
    }
}

pub struct Ps;

#[async_trait]
impl Command for Ps {
    fn name(&self) -> &'static str {
        "ps"
    }

    fn description(&self) -> &'static str {
        "List processes"
    }

    async fn run(&self, inv: &mut Invocation) -> anyhow::Result<i32> {
        inv.writeln_stdout("  PID STAT COMMAND").await;
        for process in inv.services.manager.list().await {
            let status = match process.status().await {
                ProcessStatus::Created => "new",
                ProcessStatus::Running => "run",
                ProcessStatus::Paused => "stp",
                ProcessStatus::Stopped => "stp",
                ProcessStatus::Exited => "exd",
            };
            let mut line = format!("{:>5} {status}  {}", process.pid(), process.command());
            let args = process.args().join(" ");
            if !args.is_empty() {
                line.push(' ');
                line.push_str(&args);
            }
            inv.writeln_stdout(&line).await;
        }
        Ok(0)
    }
}

pub struct Kill;

#[async_trait]
impl Command for Kill {
    fn name(&self) -> &'static str {
        "kill"
    }

    fn description(&self) -> &'static str {
        "Stop a process by pid"
    }

    fn usage_line(&self) -> &'static str {
        "PID..."
    }

    async fn run(&self, inv: &mut Invocation) -> anyhow::Result<i32> {
        let operands = inv.args.positionals().to_vec();
        if operands.is_empty() {
            inv.writeln_stderr("kill: missing pid").await;
            return Ok(2);
        }
        let mut status = 0;
        for operand in &operands {
            let Ok(pid) = operand.parse() else {
                inv.writeln_stderr(&format!("kill: invalid pid: {operand}")).await;
                status = 1;
                continue;
            };
            if inv.services.manager.stop(pid).await.is_err() {
                inv.writeln_stderr(&format!("kill: ({pid}) - No such process")).await;
                status = 1;
            }
        }
        Ok(status)
    }
}

pub struct Which;

#[async_trait]
impl Command for Which {
    fn name(&self) -> &'static str {
        "which"
    }

    fn description(&self) -> &'static str {
        "Locate a command"
    }

    fn usage_line(&self) -> &'static str {
        "NAME..."
    }

    async fn run(&self, inv: &mut Invocation) -> anyhow::Result<i32> {
        let operands = inv.args.positionals().to_vec();
        if operands.is_empty() {
            inv.writeln_stderr("which: missing name").await;
            return Ok(2);
        }
        let path = inv.env.get("PATH").cloned().unwrap_or_default();
        let mut status = 0;
        'names: for name in &operands {
            if coral_shell::is_builtin(name) {
                inv.writeln_stdout(&format!("{name}: shell builtin")).await;
                continue;
            }
            if inv.services.is_registered(name) {
                inv.writeln_stdout(name).await;
                continue;
            }
            for dir in path.split(':').filter(|d| !d.is_empty()) {
                let candidate = format!("{dir}/{name}");
                if let Ok(meta) = inv.fs().stat(&candidate).await {
                    if meta.is_file() && meta.mode & 0o111 != 0 {
                        inv.writeln_stdout(&candidate).await;
                        continue 'names;
                    }
                }
            }
            status = 1;
        }
        Ok(status)
    }
}

pub struct UserCommand;

#[async_trait]
impl Command for UserCommand {
    fn name(&self) -> &'static str {
        "user"
    }

    fn description(&self) -> &'static str {
        "Manage accounts: add, del, list"
    }

    fn usage_line(&self) -> &'static str {
        "add NAME [-p PASSWORD] | del NAME | list"
    }

    fn options(&self) -> &'static [OptSpec] {
        const OPTS: &[OptSpec] = &[OptSpec::value("password", 'p', "password for the new account")];
        OPTS
    }

    async fn run(&self, inv: &mut Invocation) -> anyhow::Result<i32> {
        let positionals = inv.args.positionals().to_vec();
        match positionals.first().map(String::as_str) {
            Some("add") => {
                let Some(name) = positionals.get(1) else {
                    inv.writeln_stderr("user: add needs a username").await;
                    return Ok(2);
                };
                let uid = inv.services.users.next_uid().await;
                let mut user = User::new(name, uid, uid);
                if let Some(password) = inv.args.value("password") {
                    user = user.with_password(password);
                }
                let home = user.home.clone();
                if let Err(err) = inv.services.users.add(user).await {
                    inv.writeln_stderr(&format!("user: {err}")).await;
                    return Ok(1);
                }
                // Best-effort home directory; the account exists either way.
                let fs = inv.fs();
                if fs.mkdir(&home, true).await.is_ok() {
                    let _ = fs.chown(&home, uid, uid).await;
                }
                Ok(0)
            }
            Some("del") => {
                let Some(name) = positionals.get(1) else {
                    inv.writeln_stderr("user: del needs a username").await;
                    return Ok(2);
                };
                match inv.services.users.remove(name).await {
                    Ok(_) => Ok(0),
                    Err(err) => {
                        inv.writeln_stderr(&format!("user: {err}")).await;
                        Ok(1)
                    }
                }
            }
            Some("list") | None => {
                for user in inv.services.users.list().await {
                    inv.writeln_stdout(&format!(
                        "{}:{}:{}:{}:{}",
                        user.username, user.uid, user.gid, user.home, user.shell
                    ))
                    .await;
                }
                Ok(0)
            }
            Some(other) => {
                inv.writeln_stderr(&format!("user: unknown subcommand {other}")).await;
                Ok(2)
            }
        }
    }
}
