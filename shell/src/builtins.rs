//! Builtins run in the shell process: anything that must mutate session
//! state (cwd, environment, aliases, positional parameters) plus the small
//! conveniences that would be absurd as external commands.

use coral_streams::LineReader;
use coral_streams::WritableStream;
use coral_vfs::path;

use crate::Shell;
use crate::exec::ExecDefaults;
use crate::exec::StageIo;
use crate::exec::StdinMode;
use crate::parser::is_identifier;

const BUILTINS: &[&str] = &[
    "cd", "pwd", "export", "unset", "alias", "unalias", "history", "exit", "read", "set",
    "source", ".",
];

/// Whether `name` is dispatched in-shell, without a process.
pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

pub(crate) fn builtin_names() -> Vec<String> {
    BUILTINS.iter().map(|s| s.to_string()).collect()
}

pub(crate) async fn run(shell: &Shell, argv: &[String], io: &StageIo) -> i32 {
    let name = argv[0].as_str();
    let args = &argv[1..];
    match name {
        "cd" => cd(shell, args, io).await,
        "pwd" => {
            let cwd = shell.cwd().await;
            out_line(&io.stdout, &cwd).await;
            0
        }
        "export" => export(shell, args, io).await,
        "unset" => {
            for key in args {
                shell.env_unset(key).await;
            }
            0
        }
        "alias" => alias(shell, args, io).await,
        "unalias" => unalias(shell, args, io).await,
        "history" => {
            let lines = shell.terminal().history().await;
            for (idx, line) in lines.iter().enumerate() {
                out_line(&io.stdout, &format!("{:5}  {line}", idx + 1)).await;
            }
            0
        }
        "exit" => exit(shell, args, io).await,
        "read" => read(shell, args, io).await,
        "set" => set(shell, args, io).await,
        "source" | "." => source(shell, args, io).await,
        _ => {
            err_line(&io.stderr, &format!("{name}: not a builtin")).await;
            1
        }
    }
}

async fn cd(shell: &Shell, args: &[String], io: &StageIo) -> i32 {
    let cwd = shell.cwd().await;
    let target = match args.first().map(String::as_str) {
        None => match shell.env_get("HOME").await {
            Some(home) => home,
            None => {
                err_line(&io.stderr, "cd: HOME not set").await;
                return 1;
            }
        },
        Some("-") => match shell.env_get("OLDPWD").await {
            Some(oldpwd) => {
                out_line(&io.stdout, &oldpwd).await;
                oldpwd
            }
            None => {
                err_line(&io.stderr, "cd: OLDPWD not set").await;
                return 1;
            }
        },
        Some(dir) => path::absolutize(&cwd, dir),
    };

    match shell.fs().stat(&target).await {
        Ok(meta) if meta.is_dir() => {
            shell.env_set("OLDPWD", &cwd).await;
            shell.env_set("PWD", &target).await;
            shell.set_cwd(target).await;
            0
        }
        Ok(_) => {
            err_line(&io.stderr, &format!("cd: {}: Not a directory", args[0])).await;
            1
        }
        Err(err) => {
            err_line(
                &io.stderr,
                &format!("cd: {}: {err}", args.first().map(String::as_str).unwrap_or("~")),
            )
            .await;
            1
        }
    }
}

async fn export(shell: &Shell, args: &[String], io: &StageIo) -> i32 {
    if args.is_empty() {
        for (key, value) in shell.env_snapshot().await {
            out_line(&io.stdout, &format!("export {key}={value}")).await;
        }
        return 0;
    }
    let mut status = 0;
    for arg in args {
        match arg.split_once('=') {
            Some((key, value)) if is_identifier(key) => {
                shell.env_set(key, value).await;
            }
            // `export KEY` with no value marks an existing variable; with
            // a single environment map that is a no-op.
            None if is_identifier(arg) => {}
            _ => {
                err_line(&io.stderr, &format!("export: `{arg}': not a valid identifier"))
                    .await;
                status = 1;
            }
        }
    }
    status
}

async fn alias(shell: &Shell, args: &[String], io: &StageIo) -> i32 {
    if args.is_empty() {
        for (name, value) in shell.aliases().await {
            out_line(&io.stdout, &format!("alias {name}='{value}'")).await;
        }
        return 0;
    }
    let mut status = 0;
    for arg in args {
        match arg.split_once('=') {
            Some((name, value)) if !name.is_empty() => {
                shell.alias_set(name, value).await;
            }
            _ => match shell.alias_get(arg).await {
                Some(value) => out_line(&io.stdout, &format!("alias {arg}='{value}'")).await,
                None => {
                    err_line(&io.stderr, &format!("alias: {arg}: not found")).await;
                    status = 1;
                }
            },
        }
    }
    status
}

async fn unalias(shell: &Shell, args: &[String], io: &StageIo) -> i32 {
    let mut status = 0;
    for arg in args {
        if !shell.alias_unset(arg).await {
            err_line(&io.stderr, &format!("unalias: {arg}: not found")).await;
            status = 1;
        }
    }
    status
}

async fn exit(shell: &Shell, args: &[String], io: &StageIo) -> i32 {
    let code = match args.first() {
        None => shell.last_status(),
        Some(arg) => match arg.parse() {
            Ok(code) => code,
            Err(_) => {
                err_line(&io.stderr, &format!("exit: {arg}: numeric argument required"))
                    .await;
                2
            }
        },
    };
    shell.request_exit(code).await;
    code
}

async fn read(shell: &Shell, args: &[String], io: &StageIo) -> i32 {
    let Some(var) = args.first() else {
        err_line(&io.stderr, "read: variable name required").await;
        return 2;
    };
    if !is_identifier(var) {
        err_line(&io.stderr, &format!("read: `{var}': not a valid identifier")).await;
        return 2;
    }

    let line = if io.stdin_is_tty {
        match shell.terminal().read_line("", true, true).await {
            Ok(line) => Some(line),
            Err(_) => None,
        }
    } else {
        match &io.stdin {
            Some(stream) => match stream.lock() {
                Ok(reader) => LineReader::new(reader).next_line().await,
                Err(_) => None,
            },
            None => None,
        }
    };

    match line {
        Some(line) => {
            shell.env_set(var, &line).await;
            0
        }
        None => 1,
    }
}

async fn set(shell: &Shell, args: &[String], io: &StageIo) -> i32 {
    if args.is_empty() {
        for (key, value) in shell.env_snapshot().await {
            out_line(&io.stdout, &format!("{key}={value}")).await;
        }
        return 0;
    }
    if args[0] == "--" {
        shell.replace_positional(args[1..].to_vec()).await;
        return 0;
    }
    err_line(&io.stderr, &format!("set: unsupported option {}", args[0])).await;
    2
}

async fn source(shell: &Shell, args: &[String], io: &StageIo) -> i32 {
    let Some(file) = args.first() else {
        err_line(&io.stderr, "source: filename argument required").await;
        return 2;
    };
    let cwd = shell.cwd().await;
    let script = path::absolutize(&cwd, file);
    let defaults = ExecDefaults {
        stdin: match &io.stdin {
            Some(stream) => StdinMode::Stream(stream.clone()),
            None => StdinMode::Null,
        },
        stdout: io.stdout.clone(),
        stderr: io.stderr.clone(),
    };
    shell
        .execute_script(&script, args[1..].to_vec(), &defaults)
        .await
}

async fn out_line(stream: &WritableStream, line: &str) {
    if let Ok(mut writer) = stream.lock() {
        let _ = writer.write_line(line).await;
    }
}

async fn err_line(stream: &WritableStream, line: &str) {
    if let Ok(mut writer) = stream.lock() {
        let _ = writer.write_line(line).await;
    }
}
