//! Fixtures for the in-crate shell tests: a scratch kernel-less session
//! over a memory filesystem plus a tiny command resolver.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use async_trait::async_trait;
use coral_proc::ProcessManager;
use coral_streams::LineReader;
use coral_term::Terminal;
use coral_vfs::Credentials;
use coral_vfs::MemFs;
use coral_vfs::Vfs;
use coral_vfs::path;

use crate::CommandResolver;
use crate::ExecContext;
use crate::Shell;
use crate::ShellConfig;
use crate::ShellOptions;
use crate::exec::ExecDefaults;
use crate::exec::StdinMode;

pub(crate) async fn scratch_shell() -> Shell {
    let vfs = Vfs::new();
    vfs.mount("/", Arc::new(MemFs::new()))
        .await
        .expect("mount root");
    let root = Credentials::root();
    for dir in ["/bin", "/etc", "/run", "/tmp", "/home/tester"] {
        vfs.mkdir(dir, true, &root).await.expect("mkdir");
    }
    vfs.chmod("/tmp", 0o777, &root).await.expect("chmod");
    vfs.chown("/home/tester", 1000, 1000, &root)
        .await
        .expect("chown");

    let manager = ProcessManager::new(vfs.clone());
    let terminal = Terminal::new();
    let shell = Shell::new(ShellOptions {
        vfs,
        manager,
        terminal,
        credentials: Credentials::new(1000, 1000),
        username: "tester".to_string(),
        hostname: "coral".to_string(),
        home: "/home/tester".to_string(),
        pid: 1,
        config: ShellConfig::default(),
        env_seed: Vec::new(),
    });
    shell.set_resolver(Arc::new(TestResolver)).await;
    shell
}

/// Runs a line with piped stdout/stderr and returns
/// `(status, stdout, stderr)`.
pub(crate) async fn run_collect(shell: &Shell, line: &str) -> (i32, String, String) {
    let (out_writable, out_readable) = coral_streams::pipe();
    let (err_writable, err_readable) = coral_streams::pipe();
    let out_task = tokio::spawn(async move {
        match out_readable.lock() {
            Ok(mut reader) => coral_streams::collect(&mut reader).await,
            Err(_) => Vec::new(),
        }
    });
    let err_task = tokio::spawn(async move {
        match err_readable.lock() {
            Ok(mut reader) => coral_streams::collect(&mut reader).await,
            Err(_) => Vec::new(),
        }
    });

    let io = ExecDefaults {
        stdin: StdinMode::Null,
        stdout: out_writable,
        stderr: err_writable,
    };
    let status = shell.execute_line_with(line, &io).await;
    drop(io);

    let stdout = String::from_utf8_lossy(&out_task.await.unwrap_or_default()).into_owned();
    let stderr = String::from_utf8_lossy(&err_task.await.unwrap_or_default()).into_owned();
    (status, stdout, stderr)
}

/// A minimal registry: enough command shapes to exercise pipelines,
/// redirections and exit-status plumbing without the real utility set.
struct TestResolver;

#[async_trait]
impl CommandResolver for TestResolver {
    fn contains(&self, name: &str) -> bool {
        matches!(name, "echo" | "cat" | "upper" | "fail" | "warn")
    }

    fn names(&self) -> Vec<String> {
        ["echo", "cat", "upper", "fail", "warn"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    async fn dispatch(&self, shell: &Shell, ctx: ExecContext) -> anyhow::Result<i32> {
        match ctx.argv[0].as_str() {
            "echo" => {
                if let Some(stdout) = &ctx.stdout {
                    let mut writer = stdout
                        .lock()
                        .map_err(|e| anyhow::anyhow!("stdout: {e}"))?;
                    let _ = writer.write_line(&ctx.argv[1..].join(" ")).await;
                }
                Ok(0)
            }
            "cat" => {
                let Some(stdout) = &ctx.stdout else {
                    return Ok(0);
                };
                let mut writer = stdout
                    .lock()
                    .map_err(|e| anyhow::anyhow!("stdout: {e}"))?;
                if ctx.argv.len() > 1 {
                    for arg in &ctx.argv[1..] {
                        let full = path::absolutize(&ctx.cwd, arg);
                        let bytes = shell.fs().read_file(&full).await?;
                        let _ = writer.write_all(&bytes).await;
                    }
                } else if let Some(stdin) = &ctx.stdin {
                    let mut reader = stdin
                        .lock()
                        .map_err(|e| anyhow::anyhow!("stdin: {e}"))?;
                    while let Some(chunk) = reader.read().await {
                        if writer.write(chunk).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(0)
            }
            "upper" => {
                let (Some(stdin), Some(stdout)) = (&ctx.stdin, &ctx.stdout) else {
                    return Ok(0);
                };
                let reader = stdin.lock().map_err(|e| anyhow::anyhow!("stdin: {e}"))?;
                let mut writer = stdout
                    .lock()
                    .map_err(|e| anyhow::anyhow!("stdout: {e}"))?;
                let mut lines = LineReader::new(reader);
                while let Some(line) = lines.next_line().await {
                    if writer.write_line(&line.to_uppercase()).await.is_err() {
                        break;
                    }
                }
                Ok(0)
            }
            "fail" => Ok(3),
            "warn" => {
                if let Some(stderr) = &ctx.stderr {
                    let mut writer = stderr
                        .lock()
                        .map_err(|e| anyhow::anyhow!("stderr: {e}"))?;
                    let _ = writer.write_line(&ctx.argv[1..].join(" ")).await;
                }
                Ok(0)
            }
            other => anyhow::bail!("unknown test command {other}"),
        }
    }
}
