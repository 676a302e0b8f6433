//! The command registry, the generic argument parser and the core utility
//! set. Commands are small adapters over the runtime's contracts: streams
//! in, exit code out.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod args;
mod command;
mod registry;
mod util;

pub use args::ArgError;
pub use args::OptSpec;
pub use args::ParsedArgs;
pub use command::Command;
pub use command::Invocation;
pub use command::Services;
pub use registry::CommandRegistry;
pub use registry::interrupt_status;
pub use util::standard_commands;

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use std::sync::Arc;

    use coral_proc::ProcessManager;
    use coral_shell::CommandResolver;
    use coral_shell::ExecContext;
    use coral_shell::Shell;
    use coral_shell::ShellConfig;
    use coral_shell::ShellOptions;
    use coral_socket::SocketService;
    use coral_term::Terminal;
    use coral_users::UserDb;
    use coral_vfs::Credentials;
    use coral_vfs::MemFs;
    use coral_vfs::Vfs;
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;

    use crate::CommandRegistry;
    use crate::Services;

    struct Fixture {
        shell: Shell,
        registry: Arc<CommandRegistry>,
        vfs: Vfs,
    }

    async fn fixture() -> Fixture {
        let vfs = Vfs::new();
        vfs.mount("/", Arc::new(MemFs::new())).await.expect("mount");
        let root = Credentials::root();
        for dir in ["/bin", "/etc", "/run", "/tmp", "/root"] {
            vfs.mkdir(dir, true, &root).await.expect("mkdir");
        }

        let manager = ProcessManager::new(vfs.clone());
        let terminal = Terminal::new();
        let users = UserDb::load(vfs.clone()).await.expect("users");
        let services = Services::new(
            manager.clone(),
            terminal.clone(),
            users,
            SocketService::new(),
        );
        let registry = Arc::new(CommandRegistry::standard(services));

        let shell = Shell::new(ShellOptions {
            vfs: vfs.clone(),
            manager,
            terminal,
            credentials: root,
            username: "root".to_string(),
            hostname: "coral".to_string(),
            home: "/root".to_string(),
            pid: 1,
            config: ShellConfig::default(),
            env_seed: Vec::new(),
        });
        shell.set_resolver(registry.clone()).await;
        Fixture {
            shell,
            registry,
            vfs,
        }
    }

    /// Dispatches argv directly through the registry with piped streams.
    async fn dispatch(
        fixture: &Fixture,
        argv: &[&str],
        stdin: Option<&str>,
    ) -> (i32, String, String) {
        let (out_writable, out_readable) = coral_streams::pipe();
        let (err_writable, err_readable) = coral_streams::pipe();
        let out_task = tokio::spawn(async move {
            let mut reader = out_readable.lock().expect("lock stdout");
            coral_streams::collect(&mut reader).await
        });
        let err_task = tokio::spawn(async move {
            let mut reader = err_readable.lock().expect("lock stderr");
            coral_streams::collect(&mut reader).await
        });

        let ctx = ExecContext {
            argv: argv.iter().map(|s| s.to_string()).collect(),
            env: IndexMap::from([(
                "PATH".to_string(),
                coral_shell::DEFAULT_PATH.to_string(),
            )]),
            cwd: "/".to_string(),
            stdin: stdin.map(coral_streams::ReadableStream::from_string),
            stdin_is_tty: false,
            stdout: Some(out_writable),
            stderr: Some(err_writable),
        };
        let status = fixture
            .registry
            .dispatch(&fixture.shell, ctx)
            .await
            .expect("dispatch");

        let stdout = String::from_utf8_lossy(&out_task.await.expect("join")).into_owned();
        let stderr = String::from_utf8_lossy(&err_task.await.expect("join")).into_owned();
        (status, stdout, stderr)
    }

    #[tokio::test]
    async fn echo_interprets_escapes() {
        let fixture = fixture().await;
        let (status, stdout, _) =
            dispatch(&fixture, &["echo", "alpha\\nbeta", "gamma"], None).await;
        assert_eq!(status, 0);
        assert_eq!(stdout, "alpha\nbeta gamma\n");

        let (_, stdout, _) = dispatch(&fixture, &["echo", "-n", "bare"], None).await;
        assert_eq!(stdout, "bare");
    }

    #[tokio::test]
    async fn cat_streams_files_and_stdin() {
        let fixture = fixture().await;
        let root = Credentials::root();
        fixture
            .vfs
            .write_file("/tmp/f", b"file bytes\n", &root)
            .await
            .expect("write");

        let (status, stdout, _) = dispatch(&fixture, &["cat", "/tmp/f"], None).await;
        assert_eq!((status, stdout.as_str()), (0, "file bytes\n"));

        let (status, stdout, _) = dispatch(&fixture, &["cat"], Some("from stdin")).await;
        assert_eq!((status, stdout.as_str()), (0, "from stdin"));

        let (status, _, stderr) = dispatch(&fixture, &["cat", "/missing"], None).await;
        assert_eq!(status, 1);
        assert!(stderr.contains("No such file or directory"));
    }

    #[tokio::test]
    async fn grep_exit_codes_follow_posix() {
        let fixture = fixture().await;
        let (status, stdout, _) = dispatch(
            &fixture,
            &["grep", "alpha"],
            Some("alpha\nbeta\nalpha gamma\n"),
        )
        .await;
        assert_eq!(status, 0);
        assert_eq!(stdout, "alpha\nalpha gamma\n");

        let (status, stdout, _) =
            dispatch(&fixture, &["grep", "zeta"], Some("alpha\n")).await;
        assert_eq!((status, stdout.as_str()), (1, ""));

        let (status, _, stderr) = dispatch(&fixture, &["grep", "[bad"], Some("")).await;
        assert_eq!(status, 2);
        assert!(stderr.contains("invalid pattern"));
    }

    #[tokio::test]
    async fn head_limits_lines_and_bytes() {
        let fixture = fixture().await;
        let (_, stdout, _) =
            dispatch(&fixture, &["head", "-n", "2"], Some("1\n2\n3\n4\n")).await;
        assert_eq!(stdout, "1\n2\n");

        let (_, stdout, _) =
            dispatch(&fixture, &["head", "-c", "5"], Some("abcdefgh")).await;
        assert_eq!(stdout, "abcde");
    }

    #[tokio::test]
    async fn tail_keeps_the_last_lines() {
        let fixture = fixture().await;
        let (_, stdout, _) =
            dispatch(&fixture, &["tail", "-n", "2"], Some("1\n2\n3\n4\n")).await;
        assert_eq!(stdout, "3\n4\n");
    }

    #[tokio::test]
    async fn wc_counts() {
        let fixture = fixture().await;
        let (_, stdout, _) =
            dispatch(&fixture, &["wc"], Some("one two\nthree\n")).await;
        assert_eq!(stdout, "2 3 14\n");
        let (_, stdout, _) =
            dispatch(&fixture, &["wc", "-l"], Some("one two\nthree\n")).await;
        assert_eq!(stdout, "2\n");
    }

    #[tokio::test]
    async fn diff_reports_changed_lines() {
        let fixture = fixture().await;
        let root = Credentials::root();
        fixture
            .vfs
            .write_file("/tmp/a", b"A\nB\nC\n", &root)
            .await
            .expect("write");
        fixture
            .vfs
            .write_file("/tmp/b", b"A\nX\nC\n", &root)
            .await
            .expect("write");

        let (status, stdout, _) =
            dispatch(&fixture, &["diff", "/tmp/a", "/tmp/b"], None).await;
        assert_eq!(status, 1);
        assert_eq!(stdout, "--- /tmp/a\n+++ /tmp/b\n  A\n- B\n+ X\n  C\n");

        let (status, stdout, _) =
            dispatch(&fixture, &["diff", "/tmp/a", "/tmp/a"], None).await;
        assert_eq!((status, stdout.as_str()), (0, ""));
    }

    #[tokio::test]
    async fn ls_lists_sorted_entries() {
        let fixture = fixture().await;
        let root = Credentials::root();
        fixture
            .vfs
            .write_file("/tmp/zz", b"", &root)
            .await
            .expect("write");
        fixture
            .vfs
            .write_file("/tmp/aa", b"", &root)
            .await
            .expect("write");

        let (status, stdout, _) = dispatch(&fixture, &["ls", "/tmp"], None).await;
        assert_eq!(status, 0);
        assert_eq!(stdout, "aa\nzz\n");
    }

    #[tokio::test]
    async fn mkdir_touch_rm_roundtrip() {
        let fixture = fixture().await;
        let root = Credentials::root();

        let (status, _, _) = dispatch(&fixture, &["mkdir", "-p", "/tmp/deep/nest"], None).await;
        assert_eq!(status, 0);
        assert!(fixture.vfs.exists("/tmp/deep/nest", &root).await);

        dispatch(&fixture, &["touch", "/tmp/deep/nest/file"], None).await;
        assert!(fixture.vfs.exists("/tmp/deep/nest/file", &root).await);

        let (status, _, _) = dispatch(&fixture, &["rm", "/tmp/deep"], None).await;
        assert_eq!(status, 1);

        let (status, _, _) = dispatch(&fixture, &["rm", "-r", "/tmp/deep"], None).await;
        assert_eq!(status, 0);
        assert!(!fixture.vfs.exists("/tmp/deep", &root).await);
    }

    #[tokio::test]
    async fn true_false_and_usage_errors() {
        let fixture = fixture().await;
        assert_eq!(dispatch(&fixture, &["true"], None).await.0, 0);
        assert_eq!(dispatch(&fixture, &["false"], None).await.0, 1);

        let (status, _, stderr) = dispatch(&fixture, &["ls", "--bogus"], None).await;
        assert_eq!(status, 2);
        assert!(stderr.contains("unknown option"));
    }

    #[tokio::test]
    async fn help_prints_usage_and_exits_zero() {
        let fixture = fixture().await;
        let (status, stdout, _) = dispatch(&fixture, &["grep", "--help"], None).await;
        assert_eq!(status, 0);
        assert!(stdout.starts_with("Usage: grep"));
        assert!(stdout.contains("--ignore-case"));
    }

    #[tokio::test]
    async fn user_add_roundtrips_through_login() {
        let fixture = fixture().await;
        let (status, _, _) =
            dispatch(&fixture, &["user", "add", "u", "-p", "p"], None).await;
        assert_eq!(status, 0);

        let services_users = UserDb::load(fixture.vfs.clone()).await.expect("reload");
        services_users.login("u", "p").await.expect("login");
        assert!(services_users.login("u", "wrong").await.is_err());

        let (status, stdout, _) = dispatch(&fixture, &["user", "list"], None).await;
        assert_eq!(status, 0);
        assert!(stdout.contains("u:1000:1000:/home/u:/bin/sh"));
    }

    #[tokio::test]
    async fn ps_shows_the_running_command() {
        let fixture = fixture().await;
        let (status, stdout, _) = dispatch(&fixture, &["ps"], None).await;
        assert_eq!(status, 0);
        assert!(stdout.contains("PID"));
        // ps itself is the one live process.
        assert!(stdout.contains("ps"));
    }

    #[tokio::test]
    async fn which_resolves_each_kind() {
        let fixture = fixture().await;
        let (status, stdout, _) =
            dispatch(&fixture, &["which", "cd", "grep"], None).await;
        assert_eq!(status, 0);
        assert_eq!(stdout, "cd: shell builtin\ngrep\n");

        let (status, _, _) = dispatch(&fixture, &["which", "no-such-thing"], None).await;
        assert_eq!(status, 1);
    }

    #[tokio::test]
    async fn process_exit_leaves_no_open_handles() {
        let fixture = fixture().await;
        let root = Credentials::root();
        fixture
            .vfs
            .write_file("/tmp/data", b"x\ny\n", &root)
            .await
            .expect("write");

        // grep opens the file through its process; after dispatch the
        // process has exited and its pid file is gone.
        let (status, _, _) = dispatch(&fixture, &["grep", "x", "/tmp/data"], None).await;
        assert_eq!(status, 0);
        let run_entries = fixture.vfs.readdir("/run", &root).await.expect("readdir");
        assert_eq!(run_entries, Vec::<String>::new());
    }
}
