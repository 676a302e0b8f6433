use std::sync::Arc;

use anyhow::Context;
use coral_commands::CommandRegistry;
use coral_commands::Services;
use coral_cron::Scheduler;
use coral_proc::ProcessManager;
use coral_proc::ProcessOptions;
use coral_shell::Shell;
use coral_shell::ShellConfig;
use coral_shell::ShellOptions;
use coral_socket::SocketService;
use coral_term::Terminal;
use coral_users::User;
use coral_users::UserDb;
use coral_vfs::Credentials;
use coral_vfs::DevFs;
use coral_vfs::MemFs;
use coral_vfs::Vfs;
use coral_vfs::VfsError;
use coral_vfs::sysfiles;
use tracing::info;

use crate::KernelOptions;
use crate::tty::TtyDevice;

const BASE_DIRECTORIES: &[&str] = &[
    "/bin", "/dev", "/etc", "/home", "/proc", "/root", "/run", "/tmp", "/usr/bin", "/var",
];

const DEFAULT_ETC_ENV: &str = "TERM=xterm-256color\nEDITOR=edit\n";

struct KernelInner {
    options: KernelOptions,
    vfs: Vfs,
    terminal: Terminal,
    manager: ProcessManager,
    users: UserDb,
    scheduler: Scheduler,
    sockets: SocketService,
    registry: Arc<CommandRegistry>,
    shell: Shell,
}

/// The façade that wires every service together and owns them for the
/// session's lifetime.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

impl Kernel {
    /// Boots a kernel: mounts the filesystems, seeds `/etc`, loads the user
    /// database, authenticates the boot credentials, builds the login
    /// shell (pid 1), registers the command set and starts the scheduler.
    /// Boot failures are fatal.
    pub async fn boot(options: KernelOptions) -> anyhow::Result<Kernel> {
        let root = Credentials::root();

        let vfs = Vfs::new();
        vfs.mount("/", Arc::new(MemFs::new()))
            .await
            .context("mounting root filesystem")?;
        for dir in BASE_DIRECTORIES {
            vfs.mkdir(dir, true, &root)
                .await
                .with_context(|| format!("creating {dir}"))?;
        }
        vfs.chmod("/tmp", 0o777, &root).await.context("opening /tmp")?;

        let terminal = Terminal::new();
        terminal
            .resize(options.terminal_cols, options.terminal_rows)
            .await;

        let devfs = DevFs::with_standard_devices().await;
        devfs
            .register("tty", Arc::new(TtyDevice::new(terminal.clone())))
            .await;
        vfs.mount("/dev", Arc::new(devfs))
            .await
            .context("mounting /dev")?;

        if !vfs.exists("/etc/env", &root).await {
            vfs.write_file("/etc/env", DEFAULT_ETC_ENV.as_bytes(), &root)
                .await
                .context("seeding /etc/env")?;
        }

        let users = UserDb::load(vfs.clone()).await.context("loading users")?;
        Self::ensure_boot_accounts(&vfs, &users, &options).await?;
        let login = users
            .login(&options.boot_user, &options.boot_password)
            .await
            .context("authenticating boot credentials")?;
        info!(user = %login.user.username, "boot login ok");

        let manager = ProcessManager::new(vfs.clone());

        // The login shell is pid 1: a kept-alive process whose streams are
        // the terminal's.
        let shell_process = manager
            .create(ProcessOptions {
                command: "sh".to_string(),
                args: Vec::new(),
                cwd: login.user.home.clone(),
                uid: login.credentials.uid,
                gid: login.credentials.gid,
                parent: None,
                // The repl drives the terminal's line discipline directly;
                // holding a byte subscription here would only buffer input
                // nobody drains.
                stdin: None,
                stdin_is_tty: true,
                stdout: Some(terminal.writer()),
                stderr: Some(terminal.writer()),
                entry: Box::new(|params| {
                    Box::pin(async move {
                        params.process.keep_alive();
                        Ok(0)
                    })
                }),
            })
            .await;
        let shell_pid = shell_process.pid();
        manager
            .start(&shell_process)
            .await
            .context("starting the login shell process")?;

        let shell_config = Self::load_shell_config(&vfs, &login.user).await;
        let env_seed = match vfs.read_to_string("/etc/env", &root).await {
            Ok(content) => sysfiles::parse_env_file(&content),
            Err(_) => Vec::new(),
        };
        let shell = Shell::new(ShellOptions {
            vfs: vfs.clone(),
            manager: manager.clone(),
            terminal: terminal.clone(),
            credentials: login.credentials.clone(),
            username: login.user.username.clone(),
            hostname: options.hostname.clone(),
            home: login.user.home.clone(),
            pid: shell_pid,
            config: shell_config,
            env_seed,
        });

        let services = Services::new(
            manager.clone(),
            terminal.clone(),
            users.clone(),
            SocketService::new(),
        );
        let sockets = services.sockets.clone();
        let registry = Arc::new(CommandRegistry::standard(services));
        shell.set_resolver(registry.clone()).await;

        let scheduler = Scheduler::new();
        let kernel = Kernel {
            inner: Arc::new(KernelInner {
                options,
                vfs,
                terminal,
                manager,
                users,
                scheduler,
                sockets,
                registry,
                shell,
            }),
        };
        kernel.reload_crontabs().await?;
        kernel.inner.scheduler.start().await;
        info!("boot complete");
        Ok(kernel)
    }

    async fn ensure_boot_accounts(
        vfs: &Vfs,
        users: &UserDb,
        options: &KernelOptions,
    ) -> anyhow::Result<()> {
        let root = Credentials::root();
        if users.get("root").await.is_none() {
            users
                .add(User::new("root", 0, 0).with_password(&options.boot_password))
                .await
                .context("creating the root account")?;
        }
        if users.get(&options.boot_user).await.is_none() {
            let uid = users.next_uid().await;
            let user = User::new(&options.boot_user, uid, uid)
                .with_password(&options.boot_password);
            let home = user.home.clone();
            users
                .add(user)
                .await
                .with_context(|| format!("creating the {} account", options.boot_user))?;
            match vfs.mkdir(&home, true, &root).await {
                Ok(()) | Err(VfsError::AlreadyExists) => {}
                Err(err) => return Err(err).with_context(|| format!("creating {home}")),
            }
            vfs.chown(&home, uid, uid, &root).await?;
        }
        Ok(())
    }

    async fn load_shell_config(vfs: &Vfs, user: &User) -> ShellConfig {
        let root = Credentials::root();
        let path = format!("{}/.config/shell.toml", user.home);
        match vfs.read_to_string(&path, &root).await {
            Ok(content) => ShellConfig::parse(&content),
            Err(_) => ShellConfig::default(),
        }
    }

    /// Clears the scheduler and re-reads `/etc/crontab` plus the boot
    /// user's `~/.config/crontab`; each entry runs its command line through
    /// the login shell, detached from the terminal's stdin.
    pub async fn reload_crontabs(&self) -> anyhow::Result<usize> {
        let shell = self.inner.shell.clone();
        let home = self.inner.shell.home().to_string();
        let registered = self
            .inner
            .scheduler
            .reload(&self.inner.vfs, Some(&home), move |_source, command| {
                let shell = shell.clone();
                let command = command.to_string();
                let callback: coral_cron::CronCallback = Arc::new(move || {
                    let shell = shell.clone();
                    let command = command.clone();
                    Box::pin(async move {
                        let status = shell.execute_detached(&command).await;
                        if status != 0 {
                            anyhow::bail!("exited with status {status}");
                        }
                        Ok(())
                    })
                });
                callback
            })
            .await?;
        Ok(registered)
    }

    /// Runs the interactive shell loop until the session ends, then stops
    /// the scheduler. The host must be pumping the terminal by now.
    pub async fn run(&self) -> i32 {
        let status = self.inner.shell.repl().await;
        self.inner.scheduler.stop().await;
        status
    }

    pub fn options(&self) -> &KernelOptions {
        &self.inner.options
    }

    pub fn vfs(&self) -> &Vfs {
        &self.inner.vfs
    }

    pub fn terminal(&self) -> &Terminal {
        &self.inner.terminal
    }

    pub fn processes(&self) -> &ProcessManager {
        &self.inner.manager
    }

    pub fn users(&self) -> &UserDb {
        &self.inner.users
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub fn sockets(&self) -> &SocketService {
        &self.inner.sockets
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.inner.registry
    }

    pub fn shell(&self) -> &Shell {
        &self.inner.shell
    }
}
