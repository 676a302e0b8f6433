use crate::common::TestKernel;
use coral_kernel::KernelOptions;
use coral_proc::ProcessStatus;
use coral_vfs::Credentials;
use pretty_assertions::assert_eq;

#[tokio::test]
async fn default_boot_creates_the_base_system() {
    let tk = TestKernel::boot().await;
    let root = Credentials::root();
    let vfs = tk.kernel.vfs();

    for dir in ["/bin", "/etc", "/home", "/tmp", "/run", "/dev"] {
        assert!(vfs.exists(dir, &root).await, "{dir} missing");
    }

    // Device files answer through the mount.
    let devices = vfs.readdir("/dev", &root).await.expect("readdir /dev");
    for device in ["null", "zero", "random", "urandom", "tty"] {
        assert!(devices.contains(&device.to_string()), "{device} missing");
    }

    // The user database was persisted.
    let passwd = vfs
        .read_to_string("/etc/passwd", &root)
        .await
        .expect("passwd");
    assert!(passwd.contains("root:x:0:0:"));

    // The login shell runs as pid 1 with its pid file present.
    let shell_process = tk.kernel.processes().get(1).await.expect("pid 1");
    assert_eq!(shell_process.command(), "sh");
    assert_eq!(shell_process.status().await, ProcessStatus::Running);
    assert!(vfs.exists("/run/1", &root).await);
}

#[tokio::test]
async fn boot_seeds_the_shell_environment() {
    let mut tk = TestKernel::boot().await;
    let (status, stdout) = tk.run("env").await;
    assert_eq!(status, 0);
    assert!(stdout.contains("HOME=/root"));
    assert!(stdout.contains("USER=root"));
    assert!(stdout.contains("TERM=xterm-256color"));
    assert!(stdout.contains("EDITOR=edit"), "seeded from /etc/env");
    assert!(stdout.contains("PATH=/root/bin:/bin:"));
}

#[tokio::test]
async fn configured_boot_user_is_created_and_logged_in() {
    let mut tk = TestKernel::boot_with(KernelOptions {
        boot_user: "alice".to_string(),
        boot_password: "sesame".to_string(),
        hostname: "reef".to_string(),
        ..KernelOptions::default()
    })
    .await;

    let login = tk
        .kernel
        .users()
        .login("alice", "sesame")
        .await
        .expect("login");
    assert_eq!(login.user.home, "/home/alice");
    assert!(login.credentials.uid >= 1000);

    let (_, stdout) = tk.run("pwd").await;
    assert_eq!(stdout, "/home/alice\n");

    let prompt = tk.kernel.shell().prompt().await;
    assert!(prompt.contains("alice@reef"));
}

#[tokio::test]
async fn dev_null_and_dev_zero_behave() {
    let mut tk = TestKernel::boot().await;

    let (status, stdout) = tk.run("cat /dev/null").await;
    assert_eq!((status, stdout.as_str()), (0, ""));

    let (status, stdout) = tk.run("head -c 4 /dev/zero | wc -c").await;
    assert_eq!(status, 0);
    assert_eq!(stdout, "4\n");
}
