//! End-to-end command-line scenarios through a booted kernel.

use crate::common::TestKernel;
use coral_vfs::Credentials;
use pretty_assertions::assert_eq;

#[tokio::test]
async fn pipe_into_grep() {
    let mut tk = TestKernel::boot().await;
    let (status, stdout) = tk
        .run(r#"echo "alpha\nbeta\nalpha gamma" | grep alpha"#)
        .await;
    assert_eq!(status, 0);
    assert_eq!(stdout, "alpha\nalpha gamma\n");
}

#[tokio::test]
async fn redirection_roundtrip() {
    let mut tk = TestKernel::boot().await;
    let (status, stdout) = tk.run("echo hi > /tmp/a && cat /tmp/a").await;
    assert_eq!(status, 0);
    assert_eq!(stdout, "hi\n");

    let contents = tk
        .kernel
        .vfs()
        .read_to_string("/tmp/a", &Credentials::root())
        .await
        .expect("read /tmp/a");
    assert_eq!(contents, "hi\n");
}

#[tokio::test]
async fn command_substitution() {
    let mut tk = TestKernel::boot().await;
    tk.kernel
        .vfs()
        .write_file("/tmp/name", b"world\n", &Credentials::root())
        .await
        .expect("write /tmp/name");

    let (status, stdout) = tk.run(r#"echo "hello $(cat /tmp/name)""#).await;
    assert_eq!(status, 0);
    assert_eq!(stdout, "hello world\n");
}

#[tokio::test]
async fn diff_marks_the_changed_line() {
    let mut tk = TestKernel::boot().await;
    tk.run("echo 'A\\nB\\nC' > /tmp/a").await;
    tk.run("echo 'A\\nX\\nC' > /tmp/b").await;

    let (status, stdout) = tk.run("cd /tmp && diff a b").await;
    assert_eq!(status, 1);
    assert_eq!(stdout, "--- a\n+++ b\n  A\n- B\n+ X\n  C\n");
}

#[tokio::test]
async fn glob_expansion_is_sorted_and_literal_on_miss() {
    let mut tk = TestKernel::boot().await;
    tk.run("mkdir /tmp/glob").await;
    tk.run("touch /tmp/glob/a.txt /tmp/glob/b.txt /tmp/glob/c.md")
        .await;

    let (status, stdout) = tk.run("cd /tmp/glob && echo *.txt").await;
    assert_eq!(status, 0);
    assert_eq!(stdout, "a.txt b.txt\n");

    let (_, stdout) = tk.run("echo *.rs").await;
    assert_eq!(stdout, "*.rs\n");
}

#[tokio::test]
async fn tilde_reaches_the_home_directory() {
    let mut tk = TestKernel::boot().await;
    let (status, _) = tk.run("echo data > ~/notes").await;
    assert_eq!(status, 0);
    let (status, stdout) = tk.run("cat /root/notes").await;
    assert_eq!(status, 0);
    assert_eq!(stdout, "data\n");

    assert_eq!(tk.kernel.shell().expand_tilde("~/x").await, "/root/x");
    assert_eq!(tk.kernel.shell().expand_tilde("no-tilde").await, "no-tilde");
}

#[tokio::test]
async fn exit_status_flows_through_chains() {
    let mut tk = TestKernel::boot().await;
    let (status, stdout) = tk.run("false && echo yes || echo no").await;
    assert_eq!(status, 0);
    assert_eq!(stdout, "no\n");

    let (_, stdout) = tk.run("false; echo $?").await;
    assert_eq!(stdout, "1\n");

    let (status, _) = tk.run("grep nothing /etc/passwd").await;
    assert_eq!(status, 1);
}

#[tokio::test]
async fn user_add_then_login_roundtrip() {
    let mut tk = TestKernel::boot().await;
    let (status, _) = tk.run("user add u -p p").await;
    assert_eq!(status, 0);

    tk.kernel.users().login("u", "p").await.expect("login u p");
    assert!(tk.kernel.users().login("u", "wrong").await.is_err());
}

#[tokio::test]
async fn stderr_redirect_and_merge() {
    let mut tk = TestKernel::boot().await;
    let (status, stdout) = tk.run("cat /missing 2> /tmp/err").await;
    assert_eq!(status, 1);
    assert_eq!(stdout, "");
    let err = tk
        .kernel
        .vfs()
        .read_to_string("/tmp/err", &Credentials::root())
        .await
        .expect("read");
    assert!(err.contains("No such file or directory"));

    // Merged onto stdout, the message is grep-able.
    let (status, stdout) = tk.run("cat /missing 2>&1 | grep -i 'no such'").await;
    assert_eq!(status, 0);
    assert!(stdout.contains("No such file or directory"));
}

#[tokio::test]
async fn scripts_on_path_run_with_arguments() {
    let mut tk = TestKernel::boot().await;
    tk.run("echo 'echo script got $1' > /bin/hello").await;
    tk.kernel
        .vfs()
        .chmod("/bin/hello", 0o755, &Credentials::root())
        .await
        .expect("chmod");

    let (status, stdout) = tk.run("hello world").await;
    assert_eq!(status, 0);
    assert_eq!(stdout, "script got world\n");
}

#[tokio::test]
async fn pipeline_preserves_byte_order_across_stages() {
    let mut tk = TestKernel::boot().await;
    tk.run("echo 'one\\ntwo\\nthree\\nfour\\nfive' > /tmp/lines")
        .await;
    let (status, stdout) = tk.run("cat /tmp/lines | head -n 4 | tail -n 2").await;
    assert_eq!(status, 0);
    assert_eq!(stdout, "three\nfour\n");
}
