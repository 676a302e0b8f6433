use crate::common::TestKernel;
use coral_vfs::Credentials;
use pretty_assertions::assert_eq;

/// Interrupting a device-fed pipeline: the foreground command unwinds with
/// 130 and every process it spawned is reaped, pid files included.
#[tokio::test]
async fn interrupt_stops_an_endless_pipeline() {
    let mut tk = TestKernel::boot().await;
    let shell = tk.kernel.shell().clone();
    let task =
        tokio::spawn(async move { shell.execute_detached("cat /dev/zero > /dev/null").await });

    // Let the pipeline spin up, then deliver ^C.
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    tk.kernel.terminal().interrupt();

    let status = tokio::time::timeout(std::time::Duration::from_secs(5), task)
        .await
        .expect("interrupt was not honored")
        .expect("join");
    assert_eq!(status, 130);

    // Only the login shell remains; its pid file is the only one left.
    let processes = tk.kernel.processes().list().await;
    assert_eq!(processes.len(), 1);
    assert_eq!(processes[0].pid(), 1);
    let run_entries = tk
        .kernel
        .vfs()
        .readdir("/run", &Credentials::root())
        .await
        .expect("readdir /run");
    assert_eq!(run_entries, vec!["1"]);
    let _ = tk.drain();
}

#[tokio::test]
async fn interrupt_wakes_a_sleeping_command() {
    let mut tk = TestKernel::boot().await;
    let shell = tk.kernel.shell().clone();
    let task = tokio::spawn(async move { shell.execute_detached("sleep 60").await });

    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    tk.kernel.terminal().interrupt();

    let status = tokio::time::timeout(std::time::Duration::from_secs(5), task)
        .await
        .expect("interrupt was not honored")
        .expect("join");
    assert_eq!(status, 130);
    let _ = tk.drain();
}

#[tokio::test]
async fn kill_reaps_a_backgrounded_sleep() {
    let mut tk = TestKernel::boot().await;
    let (status, _) = tk.run("sleep 300 &").await;
    assert_eq!(status, 0);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    // Find the sleeper and kill it.
    let sleeper = tk
        .kernel
        .processes()
        .list()
        .await
        .into_iter()
        .find(|p| p.command() == "sleep")
        .expect("sleep process");
    let (status, _) = tk.run(&format!("kill {}", sleeper.pid())).await;
    assert_eq!(status, 0);

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(tk.kernel.processes().get(sleeper.pid()).await.is_none());
}
