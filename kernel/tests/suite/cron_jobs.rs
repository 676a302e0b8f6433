use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use crate::common::TestKernel;
use coral_vfs::Credentials;
use pretty_assertions::assert_eq;

#[tokio::test]
async fn registered_job_fires_within_a_second_or_two() {
    let tk = TestKernel::boot().await;
    let counter = Arc::new(AtomicUsize::new(0));
    let cb_counter = Arc::clone(&counter);
    let callback: coral_cron::CronCallback = Arc::new(move || {
        let counter = Arc::clone(&cb_counter);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    });
    tk.kernel
        .scheduler()
        .set_cron("t", "* * * * * *", callback, None)
        .await
        .expect("set_cron");

    assert!(tk.kernel.scheduler().list_crons().await.contains(&"t".to_string()));
    tokio::time::sleep(std::time::Duration::from_millis(2100)).await;
    assert!(counter.load(Ordering::SeqCst) >= 1);

    assert!(tk.kernel.scheduler().clear_cron("t").await);
    assert!(!tk.kernel.scheduler().list_crons().await.contains(&"t".to_string()));
}

#[tokio::test]
async fn crontab_reload_registers_and_runs_commands() {
    let tk = TestKernel::boot().await;
    let root = Credentials::root();
    tk.kernel
        .vfs()
        .write_file(
            "/etc/crontab",
            b"# every second, through the shell\n* * * * * * touch /tmp/cron-ran\n",
            &root,
        )
        .await
        .expect("write crontab");

    let registered = tk.kernel.reload_crontabs().await.expect("reload");
    assert_eq!(registered, 1);
    assert_eq!(
        tk.kernel.scheduler().list_crons().await,
        vec!["cron:system:2"]
    );
    let entry = tk
        .kernel
        .scheduler()
        .get_cron("cron:system:2")
        .await
        .expect("entry");
    assert_eq!(entry.command.as_deref(), Some("touch /tmp/cron-ran"));

    tokio::time::sleep(std::time::Duration::from_millis(2300)).await;
    assert!(tk.kernel.vfs().exists("/tmp/cron-ran", &root).await);
}

#[tokio::test]
async fn user_crontab_is_read_from_home() {
    let tk = TestKernel::boot().await;
    let root = Credentials::root();
    tk.kernel
        .vfs()
        .mkdir("/root/.config", true, &root)
        .await
        .expect("mkdir");
    tk.kernel
        .vfs()
        .write_file("/root/.config/crontab", b"0 0 1 1 * echo yearly\n", &root)
        .await
        .expect("write");

    tk.kernel.reload_crontabs().await.expect("reload");
    let names = tk.kernel.scheduler().list_crons().await;
    assert_eq!(names, vec!["cron:user:1"]);
}
