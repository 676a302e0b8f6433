use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use chrono::Utc;
use coral_vfs::Credentials;
use coral_vfs::Vfs;
use coral_vfs::VfsError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;

use crate::CronExpression;
use crate::Result;
use crate::expr;

pub type CronCallback =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync>;

pub type CronErrorHandler = Arc<dyn Fn(anyhow::Error) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CronSource {
    System,
    User,
}

impl CronSource {
    fn as_str(&self) -> &'static str {
        match self {
            CronSource::System => "system",
            CronSource::User => "user",
        }
    }
}

/// What `get_cron`/`list_crons` report about a registered job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronEntry {
    pub name: String,
    pub expression: String,
    pub command: Option<String>,
    pub source: Option<CronSource>,
    pub line: Option<usize>,
}

struct Job {
    entry: CronEntry,
    expr: CronExpression,
    callback: CronCallback,
    error_handler: Option<CronErrorHandler>,
    /// Overlap guard: a firing is skipped while the previous one runs.
    running: Arc<AtomicBool>,
}

struct SchedulerInner {
    jobs: Mutex<HashMap<String, Arc<Job>>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

/// The interval scheduler: one ticker wakes every second, checks each
/// registered expression against the wall clock, and fires matching jobs.
/// A failing or panicking job never takes the ticker down.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                jobs: Mutex::new(HashMap::new()),
                ticker: Mutex::new(None),
            }),
        }
    }

    /// Registers (or replaces) a named job.
    pub async fn set_cron(
        &self,
        name: &str,
        expression: &str,
        callback: CronCallback,
        error_handler: Option<CronErrorHandler>,
    ) -> Result<()> {
        let expr = CronExpression::parse(expression)?;
        let job = Arc::new(Job {
            entry: CronEntry {
                name: name.to_string(),
                expression: expression.to_string(),
                command: None,
                source: None,
                line: None,
            },
            expr,
            callback,
            error_handler,
            running: Arc::new(AtomicBool::new(false)),
        });
        self.inner.jobs.lock().await.insert(name.to_string(), job);
        Ok(())
    }

    pub async fn clear_cron(&self, name: &str) -> bool {
        self.inner.jobs.lock().await.remove(name).is_some()
    }

    /// Registered job names, sorted.
    pub async fn list_crons(&self) -> Vec<String> {
        let jobs = self.inner.jobs.lock().await;
        let mut names: Vec<String> = jobs.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn get_cron(&self, name: &str) -> Option<CronEntry> {
        self.inner.jobs.lock().await.get(name).map(|j| j.entry.clone())
    }

    pub async fn clear_all(&self) {
        self.inner.jobs.lock().await.clear();
    }

    /// Starts the one-second ticker. Idempotent.
    pub async fn start(&self) {
        let mut ticker = self.inner.ticker.lock().await;
        if ticker.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let now = Utc::now();
                let due: Vec<Arc<Job>> = {
                    let jobs = inner.jobs.lock().await;
                    jobs.values()
                        .filter(|job| job.expr.matches(now))
                        .cloned()
                        .collect()
                };
                for job in due {
                    if job.running.swap(true, Ordering::AcqRel) {
                        debug!("cron job {} still running, skipping tick", job.entry.name);
                        continue;
                    }
                    let running = Arc::clone(&job.running);
                    let callback = Arc::clone(&job.callback);
                    let name = job.entry.name.clone();
                    let error_handler = job.error_handler.clone();
                    tokio::spawn(async move {
                        if let Err(err) = callback().await {
                            match error_handler {
                                Some(handler) => handler(err),
                                None => error!("cron job {name}: {err}"),
                            }
                        }
                        running.store(false, Ordering::Release);
                    });
                }
            }
        }));
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.inner.ticker.lock().await.take() {
            handle.abort();
        }
    }

    /// Clears every registered job and re-reads `/etc/crontab` plus the
    /// user crontab. `make_callback` turns each `(source, command)` pair
    /// into the job body; the kernel hands the command line to a shell.
    pub async fn reload<F>(
        &self,
        vfs: &Vfs,
        user_home: Option<&str>,
        mut make_callback: F,
    ) -> Result<usize>
    where
        F: FnMut(CronSource, &str) -> CronCallback,
    {
        self.clear_all().await;
        let mut registered = 0;
        registered += self
            .load_crontab(vfs, "/etc/crontab", CronSource::System, &mut make_callback)
            .await?;
        if let Some(home) = user_home {
            let path = format!("{home}/.config/crontab");
            registered += self
                .load_crontab(vfs, &path, CronSource::User, &mut make_callback)
                .await?;
        }
        Ok(registered)
    }

    async fn load_crontab<F>(
        &self,
        vfs: &Vfs,
        path: &str,
        source: CronSource,
        make_callback: &mut F,
    ) -> Result<usize>
    where
        F: FnMut(CronSource, &str) -> CronCallback,
    {
        let root = Credentials::root();
        let content = match vfs.read_to_string(path, &root).await {
            Ok(content) => content,
            Err(VfsError::NotFound) => return Ok(0),
            Err(err) => {
                error!("reading {path}: {err}");
                return Ok(0);
            }
        };

        let mut registered = 0;
        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (expr, command) = match expr::parse_line(line) {
                Ok(parsed) => parsed,
                Err(err) => {
                    error!("{path}:{}: {err}", idx + 1);
                    continue;
                }
            };
            let name = format!("cron:{}:{}", source.as_str(), idx + 1);
            let job = Arc::new(Job {
                entry: CronEntry {
                    name: name.clone(),
                    expression: line
                        .split_whitespace()
                        .take(expr.fields)
                        .collect::<Vec<_>>()
                        .join(" "),
                    command: Some(command.clone()),
                    source: Some(source),
                    line: Some(idx + 1),
                },
                expr,
                callback: make_callback(source, &command),
                error_handler: None,
                running: Arc::new(AtomicBool::new(false)),
            });
            self.inner.jobs.lock().await.insert(name, job);
            registered += 1;
        }
        Ok(registered)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use coral_vfs::MemFs;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    fn counting_callback(counter: Arc<AtomicUsize>) -> CronCallback {
        Arc::new(move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn registry_roundtrip() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .set_cron("t", "* * * * * *", counting_callback(counter), None)
            .await
            .expect("set");

        assert_eq!(scheduler.list_crons().await, vec!["t"]);
        let entry = scheduler.get_cron("t").await.expect("get");
        assert_eq!(entry.expression, "* * * * * *");

        assert!(scheduler.clear_cron("t").await);
        assert!(!scheduler.clear_cron("t").await);
        assert_eq!(scheduler.list_crons().await, Vec::<String>::new());
    }

    #[tokio::test]
    async fn bad_expression_is_rejected_up_front() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        assert!(
            scheduler
                .set_cron("bad", "not a cron line", counting_callback(counter), None)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn every_second_job_fires() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .set_cron("tick", "* * * * * *", counting_callback(Arc::clone(&counter)), None)
            .await
            .expect("set");
        scheduler.start().await;

        tokio::time::sleep(std::time::Duration::from_millis(2100)).await;
        scheduler.stop().await;
        assert!(counter.load(Ordering::SeqCst) >= 1);
        assert_eq!(scheduler.list_crons().await, vec!["tick"]);
    }

    #[tokio::test]
    async fn callback_errors_reach_the_handler_not_the_ticker() {
        let scheduler = Scheduler::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let handler_seen = Arc::clone(&seen);
        let handler: CronErrorHandler = Arc::new(move |_err| {
            handler_seen.fetch_add(1, Ordering::SeqCst);
        });
        let failing: CronCallback =
            Arc::new(|| Box::pin(async { anyhow::bail!("job exploded") }));
        scheduler
            .set_cron("failing", "* * * * * *", failing, Some(handler))
            .await
            .expect("set");
        scheduler.start().await;
        tokio::time::sleep(std::time::Duration::from_millis(2100)).await;
        scheduler.stop().await;
        assert!(seen.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn reload_reads_system_and_user_tables() {
        let vfs = Vfs::new();
        vfs.mount("/", Arc::new(MemFs::new())).await.expect("mount");
        let root = Credentials::root();
        vfs.mkdir("/etc", false, &root).await.expect("mkdir");
        vfs.mkdir("/home/d/.config", true, &root).await.expect("mkdir");
        vfs.write_file(
            "/etc/crontab",
            b"# system jobs\n*/5 * * * * echo five\nbroken line here\n",
            &root,
        )
        .await
        .expect("write");
        vfs.write_file(
            "/home/d/.config/crontab",
            b"0 0 12 * * 1 echo weekly\n",
            &root,
        )
        .await
        .expect("write");

        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let registered = scheduler
            .reload(&vfs, Some("/home/d"), |_source, _command| {
                counting_callback(Arc::clone(&counter))
            })
            .await
            .expect("reload");

        assert_eq!(registered, 2);
        assert_eq!(
            scheduler.list_crons().await,
            vec!["cron:system:2", "cron:user:1"]
        );
        let entry = scheduler.get_cron("cron:user:1").await.expect("get");
        assert_eq!(entry.command.as_deref(), Some("echo weekly"));
        assert_eq!(entry.source, Some(CronSource::User));
        assert_eq!(entry.expression, "0 0 12 * * 1");

        // Reload replaces everything.
        scheduler
            .reload(&vfs, None, |_s, _c| counting_callback(Arc::clone(&counter)))
            .await
            .expect("reload");
        assert_eq!(scheduler.list_crons().await, vec!["cron:system:2"]);
    }
}
