use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::feed::RefreshReport;
use crate::Result;

/// How often a disabled scheduler looks at the interval setting again
pub const DISABLED_RECHECK: Duration = Duration::from_secs(60);

/// Events emitted by the scheduler for whoever is listening (daemon log, UI)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A full refresh pass finished
    FeedsRefreshed {
        succeeded: usize,
        failed: usize,
        new_articles: u32,
    },
    /// Articles have been cleaned up
    ArticlesCleaned { deleted: u32 },
    /// An error occurred during a background task
    Error { task: String, message: String },
}

/// The work the scheduler drives
#[async_trait]
pub trait ScheduledJobs: Send + Sync + 'static {
    /// Current refresh cadence; zero disables refreshing
    async fn refresh_interval(&self) -> Result<Duration>;

    async fn refresh(&self, cancel: &CancellationToken) -> Result<RefreshReport>;

    /// Run cleanup if enabled. `None` means it was skipped.
    async fn cleanup(&self) -> Result<Option<u32>>;
}

/// Background loop that refreshes all feeds on an interval
pub struct SchedulerService {
    jobs: Arc<dyn ScheduledJobs>,
    event_tx: Option<mpsc::UnboundedSender<SchedulerEvent>>,
}

/// Owned handle to a running scheduler
pub struct SchedulerHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the loop and wait for it to exit
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            warn!("Scheduler task ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl SchedulerService {
    pub fn new(jobs: Arc<dyn ScheduledJobs>) -> Self {
        Self {
            jobs,
            event_tx: None,
        }
    }

    /// Set the event sender for notifications
    pub fn with_event_sender(mut self, tx: mpsc::UnboundedSender<SchedulerEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Spawn the loop. It stops when `parent` or the handle is cancelled.
    pub fn start(self, parent: &CancellationToken) -> SchedulerHandle {
        let shutdown = parent.child_token();
        let task = tokio::spawn(self.run(shutdown.clone()));
        SchedulerHandle { shutdown, task }
    }

    fn send_event(&self, event: SchedulerEvent) {
        send_event(&self.event_tx, event);
    }

    /// Run until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Scheduler started");

        loop {
            // Read every cycle so a changed interval applies to the next wait
            let interval = match self.jobs.refresh_interval().await {
                Ok(interval) => interval,
                Err(e) => {
                    warn!("Failed to read refresh interval: {}", e);
                    self.send_event(SchedulerEvent::Error {
                        task: "settings".to_string(),
                        message: e.to_string(),
                    });
                    Duration::ZERO
                }
            };

            let enabled = !interval.is_zero();
            let wait = if enabled { interval } else { DISABLED_RECHECK };
            if enabled {
                debug!("Next refresh in {}s", wait.as_secs());
            } else {
                debug!("Automatic refresh disabled, checking again in {}s", wait.as_secs());
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            if enabled {
                self.refresh_cycle(&shutdown).await;
            }

            if shutdown.is_cancelled() {
                break;
            }
        }

        info!("Scheduler stopped");
    }

    async fn refresh_cycle(&self, shutdown: &CancellationToken) {
        debug!("Running scheduled feed refresh");

        match self.jobs.refresh(&shutdown.child_token()).await {
            Ok(report) => {
                if report.new_articles() > 0 {
                    info!("Scheduled refresh: {} new articles", report.new_articles());
                }
                self.send_event(SchedulerEvent::FeedsRefreshed {
                    succeeded: report.succeeded(),
                    failed: report.failed(),
                    new_articles: report.new_articles(),
                });
            }
            Err(e) => {
                error!("Scheduled refresh failed: {}", e);
                self.send_event(SchedulerEvent::Error {
                    task: "refresh".to_string(),
                    message: e.to_string(),
                });
            }
        }

        if shutdown.is_cancelled() {
            return;
        }

        let jobs = Arc::clone(&self.jobs);
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            match jobs.cleanup().await {
                Ok(Some(deleted)) => {
                    send_event(&event_tx, SchedulerEvent::ArticlesCleaned { deleted });
                }
                Ok(None) => debug!("Article cleanup disabled"),
                Err(e) => {
                    error!("Article cleanup failed: {}", e);
                    send_event(
                        &event_tx,
                        SchedulerEvent::Error {
                            task: "cleanup".to_string(),
                            message: e.to_string(),
                        },
                    );
                }
            }
        });
    }
}

fn send_event(tx: &Option<mpsc::UnboundedSender<SchedulerEvent>>, event: SchedulerEvent) {
    if let Some(tx) = tx {
        if tx.send(event).is_err() {
            warn!("Failed to send scheduler event: receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    struct MockJobs {
        interval_secs: AtomicU64,
        runs: Mutex<Vec<Instant>>,
        cleaned: Option<u32>,
    }

    impl MockJobs {
        fn new(interval_secs: u64) -> Arc<Self> {
            Arc::new(Self {
                interval_secs: AtomicU64::new(interval_secs),
                runs: Mutex::new(Vec::new()),
                cleaned: None,
            })
        }

        fn set_interval(&self, secs: u64) {
            self.interval_secs.store(secs, Ordering::SeqCst);
        }

        fn run_offsets(&self, start: Instant) -> Vec<u64> {
            self.runs
                .lock()
                .unwrap()
                .iter()
                .map(|t| t.duration_since(start).as_secs())
                .collect()
        }
    }

    #[async_trait]
    impl ScheduledJobs for MockJobs {
        async fn refresh_interval(&self) -> Result<Duration> {
            Ok(Duration::from_secs(self.interval_secs.load(Ordering::SeqCst)))
        }

        async fn refresh(&self, _cancel: &CancellationToken) -> Result<RefreshReport> {
            self.runs.lock().unwrap().push(Instant::now());
            Ok(RefreshReport::default())
        }

        async fn cleanup(&self) -> Result<Option<u32>> {
            Ok(self.cleaned)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_change_applies_on_next_cycle() {
        let jobs = MockJobs::new(100);
        let start = Instant::now();
        let handle = SchedulerService::new(jobs.clone()).start(&CancellationToken::new());

        tokio::time::sleep(Duration::from_secs(50)).await;
        jobs.set_interval(10);
        tokio::time::sleep(Duration::from_secs(65)).await;

        // The wait already in progress keeps its 100s; the next one uses 10s
        assert_eq!(jobs.run_offsets(start), vec![100, 110]);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_exits_without_final_refresh() {
        let jobs = MockJobs::new(100);
        let parent = CancellationToken::new();
        let handle = SchedulerService::new(jobs.clone()).start(&parent);

        tokio::time::sleep(Duration::from_secs(50)).await;
        parent.cancel();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(handle.is_finished());
        assert!(jobs.runs.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_disables_until_changed() {
        let jobs = MockJobs::new(0);
        let start = Instant::now();
        let handle = SchedulerService::new(jobs.clone()).start(&CancellationToken::new());

        tokio::time::sleep(Duration::from_secs(200)).await;
        assert!(jobs.runs.lock().unwrap().is_empty());

        jobs.set_interval(10);
        tokio::time::sleep(Duration::from_secs(55)).await;

        // Picked up at the 240s re-check, first run 10s later
        assert_eq!(jobs.run_offsets(start), vec![250]);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_after_refresh_and_cleanup() {
        let jobs = Arc::new(MockJobs {
            interval_secs: AtomicU64::new(30),
            runs: Mutex::new(Vec::new()),
            cleaned: Some(3),
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = SchedulerService::new(jobs)
            .with_event_sender(tx)
            .start(&CancellationToken::new());

        let first = rx.recv().await.unwrap();
        assert_eq!(
            first,
            SchedulerEvent::FeedsRefreshed {
                succeeded: 0,
                failed: 0,
                new_articles: 0
            }
        );
        assert_eq!(rx.recv().await.unwrap(), SchedulerEvent::ArticlesCleaned { deleted: 3 });
        handle.shutdown().await;
    }
}
