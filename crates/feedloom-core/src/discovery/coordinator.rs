use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use super::crawler::{homepage_for, SiteCrawler};
use super::state::{DiscoveryKind, DiscoveryState};
use crate::config::DiscoveryConfig;
use crate::feed::{urls_match, Feed, FeedSource};
use crate::storage::{Database, FeedRepository};
use crate::{Error, Result};

struct DiscoveryStates {
    single: DiscoveryState,
    batch: DiscoveryState,
}

impl DiscoveryStates {
    fn get(&self, kind: DiscoveryKind) -> &DiscoveryState {
        match kind {
            DiscoveryKind::Single => &self.single,
            DiscoveryKind::Batch => &self.batch,
        }
    }

    fn get_mut(&mut self, kind: DiscoveryKind) -> &mut DiscoveryState {
        match kind {
            DiscoveryKind::Single => &mut self.single,
            DiscoveryKind::Batch => &mut self.batch,
        }
    }
}

/// Runs discovery in the background and exposes its state for polling.
///
/// At most one run per kind is active; both kinds share a single lock.
#[derive(Clone)]
pub struct DiscoveryCoordinator {
    db: Database,
    crawler: Arc<dyn SiteCrawler>,
    states: Arc<RwLock<DiscoveryStates>>,
    single_timeout: Duration,
    batch_timeout: Duration,
    concurrency: usize,
    shutdown: CancellationToken,
}

impl DiscoveryCoordinator {
    pub fn new(
        db: Database,
        crawler: Arc<dyn SiteCrawler>,
        config: &DiscoveryConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            db,
            crawler,
            states: Arc::new(RwLock::new(DiscoveryStates {
                single: DiscoveryState::idle(DiscoveryKind::Single),
                batch: DiscoveryState::idle(DiscoveryKind::Batch),
            })),
            single_timeout: config.single_timeout(),
            batch_timeout: config.batch_timeout(),
            concurrency: config.concurrency.max(1),
            shutdown,
        }
    }

    /// Override the run ceilings
    pub fn with_timeouts(mut self, single: Duration, batch: Duration) -> Self {
        self.single_timeout = single;
        self.batch_timeout = batch;
        self
    }

    /// Snapshot of one kind's state
    pub async fn state(&self, kind: DiscoveryKind) -> DiscoveryState {
        self.states.read().await.get(kind).clone()
    }

    /// Reset a finished run to idle. Returns false while it is running.
    pub async fn clear(&self, kind: DiscoveryKind) -> bool {
        let mut states = self.states.write().await;
        let state = states.get_mut(kind);
        if state.is_running() {
            return false;
        }
        *state = DiscoveryState::idle(kind);
        true
    }

    /// Start discovery from one feed's site.
    ///
    /// If a single run is already going, its state is returned unchanged.
    pub async fn start_single(&self, feed_id: Uuid) -> Result<DiscoveryState> {
        let feed = FeedRepository::new(&self.db)
            .find_by_id(feed_id)
            .await?
            .ok_or_else(|| Error::FeedNotFound(feed_id.to_string()))?;

        let homepage = homepage_for(&feed).ok_or_else(|| {
            Error::Validation(format!("Feed {} has no site to crawl", feed.display_name()))
        })?;

        let snapshot = {
            let mut states = self.states.write().await;
            let state = states.get_mut(DiscoveryKind::Single);
            if state.is_running() {
                return Ok(state.clone());
            }
            state.begin(1, Some(feed.id));
            state.clone()
        };

        tracing::info!("Starting discovery from {} ({})", feed.display_name(), homepage);

        let coordinator = self.clone();
        self.spawn_run(DiscoveryKind::Single, self.single_timeout, async move {
            coordinator.run_single(feed, homepage).await
        });

        Ok(snapshot)
    }

    /// Start discovery across every network feed not crawled before.
    ///
    /// If a batch run is already going, its state is returned unchanged.
    pub async fn start_batch(&self) -> Result<DiscoveryState> {
        let seeds: Vec<Feed> = FeedRepository::new(&self.db)
            .list_all()
            .await?
            .into_iter()
            .filter(|f| !f.discovery_completed && !f.source.is_script() && homepage_for(f).is_some())
            .collect();

        let snapshot = {
            let mut states = self.states.write().await;
            let state = states.get_mut(DiscoveryKind::Batch);
            if state.is_running() {
                return Ok(state.clone());
            }
            state.begin(seeds.len() as u32, None);
            state.clone()
        };

        tracing::info!("Starting library discovery over {} feeds", seeds.len());

        let coordinator = self.clone();
        self.spawn_run(DiscoveryKind::Batch, self.batch_timeout, async move {
            coordinator.run_batch(seeds).await
        });

        Ok(snapshot)
    }

    fn spawn_run<F>(&self, kind: DiscoveryKind, limit: Duration, run: F)
    where
        F: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let coordinator = self.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => Err(Error::Cancelled),
                result = tokio::time::timeout(limit, run) => match result {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout(format!(
                        "{} discovery did not finish within {}s",
                        kind,
                        limit.as_secs_f32()
                    ))),
                },
            };

            let mut states = coordinator.states.write().await;
            let state = states.get_mut(kind);
            match outcome {
                Ok(()) => {
                    tracing::info!("{} discovery finished with {} feeds", kind, state.feeds.len());
                    state.finish_ok();
                }
                Err(e) => {
                    tracing::warn!("{} discovery failed: {}", kind, e);
                    state.finish_err(e.to_string());
                }
            }
        });
    }

    async fn update(&self, kind: DiscoveryKind, f: impl FnOnce(&mut DiscoveryState)) {
        let mut states = self.states.write().await;
        f(states.get_mut(kind));
    }

    /// Feed URLs already subscribed; discovered feeds matching one are dropped
    async fn known_feed_urls(&self) -> Result<Vec<String>> {
        Ok(FeedRepository::new(&self.db)
            .list_all()
            .await?
            .into_iter()
            .filter_map(|f| match f.source {
                FeedSource::Url(url) => Some(url),
                FeedSource::Script(_) => None,
            })
            .collect())
    }

    async fn run_single(&self, feed: Feed, homepage: Url) -> Result<()> {
        let mut known = self.known_feed_urls().await?;

        self.update(DiscoveryKind::Single, |s| {
            s.set_stage("crawling", Some(homepage.to_string()))
        })
        .await;

        let candidates = self.crawler.find_candidate_sites(&homepage).await?;
        let count = candidates.len() as u32;

        self.update(DiscoveryKind::Single, |s| {
            s.grow_total(count);
            s.advance(1);
            s.set_stage("probing", Some(format!("{} candidate sites", count)));
        })
        .await;

        self.probe_candidates(DiscoveryKind::Single, feed.id, candidates, &mut known, true)
            .await;
        Ok(())
    }

    async fn run_batch(&self, seeds: Vec<Feed>) -> Result<()> {
        let mut known = self.known_feed_urls().await?;
        let feeds = FeedRepository::new(&self.db);

        for seed in seeds {
            let name = seed.display_name().to_string();
            self.update(DiscoveryKind::Batch, |s| s.set_stage("crawling", Some(name.clone())))
                .await;

            let outcome = match homepage_for(&seed) {
                Some(homepage) => self.crawler.find_candidate_sites(&homepage).await,
                None => Err(Error::Discovery(format!("{} has no site to crawl", name))),
            };

            match outcome {
                Ok(candidates) => {
                    self.probe_candidates(DiscoveryKind::Batch, seed.id, candidates, &mut known, false)
                        .await;
                    if let Err(e) = feeds.set_discovery_completed(seed.id, true).await {
                        tracing::warn!("Failed to mark {} as crawled: {}", name, e);
                    }
                    self.update(DiscoveryKind::Batch, |s| s.advance(1)).await;
                }
                Err(e) => {
                    tracing::warn!("Discovery from {} failed: {}", name, e);
                    let detail = format!("{}: {}", name, e);
                    self.update(DiscoveryKind::Batch, |s| {
                        s.advance(1);
                        s.set_stage("crawling", Some(detail));
                    })
                    .await;
                }
            }
        }

        Ok(())
    }

    /// Probe candidate sites with bounded concurrency, publishing each new feed as it is found
    async fn probe_candidates(
        &self,
        kind: DiscoveryKind,
        seed_id: Uuid,
        candidates: Vec<Url>,
        known: &mut Vec<String>,
        count_progress: bool,
    ) {
        let probes = stream::iter(candidates)
            .map(|site| {
                let crawler = Arc::clone(&self.crawler);
                async move {
                    let result = crawler.probe_site(&site).await;
                    (site, result)
                }
            })
            .buffer_unordered(self.concurrency);
        let mut probes = std::pin::pin!(probes);

        while let Some((site, result)) = probes.next().await {
            let found = match result {
                Ok(mut blog) if !known.iter().any(|u| urls_match(u, &blog.feed_url)) => {
                    known.push(blog.feed_url.clone());
                    blog.source_feed_id = Some(seed_id);
                    Some(blog)
                }
                Ok(blog) => {
                    tracing::debug!("Skipping known feed {}", blog.feed_url);
                    None
                }
                Err(e) => {
                    tracing::debug!("No feed on {}: {}", site, e);
                    None
                }
            };

            self.update(kind, |s| {
                if let Some(blog) = found {
                    s.push_feed(blog);
                }
                if count_progress {
                    s.advance(1);
                }
            })
            .await;
        }
    }
}
