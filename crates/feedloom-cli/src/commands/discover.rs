use std::future::Future;
use std::time::Duration;

use anyhow::{bail, Result};
use uuid::Uuid;

use feedloom_core::discovery::{DiscoveryKind, DiscoveryState, DiscoveryStatus};
use feedloom_core::feed::Feed;
use feedloom_core::ipc::{is_daemon_running, DaemonClient};
use feedloom_core::{AppConfig, Engine};

use super::find_feed;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Run discovery in the daemon if one is up, otherwise in this process
pub async fn run(config: AppConfig, feed: Option<&str>, all: bool, subscribe: bool) -> Result<()> {
    let socket_path = config.socket_path();

    if is_daemon_running(&socket_path).await {
        let client = DaemonClient::new(socket_path);
        let (kind, seed) = target(&client.list_feeds().await?, feed, all)?;

        let started = client.start_discovery(kind, seed).await?;
        announce(&started);
        let client_ref = &client;
        let state = poll(move || client_ref.discovery_state(kind)).await?;
        report(&state);

        if subscribe {
            for blog in &state.feeds {
                match client.add_feed(&blog.feed_url, "", &blog.name).await {
                    Ok(_) => println!("Subscribed: {}", blog.name),
                    Err(e) => println!("Skipped {}: {}", blog.feed_url, e),
                }
            }
        }
        return Ok(());
    }

    let engine = Engine::open(config).await?;
    let result = run_local(&engine, feed, all, subscribe).await;
    engine.shutdown().await;
    result
}

async fn run_local(engine: &Engine, feed: Option<&str>, all: bool, subscribe: bool) -> Result<()> {
    let (kind, seed) = target(&engine.list_feeds().await?, feed, all)?;
    let discovery = engine.discovery();

    let started = match seed {
        Some(id) => discovery.start_single(id).await?,
        None => discovery.start_batch().await?,
    };
    announce(&started);
    let state = poll(move || async move { Ok(discovery.state(kind).await) }).await?;
    report(&state);

    if subscribe {
        for blog in &state.feeds {
            match engine.subscriptions().add_subscription(&blog.feed_url, "", &blog.name).await {
                Ok(_) => println!("Subscribed: {}", blog.name),
                Err(e) => println!("Skipped {}: {}", blog.feed_url, e),
            }
        }
        engine.subscriptions().wait_for_initial_fetches().await;
    }

    Ok(())
}

fn target(feeds: &[Feed], feed: Option<&str>, all: bool) -> Result<(DiscoveryKind, Option<Uuid>)> {
    match (feed, all) {
        (_, true) => Ok((DiscoveryKind::Batch, None)),
        (Some(query), false) => Ok((DiscoveryKind::Single, Some(find_feed(feeds, query)?.id))),
        (None, false) => bail!("Pass a feed to crawl from, or --all"),
    }
}

fn announce(state: &DiscoveryState) {
    match state.seed_feed_id {
        Some(id) => println!("Discovering from feed {} ...", id),
        None => println!("Discovering across {} feeds ...", state.progress.total),
    }
}

/// Poll until the run stops, printing progress as it moves
async fn poll<F, Fut>(mut fetch: F) -> Result<DiscoveryState>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = feedloom_core::Result<DiscoveryState>>,
{
    let mut last = None;
    loop {
        let state = fetch().await?;
        let shown = (state.progress.current, state.progress.total, state.feeds.len());
        if last != Some(shown) {
            println!(
                "  [{}/{}] {} ({} found)",
                state.progress.current,
                state.progress.total,
                state.progress.detail.as_deref().unwrap_or(&state.progress.stage),
                state.feeds.len()
            );
            last = Some(shown);
        }
        if !state.running {
            return Ok(state);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn report(state: &DiscoveryState) {
    if state.status == DiscoveryStatus::Errored {
        println!(
            "\nDiscovery stopped: {}",
            state.error.as_deref().unwrap_or("unknown error")
        );
    }

    if state.feeds.is_empty() {
        println!("\nNo new feeds found.");
        return;
    }

    println!("\nFound {} feeds:\n", state.feeds.len());
    for blog in &state.feeds {
        println!("  {}", blog.name);
        println!("    Site: {}", blog.homepage);
        println!("    Feed: {}", blog.feed_url);
        if let Some(description) = &blog.description {
            println!("    {}", description);
        }
        for article in &blog.recent_articles {
            println!("    - {}", article.title);
        }
        println!();
    }
}
