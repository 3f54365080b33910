use anyhow::{bail, Result};
use clap::Args;

use feedloom_core::feed::FeedUpdate;
use feedloom_core::Engine;

use super::find_feed;

#[derive(Args)]
pub struct UpdateArgs {
    /// Feed id, title or location
    feed: String,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    category: Option<String>,
    /// New URL or script path
    #[arg(long)]
    location: Option<String>,
    /// Per-feed refresh interval in seconds
    #[arg(long, conflicts_with = "clear_interval")]
    interval: Option<u64>,
    /// Go back to the global refresh interval
    #[arg(long)]
    clear_interval: bool,
    #[arg(long, conflicts_with = "clear_proxy")]
    proxy: Option<String>,
    #[arg(long)]
    clear_proxy: bool,
    #[arg(long, conflicts_with = "show")]
    hide: bool,
    #[arg(long)]
    show: bool,
}

impl UpdateArgs {
    fn to_update(&self) -> FeedUpdate {
        FeedUpdate {
            title: self.title.clone(),
            category: self.category.clone(),
            location: self.location.clone(),
            refresh_interval_secs: match (self.interval, self.clear_interval) {
                (Some(secs), _) => Some(Some(secs)),
                (None, true) => Some(None),
                (None, false) => None,
            },
            proxy_url: match (&self.proxy, self.clear_proxy) {
                (Some(proxy), _) => Some(Some(proxy.clone())),
                (None, true) => Some(None),
                (None, false) => None,
            },
            is_hidden: match (self.hide, self.show) {
                (true, _) => Some(true),
                (false, true) => Some(false),
                (false, false) => None,
            },
        }
    }
}

pub async fn run(engine: &Engine, args: UpdateArgs) -> Result<()> {
    let update = args.to_update();
    if update.is_empty() {
        bail!("Nothing to change; pass at least one option (see 'feedloom update --help')");
    }

    let feeds = engine.list_feeds().await?;
    let feed = find_feed(&feeds, &args.feed)?;
    let feed = engine.subscriptions().update_subscription(feed.id, update).await?;

    println!("Updated {}", feed.display_name());
    println!("  Location: {} ({})", feed.source.location(), feed.source.kind());
    if !feed.category.is_empty() {
        println!("  Category: {}", feed.category);
    }
    if let Some(secs) = feed.refresh_interval_secs {
        println!("  Refresh interval: {} seconds", secs);
    }
    if let Some(proxy) = &feed.proxy_url {
        println!("  Proxy: {}", proxy);
    }
    if feed.is_hidden {
        println!("  Hidden");
    }

    Ok(())
}
