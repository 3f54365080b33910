use anyhow::Result;

use feedloom_core::Engine;

use super::find_feed;

pub async fn run(engine: &Engine, query: &str) -> Result<()> {
    let feeds = engine.list_feeds().await?;
    let feed = find_feed(&feeds, query)?;

    if engine.subscriptions().remove_subscription(feed.id).await? {
        println!("Unsubscribed from: {}", feed.display_name());
    } else {
        println!("Feed '{}' was already removed.", feed.display_name());
    }

    Ok(())
}
