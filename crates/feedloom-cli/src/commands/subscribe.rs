use anyhow::Result;
use uuid::Uuid;

use feedloom_core::storage::FeedRepository;
use feedloom_core::Engine;

pub async fn run(engine: &Engine, url: &str, category: &str, title: &str) -> Result<()> {
    println!("Subscribing to feed: {}", url);
    let id = engine.subscriptions().add_subscription(url, category, title).await?;
    report(engine, id).await
}

pub async fn run_script(engine: &Engine, path: &str, category: &str, title: &str) -> Result<()> {
    println!(
        "Subscribing to script: {} (scripts directory: {})",
        path,
        engine.fetcher().script_policy().dir().display()
    );
    let id = engine
        .subscriptions()
        .add_script_subscription(path, category, title)
        .await?;
    report(engine, id).await
}

/// Wait for the first fetch and print how it went
async fn report(engine: &Engine, id: Uuid) -> Result<()> {
    println!("Created subscription {}", id);
    println!("Fetching articles...");
    engine.subscriptions().wait_for_initial_fetches().await;

    let Some(feed) = FeedRepository::new(engine.db()).find_by_id(id).await? else {
        return Ok(());
    };

    match &feed.last_error {
        Some(err) => {
            println!("Warning: initial fetch failed: {}", err);
            println!("The subscription was kept; try 'feedloom refresh {}' later.", id);
        }
        None => println!(
            "Fetched '{}': {} articles",
            feed.display_name(),
            feed.unread_count
        ),
    }

    Ok(())
}
