use anyhow::Result;

use feedloom_core::Engine;

use super::find_feed;

pub async fn run(engine: &Engine, feed: Option<&str>) -> Result<()> {
    if let Some(query) = feed {
        let feed = find_feed(&engine.list_feeds().await?, query)?;
        println!("Refreshing {}...", feed.display_name());
        let new_articles = engine.refresh_feed(feed.id).await?;
        println!("Refresh complete. {} new articles fetched.", new_articles);
        return Ok(());
    }

    println!("Refreshing all feeds...\n");

    let report = engine.refresh_all().await?;
    for result in &report.results {
        match &result.error {
            Some(err) => println!("  [ERROR] {}: {}", result.title, err),
            None => println!("  {}: {} new", result.title, result.new_articles),
        }
    }

    println!(
        "\nRefresh complete. {} feeds ok, {} failed, {} new articles fetched.",
        report.succeeded(),
        report.failed(),
        report.new_articles()
    );

    Ok(())
}
