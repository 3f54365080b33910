use anyhow::Result;

use feedloom_core::Engine;

pub async fn run(engine: &Engine) -> Result<()> {
    let feeds = engine.list_feeds().await?;

    if feeds.is_empty() {
        println!("No subscriptions yet.");
        println!("\nTo subscribe to a feed, run:");
        println!("  feedloom subscribe <url>");
        return Ok(());
    }

    println!("Subscriptions ({}):\n", feeds.len());

    for feed in &feeds {
        let unread = if feed.unread_count > 0 {
            format!(" ({} unread)", feed.unread_count)
        } else {
            String::new()
        };

        let error = match &feed.last_error {
            Some(err) => format!(" [ERROR: {}]", err),
            None => String::new(),
        };

        let hidden = if feed.is_hidden { " [hidden]" } else { "" };

        println!("  {}{}{}{}", feed.display_name(), unread, hidden, error);
        println!("    Id: {}", feed.id);
        println!("    {}: {}", feed.source.kind(), feed.source.location());
        if !feed.category.is_empty() {
            println!("    Category: {}", feed.category);
        }
        if let Some(last) = feed.last_fetched_at {
            println!("    Last fetched: {}", last.format("%Y-%m-%d %H:%M"));
        }
        println!();
    }

    Ok(())
}
