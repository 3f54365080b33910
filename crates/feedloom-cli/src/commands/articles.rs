use anyhow::Result;

use feedloom_core::feed::ArticleFilter;
use feedloom_core::Engine;

use super::find_feed;

pub async fn run(
    engine: &Engine,
    feed: Option<&str>,
    unread_only: bool,
    favorites_only: bool,
    limit: u32,
) -> Result<()> {
    let feed_id = match feed {
        Some(query) => Some(find_feed(&engine.list_feeds().await?, query)?.id),
        None => None,
    };

    let articles = engine
        .list_articles(&ArticleFilter {
            feed_id,
            unread_only,
            favorites_only,
            include_hidden: false,
            limit: Some(limit),
        })
        .await?;

    if articles.is_empty() {
        println!("No articles.");
        return Ok(());
    }

    for article in &articles {
        let marker = if article.is_read { " " } else { "*" };
        let date = article
            .published_at
            .unwrap_or(article.fetched_at)
            .format("%Y-%m-%d");
        println!("{} {}  {}", marker, date, article.title);
        println!("    {}", article.url);
    }

    Ok(())
}
