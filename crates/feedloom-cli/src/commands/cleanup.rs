use anyhow::Result;

use feedloom_core::Engine;

pub async fn run(engine: &Engine) -> Result<()> {
    let days = engine.settings().max_article_age_days().await?;
    println!("Cleaning up articles older than {} days...", days);

    let deleted = engine.cleanup().await?;

    if deleted > 0 {
        println!("Deleted {} old articles.", deleted);
    } else {
        println!("No articles to clean up.");
    }

    Ok(())
}
