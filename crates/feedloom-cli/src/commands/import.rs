use std::path::Path;

use anyhow::{bail, Result};

use feedloom_core::Engine;

pub async fn run(engine: &Engine, file_path: &str) -> Result<()> {
    let path = Path::new(file_path);
    if !path.exists() {
        bail!("File not found: {}", file_path);
    }

    let content = tokio::fs::read_to_string(path).await?;
    println!("Importing subscriptions from {}...", file_path);

    let report = engine.subscriptions().import_opml(&content).await?;
    if report.added > 0 {
        println!("Fetching articles for {} new feeds...", report.added);
        engine.subscriptions().wait_for_initial_fetches().await;
    }

    println!("\nImport complete:");
    println!("  Added: {}", report.added);
    println!("  Already subscribed: {}", report.duplicates);
    println!("  Invalid: {}", report.invalid);

    Ok(())
}
