use anyhow::Result;

use feedloom_core::Engine;

pub async fn list(engine: &Engine) -> Result<()> {
    for (key, value) in engine.settings().list().await? {
        println!("{} = {}", key, value);
    }
    Ok(())
}

pub async fn get(engine: &Engine, key: &str) -> Result<()> {
    println!("{}", engine.settings().get(key).await?);
    Ok(())
}

pub async fn set(engine: &Engine, key: &str, value: &str) -> Result<()> {
    engine.settings().set(key, value).await?;
    println!("{} = {}", key, engine.settings().get(key).await?);
    println!("A running daemon picks this up on its next cycle.");
    Ok(())
}
