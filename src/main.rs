use anyhow::Result;
use peerbeat::{AppConfig, Client};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = AppConfig::load();
    let client = Client::new(config)?;
    client.run().await?;
    Ok(())
}
