use anyhow::Result;
use itax_extractor::utils::logging;
use itax_extractor::{App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();
    logging::init(config.verbose_logging);

    App::initialize(config).await?.run().await?;

    Ok(())
}
