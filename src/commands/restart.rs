//! `restart`: stop the running stack (if any), then start it fresh

use anyhow::Result;

use crate::config::Config;

pub async fn run(config: Config) -> Result<()> {
    super::stop::run(config.clone()).await?;
    super::start::run(config).await
}
