//! `loadshiftd sample` — one load query, printed as JSON.

use std::path::Path;

use anyhow::Context;

use loadshift_core::LoadshiftConfig;
use loadshift_probe::PrimaryClient;

pub async fn sample(config_path: &Path) -> anyhow::Result<()> {
    let config = LoadshiftConfig::from_file(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let client = PrimaryClient::from_config(&config.primary)?;

    let sample = client
        .sample_load()
        .await
        .with_context(|| format!("failed to query {}", config.primary.load_url))?;

    println!("{}", serde_json::to_string_pretty(&sample)?);
    Ok(())
}
