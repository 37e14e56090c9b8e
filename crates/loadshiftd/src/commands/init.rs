//! `loadshiftd init` — write a starter config.

use std::path::Path;

use anyhow::{Context, bail};
use tracing::info;

use loadshift_core::LoadshiftConfig;

const HEADER: &str = "\
# loadshift configuration.
#
# The worker takes over the primary's delegated duty while the reported
# load stays above [scaling].load_threshold. Without [worker].ready_url
# the worker is considered ready after startup_delay_ms.

";

pub fn init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let body = LoadshiftConfig::scaffold("redirect-worker").to_toml_string()?;
    std::fs::write(path, format!("{HEADER}{body}"))
        .with_context(|| format!("failed to write {}", path.display()))?;

    info!(path = %path.display(), "wrote scaffold config");
    Ok(())
}
