//! `loadshiftd run` — supervise until a signal or a fatal error.

use std::path::Path;

use anyhow::Context;
use tracing::info;

use loadshift_core::LoadshiftConfig;
use loadshift_supervisor::Supervisor;

/// Command-line values that take precedence over the config file.
#[derive(Debug, Default, Clone, Copy)]
pub struct Overrides {
    pub threshold: Option<f64>,
    pub poll_interval_ms: Option<u64>,
}

impl Overrides {
    fn apply(self, config: &mut LoadshiftConfig) {
        if let Some(threshold) = self.threshold {
            config.scaling.load_threshold = threshold;
        }
        if let Some(interval) = self.poll_interval_ms {
            config.scaling.poll_interval_ms = interval;
        }
    }
}

fn load_config(path: &Path, overrides: Overrides) -> anyhow::Result<LoadshiftConfig> {
    let mut config = LoadshiftConfig::from_file(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    overrides.apply(&mut config);
    config.validate().context("invalid command-line override")?;
    Ok(config)
}

pub async fn run(config_path: &Path, overrides: Overrides) -> anyhow::Result<()> {
    let config = load_config(config_path, overrides)?;
    let supervisor = Supervisor::from_config(&config).context("failed to build supervisor")?;

    info!(
        config = %config_path.display(),
        worker = %config.worker.command,
        "loadshift daemon starting"
    );
    supervisor.start().await;

    tokio::select! {
        signal = shutdown_signal() => {
            info!("shutdown signal received");
            supervisor.stop().await;
            signal?;
        }
        result = supervisor.wait() => {
            result.context("supervisor gave up")?;
        }
    }

    info!("loadshift daemon stopped");
    Ok(())
}

/// Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate =
            signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("failed to listen for ctrl-c")?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    Ok(())
}
