use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::AppConfig;

pub fn init_tracing(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|err| {
        eprintln!("invalid LOG_LEVEL {:?}: {err}; falling back to info", config.log_level);
        EnvFilter::new("info")
    });

    let builder = fmt().with_env_filter(filter).with_target(false);
    if config.is_production() {
        builder
            .json()
            .with_current_span(true)
            .try_init()
            .map_err(|err| anyhow::anyhow!("install json subscriber: {err}"))?;
    } else {
        builder
            .compact()
            .try_init()
            .map_err(|err| anyhow::anyhow!("install compact subscriber: {err}"))?;
    }

    tracing::debug!(app_env = %config.app_env, "tracing initialised");
    Ok(())
}
