//! Updown hook command implementation.

use anyhow::Result;
use std::path::Path;
use tracing::info;

use crate::cmd_abstraction::RealCommandExecutor;
use crate::config::Config;
use crate::error::ThrottleError;
use crate::lock::LockGuard;
use crate::rate_limit::HttpRateLimitSource;
use crate::updown::{handle_event, run_default_updown, ENV_VERB};

/// Run the updown hook for the verb in `PLUTO_VERB`
pub async fn run(config_path: &Path) -> Result<()> {
    let config = Config::resolve(config_path)?;
    let shaper = super::system_shaper(&config);

    // The stock script still owns the firewall rules for the tunnel itself.
    // charon runs it as root, so it is spawned as-is rather than through sudo.
    let script_runner = RealCommandExecutor::with_timeout(config.command_timeout()).without_elevation();
    run_default_updown(
        &script_runner,
        &config.default_updown_script,
        config.left_firewall,
    )
    .await;

    let verb = std::env::var(ENV_VERB).map_err(|_| ThrottleError::MissingEnv(ENV_VERB))?;

    let _lock = LockGuard::acquire(&config.lock_file)?;
    shaper.ensure_initialized().await?;

    let limits = HttpRateLimitSource::new(config.service_url.clone())?;
    let outcome = handle_event(&shaper, &limits, &verb, |name| std::env::var(name).ok()).await?;

    info!("{}: {:?}", verb, outcome);
    Ok(())
}
