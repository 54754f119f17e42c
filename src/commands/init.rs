//! Init command implementation.

use anyhow::Result;
use std::path::Path;

use crate::config::Config;
use crate::lock::LockGuard;

/// Run the init command
pub async fn run(config_path: &Path) -> Result<()> {
    let config = Config::resolve(config_path)?;
    let _lock = LockGuard::acquire(&config.lock_file)?;

    let shaper = super::system_shaper(&config);
    if shaper.ensure_initialized().await? {
        println!("[OK] HTB qdisc installed on {}", config.device);
    } else {
        println!("[OK] HTB qdisc already present on {}", config.device);
    }
    Ok(())
}
