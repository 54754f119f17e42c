//! Throttle/unthrottle command implementations.

use anyhow::Result;
use std::path::Path;

use crate::config::Config;
use crate::lock::LockGuard;
use crate::shaper::parse_ip;

/// Install a rate limit by hand
pub async fn run_throttle(
    client_ip: &str,
    port: Option<u16>,
    virtual_ip: &str,
    rate_kbps: u32,
    config_path: &Path,
) -> Result<()> {
    let client_ip = parse_ip(client_ip)?;
    let virtual_ip = parse_ip(virtual_ip)?;

    let config = Config::resolve(config_path)?;
    let _lock = LockGuard::acquire(&config.lock_file)?;

    let shaper = super::system_shaper(&config);
    shaper.ensure_initialized().await?;
    let id = shaper.install(client_ip, port, virtual_ip, rate_kbps).await?;

    println!("[OK] {} limited to {} kbps (class {})", client_ip, rate_kbps, id);
    Ok(())
}

/// Remove a rate limit by hand
pub async fn run_unthrottle(
    client_ip: &str,
    port: Option<u16>,
    virtual_ip: &str,
    config_path: &Path,
) -> Result<()> {
    let client_ip = parse_ip(client_ip)?;
    let virtual_ip = parse_ip(virtual_ip)?;

    let config = Config::resolve(config_path)?;
    let _lock = LockGuard::acquire(&config.lock_file)?;

    let shaper = super::system_shaper(&config);
    if shaper.remove(client_ip, port, virtual_ip).await? {
        println!("[OK] Limit for {} removed", client_ip);
    } else {
        println!("No limit installed for {}", client_ip);
    }
    Ok(())
}
