//! Configuration management for vpn-throttle.
//!
//! Settings come from an optional YAML file and are then overridden by the
//! `THROTTLING_*` environment variables, which is how the updown hook is
//! usually configured from strongSwan's environment.

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use crate::cmd_abstraction::is_root;
use crate::error::ThrottleError;

pub const ENV_SERVICE_URL: &str = "THROTTLING_SERVICE_URL";
pub const ENV_DEVICE: &str = "THROTTLING_ETH_DEVICE";
pub const ENV_MAX_BANDWIDTH: &str = "THROTTLING_MAX_BANDWIDTH";
pub const ENV_DEFAULT_UPDOWN: &str = "THROTTLING_DEFAULT_UPDOWN_SCRIPT";
pub const ENV_LEFT_FIREWALL: &str = "THROTTLING_LEFT_FIREWALL";
pub const ENV_THROTTLE_UPSTREAM: &str = "THROTTLE_UPSTREAM";

const LOCK_FILE_NAME: &str = "vpn-throttle.lock";
const ROOT_LOCK_DIR: &str = "/run";

/// Longest interface name the kernel accepts (IFNAMSIZ - 1)
const MAX_IFNAME_LEN: usize = 15;

static BANDWIDTH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\d+(\.\d+)?([kmgt]?bit|[kmgt]?bps)?$").expect("valid bandwidth regex")
});

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Rate-limit service queried with `?client_id=<peer id>`
    pub service_url: String,

    /// Interface carrying traffic towards VPN clients
    pub device: String,

    /// Rate of the top-level HTB class (tc syntax, e.g. "1gbit")
    pub max_bandwidth: String,

    /// Stock strongSwan updown script, run before any throttling
    pub default_updown_script: String,

    /// Pass `iptables` to the stock updown script (ipsec.conf `leftfirewall`)
    pub left_firewall: bool,

    /// Also throttle client-originated traffic using firewall marks
    pub throttle_upstream: bool,

    /// Upper bound for a single tc/iptables invocation
    pub command_timeout_secs: u64,

    /// Advisory lock serializing concurrent hook invocations.
    /// Defaults to /run for root and to the user's runtime dir otherwise.
    pub lock_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_url: String::new(),
            device: "eth0".to_string(),
            max_bandwidth: "1gbit".to_string(),
            default_updown_script: "/usr/libexec/ipsec/_updown".to_string(),
            left_firewall: false,
            throttle_upstream: false,
            command_timeout_secs: 30,
            lock_file: default_lock_file(is_root(), std::env::var_os("XDG_RUNTIME_DIR").map(PathBuf::from))
                .to_string_lossy()
                .into_owned(),
        }
    }
}

impl Config {
    /// Load configuration from YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;
        Ok(config)
    }

    /// Load the file if it exists, apply environment overrides, validate.
    pub fn resolve<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = if path.as_ref().exists() {
            Self::load(path)?
        } else {
            Self::default()
        };
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override fields from environment variables.
    ///
    /// Boolean flags are enabled only by the exact string `true`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_SERVICE_URL) {
            self.service_url = url;
        }
        if let Some(device) = lookup(ENV_DEVICE) {
            self.device = device;
        }
        if let Some(bw) = lookup(ENV_MAX_BANDWIDTH) {
            self.max_bandwidth = bw;
        }
        if let Some(script) = lookup(ENV_DEFAULT_UPDOWN) {
            self.default_updown_script = script;
        }
        if let Some(flag) = lookup(ENV_LEFT_FIREWALL) {
            self.left_firewall = flag == "true";
        }
        if let Some(flag) = lookup(ENV_THROTTLE_UPSTREAM) {
            self.throttle_upstream = flag == "true";
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ThrottleError> {
        if !is_valid_ifname(&self.device) {
            return Err(ThrottleError::Config(format!(
                "Invalid device name '{}'",
                self.device
            )));
        }

        if !BANDWIDTH_RE.is_match(&self.max_bandwidth) {
            return Err(ThrottleError::Config(format!(
                "Invalid max_bandwidth '{}'. Use tc syntax like '1gbit' or '500mbit'",
                self.max_bandwidth
            )));
        }

        if !self.service_url.is_empty()
            && !self.service_url.starts_with("http://")
            && !self.service_url.starts_with("https://")
        {
            return Err(ThrottleError::Config(format!(
                "Rate-limit service URL must be http(s): {}",
                self.service_url
            )));
        }

        if self.command_timeout_secs == 0 {
            return Err(ThrottleError::Config(
                "command_timeout_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Lock location for a process with the given privileges.
///
/// Only root can create files under /run; anyone else (who reaches tc
/// through sudo) locks in `$XDG_RUNTIME_DIR`, or the temp dir without one.
fn default_lock_file(root: bool, runtime_dir: Option<PathBuf>) -> PathBuf {
    let dir = if root {
        PathBuf::from(ROOT_LOCK_DIR)
    } else {
        runtime_dir
            .filter(|dir| dir.is_absolute())
            .unwrap_or_else(std::env::temp_dir)
    };
    dir.join(LOCK_FILE_NAME)
}

/// Interface names are passed straight to tc, so keep them to the
/// characters the kernel allows and nothing that looks like an option.
fn is_valid_ifname(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_IFNAME_LEN
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '@'))
}
