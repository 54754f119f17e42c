//! # vpn-throttle - per-client bandwidth limits for strongSwan gateways
//!
//! Installed as the strongSwan `updown` hook, vpn-throttle looks up a rate
//! limit for every client that connects and enforces it with Linux traffic
//! control. When the client disconnects the same configuration is found
//! again in the kernel and removed. Nothing is stored locally.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      vpn-throttle                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CLI (clap)                                                 │
//! │    └── Commands: updown, init, throttle, unthrottle, show   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Config (serde_yaml + THROTTLING_* environment)             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Updown dispatcher (PLUTO_* environment)                    │
//! │    └── Rate-limit service client (reqwest)                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Shaper                                                     │
//! │    ├── ClassId allocation (virtual IP -> 1:<id>)            │
//! │    ├── tc class / u32 filter / fw filter / iptables MARK    │
//! │    └── `tc filter show` parser                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CommandExecutor trait (sudo, timeout, mockable)            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use vpn_throttle::cmd_abstraction::RealCommandExecutor;
//! use vpn_throttle::config::Config;
//! use vpn_throttle::shaper::{Shaper, ShaperSettings};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::resolve("/etc/vpn-throttle/config.yaml")?;
//!     let shaper = Shaper::new(RealCommandExecutor::new(), ShaperSettings::from(&config));
//!
//!     shaper.ensure_initialized().await?;
//!     let id = shaper
//!         .install("203.0.113.7".parse()?, Some(4500), "10.10.0.2".parse()?, 2048)
//!         .await?;
//!     println!("installed class {}", id.handle());
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`cli`] - Command-line interface definitions
//! - [`cmd_abstraction`] - Mockable execution of external commands
//! - [`commands`] - CLI command implementations
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Error kinds and exit codes
//! - [`lock`] - File locking for concurrent hook invocations
//! - [`rate_limit`] - HTTP client for the rate-limit service
//! - [`shaper`] - Traffic shaping engine
//! - [`updown`] - strongSwan updown event handling

pub mod cli;
pub mod cmd_abstraction;
pub mod commands;
pub mod config;
pub mod error;
pub mod lock;
pub mod rate_limit;
pub mod shaper;
pub mod updown;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use error::ThrottleError;
pub use shaper::{ClassId, Shaper, ShapingRule};
