//! CLI command implementations.

pub mod hook;
pub mod init;
pub mod show;
pub mod throttle;

use crate::cmd_abstraction::RealCommandExecutor;
use crate::config::Config;
use crate::shaper::{Shaper, ShaperSettings};

/// Shaper that runs the real tc/iptables binaries.
pub(crate) fn system_shaper(config: &Config) -> Shaper<RealCommandExecutor> {
    Shaper::new(
        RealCommandExecutor::with_timeout(config.command_timeout()),
        ShaperSettings::from(config),
    )
}
