//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vpn-throttle")]
#[command(author, version, about = "Per-client bandwidth limits for strongSwan gateways")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path (missing file means defaults + environment)
    #[arg(short, long, default_value = "/etc/vpn-throttle/config.yaml", global = true)]
    pub config: PathBuf,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug output, including every command run)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run as the strongSwan updown hook (reads PLUTO_* from the environment)
    Updown,

    /// Set up the root HTB qdisc if it is missing
    Init,

    /// Install a rate limit for a client
    Throttle {
        /// Public address of the client
        client_ip: String,
        /// Virtual IP assigned to the client
        virtual_ip: String,
        /// Rate limit in kbit/s
        rate_kbps: u32,
        /// NAT-T UDP port of the client
        #[arg(long)]
        port: Option<u16>,
    },

    /// Remove the rate limit of a client
    Unthrottle {
        /// Public address of the client
        client_ip: String,
        /// Virtual IP assigned to the client
        virtual_ip: String,
        /// NAT-T UDP port of the client
        #[arg(long)]
        port: Option<u16>,
    },

    /// Show the filter installed for a virtual IP
    Show {
        /// Virtual IP assigned to the client
        virtual_ip: String,
    },

    /// Print the class id derived from a virtual IP
    Classid {
        /// Virtual IP assigned to the client
        virtual_ip: String,
    },

    /// Show version
    Version,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_throttle() {
        let cli = Cli::parse_from([
            "vpn-throttle", "throttle", "1.2.3.4", "10.3.4.5", "555", "--port", "4500",
        ]);
        match cli.command {
            Commands::Throttle {
                client_ip,
                virtual_ip,
                rate_kbps,
                port,
            } => {
                assert_eq!(client_ip, "1.2.3.4");
                assert_eq!(virtual_ip, "10.3.4.5");
                assert_eq!(rate_kbps, 555);
                assert_eq!(port, Some(4500));
            }
            _ => panic!("expected throttle"),
        }
        assert_eq!(cli.config, PathBuf::from("/etc/vpn-throttle/config.yaml"));
    }

    #[test]
    fn test_parse_global_flags() {
        let cli = Cli::parse_from(["vpn-throttle", "updown", "-v", "--config", "/tmp/c.yaml"]);
        assert!(matches!(cli.command, Commands::Updown));
        assert!(cli.verbose);
        assert!(!cli.quiet);
        assert_eq!(cli.config, PathBuf::from("/tmp/c.yaml"));
    }

    #[test]
    fn test_rejects_negative_rate() {
        assert!(Cli::try_parse_from(["vpn-throttle", "throttle", "1.2.3.4", "10.3.4.5", "-5"]).is_err());
    }
}
