//! vpn-throttle - per-client bandwidth limits for strongSwan gateways.

use clap::Parser;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

use vpn_throttle::cli::{Cli, Commands};
use vpn_throttle::error::exit_code_for;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .without_time()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set up logging: {}", e);
    }

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(exit_code_for(&e));
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Updown => vpn_throttle::commands::hook::run(&cli.config).await,
        Commands::Init => vpn_throttle::commands::init::run(&cli.config).await,
        Commands::Throttle {
            client_ip,
            virtual_ip,
            rate_kbps,
            port,
        } => {
            vpn_throttle::commands::throttle::run_throttle(
                &client_ip,
                port,
                &virtual_ip,
                rate_kbps,
                &cli.config,
            )
            .await
        }
        Commands::Unthrottle {
            client_ip,
            virtual_ip,
            port,
        } => {
            vpn_throttle::commands::throttle::run_unthrottle(&client_ip, port, &virtual_ip, &cli.config)
                .await
        }
        Commands::Show { virtual_ip } => {
            vpn_throttle::commands::show::run(&virtual_ip, &cli.config).await
        }
        Commands::Classid { virtual_ip } => vpn_throttle::commands::show::run_classid(&virtual_ip),
        Commands::Version => {
            println!("vpn-throttle {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
