//! bmc-updated - firmware update daemon

#![deny(clippy::unwrap_used)]

use anyhow::Result;
use bmc_update_service::config::DEFAULT_CONFIG_PATH;
use bmc_update_service::{ServiceConfig, ServiceDaemon};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "bmc-updated")]
#[command(about = "Firmware version and activation daemon for BMC-managed images")]
#[command(version)]
struct Cli {
    /// Configuration file; created with defaults when missing
    #[arg(short, long, global = true, env = "BMC_UPDATED_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon (default)
    Run,
    /// Print the effective configuration and exit
    PrintConfig,
    /// Validate the configuration and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("bmc_update_service={log_level},bmc_firmware_update={log_level},warn")
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceConfig::load_from_path(&cli.config).await?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            info!("Starting bmc-updated v{}", env!("CARGO_PKG_VERSION"));
            let mut daemon = ServiceDaemon::start(config)?;
            daemon.run().await
        }
        Commands::PrintConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::CheckConfig => {
            config.validate()?;
            println!("Configuration at {} is valid", cli.config.display());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn parse_defaults_to_run() -> TestResult {
        let cli = Cli::try_parse_from(["bmc-updated"])?;
        assert!(cli.command.is_none());
        assert_eq!(cli.verbose, 0);
        Ok(())
    }

    #[test]
    fn parse_config_and_verbosity() -> TestResult {
        let cli = Cli::try_parse_from(["bmc-updated", "-vv", "--config", "/tmp/u.json", "print-config"])?;
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, PathBuf::from("/tmp/u.json"));
        assert!(matches!(cli.command, Some(Commands::PrintConfig)));
        Ok(())
    }
}
