use clap::{Args, Parser};
use config::Config;
use std::error::Error;
use std::path::PathBuf;

mod config;
mod telemetry;

/// Relays browser CSV uploads to a GitHub repository dispatch.
#[derive(Parser)]
#[command(version)]
enum CliCommand {
    /// Serve the relay and admin listeners
    Relay(ConfigArgs),
    /// Load and validate the configuration, then exit
    CheckConfig(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    /// YAML config file. Without one, the relay is configured from the environment.
    #[arg(long)]
    config_file: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = CliCommand::parse();

    let (CliCommand::Relay(args) | CliCommand::CheckConfig(args)) = &cli;
    let config = match &args.config_file {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let relay_config = config.relay_config(|var| std::env::var(var).ok())?;

    match cli {
        CliCommand::CheckConfig(_) => {
            relay_config.validate()?;
            println!("Configuration OK");
        }
        CliCommand::Relay(_) => {
            let _sentry_guard = telemetry::init_logging(config.common.logging.as_ref());
            if let Some(metrics) = &config.common.metrics {
                telemetry::init_metrics(metrics)?;
            }

            tracing::info!("Starting relay");
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            if let Err(e) = rt.block_on(relay::run(relay_config)) {
                tracing::error!(error = %e, "Relay stopped");
                return Err(e.into());
            }
        }
    }

    Ok(())
}
