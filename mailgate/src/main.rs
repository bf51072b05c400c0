mod config;

use clap::{Args, Parser, Subcommand};
use config::{Config, ConfigError, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const METRICS_PREFIX: &str = "mailgate";

#[derive(Parser)]
#[command(name = "mailgate", about = "Authenticated email relay")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Serve the relay and admin listeners
    Run(ConfigArgs),
    /// Load and validate the configuration, then exit
    CheckConfig(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long)]
    config_path: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not install metrics recorder: {0}")]
    Metrics(String),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Relay(#[from] relay::errors::RelayError),
}

fn main() {
    let cli = Cli::parse();

    let result = match &cli.command {
        CliCommand::Run(args) => run(&args.config_path),
        CliCommand::CheckConfig(args) => check_config(&args.config_path),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "mailgate exited with an error");
        eprintln!("{e}");
        process::exit(1);
    }
}

fn run(config_path: &Path) -> Result<(), CliError> {
    let config = Config::load(config_path, std::env::vars())?;

    let sentry_guard = config.common.logging.as_ref().map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });
    init_tracing(sentry_guard.is_some());

    if let Some(metrics_config) = &config.common.metrics {
        init_statsd(metrics_config)?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    tracing::info!("Starting mailgate");
    runtime.block_on(relay::run(config.relay))?;

    Ok(())
}

fn check_config(config_path: &Path) -> Result<(), CliError> {
    Config::load(config_path, std::env::vars())?;
    println!("{}: configuration is valid", config_path.display());
    Ok(())
}

fn init_tracing(with_sentry: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .with(with_sentry.then(|| sentry::integrations::tracing::layer()))
        .init();
}

fn init_statsd(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some(METRICS_PREFIX))
        .map_err(|e| CliError::Metrics(e.to_string()))?;

    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;

    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "Reporting metrics to statsd"
    );
    Ok(())
}
