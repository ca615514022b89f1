use anyhow::{Context, Result};
use clap::Parser;
use queue_cleaner::config::{
    AppConfig, CliConfig, FileConfig, DEFAULT_CONFIG_PATH, DEFAULT_INTERVAL_SECS,
};
use queue_cleaner::runner::CycleRunner;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[clap(version = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH")))]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Path to the JSON strike file.
    #[clap(long)]
    pub strike_file: Option<PathBuf>,

    /// Seconds between two cycles.
    #[clap(long, default_value_t = DEFAULT_INTERVAL_SECS)]
    pub interval_secs: u64,

    /// Decide and notify, but never remove, search, reannounce or write strikes.
    #[clap(long)]
    pub dry_run: bool,

    /// Emit logs as JSON lines.
    #[clap(long)]
    pub structured_logs: bool,

    /// Run a single cycle and exit.
    #[clap(long)]
    pub once: bool,
}

impl From<&CliArgs> for CliConfig {
    fn from(args: &CliArgs) -> Self {
        CliConfig {
            strike_file: args.strike_file.clone(),
            interval_secs: args.interval_secs,
            dry_run: args.dry_run,
            structured_logs: args.structured_logs,
        }
    }
}

fn init_tracing(structured: bool) -> Result<()> {
    let (json_layer, text_layer) = if structured {
        (Some(fmt::layer().json()), None)
    } else {
        (None, Some(fmt::layer()))
    };
    tracing_subscriber::registry()
        .with(json_layer)
        .with(text_layer)
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    // A missing file means defaults plus environment; a broken one is fatal.
    let config_present = cli_args.config.exists();
    let file_config = if config_present {
        Some(FileConfig::load(&cli_args.config)?)
    } else {
        None
    };

    let cli_config: CliConfig = (&cli_args).into();
    let app_config = AppConfig::resolve(&cli_config, file_config)?;
    init_tracing(app_config.general.structured_logs)?;

    if config_present {
        info!("Loaded configuration from {:?}", cli_args.config);
    } else {
        info!(
            "No configuration file at {:?}, using defaults and environment",
            cli_args.config
        );
    }
    info!("Configuration:");
    info!("  strike_file: {:?}", app_config.general.strike_file_path);
    info!("  interval: {}s", app_config.general.interval_secs);
    info!("  dry_run: {}", app_config.general.dry_run);
    info!("  reset_strikes_on_progress: {:?}", app_config.general.reset_policy);
    for service in &app_config.services {
        info!(
            "  service {} ({}) at {} auto_search={}",
            service.name,
            service.kind.as_str(),
            service.url,
            service.auto_search
        );
    }
    info!("  notification destinations: {}", app_config.destinations.len());
    if app_config.services.is_empty() {
        warn!("No services configured; nothing to clean");
    }

    let runner = CycleRunner::from_config(app_config)?;

    let shutdown_token = CancellationToken::new();
    let ctrl_c_token = shutdown_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, initiating graceful shutdown");
            ctrl_c_token.cancel();
        }
    });

    runner.run(shutdown_token, cli_args.once).await;
    Ok(())
}
