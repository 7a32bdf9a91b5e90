use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use siteward::commands;
use siteward::config::Config;

#[derive(Parser)]
#[command(
    name = "siteward",
    version,
    about = "Process supervisor and content converter for a served directory tree",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (TOML); defaults and environment are used when absent
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start all services and the detached supervisor
    Start,

    /// Stop the supervisor and all services
    Stop,

    /// Stop everything, then start fresh
    Restart,

    /// Show supervisor, service, and store status
    Status {
        /// Limit output to one service
        service: Option<String>,
    },

    /// Run the supervision loop (launched internally by `start`)
    #[command(hide = true)]
    Supervise,

    /// Run the content-converter process (launched internally)
    #[command(hide = true)]
    Convert,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_tracing(&cli.log_format, cli.verbose)?;

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Start => commands::start::run(config).await?,
        Commands::Stop => commands::stop::run(config).await?,
        Commands::Restart => commands::restart::run(config).await?,
        Commands::Status { service } => commands::status::run(config, service).await?,
        Commands::Supervise => commands::supervise::run(config).await?,
        Commands::Convert => commands::convert::run(config).await?,
    }

    Ok(())
}

fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("siteward=debug,proc=info,info")
    } else {
        tracing_subscriber::EnvFilter::new("siteward=info,proc=info,warn")
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
