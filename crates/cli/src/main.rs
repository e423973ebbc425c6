//! wpharness CLI
//!
//! Brings up and tears down the MySQL server, ChromeDriver and PHP built-in
//! server used by WordPress test runs.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use wpharness_services::ServiceContext;

mod commands;
mod config;
mod output;

use commands::paths::PathsArgs;
use commands::service::{StopArgs, UpArgs};
use config::HarnessConfig;
use output::OutputFormat;

/// wpharness - managed services for WordPress test runs
#[derive(Parser)]
#[command(name = "wpharness")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = "wpharness.toml", env = "WPHARNESS_CONFIG")]
    config: PathBuf,

    /// Directory for PID files and provisioned services (overrides the config)
    #[arg(long, global = true, env = "WPHARNESS_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "table")]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start services and keep them up until Ctrl-C
    Up(UpArgs),

    /// Stop a service recorded in its PID file
    Stop(StopArgs),

    /// Show PID file state for every service
    Status,

    /// Show MySQL path derivations for a platform
    Paths(PathsArgs),

    /// Print the effective configuration
    Config,

    /// Show version information
    Version,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = HarnessConfig::load(&cli.config)?;
    if let Some(output_dir) = cli.output_dir {
        config.output_dir = output_dir;
    }
    debug!("Using output directory {}", config.output_dir.display());

    let ctx = ServiceContext::system(config.output_dir.clone())?;

    match cli.command {
        Commands::Up(args) => {
            // the blocking HTTP client must not be built or used on an async worker
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(commands::service::up(args, &config, &ctx, cli.format))?;
        }
        Commands::Stop(args) => commands::service::stop(args, &config, &ctx)?,
        Commands::Status => commands::service::status(&ctx, cli.format)?,
        Commands::Paths(args) => commands::paths::paths(args, &config, &ctx, cli.format)?,
        Commands::Config => print!("{}", toml::to_string_pretty(&config)?),
        Commands::Version => {
            println!("wpharness {}", wpharness_common::VERSION);
            println!("Host: {}", ctx.machine());
        }
    }

    Ok(())
}
