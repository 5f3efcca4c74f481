//! lifecycle-cache - Buildpacks build cache tooling
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use lifecycle_cache::cli::{Cli, Commands};
use lifecycle_cache::config::ConfigManager;
use lifecycle_cache::error::LifecycleResult;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

fn run() -> LifecycleResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load()?;

    // 0 = warn, 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("lifecycle_cache=warn"),
        1 => EnvFilter::new("lifecycle_cache=info"),
        _ => EnvFilter::new("lifecycle_cache=debug"),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();
    if config.general.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match cli.command {
        Commands::Inspect(args) => lifecycle_cache::cli::commands::inspect(args, &config),
        Commands::Verify(args) => lifecycle_cache::cli::commands::verify(args, &config),
        Commands::Restore(args) => lifecycle_cache::cli::commands::restore(args, &config),
        Commands::Config(args) => {
            lifecycle_cache::cli::commands::config(args, &config_manager, &config)
        }
    }
}
