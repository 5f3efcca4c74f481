//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// lifecycle-cache - Buildpacks build cache tooling
///
/// Inspects and verifies volume caches and restores layer metadata from a
/// previous build into a layers directory.
#[derive(Parser, Debug)]
#[command(name = "lifecycle-cache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "LIFECYCLE_CACHE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show committed metadata and layers of a volume cache
    Inspect(InspectArgs),

    /// Check every committed layer against its digest
    Verify(VerifyArgs),

    /// Restore layer metadata into a layers directory
    Restore(RestoreArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the inspect command
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Cache directory
    pub dir: PathBuf,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the verify command
#[derive(Parser, Debug)]
pub struct VerifyArgs {
    /// Cache directory
    pub dir: PathBuf,
}

/// Arguments for the restore command
#[derive(Parser, Debug)]
pub struct RestoreArgs {
    /// Layers directory to restore into
    #[arg(long)]
    pub layers: PathBuf,

    /// group.toml listing the detected buildpacks
    #[arg(long)]
    pub group: PathBuf,

    /// Volume cache to restore from
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// JSON file holding the previous image's layers metadata label
    #[arg(long)]
    pub app_metadata: Option<PathBuf>,

    /// Only restore store.toml
    #[arg(long)]
    pub skip_layers: bool,

    /// Platform API (default: from config)
    #[arg(long)]
    pub platform_api: Option<String>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for inspect
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}
