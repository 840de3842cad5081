mod cli;
mod config;
mod display;
mod installed;
mod logging;
mod orchestrator;
mod provision;
mod registry;
mod restart;
mod utils;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use cli::{
    list::{list_cmd, registry_cmd},
    manage::{add_cmd, manage_cmd},
    provision::provision_cmd,
    ColorMode,
};
use config::read_config;
use logging::{init_logging, resolve_level, LOG_ENV};
use orchestrator::EXIT_CONFIGURATION;
use utils::errors::configure_color;

#[derive(
    Parser, Default, Clone, Copy, ValueEnum, strum_macros::Display, strum_macros::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum RequestedColorMode {
    #[default]
    Auto,
    On,
    Off,
}

#[derive(Parser)]
#[command(name = "llm-bridge")]
#[command(
    about = "Provision local models and manage the routing proxy's model registry",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Read settings from this file instead of the default locations
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true, default_value_t = RequestedColorMode::default())]
    color: RequestedColorMode,
    /// Log filter, e.g. "info" or "llm_bridge=debug"
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull a model into the local engine
    Provision(ProvisionArgs),
    /// Add a registry entry, or make an existing one the default route
    Manage(ManageArgs),
    /// Pull a model and register it as the local default
    Add(AddArgs),
    /// Show the registry entries in routing order
    Registry(ListArgs),
    /// Show installed and configured models
    List(ListArgs),
}

#[derive(Parser, Default)]
pub(crate) struct ProvisionArgs {
    /// Model identifier as the engine knows it, e.g. "phi3" or "hf.co/org/repo"
    identifier: String,
    /// Give up after this many seconds
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Parser, Default)]
pub(crate) struct ManageArgs {
    /// Entry name
    name: String,
    /// "<family>/<identifier>", e.g. "ollama/phi3"; omit to switch to an existing entry
    backend_spec: Option<String>,
    /// Replace an entry with the same name
    #[arg(long)]
    force: bool,
    /// Leave the proxy running with its old configuration
    #[arg(long)]
    no_restart: bool,
    /// Exit with an error when the proxy restart fails
    #[arg(long)]
    strict_restart: bool,
}

#[derive(Parser, Default)]
pub(crate) struct AddArgs {
    /// Model identifier to pull, e.g. "phi3" or "hf.co/org/repo"
    identifier: String,
    /// Entry name; defaults to the identifier's last path component
    #[arg(short, long)]
    name: Option<String>,
    /// Register without pulling
    #[arg(long)]
    skip_download: bool,
    /// Replace an entry with the same name
    #[arg(long)]
    force: bool,
    /// Leave the proxy running with its old configuration
    #[arg(long)]
    no_restart: bool,
    /// Exit with an error when the proxy restart fails
    #[arg(long)]
    strict_restart: bool,
}

/// Output formats
#[derive(ValueEnum, Default, Clone, Copy, strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub(crate) enum ListingFormat {
    /// Format the output as a table
    #[default]
    Table,
    /// Format the output as JSON
    Json,
    /// Format the output as a table without a header
    HeaderlessTable,
}

#[derive(Parser)]
pub(crate) struct ListArgs {
    /// Output the listing with the specified format
    #[arg(short, long, default_value_t = ListingFormat::default())]
    format: ListingFormat,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let color = ColorMode::resolve_auto(cli.color);

    configure_color(color);

    let config = match read_config(cli.config.clone()) {
        Ok(config) => config,
        Err(err) => die!(code = EXIT_CONFIGURATION; "{}", err),
    };

    let level = resolve_level(
        cli.log_level.as_deref(),
        std::env::var(LOG_ENV).ok(),
        config.logging.level.as_deref(),
    );

    if let Err(err) = init_logging(&level, config.logging.format, color == ColorMode::On) {
        die!(code = EXIT_CONFIGURATION; "{}", err);
    }

    let code = match &cli.command {
        Commands::Provision(args) => provision_cmd(&config, args).await,
        Commands::Manage(args) => manage_cmd(&config, args).await,
        Commands::Add(args) => add_cmd(&config, args).await,
        Commands::Registry(args) => registry_cmd(&config, args).await,
        Commands::List(args) => list_cmd(&config, args).await,
    };

    std::process::exit(code);
}
