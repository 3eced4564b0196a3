//! CLI parser and command dispatch.

mod download;
mod search;
mod state;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use atacquire::config::{load_settings_with_options, LoadOptions, OrganizationMode};
use atacquire::models::{SearchFilters, DEFAULT_STATUS};

#[derive(Parser)]
#[command(name = "ata")]
#[command(about = "Search PNCP procurement minutes and download every attached file")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Download root (overrides the config file)
    #[arg(short, long, global = true, env = "ATACQUIRE_DOWNLOAD_DIR")]
    download_dir: Option<PathBuf>,

    /// File layout: direct, organized or both
    #[arg(short, long, global = true)]
    mode: Option<OrganizationMode>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Search the portal and list every matching record
    Search {
        /// Search term
        term: String,
        /// Government sphere filter (federal, estadual, municipal, distrital); repeatable
        #[arg(long = "sphere")]
        spheres: Vec<String>,
        /// Federative unit filter (e.g. SP); repeatable
        #[arg(long = "uf")]
        states: Vec<String>,
        /// Record status filter
        #[arg(long, default_value = DEFAULT_STATUS)]
        status: String,
        /// Organ filter (name or code); repeatable
        #[arg(long = "organ")]
        organs: Vec<String>,
        /// Write the results as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Download every record found
        #[arg(long)]
        download: bool,
    },

    /// Download every file of one record
    Download {
        /// Record identifier (e.g. 00394460000141-1-000012/2024-000003)
        identifier: String,
        /// Record number shown on the portal, stored with the outcome
        #[arg(short, long)]
        label: Option<String>,
    },

    /// Download every record of a saved search (see `search --output`)
    Batch {
        /// JSON file produced by `ata search --output`
        results: PathBuf,
    },

    /// Show download progress statistics
    Status,

    /// Restart organized folder numbering at 0001
    ResetCounter,

    /// Forget every recorded outcome so records are downloaded again
    ClearProgress {
        /// Confirm deletion of the progress file
        #[arg(long)]
        confirm: bool,
    },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        download_dir: cli.download_dir,
        organization: cli.mode,
    };
    let (settings, _config) = load_settings_with_options(options).await;

    match cli.command {
        Commands::Search {
            term,
            spheres,
            states,
            status,
            organs,
            output,
            download,
        } => {
            let filters = SearchFilters {
                spheres,
                states,
                status: Some(status),
                organs,
            };
            search::cmd_search(&settings, &term, &filters, output.as_deref(), download).await
        }
        Commands::Download { identifier, label } => {
            download::cmd_download(&settings, &identifier, label.as_deref()).await
        }
        Commands::Batch { results } => download::cmd_batch(&settings, &results).await,
        Commands::Status => state::cmd_status(&settings).await,
        Commands::ResetCounter => state::cmd_reset_counter(&settings).await,
        Commands::ClearProgress { confirm } => {
            state::cmd_clear_progress(&settings, confirm).await
        }
    }
}
