//! # aqsurvey CLI Module
//!
//! ## Available Commands
//!
//! - `server` - Start the participant HTTP API
//! - `validate` - Load a survey definition and print its plan
//! - `status` - Show experiment counters
//! - `export` - Write response records as JSON or CSV
//! - `init` - Write a starter `aqsurvey.toml`

mod commands;

use crate::config::{AppConfig, Backend};
use aqsurvey_core::SurveyError;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// aqsurvey - multi-page survey experiments
///
/// Serves a survey definition to participants step by step, records their
/// answers and exports them for analysis.
#[derive(Parser, Debug)]
#[command(name = "aqsurvey")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Print more detail
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the experiment config (default: ./aqsurvey.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the storage backend
    #[arg(short = 'B', long, global = true, value_enum)]
    pub backend: Option<Backend>,

    /// Override the redb database path
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Record file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Json,
    Csv,
}

/// Record table shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportLayout {
    /// One row per answer.
    Long,
    /// One row per participant.
    Wide,
    /// One row per committed step with the time spent on it.
    Times,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,

        /// Survey definition (TOML or JSON)
        #[arg(short, long)]
        definition: Option<PathBuf>,
    },

    /// Load and check a survey definition, then print its plan
    Validate {
        /// Survey definition (default: the configured one)
        definition: Option<PathBuf>,
    },

    /// Show experiment status
    Status,

    /// Export response records
    Export {
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(short = 't', long, value_enum, default_value = "json")]
        format: ExportFormat,

        #[arg(short, long, value_enum, default_value = "long")]
        layout: ExportLayout,

        /// Only this participant's rows
        #[arg(long)]
        participant: Option<String>,
    },

    /// Write a starter config file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), SurveyError> {
    if let Some(Commands::Init { force }) = cli.command {
        return cmd_init(cli.config.as_deref(), force);
    }

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(backend) = cli.backend {
        config.storage.backend = backend;
    }
    if let Some(path) = cli.database {
        config.storage.path = path;
    }

    match cli.command {
        Some(Commands::Server {
            host,
            port,
            definition,
        }) => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(definition) = definition {
                config.experiment.definition = Some(definition);
            }
            cmd_server(&config).await
        }
        Some(Commands::Validate { definition }) => {
            if let Some(definition) = definition {
                config.experiment.definition = Some(definition);
            }
            cmd_validate(&config, cli.json_mode, cli.verbose)
        }
        Some(Commands::Export {
            output,
            format,
            layout,
            participant,
        }) => cmd_export(&config, output.as_deref(), format, layout, participant),
        Some(Commands::Status) | Some(Commands::Init { .. }) | None => {
            cmd_status(&config, cli.json_mode)
        }
    }
}
