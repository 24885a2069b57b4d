//! # Trainwatch CLI Module
//!
//! ## Available Commands
//!
//! - `run` - Monitor a subject's data file and drive the curriculum
//! - `stages` - Show the stage sequence and advancement criteria
//! - `replay` - Feed a finished data file through the curriculum offline

mod commands;

use crate::config::RunConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use trainwatch_core::TrainError;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Trainwatch - behavioral training curriculum monitor
///
/// Watches the trial data a training device writes, decides when a subject
/// has met the criterion for its stage, and tells the device which stage to
/// run next.
#[derive(Parser, Debug)]
#[command(name = "trainwatch")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Suppress informational output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// TOML configuration file; CLI flags override its values
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Monitor a subject until it finishes, the duration elapses, or Ctrl-C
    Run {
        /// Subject identifier
        #[arg(short, long)]
        subject: Option<String>,

        /// Stage to start at
        #[arg(short = 'S', long)]
        stage: Option<String>,

        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,

        /// Stop once this stage is reached
        #[arg(short, long)]
        terminate_stage: Option<String>,

        /// Broker `host:port`; in-process bus when absent
        #[arg(short, long)]
        endpoint: Option<String>,

        /// Data file the device appends to
        #[arg(short = 'f', long)]
        data_file: Option<PathBuf>,

        /// Root directory for snapshots and device output
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Show the stage sequence and each stage's criterion
    Stages,

    /// Replay a complete data file through the curriculum
    Replay {
        /// Data file to read
        #[arg(short, long)]
        file: PathBuf,

        /// Subject identifier
        #[arg(short, long)]
        subject: Option<String>,

        /// Stage to start at
        #[arg(short = 'S', long)]
        stage: Option<String>,

        /// Stop once this stage is reached
        #[arg(short, long)]
        terminate_stage: Option<String>,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), TrainError> {
    let mut config = match &cli.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    let json_mode = cli.json_mode;

    match cli.command {
        Commands::Run {
            subject,
            stage,
            duration,
            terminate_stage,
            endpoint,
            data_file,
            output_dir,
        } => {
            apply_identity(&mut config, subject, stage, terminate_stage);
            if duration.is_some() {
                config.duration_secs = duration;
            }
            if endpoint.is_some() {
                config.endpoint = endpoint;
            }
            if let Some(data_file) = data_file {
                config.data_file = data_file;
            }
            if let Some(output_dir) = output_dir {
                config.output_dir = output_dir;
            }
            cmd_run(&config, json_mode, cli.quiet).await
        }
        Commands::Stages => cmd_stages(&config, json_mode),
        Commands::Replay {
            file,
            subject,
            stage,
            terminate_stage,
        } => {
            apply_identity(&mut config, subject, stage, terminate_stage);
            cmd_replay(&config, &file, json_mode)
        }
    }
}

/// Overlay the flags shared by `run` and `replay`.
fn apply_identity(
    config: &mut RunConfig,
    subject: Option<String>,
    stage: Option<String>,
    terminate_stage: Option<String>,
) {
    if let Some(subject) = subject {
        config.subject = subject;
    }
    if let Some(stage) = stage {
        config.start_stage = stage;
    }
    if terminate_stage.is_some() {
        config.terminate_stage = terminate_stage;
    }
}
