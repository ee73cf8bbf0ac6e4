/// Command line interface for the runguard system
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "runguard")]
#[command(about = "Runs user-submitted scripts under resource governance", long_about = None)]
pub struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Detect the language of a script file
    Detect {
        /// Script file to classify
        file: PathBuf,
    },

    /// Screen a script file for disallowed constructs
    Scan {
        /// Script file to screen
        file: PathBuf,
    },

    /// Submit and run a script under supervision until it finishes
    Run {
        /// Script file to run
        file: PathBuf,

        /// Execution command (defaults to the language's suggested command)
        #[arg(short = 'x', long)]
        command: Option<String>,

        /// Owner identifier for the job
        #[arg(short, long, default_value = "local")]
        owner: String,

        /// Override memory limit in MB
        #[arg(long)]
        mem: Option<u64>,

        /// Override CPU percentage limit
        #[arg(long)]
        cpu: Option<f64>,

        /// Override wall-clock timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Log lines to print when the job finishes
        #[arg(long, default_value = "50")]
        lines: usize,
    },

    /// Print aggregate counters and a host resource snapshot
    Stats,

    /// Copy the job store file to a backup location
    Backup {
        /// Destination path (defaults to a timestamped file next to the store)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Remove terminal jobs older than the retention window
    Cleanup {
        /// Retention in days
        #[arg(long, default_value = "7")]
        days: u64,
    },
}
