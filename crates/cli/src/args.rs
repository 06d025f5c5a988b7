use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Resumable harvesting of chat posts and external videos.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "gleaner")]
#[command(version)]
#[command(about = "Acquire, transcribe and export content from links", long_about = None)]
#[command(after_help = "Environment: GLEANER_CONFIG (default config.toml), \
GLEANER_LOG_FORMAT=json for structured logs, RUST_LOG for the log filter.")]
pub struct Cli {
    /// Discard earlier output and run every stage again
    #[arg(long, global = true)]
    pub from_start: bool,

    /// Print the Prometheus metrics after the command finishes
    #[arg(long, global = true)]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Process one link
    Run {
        /// Chat post or video URL
        url: String,
    },
    /// Process every link in a note
    Batch {
        /// Note file with a topic line and links
        note: PathBuf,
    },
    /// Re-run a job that ended in error
    Retry {
        job_id: String,
    },
    /// Print a job with its exports and errors
    Status {
        job_id: String,
    },
    /// Process links read from stdin, one per line
    Watch,
}
