use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ptywatch_core::config::ClassifierMode;
use ptywatch_core::Settings;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Watch terminal agent sessions and report their readiness")]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Watch every session until Ctrl-C
    Watch {
        /// Polling interval in milliseconds
        #[arg(short = 'i', long)]
        interval: Option<u64>,

        /// Unchanged polls required before classifying
        #[arg(short, long)]
        stability: Option<u32>,

        /// Classifier: auto, remote or pattern
        #[arg(long)]
        classifier: Option<ClassifierMode>,
    },
    /// Show the current status of every session
    Status {
        /// Only sessions polled within the last SECS seconds
        #[arg(long, value_name = "SECS")]
        since: Option<u64>,

        /// Print records as JSON
        #[arg(long, conflicts_with = "short")]
        json: bool,

        /// One line for tmux status bars
        #[arg(long)]
        short: bool,
    },
    /// Show the state history of one session
    Tail {
        /// Session id (tmux pane id, e.g. %3)
        session_id: String,

        /// Number of newest entries to show
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: usize,

        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the available classifier packs
    Packs,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Apply `watch` flags on top of file and environment settings
    pub fn merge_into(&self, settings: &mut Settings) {
        if let Command::Watch {
            interval,
            stability,
            classifier,
        } = &self.command
        {
            if let Some(interval) = interval {
                settings.poll_interval_ms = *interval;
            }
            if let Some(stability) = stability {
                settings.stability_threshold = *stability;
            }
            if let Some(mode) = classifier {
                settings.classifier.mode = *mode;
            }
        }
    }
}
