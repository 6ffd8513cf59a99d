use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use log::LevelFilter;

use super::logging::LogDestination;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogTarget {
    /// Write to ./notifier.log
    File,
    /// Write to the terminal (stderr)
    Terminal,
    /// Write to both file and terminal
    Both,
}

impl From<LogTarget> for LogDestination {
    fn from(target: LogTarget) -> Self {
        match target {
            LogTarget::File => LogDestination::File,
            LogTarget::Terminal => LogDestination::Terminal,
            LogTarget::Both => LogDestination::Both,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "pipeline-notifier")]
#[command(about = "Watch a pipeline listing page and notify when pipelines finish", long_about = None)]
pub struct Args {
    /// Pipeline listing page to watch
    #[arg(long)]
    pub url: String,

    /// RON configuration file (defaults are used when omitted)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Where log output goes
    #[arg(long, value_enum, default_value = "terminal")]
    pub log: LogTarget,

    /// Log debug output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn log_level(&self) -> LevelFilter {
        if self.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        }
    }
}
