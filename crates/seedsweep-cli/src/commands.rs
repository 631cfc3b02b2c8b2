use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use seedsweep_core::storage::{ActionOutcome, Source};

#[derive(Debug, Parser)]
#[command(name = "seedsweep")]
#[command(about = "Find files a Deluge daemon no longer knows about", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Reconcile the torrent and media folders against the daemon
    Scan {
        /// Do not scan the media folder this run
        #[arg(long)]
        skip_media: bool,
        /// Also write the full run report as JSON to this file
        #[arg(long, value_name = "PATH")]
        json: Option<PathBuf>,
    },
    /// Remove hash cache entries for files that no longer exist
    PruneCache,
    /// Display the number of entries in the hash cache
    CountHashCache,
    /// List recent scan runs
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Print the reportable files of the most recent stored scan run
    ShowLast,
    /// List files currently marked for deletion
    Marked,
    /// Record what happened to a file marked for deletion
    RecordOutcome {
        /// Path relative to the scanned root, as shown by `marked`
        path: String,
        #[arg(long, value_enum)]
        outcome: OutcomeArg,
        #[arg(long, value_enum, default_value_t = SourceArg::LocalTorrentFolder)]
        source: SourceArg,
    },
    /// Print configuration values
    PrintConfig,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutcomeArg {
    Removed,
    Rejected,
}

impl From<OutcomeArg> for ActionOutcome {
    fn from(arg: OutcomeArg) -> Self {
        match arg {
            OutcomeArg::Removed => ActionOutcome::Removed,
            OutcomeArg::Rejected => ActionOutcome::Rejected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceArg {
    LocalTorrentFolder,
    Torrents,
    Media,
}

impl From<SourceArg> for Source {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::LocalTorrentFolder => Source::LocalTorrentFolder,
            SourceArg::Torrents => Source::Torrents,
            SourceArg::Media => Source::Media,
        }
    }
}
