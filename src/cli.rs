use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::Settings;
use crate::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "rawmeta",
    version,
    about = "Ingest acquisition-file metadata from an instrument backup share",
    long_about = "Watches the month-bucket directories of an instrument backup share, extracts \
                  run metadata from new acquisition files and records it per project and sample. \
                  Standards that arrive before their project are staged until a match appears."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file (defaults to ./rawmeta.toml, then the user config directory)
    #[arg(short, long, global = true, value_name = "PATH", env = "RAWMETA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Backup share root holding the YYYYMM directories
    #[arg(long, global = true, value_name = "DIR", env = "RAWMETA_ROOT")]
    pub root: Option<PathBuf>,

    /// Metadata database file
    #[arg(long, global = true, value_name = "PATH", env = "RAWMETA_DATABASE")]
    pub database: Option<PathBuf>,

    /// Verbosity level (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Watch the rolling month window and ingest new files (default)
    Watch,

    /// Reconcile every month directory since a start month, then retry staged samples
    Backlog(BacklogArgs),

    /// Files on disk vs files missing from the database, per month
    Status,

    /// Ingest specific files
    Insert(FileArgs),

    /// Ingest specific files, recording unreadable or empty ones as corrupt
    InsertCorrupt(FileArgs),

    /// Re-extract files previously recorded as corrupt and overwrite their entries
    Replace(FileArgs),
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct BacklogArgs {
    /// First month to scan, as YYYYMM (defaults to processing.backlog_since)
    #[arg(long, value_name = "YYYYMM")]
    pub since: Option<String>,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct FileArgs {
    #[arg(required = true, value_name = "FILE")]
    pub files: Vec<PathBuf>,
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Watch)
    }

    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    pub fn apply_overrides(&self, settings: &mut Settings) {
        if let Some(root) = &self.root {
            settings.paths.observation_root = root.clone();
        }
        if let Some(database) = &self.database {
            settings.paths.database = database.clone();
        }
    }

    pub fn load_settings(&self) -> Result<Settings, AppError> {
        let mut settings = Settings::load(self.config.as_deref())?;
        self.apply_overrides(&mut settings);
        settings.validate()?;
        Ok(settings)
    }
}
