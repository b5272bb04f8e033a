use crate::config::{CliOverrides, Config};
use crate::dispatcher::Operation;
use crate::error::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "logical-backup")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Back up iOS devices and list connected devices with pymobiledevice3")]
#[command(
    long_about = "logical-backup drives the pymobiledevice3 command-line tool: it starts a full \
                  logical backup of a connected device into a directory, or lists the devices \
                  connected over USB, relaying the tool's output and progress as it runs."
)]
#[command(before_help = "📱 logical-backup - iOS Logical Backup")]
#[command(after_help = "EXAMPLES:\n  \
    logical-backup list-devices\n  \
    logical-backup backup ~/Backups/iphone\n  \
    logical-backup backup ~/Backups/ipad --no-create --verbose\n  \
    logical-backup --tool /opt/venv/bin/pymobiledevice3 backup ./backup\n  \
    logical-backup --output-format json list-devices")]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Configuration file path
    #[arg(short, long, global = true, help = "Path to TOML configuration file")]
    pub config: Option<PathBuf>,

    /// External tool to run instead of the configured one
    #[arg(long, global = true, value_name = "PATH")]
    pub tool: Option<String>,

    /// Fail instead of creating a missing backup directory
    #[arg(long, global = true)]
    pub no_create: bool,

    /// Hide the progress bar
    #[arg(long, global = true)]
    pub no_progress: bool,

    /// Output format for results
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Human)]
    pub output_format: OutputFormat,

    /// Verbose output level (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Dry run (show what would be done without executing)
    #[arg(long, global = true, help = "Show the command that would run without starting it")]
    pub dry_run: bool,

    /// Generate sample configuration file
    #[arg(long, help = "Generate a sample configuration file")]
    pub generate_config: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run a full backup of the connected device
    Backup {
        /// Destination directory (defaults to backup.default_directory)
        dir: Option<PathBuf>,
    },
    /// List devices connected over USB
    ListDevices,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable colored output
    Human,
    /// One JSON object per event
    Json,
    /// Plain text output
    Plain,
}

impl Cli {
    pub fn load_config(&self) -> Result<Config> {
        let mut config = Config::load_with_defaults(self.config.as_ref())?;

        let overrides = self.create_cli_overrides();
        config.merge_with_cli_args(&overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn create_cli_overrides(&self) -> CliOverrides {
        let default_directory = match self.command {
            Some(Command::Backup { ref dir }) => dir.clone(),
            _ => None,
        };

        CliOverrides::new()
            .with_program(self.tool.clone())
            .with_default_directory(default_directory)
            .with_create_missing(self.no_create.then_some(false))
            .with_progress(self.no_progress.then_some(false))
    }

    pub fn operation(&self) -> Option<Operation> {
        self.command.as_ref().map(|command| match command {
            Command::Backup { .. } => Operation::Backup,
            Command::ListDevices => Operation::ListDevices,
        })
    }

    /// Backup destination: the positional argument, else the configured default.
    pub fn destination<'a>(&'a self, config: &'a Config) -> Option<&'a Path> {
        match self.command {
            Some(Command::Backup { dir: Some(ref dir) }) => Some(dir.as_path()),
            Some(Command::Backup { dir: None }) => config.backup.default_directory.as_deref(),
            _ => None,
        }
    }

    pub fn verbosity_level(&self) -> u8 {
        if self.quiet {
            0
        } else {
            self.verbose
        }
    }
}
