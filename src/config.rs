use crate::error::{LogicalBackupError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_TOOL: &str = "pymobiledevice3";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub tool: ToolConfig,
    pub backup: BackupConfig,
    pub progress: ProgressConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Executable name or path of the external tool.
    pub program: String,
    /// Trailing output lines kept as context when the tool fails.
    pub diagnostic_lines: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackupConfig {
    pub default_directory: Option<PathBuf>,
    pub create_missing: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProgressConfig {
    pub enabled: bool,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_TOOL.to_string(),
            diagnostic_lines: 20,
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            default_directory: None,
            create_missing: true,
        }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(LogicalBackupError::configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            LogicalBackupError::configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| {
            LogicalBackupError::configuration(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Ok(config)
    }

    pub fn load_with_defaults<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_from_file(path),
            None => {
                let default_paths = ["logical-backup.toml", ".logical-backup.toml"];

                for default_path in &default_paths {
                    if Path::new(default_path).exists() {
                        log::debug!("Using configuration file {}", default_path);
                        return Self::load_from_file(default_path);
                    }
                }

                Ok(Self::default())
            }
        }
    }

    pub fn merge_with_cli_args(&mut self, cli_args: &CliOverrides) {
        if let Some(ref program) = cli_args.program {
            self.tool.program = program.clone();
        }

        if let Some(ref directory) = cli_args.default_directory {
            self.backup.default_directory = Some(directory.clone());
        }

        if let Some(create_missing) = cli_args.create_missing {
            self.backup.create_missing = create_missing;
        }

        if let Some(progress) = cli_args.progress {
            self.progress.enabled = progress;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.tool.program.trim().is_empty() {
            return Err(LogicalBackupError::configuration(
                "Tool program must not be empty",
            ));
        }

        if self.tool.diagnostic_lines == 0 {
            return Err(LogicalBackupError::configuration(
                "diagnostic_lines must be greater than 0",
            ));
        }

        Ok(())
    }

    pub fn create_sample_config() -> String {
        let mut sample_config = Self::default();
        sample_config.backup.default_directory = Some(PathBuf::from("ios-backups"));
        toml::to_string_pretty(&sample_config).unwrap_or_else(|_| String::new())
    }
}

#[derive(Debug, Default)]
pub struct CliOverrides {
    pub program: Option<String>,
    pub default_directory: Option<PathBuf>,
    pub create_missing: Option<bool>,
    pub progress: Option<bool>,
}

impl CliOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(mut self, program: Option<String>) -> Self {
        self.program = program;
        self
    }

    pub fn with_default_directory(mut self, directory: Option<PathBuf>) -> Self {
        self.default_directory = directory;
        self
    }

    pub fn with_create_missing(mut self, create_missing: Option<bool>) -> Self {
        self.create_missing = create_missing;
        self
    }

    pub fn with_progress(mut self, progress: Option<bool>) -> Self {
        self.progress = progress;
        self
    }
}
