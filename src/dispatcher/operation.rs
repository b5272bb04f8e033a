use crate::error::{LogicalBackupError, Result};
use crate::runner::Invocation;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Backup,
    ListDevices,
}

impl Operation {
    pub const ALL: [Operation; 2] = [Operation::Backup, Operation::ListDevices];

    pub fn name(self) -> &'static str {
        match self {
            Operation::Backup => "backup",
            Operation::ListDevices => "list-devices",
        }
    }

    /// Map a user selection to an operation. Anything that is not an
    /// operation name (including the empty placeholder) is "no selection".
    pub fn from_selection(selection: Option<&str>) -> Result<Self> {
        selection
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| LogicalBackupError::configuration("Please select an option."))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        Operation::ALL
            .into_iter()
            .find(|op| op.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown operation '{}' (expected backup or list-devices)", s))
    }
}

/// Destination directory for a backup run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupTarget {
    path: PathBuf,
}

impl BackupTarget {
    pub fn new<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        if path.as_os_str().to_string_lossy().trim().is_empty() {
            return Err(LogicalBackupError::configuration(
                "Please select a backup directory.",
            ));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Make sure the directory is usable, creating it when allowed.
    pub fn prepare(&self, create_missing: bool) -> Result<()> {
        match fs::metadata(&self.path) {
            Ok(metadata) if metadata.is_dir() => Ok(()),
            Ok(_) => Err(LogicalBackupError::configuration(format!(
                "Backup destination is not a directory: {}",
                self.path.display()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if !create_missing {
                    return Err(LogicalBackupError::configuration(format!(
                        "Backup directory does not exist: {}",
                        self.path.display()
                    )));
                }
                fs::create_dir_all(&self.path).map_err(|e| {
                    LogicalBackupError::configuration(format!(
                        "Failed to create backup directory {}: {}",
                        self.path.display(),
                        e
                    ))
                })?;
                log::info!("Created backup directory {}", self.path.display());
                Ok(())
            }
            Err(e) => Err(LogicalBackupError::configuration(format!(
                "Cannot access backup directory {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

/// Everything needed to start one run, validated up front.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub operation: Operation,
    pub target: Option<BackupTarget>,
    pub invocation: Invocation,
}

impl RunPlan {
    pub fn new(operation: Option<Operation>, destination: Option<&Path>, program: &str) -> Result<Self> {
        let operation =
            operation.ok_or_else(|| LogicalBackupError::configuration("Please select an option."))?;

        match operation {
            Operation::Backup => {
                let destination = destination.ok_or_else(|| {
                    LogicalBackupError::configuration("Please select a backup directory.")
                })?;
                let target = BackupTarget::new(destination)?;
                let invocation = Invocation::full_backup(program, target.path());
                Ok(Self {
                    operation,
                    target: Some(target),
                    invocation,
                })
            }
            Operation::ListDevices => Ok(Self {
                operation,
                target: None,
                invocation: Invocation::list_devices(program),
            }),
        }
    }

    pub fn destination(&self) -> Option<&Path> {
        self.target.as_ref().map(BackupTarget::path)
    }

    pub fn start_message(&self) -> String {
        match self.destination() {
            Some(path) => format!("Starting backup to {}...", path.display()),
            None => "Listing connected devices...".to_string(),
        }
    }

    pub fn success_message(&self) -> &'static str {
        match self.operation {
            Operation::Backup => "Backup completed successfully.",
            Operation::ListDevices => "Device listing completed.",
        }
    }

    pub fn failure_message(&self) -> &'static str {
        match self.operation {
            Operation::Backup => "Error executing backup command.",
            Operation::ListDevices => "Error listing connected devices.",
        }
    }

    /// Human-readable summary carried by the completion notice.
    pub fn completion_summary(&self) -> String {
        match self.destination() {
            Some(path) => format!("Backup completed and saved to {}.", path.display()),
            None => "Connected devices listed.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_operation_names() {
        assert_eq!("backup".parse::<Operation>().unwrap(), Operation::Backup);
        assert_eq!(" List-Devices ".parse::<Operation>().unwrap(), Operation::ListDevices);
        assert!("Select Options".parse::<Operation>().is_err());
        assert_eq!(Operation::ListDevices.to_string(), "list-devices");
    }

    #[test]
    fn test_unset_selection_is_configuration_error() {
        assert!(matches!(
            Operation::from_selection(None),
            Err(LogicalBackupError::Configuration { .. })
        ));
        assert!(matches!(
            Operation::from_selection(Some("Select Options")),
            Err(LogicalBackupError::Configuration { .. })
        ));
        assert_eq!(
            Operation::from_selection(Some("backup")).unwrap(),
            Operation::Backup
        );
    }

    #[test]
    fn test_backup_requires_destination() {
        for destination in [None, Some(Path::new("")), Some(Path::new("   "))] {
            let result = RunPlan::new(Some(Operation::Backup), destination, "pymobiledevice3");
            assert!(matches!(result, Err(LogicalBackupError::Configuration { .. })));
        }
    }

    #[test]
    fn test_list_devices_ignores_destination() {
        let plan = RunPlan::new(Some(Operation::ListDevices), None, "pymobiledevice3").unwrap();
        assert!(plan.destination().is_none());
        assert_eq!(plan.invocation.to_string(), "pymobiledevice3 usbmux list");
    }

    #[test]
    fn test_plan_messages() {
        let plan = RunPlan::new(
            Some(Operation::Backup),
            Some(Path::new("/backups/ipad")),
            "pymobiledevice3",
        )
        .unwrap();
        assert_eq!(plan.start_message(), "Starting backup to /backups/ipad...");
        assert_eq!(
            plan.completion_summary(),
            "Backup completed and saved to /backups/ipad."
        );
    }

    #[test]
    fn test_prepare_creates_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("backup");
        let target = BackupTarget::new(&path).unwrap();

        target.prepare(true).unwrap();
        assert!(path.is_dir());
        // Existing directories are fine
        target.prepare(false).unwrap();
    }

    #[test]
    fn test_prepare_without_create_rejects_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let target = BackupTarget::new(temp_dir.path().join("absent")).unwrap();

        assert!(matches!(
            target.prepare(false),
            Err(LogicalBackupError::Configuration { .. })
        ));
    }

    #[test]
    fn test_prepare_rejects_file_destination() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        let target = BackupTarget::new(&file).unwrap();
        assert!(matches!(
            target.prepare(true),
            Err(LogicalBackupError::Configuration { .. })
        ));
    }
}
