use thiserror::Error;

#[derive(Error, Debug)]
pub enum LogicalBackupError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("External tool not found: {program}")]
    ToolNotFound { program: String },

    #[error("{program} exited with {}", describe_exit(*.exit_code))]
    ToolExecutionFailure {
        program: String,
        exit_code: Option<i32>,
        diagnostic: Vec<String>,
    },

    #[error("Unexpected error while running {context}: {message}")]
    Unexpected { context: String, message: String },

    #[error("Another operation is already running")]
    Busy,

    #[error("Operation was cancelled by user")]
    Cancelled,

    #[error("IO operation failed: {0}")]
    Io(#[from] std::io::Error),
}

impl LogicalBackupError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        LogicalBackupError::Configuration {
            message: message.into(),
        }
    }

    pub fn unexpected<C: Into<String>, M: std::fmt::Display>(context: C, message: M) -> Self {
        LogicalBackupError::Unexpected {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Process exit code the terminal front-end reports for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            LogicalBackupError::Configuration { .. } => 2,
            LogicalBackupError::ToolNotFound { .. } => 3,
            LogicalBackupError::ToolExecutionFailure { .. } => 4,
            LogicalBackupError::Busy => 5,
            LogicalBackupError::Cancelled => 130, // Interrupted (SIGINT)
            _ => 1,
        }
    }
}

pub trait UserFriendlyError {
    fn user_message(&self) -> String;
    fn suggestion(&self) -> Option<String>;
}

impl UserFriendlyError for LogicalBackupError {
    fn user_message(&self) -> String {
        match self {
            LogicalBackupError::Configuration { message } => message.clone(),
            LogicalBackupError::ToolNotFound { program } => {
                format!("Could not find '{}' on this system", program)
            }
            LogicalBackupError::ToolExecutionFailure {
                program,
                exit_code,
                diagnostic,
            } => {
                let mut message = format!("{} failed ({})", program, describe_exit(*exit_code));
                if let Some(last) = diagnostic.iter().rev().find(|l| !l.trim().is_empty()) {
                    message.push_str(&format!(": {}", last.trim()));
                }
                message
            }
            LogicalBackupError::Unexpected { context, message } => {
                format!("Unexpected error while running {}: {}", context, message)
            }
            LogicalBackupError::Busy => {
                "An operation is already running, wait for it to finish".to_string()
            }
            LogicalBackupError::Cancelled => "Operation was cancelled by user".to_string(),
            _ => self.to_string(),
        }
    }

    fn suggestion(&self) -> Option<String> {
        match self {
            LogicalBackupError::Configuration { .. } => Some(
                "Select an operation (backup or list-devices) and, for backups, a writable destination directory.".to_string()
            ),
            LogicalBackupError::ToolNotFound { .. } => Some(
                "Install it with `python3 -m pip install -U pymobiledevice3`, or point --tool at the executable.".to_string()
            ),
            LogicalBackupError::ToolExecutionFailure { .. } => Some(
                "Check that the device is connected, unlocked and trusts this computer, then try again.".to_string()
            ),
            LogicalBackupError::Busy => Some(
                "Only one backup or device listing can run at a time.".to_string()
            ),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for LogicalBackupError {
    fn from(error: toml::de::Error) -> Self {
        LogicalBackupError::Configuration {
            message: error.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LogicalBackupError>;

fn describe_exit(exit_code: Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}
