use thiserror::Error;

#[derive(Error, Debug)]
pub enum VdevError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Configuration file not found: {path}")]
    MissingConfigError { path: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Program '{program}' was not found")]
    ToolNotFound { program: String },

    #[error("Runtime tool '{package_id}' is not installed")]
    NotInstalled { package_id: String },

    #[error("Command '{command}' failed (exit status {status:?}): {output}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        output: String,
    },

    #[error("Invalid serial port name '{name}'")]
    InvalidPortName { name: String },

    #[error("Package feed error: {message}")]
    FeedError { message: String },

    #[error("Virtual device error: {message}")]
    DeviceError { message: String },
}

pub type Result<T> = std::result::Result<T, VdevError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Environment,
    Network,
    Process,
    Device,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl VdevError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            VdevError::ConfigError { .. }
            | VdevError::ConfigValidationError { .. }
            | VdevError::MissingConfigError { .. }
            | VdevError::InvalidConfigValueError { .. }
            | VdevError::InvalidPortName { .. } => ErrorCategory::Configuration,
            VdevError::IoError(_)
            | VdevError::ToolNotFound { .. }
            | VdevError::NotInstalled { .. } => ErrorCategory::Environment,
            VdevError::HttpError(_)
            | VdevError::SerializationError(_)
            | VdevError::FeedError { .. } => ErrorCategory::Network,
            VdevError::CommandFailed { .. } => ErrorCategory::Process,
            VdevError::DeviceError { .. } => ErrorCategory::Device,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            VdevError::FeedError { .. } => ErrorSeverity::Low,
            VdevError::HttpError(_)
            | VdevError::SerializationError(_)
            | VdevError::CommandFailed { .. }
            | VdevError::DeviceError { .. } => ErrorSeverity::Medium,
            VdevError::ConfigError { .. }
            | VdevError::ConfigValidationError { .. }
            | VdevError::MissingConfigError { .. }
            | VdevError::InvalidConfigValueError { .. }
            | VdevError::InvalidPortName { .. }
            | VdevError::NotInstalled { .. } => ErrorSeverity::High,
            VdevError::IoError(_) | VdevError::ToolNotFound { .. } => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            VdevError::ToolNotFound { program } => format!(
                "Make sure '{}' is installed and on PATH, or set its location in the [tool] section",
                program
            ),
            VdevError::NotInstalled { .. } => {
                "Run `nano-vdev install` to install the runtime tool".to_string()
            }
            VdevError::InvalidPortName { .. } => {
                "Use a port name like COM30 (COM followed by a number)".to_string()
            }
            VdevError::CommandFailed { .. } => {
                "Inspect the command output above and retry; run with --verbose for details"
                    .to_string()
            }
            VdevError::HttpError(_) | VdevError::FeedError { .. } => {
                "Check network access to the package feed or disable auto_update".to_string()
            }
            VdevError::MissingConfigError { path } => format!(
                "Create '{}' or drop --config to run with defaults",
                path
            ),
            VdevError::ConfigValidationError { .. } => {
                "Check the TOML syntax and value types in the configuration file".to_string()
            }
            VdevError::ConfigError { .. } | VdevError::InvalidConfigValueError { .. } => {
                "Fix the configuration file and try again".to_string()
            }
            VdevError::DeviceError { .. } => {
                "Stop any running virtual device and start it again".to_string()
            }
            VdevError::IoError(_) | VdevError::SerializationError(_) => {
                "Check file permissions and available disk space".to_string()
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            VdevError::ToolNotFound { program } => {
                format!("Could not find '{}' on this machine", program)
            }
            VdevError::NotInstalled { package_id } => {
                format!("The '{}' tool is not installed", package_id)
            }
            VdevError::CommandFailed {
                command, output, ..
            } => {
                if output.is_empty() {
                    format!("'{}' did not complete successfully", command)
                } else {
                    format!("'{}' did not complete successfully:\n{}", command, output)
                }
            }
            other => other.to_string(),
        }
    }

    pub fn device(message: impl Into<String>) -> Self {
        VdevError::DeviceError {
            message: message.into(),
        }
    }
}
