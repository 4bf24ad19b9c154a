use crate::domain::ports::DeviceSettings;
use crate::utils::error::{Result, VdevError};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "nano-vdev.toml";
pub const DEFAULT_NUGET_FEED: &str = "https://api.nuget.org/v3-flatcontainer";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub virtual_device: VirtualDeviceConfig,
    pub tool: ToolConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualDeviceConfig {
    pub enabled: bool,
    pub auto_start: bool,
    pub serial_port: String,
    pub create_port_if_missing: bool,
    pub startup_grace_ms: u64,
    pub stop_timeout_ms: u64,
    pub monitor_parent: bool,
}

impl Default for VirtualDeviceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_start: false,
            serial_port: "COM30".to_string(),
            create_port_if_missing: true,
            startup_grace_ms: 1500,
            stop_timeout_ms: 5000,
            monitor_parent: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub dotnet_path: String,
    pub nanoclr_path: String,
    pub package_id: String,
    pub auto_install: bool,
    pub auto_update: bool,
    pub preview: bool,
    pub local_instance: Option<PathBuf>,
    pub nuget_feed: String,
    pub request_timeout_seconds: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            dotnet_path: "dotnet".to_string(),
            nanoclr_path: "nanoclr".to_string(),
            package_id: "nanoclr".to_string(),
            auto_install: true,
            auto_update: true,
            preview: false,
            local_instance: None,
            nuget_feed: DEFAULT_NUGET_FEED.to_string(),
            request_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enabled: bool,
}

impl TomlConfig {
    /// Loads configuration from a TOML file that must exist.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => VdevError::MissingConfigError {
                path: path.display().to_string(),
            },
            _ => VdevError::ConfigError {
                message: format!("cannot read {}: {}", path.display(), e),
            },
        })?;
        Self::from_toml_str(&content)
    }

    /// Loads the file when it exists, falling back to defaults otherwise.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            tracing::debug!("Loading configuration from {}", path.display());
            Self::from_file(path)
        } else {
            tracing::debug!(
                "No configuration at {}, using defaults",
                path.display()
            );
            Ok(Self::default())
        }
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| VdevError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces environment variable placeholders such as `${NANOCLR_PATH}`.
    fn substitute_env_vars(content: &str) -> String {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").unwrap();

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        result.to_string()
    }

    pub fn validate_config(&self) -> Result<()> {
        validation::validate_serial_port_name(&self.virtual_device.serial_port).map_err(|_| {
            VdevError::InvalidConfigValueError {
                field: "virtual_device.serial_port".to_string(),
                value: self.virtual_device.serial_port.clone(),
                reason: "Expected COM followed by a number between 1 and 999".to_string(),
            }
        })?;

        validation::validate_range(
            "virtual_device.startup_grace_ms",
            self.virtual_device.startup_grace_ms,
            0,
            60_000,
        )?;

        validation::validate_path("tool.dotnet_path", &self.tool.dotnet_path)?;
        validation::validate_path("tool.nanoclr_path", &self.tool.nanoclr_path)?;
        validation::validate_non_empty_string("tool.package_id", &self.tool.package_id)?;
        validation::validate_url("tool.nuget_feed", &self.tool.nuget_feed)?;
        validation::validate_positive_number(
            "tool.request_timeout_seconds",
            self.tool.request_timeout_seconds,
            1,
        )?;

        if let Some(local_instance) = &self.tool.local_instance {
            validation::validate_path(
                "tool.local_instance",
                &local_instance.to_string_lossy(),
            )?;
        }

        Ok(())
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.enabled
    }
}

impl DeviceSettings for TomlConfig {
    fn virtual_device_enabled(&self) -> bool {
        self.virtual_device.enabled
    }

    fn auto_start(&self) -> bool {
        self.virtual_device.auto_start
    }

    fn serial_port(&self) -> &str {
        &self.virtual_device.serial_port
    }

    fn create_port_if_missing(&self) -> bool {
        self.virtual_device.create_port_if_missing
    }

    fn startup_grace_ms(&self) -> u64 {
        self.virtual_device.startup_grace_ms
    }

    fn stop_timeout_ms(&self) -> u64 {
        self.virtual_device.stop_timeout_ms
    }

    fn monitor_parent(&self) -> bool {
        self.virtual_device.monitor_parent
    }

    fn dotnet_path(&self) -> &str {
        &self.tool.dotnet_path
    }

    fn nanoclr_path(&self) -> &str {
        &self.tool.nanoclr_path
    }

    fn package_id(&self) -> &str {
        &self.tool.package_id
    }

    fn auto_install(&self) -> bool {
        self.tool.auto_install
    }

    fn auto_update(&self) -> bool {
        self.tool.auto_update
    }

    fn preview(&self) -> bool {
        self.tool.preview
    }

    fn local_instance(&self) -> Option<&Path> {
        self.tool.local_instance.as_deref()
    }

    fn nuget_feed(&self) -> &str {
        &self.tool.nuget_feed
    }

    fn request_timeout_seconds(&self) -> u64 {
        self.tool.request_timeout_seconds
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
