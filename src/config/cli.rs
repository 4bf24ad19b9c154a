use crate::config::toml_config::{TomlConfig, DEFAULT_CONFIG_FILE};
use crate::utils::error::Result;
use clap::{Parser, Subcommand};

#[derive(Debug, Clone, Parser)]
#[command(name = "nano-vdev")]
#[command(about = "Manage the nanoCLR virtual device and its virtual serial ports")]
pub struct CliConfig {
    /// Path to TOML configuration file; must exist when given.
    /// Without it `nano-vdev.toml` is read if present
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[arg(short, long, help = "Enable verbose output", global = true)]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON", global = true)]
    pub json_logs: bool,

    /// Override the virtual serial port from the config file
    #[arg(long, global = true)]
    pub serial_port: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Show tool installation and device state
    Status,
    /// Install the nanoclr .NET global tool
    Install,
    /// Update the tool and the nanoCLR runtime instance
    Update,
    /// Probe, install, update and start as configured
    Init,
    /// Virtual serial port management
    Ports {
        #[command(subcommand)]
        action: PortsCommand,
    },
    /// Start the virtual device and keep it running until Ctrl-C
    Start {
        /// Skip the device rescan after start
        #[arg(long)]
        no_rescan: bool,
        /// Leave the device running and return once it has started
        #[arg(long)]
        background: bool,
    },
    /// Stop the virtual device
    Stop,
}

#[derive(Debug, Clone, Subcommand)]
pub enum PortsCommand {
    /// List virtual serial ports
    List,
    /// Create a virtual serial port
    Create { name: String },
}

impl CliConfig {
    pub fn load_config(&self) -> Result<TomlConfig> {
        match &self.config {
            Some(path) => TomlConfig::from_file(path),
            None => TomlConfig::load_or_default(DEFAULT_CONFIG_FILE),
        }
    }

    /// Whether spawned device processes must outlive this invocation.
    pub fn detach_device(&self) -> bool {
        matches!(
            self.command,
            Command::Start {
                background: true,
                ..
            }
        )
    }

    pub fn apply_overrides(&self, config: &mut TomlConfig) {
        if let Some(port) = &self.serial_port {
            tracing::info!("🔧 Serial port overridden to: {}", port);
            config.virtual_device.serial_port = port.clone();
        }
    }
}
