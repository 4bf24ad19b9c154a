use crate::domain::model::{CommandOutput, SerialPortCreation};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// Capabilities a virtual device backend provides to its host.
#[async_trait]
pub trait VirtualDeviceService: Send + Sync {
    /// Result of the last probe for the runtime tool.
    fn nano_clr_is_installed(&self) -> bool;

    fn virtual_device_is_running(&self) -> bool;

    /// Enabled in settings, tool installed and no device running.
    fn can_start_virtual_device(&self) -> bool;

    /// Probes the tool, then installs, updates and starts the device as the settings ask.
    async fn init_virtual_device(&self) -> Result<()>;

    async fn install_nano_clr_tool(&self) -> Result<()>;

    /// Updates the tool package when a newer one is published, then refreshes the runtime instance.
    async fn update_nano_clr(&self) -> Result<()>;

    /// Raw listing printed by the tool.
    async fn list_virtual_serial_ports(&self) -> Result<String>;

    /// `Err` only when the command could not be run; a refusal by the tool
    /// comes back as `created == false` with its output in the log.
    async fn create_virtual_serial_port(&self, port_name: &str) -> Result<SerialPortCreation>;

    /// Pass `shutdown_processing = false` for an ordinary stop. `true` is for
    /// host shutdown: the process is killed without waiting and no device
    /// rescan is requested.
    async fn stop_virtual_device(&self, shutdown_processing: bool) -> Result<()>;

    async fn start_virtual_device(&self, rescan_devices: bool) -> bool;
}

/// Runs external programs.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs to completion and captures output.
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;

    /// Starts a long-running process without capturing output.
    fn spawn(&self, program: &str, args: &[String]) -> Result<Box<dyn ProcessHandle>>;
}

#[async_trait]
pub trait ProcessHandle: Send {
    fn id(&self) -> Option<u32>;

    fn has_exited(&mut self) -> Result<bool>;

    fn start_kill(&mut self) -> Result<()>;

    /// Exit code, `None` when terminated by a signal.
    async fn wait(&mut self) -> Result<Option<i32>>;
}

/// Hook the host uses to look for devices again after the device set changed.
#[async_trait]
pub trait DeviceScanner: Send + Sync {
    async fn rescan(&self) -> Result<()>;
}

pub trait DeviceSettings: Send + Sync {
    fn virtual_device_enabled(&self) -> bool;
    fn auto_start(&self) -> bool;
    fn serial_port(&self) -> &str;
    fn create_port_if_missing(&self) -> bool;
    fn startup_grace_ms(&self) -> u64;
    fn stop_timeout_ms(&self) -> u64;
    fn monitor_parent(&self) -> bool;

    fn dotnet_path(&self) -> &str;
    fn nanoclr_path(&self) -> &str;
    fn package_id(&self) -> &str;
    fn auto_install(&self) -> bool;
    fn auto_update(&self) -> bool;
    fn preview(&self) -> bool;
    fn local_instance(&self) -> Option<&Path>;
    fn nuget_feed(&self) -> &str;
    fn request_timeout_seconds(&self) -> u64;
}
