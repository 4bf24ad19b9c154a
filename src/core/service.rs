use crate::core::nuget::NuGetClient;
use crate::core::runner::display_command;
use crate::core::tool_list::{find_tool, parse_tool_list};
use crate::domain::model::{CommandOutput, DeviceSession, SerialPortCreation, ToolVersion};
use crate::domain::ports::{
    CommandRunner, DeviceScanner, DeviceSettings, ProcessHandle, VirtualDeviceService,
};
use crate::utils::error::{Result, VdevError};
use crate::utils::validation::normalize_serial_port_name;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

struct RunningDevice {
    handle: Box<dyn ProcessHandle>,
    session: DeviceSession,
}

#[derive(Default)]
struct ServiceState {
    installed: bool,
    installed_version: Option<ToolVersion>,
    device: Option<RunningDevice>,
}

/// Drives the `nanoclr` .NET tool: installs and updates it, manages virtual
/// serial ports and owns at most one running virtual device process.
pub struct NanoClrService<R: CommandRunner, D: DeviceScanner, S: DeviceSettings> {
    runner: Arc<R>,
    scanner: D,
    settings: S,
    nuget: NuGetClient,
    state: Mutex<ServiceState>,
    // serializes install, update, start and stop
    lifecycle: tokio::sync::Mutex<()>,
}

impl<R: CommandRunner, D: DeviceScanner, S: DeviceSettings> NanoClrService<R, D, S> {
    pub fn new(runner: Arc<R>, scanner: D, settings: S) -> Result<Self> {
        let nuget = NuGetClient::new(
            settings.nuget_feed(),
            Duration::from_secs(settings.request_timeout_seconds()),
        )?;

        Ok(Self {
            runner,
            scanner,
            settings,
            nuget,
            state: Mutex::new(ServiceState::default()),
            lifecycle: tokio::sync::Mutex::new(()),
        })
    }

    pub fn settings(&self) -> &S {
        &self.settings
    }

    pub fn installed_version(&self) -> Option<ToolVersion> {
        self.state().installed_version.clone()
    }

    /// The running device, if any. Reaps an exited process first.
    pub fn session(&self) -> Option<DeviceSession> {
        if !self.virtual_device_is_running() {
            return None;
        }
        self.state()
            .device
            .as_ref()
            .map(|device| device.session.clone())
    }

    fn state(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Asks `dotnet tool list -g` whether the tool is installed and caches the answer.
    pub async fn refresh_install_state(&self) -> Result<Option<ToolVersion>> {
        let args = vec!["tool".to_string(), "list".to_string(), "-g".to_string()];
        let output = match self.runner.run(self.settings.dotnet_path(), &args).await {
            Ok(output) => output,
            Err(e) => {
                self.record_install_state(None);
                return Err(e);
            }
        };

        if !output.success() {
            self.record_install_state(None);
            return Err(command_failed(self.settings.dotnet_path(), &args, &output));
        }

        let tools = parse_tool_list(&output.stdout);
        let version = find_tool(&tools, self.settings.package_id()).map(|t| t.version.clone());

        match &version {
            Some(v) => tracing::debug!("{} {} is installed", self.settings.package_id(), v),
            None => tracing::debug!("{} is not installed", self.settings.package_id()),
        }

        self.record_install_state(version.clone());
        Ok(version)
    }

    fn record_install_state(&self, version: Option<ToolVersion>) {
        let mut state = self.state();
        state.installed = version.is_some();
        state.installed_version = version;
    }

    async fn ensure_installed(&self) -> Result<()> {
        if self.nano_clr_is_installed() || self.refresh_install_state().await?.is_some() {
            Ok(())
        } else {
            Err(VdevError::NotInstalled {
                package_id: self.settings.package_id().to_string(),
            })
        }
    }

    async fn run_nanoclr(&self, args: &[String]) -> Result<CommandOutput> {
        self.runner.run(self.settings.nanoclr_path(), args).await
    }

    async fn run_checked(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let output = self.runner.run(program, args).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(command_failed(program, args, &output))
        }
    }

    /// Whether `port` shows up in the tool's virtual serial port listing.
    pub async fn port_exists(&self, port: &str) -> Result<bool> {
        let listing = self.list_virtual_serial_ports().await?;
        Ok(listing_contains_port(&listing, port))
    }

    fn run_arguments(&self, port: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--serialport".to_string(),
            port.to_string(),
        ];

        if let Some(local_instance) = self.settings.local_instance() {
            args.push("--localinstance".to_string());
            args.push(local_instance.to_string_lossy().into_owned());
        }

        if self.settings.monitor_parent() {
            args.push("--monitorparentpid".to_string());
            args.push(std::process::id().to_string());
        }

        args
    }

    async fn launch(&self) -> Result<DeviceSession> {
        let port = normalize_serial_port_name(self.settings.serial_port())?;

        if !self.port_exists(&port).await? {
            if !self.settings.create_port_if_missing() {
                return Err(VdevError::device(format!(
                    "virtual serial port {} does not exist",
                    port
                )));
            }

            tracing::info!("Virtual serial port {} not found, creating it", port);
            let creation = self.create_virtual_serial_port(&port).await?;
            if !creation.created {
                return Err(VdevError::device(format!(
                    "could not create virtual serial port {}: {}",
                    port, creation.execution_log
                )));
            }
        }

        let args = self.run_arguments(&port);
        tracing::info!(
            "▶️ Starting virtual device: {}",
            display_command(self.settings.nanoclr_path(), &args)
        );
        let mut handle = self.runner.spawn(self.settings.nanoclr_path(), &args)?;

        tokio::time::sleep(Duration::from_millis(self.settings.startup_grace_ms())).await;
        if handle.has_exited()? {
            let code = handle.wait().await.ok().flatten();
            return Err(VdevError::device(format!(
                "virtual device exited during startup (exit status {:?})",
                code
            )));
        }

        let session = DeviceSession {
            pid: handle.id(),
            serial_port: port,
            started_at: Utc::now(),
        };

        self.state().device = Some(RunningDevice {
            handle,
            session: session.clone(),
        });

        Ok(session)
    }

    async fn rescan(&self) {
        if let Err(e) = self.scanner.rescan().await {
            tracing::warn!("⚠️ Device rescan failed: {}", e);
        }
    }
}

#[async_trait]
impl<R, D, S> VirtualDeviceService for NanoClrService<R, D, S>
where
    R: CommandRunner,
    D: DeviceScanner,
    S: DeviceSettings,
{
    fn nano_clr_is_installed(&self) -> bool {
        self.state().installed
    }

    fn virtual_device_is_running(&self) -> bool {
        let mut state = self.state();
        let exited = match state.device.as_mut() {
            None => return false,
            Some(device) => device.handle.has_exited().unwrap_or(true),
        };

        if exited {
            if let Some(device) = state.device.take() {
                tracing::warn!(
                    "Virtual device on {} is no longer running",
                    device.session.serial_port
                );
            }
        }
        !exited
    }

    fn can_start_virtual_device(&self) -> bool {
        self.settings.virtual_device_enabled()
            && self.nano_clr_is_installed()
            && !self.virtual_device_is_running()
    }

    async fn init_virtual_device(&self) -> Result<()> {
        if !self.settings.virtual_device_enabled() {
            tracing::info!("Virtual device is disabled in settings");
            return Ok(());
        }

        let installed = match self.refresh_install_state().await {
            Ok(installed) => installed,
            Err(e) => {
                tracing::error!("❌ Could not check for {}: {}", self.settings.package_id(), e);
                tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
                return Ok(());
            }
        };

        if installed.is_none() {
            if !self.settings.auto_install() {
                tracing::info!(
                    "{} is not installed and auto_install is off",
                    self.settings.package_id()
                );
                return Ok(());
            }
            self.install_nano_clr_tool().await?;
        }

        if self.settings.auto_update() {
            if let Err(e) = self.update_nano_clr().await {
                tracing::warn!("⚠️ Update of {} failed: {}", self.settings.package_id(), e);
            }
        }

        if self.settings.auto_start() && !self.start_virtual_device(true).await {
            tracing::warn!("⚠️ Virtual device did not start");
        }

        Ok(())
    }

    async fn install_nano_clr_tool(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        let package_id = self.settings.package_id();

        if let Some(version) = self.refresh_install_state().await? {
            tracing::info!("{} {} is already installed", package_id, version);
            return Ok(());
        }

        tracing::info!("📦 Installing {}", package_id);
        let args = vec![
            "tool".to_string(),
            "install".to_string(),
            "-g".to_string(),
            package_id.to_string(),
        ];
        let output = self.run_checked(self.settings.dotnet_path(), &args).await?;
        tracing::debug!("{}", output.combined());

        match self.refresh_install_state().await? {
            Some(version) => {
                tracing::info!("✅ Installed {} {}", package_id, version);
                Ok(())
            }
            None => Err(VdevError::NotInstalled {
                package_id: package_id.to_string(),
            }),
        }
    }

    async fn update_nano_clr(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        let package_id = self.settings.package_id();

        if self.virtual_device_is_running() {
            return Err(VdevError::device(
                "stop the virtual device before updating the runtime",
            ));
        }

        let installed = self
            .refresh_install_state()
            .await?
            .ok_or_else(|| VdevError::NotInstalled {
                package_id: package_id.to_string(),
            })?;

        let update_tool = match self
            .nuget
            .latest_version(package_id, self.settings.preview())
            .await
        {
            Ok(latest) if latest > installed => {
                tracing::info!("⬆️ {} {} is available (installed {})", package_id, latest, installed);
                true
            }
            Ok(latest) => {
                tracing::info!("{} {} is up to date (latest {})", package_id, installed, latest);
                false
            }
            Err(e) => {
                tracing::warn!("⚠️ Could not query package feed: {}", e);
                true
            }
        };

        if update_tool {
            let mut args = vec![
                "tool".to_string(),
                "update".to_string(),
                "-g".to_string(),
                package_id.to_string(),
            ];
            if self.settings.preview() {
                args.push("--prerelease".to_string());
            }
            let output = self.run_checked(self.settings.dotnet_path(), &args).await?;
            tracing::debug!("{}", output.combined());
        }

        let mut args = vec!["instance".to_string(), "--update".to_string()];
        if self.settings.preview() {
            args.push("--preview".to_string());
        }
        let output = self.run_checked(self.settings.nanoclr_path(), &args).await?;
        tracing::info!("✅ nanoCLR instance: {}", output.combined());

        self.refresh_install_state().await?;
        Ok(())
    }

    async fn list_virtual_serial_ports(&self) -> Result<String> {
        self.ensure_installed().await?;

        let args = vec!["virtualserial".to_string(), "--list".to_string()];
        let output = self.run_nanoclr(&args).await?;
        if !output.success() {
            return Err(command_failed(self.settings.nanoclr_path(), &args, &output));
        }

        Ok(output.stdout.trim().to_string())
    }

    async fn create_virtual_serial_port(&self, port_name: &str) -> Result<SerialPortCreation> {
        let port = normalize_serial_port_name(port_name)?;
        self.ensure_installed().await?;

        let args = vec![
            "virtualserial".to_string(),
            "--create".to_string(),
            port.clone(),
        ];
        let output = self.run_nanoclr(&args).await?;

        let creation = SerialPortCreation {
            created: output.success(),
            execution_log: output.combined(),
        };

        if creation.created {
            tracing::info!("✅ Created virtual serial port {}", port);
        } else {
            tracing::warn!(
                "⚠️ Creating virtual serial port {} failed (exit status {:?})",
                port,
                output.status
            );
        }

        Ok(creation)
    }

    async fn stop_virtual_device(&self, shutdown_processing: bool) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        let device = self.state().device.take();
        let Some(mut device) = device else {
            tracing::debug!("No virtual device running");
            return Ok(());
        };

        tracing::info!("⏹️ Stopping virtual device on {}", device.session.serial_port);
        device.handle.start_kill()?;

        if shutdown_processing {
            return Ok(());
        }

        let timeout = Duration::from_millis(self.settings.stop_timeout_ms());
        match tokio::time::timeout(timeout, device.handle.wait()).await {
            Ok(Ok(code)) => tracing::info!("Virtual device exited (exit status {:?})", code),
            Ok(Err(e)) => tracing::warn!("⚠️ Waiting for virtual device failed: {}", e),
            Err(_) => tracing::warn!("⚠️ Virtual device did not exit within {:?}", timeout),
        }

        self.rescan().await;
        Ok(())
    }

    async fn start_virtual_device(&self, rescan_devices: bool) -> bool {
        let _guard = self.lifecycle.lock().await;

        if !self.nano_clr_is_installed() {
            if let Err(e) = self.refresh_install_state().await {
                tracing::warn!("⚠️ Could not check for {}: {}", self.settings.package_id(), e);
            }
        }

        if !self.can_start_virtual_device() {
            tracing::warn!(
                "Cannot start virtual device (enabled: {}, installed: {}, running: {})",
                self.settings.virtual_device_enabled(),
                self.nano_clr_is_installed(),
                self.virtual_device_is_running()
            );
            return false;
        }

        match self.launch().await {
            Ok(session) => {
                tracing::info!(
                    "✅ Virtual device running on {} (pid {:?})",
                    session.serial_port,
                    session.pid
                );
            }
            Err(e) => {
                tracing::error!("❌ Virtual device failed to start: {}", e);
                tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
                return false;
            }
        }

        if rescan_devices {
            self.rescan().await;
        }

        true
    }
}

fn command_failed(program: &str, args: &[String], output: &CommandOutput) -> VdevError {
    VdevError::CommandFailed {
        command: display_command(program, args),
        status: output.status,
        output: output.combined(),
    }
}

fn listing_contains_port(listing: &str, port: &str) -> bool {
    listing
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| token.eq_ignore_ascii_case(port))
}
