use clap::Parser;
use nano_vdev::config::{Command, PortsCommand};
use nano_vdev::core::DeviceSettings;
use nano_vdev::utils::error::ErrorSeverity;
use nano_vdev::utils::monitor::{self, DeviceMonitor};
use nano_vdev::utils::{logger, validation::Validate};
use nano_vdev::{
    CliConfig, NanoClrService, SerialPortScanner, TokioCommandRunner, TomlConfig, VdevError,
    VirtualDeviceService,
};
use std::sync::Arc;
use std::time::Duration;

type Service = NanoClrService<TokioCommandRunner, SerialPortScanner<TokioCommandRunner>, TomlConfig>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    logger::init_cli_logger(cli.verbose, cli.json_logs);
    tracing::debug!("CLI config: {:?}", cli);

    let mut config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load configuration: {}", e);
            eprintln!("💡 {}", e.recovery_suggestion());
            std::process::exit(1);
        }
    };
    cli.apply_overrides(&mut config);

    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    let runner = Arc::new(if cli.detach_device() {
        TokioCommandRunner::detached()
    } else {
        TokioCommandRunner::new()
    });
    let scanner = SerialPortScanner::new(runner.clone(), config.nanoclr_path());
    let service = NanoClrService::new(runner, scanner, config)?;

    if let Err(e) = execute(&service, cli.command).await {
        tracing::error!(
            "❌ {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 {}", e.recovery_suggestion());

        let exit_code = match e.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        };

        if exit_code > 0 {
            std::process::exit(exit_code);
        }
    }

    Ok(())
}

async fn execute(service: &Service, command: Command) -> Result<(), VdevError> {
    match command {
        Command::Status => show_status(service).await,
        Command::Install => {
            service.install_nano_clr_tool().await?;
            println!("✅ {} is installed", service.settings().package_id());
            Ok(())
        }
        Command::Update => {
            service.update_nano_clr().await?;
            if let Some(version) = service.installed_version() {
                println!("✅ {} {}", service.settings().package_id(), version);
            }
            Ok(())
        }
        Command::Init => {
            service.init_virtual_device().await?;
            if service.virtual_device_is_running() {
                run_until_interrupted(service).await?;
            }
            Ok(())
        }
        Command::Ports { action } => match action {
            PortsCommand::List => {
                let listing = service.list_virtual_serial_ports().await?;
                println!("{}", listing);
                Ok(())
            }
            PortsCommand::Create { name } => {
                let creation = service.create_virtual_serial_port(&name).await?;
                if !creation.execution_log.is_empty() {
                    println!("{}", creation.execution_log);
                }
                if creation.created {
                    println!("✅ Virtual serial port {} created", name.to_ascii_uppercase());
                    Ok(())
                } else {
                    Err(VdevError::device(format!(
                        "virtual serial port {} was not created",
                        name
                    )))
                }
            }
        },
        Command::Start {
            no_rescan,
            background,
        } => {
            if !service.start_virtual_device(!no_rescan).await {
                return Err(VdevError::device("virtual device did not start"));
            }
            if background {
                if let Some(session) = service.session() {
                    println!(
                        "✅ Virtual device running on {} (pid {:?}); stop it with `nano-vdev stop`",
                        session.serial_port, session.pid
                    );
                }
                return Ok(());
            }
            run_until_interrupted(service).await
        }
        Command::Stop => stop_stray_devices(service.settings().nanoclr_path()),
    }
}

async fn show_status(service: &Service) -> Result<(), VdevError> {
    let settings = service.settings();
    println!("📋 Virtual device status:");
    println!("  Enabled: {}", settings.virtual_device_enabled());
    println!("  Serial port: {}", settings.serial_port());

    match service.refresh_install_state().await {
        Ok(Some(version)) => println!("  {}: {}", settings.package_id(), version),
        Ok(None) => println!("  {}: not installed", settings.package_id()),
        Err(e) => println!("  {}: unknown ({})", settings.package_id(), e),
    }

    let pids = monitor::find_device_processes(settings.nanoclr_path());
    if pids.is_empty() {
        println!("  Running devices: none");
    }
    for pid in pids {
        println!("  Running device: pid {}", pid);
        let monitor = DeviceMonitor::new(pid, true);
        if let Some(stats) = monitor.stats() {
            println!(
                "    CPU: {:.1}%, Memory: {}MB ({:.1}%)",
                stats.cpu_usage, stats.memory_usage_mb, stats.memory_usage_percent
            );
        }
    }

    Ok(())
}

async fn run_until_interrupted(service: &Service) -> Result<(), VdevError> {
    let Some(session) = service.session() else {
        return Err(VdevError::device("virtual device is not running"));
    };
    println!(
        "✅ Virtual device running on {} since {} (Ctrl-C to stop)",
        session.serial_port,
        session.started_at.format("%H:%M:%S")
    );

    let monitor = session
        .pid
        .map(|pid| DeviceMonitor::new(pid, service.settings().monitoring_enabled()));
    let mut ticker = tokio::time::interval(Duration::from_secs(30));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                service.stop_virtual_device(true).await?;
                println!("⏹️ Virtual device stopped");
                return Ok(());
            }
            _ = ticker.tick() => {
                if !service.virtual_device_is_running() {
                    return Err(VdevError::device("virtual device exited unexpectedly"));
                }
                if let Some(monitor) = &monitor {
                    monitor.log_stats("Virtual device");
                }
            }
        }
    }
}

/// A separate invocation does not own the device process, so stop works from the process table.
fn stop_stray_devices(nanoclr_path: &str) -> Result<(), VdevError> {
    let pids = monitor::find_device_processes(nanoclr_path);
    if pids.is_empty() {
        println!("No virtual device running");
        return Ok(());
    }

    for pid in pids {
        if monitor::kill_process(pid) {
            tracing::info!("⏹️ Stopped virtual device (pid {})", pid);
            println!("⏹️ Stopped virtual device (pid {})", pid);
        } else {
            tracing::warn!("⚠️ Could not stop pid {}", pid);
        }
    }
    Ok(())
}
