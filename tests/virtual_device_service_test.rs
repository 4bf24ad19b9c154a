use async_trait::async_trait;
use httpmock::prelude::*;
use nano_vdev::core::{CommandOutput, CommandRunner, DeviceScanner, ProcessHandle};
use nano_vdev::{NanoClrService, Result, TomlConfig, VdevError, VirtualDeviceService};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const TOOL_LIST: &str = "dotnet tool list -g";
const PORT_LIST: &str = "nanoclr virtualserial --list";

fn listing_with(version: Option<&str>) -> String {
    let mut listing = "Package Id      Version      Commands\n-------------------------------------\n"
        .to_string();
    listing.push_str("dotnet-ef       8.0.4        dotnet-ef\n");
    if let Some(version) = version {
        listing.push_str(&format!("nanoclr         {}        nanoclr\n", version));
    }
    listing
}

fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        status: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

fn failed(stderr: &str) -> CommandOutput {
    CommandOutput {
        status: Some(1),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

/// Scripted runner: responses are keyed by the full command line. The last
/// queued response for a command line repeats.
#[derive(Default)]
struct FakeRunner {
    responses: Mutex<HashMap<String, VecDeque<CommandOutput>>>,
    missing_programs: Mutex<Vec<String>>,
    calls: Mutex<Vec<String>>,
    spawned: Mutex<Vec<String>>,
    exits_on_spawn: AtomicBool,
    ignores_kill: AtomicBool,
    processes: Mutex<Vec<FakeProcess>>,
}

impl FakeRunner {
    fn respond(&self, command: &str, output: CommandOutput) -> &Self {
        self.responses
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .push_back(output);
        self
    }

    fn program_missing(&self, program: &str) {
        self.missing_programs.lock().unwrap().push(program.to_string());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn called(&self, command: &str) -> bool {
        self.calls().iter().any(|c| c == command)
    }

    fn spawned(&self) -> Vec<String> {
        self.spawned.lock().unwrap().clone()
    }

    fn last_process(&self) -> FakeProcess {
        self.processes.lock().unwrap().last().cloned().unwrap()
    }
}

fn command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program.to_string())
        .chain(args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        if self.missing_programs.lock().unwrap().iter().any(|p| p == program) {
            return Err(VdevError::ToolNotFound {
                program: program.to_string(),
            });
        }

        let line = command_line(program, args);
        self.calls.lock().unwrap().push(line.clone());

        let mut responses = self.responses.lock().unwrap();
        let output = match responses.get_mut(&line) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue.front().cloned().unwrap(),
            _ => failed(&format!("unexpected command: {}", line)),
        };
        Ok(output)
    }

    fn spawn(&self, program: &str, args: &[String]) -> Result<Box<dyn ProcessHandle>> {
        self.spawned.lock().unwrap().push(command_line(program, args));

        let process = FakeProcess::default();
        if !self.exits_on_spawn.load(Ordering::SeqCst) {
            process.alive.store(true, Ordering::SeqCst);
        }
        if self.ignores_kill.load(Ordering::SeqCst) {
            process.hangs_on_wait.store(true, Ordering::SeqCst);
        }
        self.processes.lock().unwrap().push(process.clone());
        Ok(Box::new(process))
    }
}

#[derive(Clone, Default)]
struct FakeProcess {
    alive: Arc<AtomicBool>,
    killed: Arc<AtomicBool>,
    hangs_on_wait: Arc<AtomicBool>,
}

impl FakeProcess {
    fn crash(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessHandle for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(4242)
    }

    fn has_exited(&mut self) -> Result<bool> {
        Ok(!self.alive.load(Ordering::SeqCst))
    }

    fn start_kill(&mut self) -> Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn wait(&mut self) -> Result<Option<i32>> {
        if self.hangs_on_wait.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.killed.load(Ordering::SeqCst) {
            Ok(None)
        } else {
            Ok(Some(1))
        }
    }
}

#[derive(Clone, Default)]
struct CountingScanner {
    rescans: Arc<AtomicUsize>,
}

impl CountingScanner {
    fn count(&self) -> usize {
        self.rescans.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceScanner for CountingScanner {
    async fn rescan(&self) -> Result<()> {
        self.rescans.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn test_config() -> TomlConfig {
    let mut config = TomlConfig::default();
    config.virtual_device.startup_grace_ms = 10;
    config.virtual_device.stop_timeout_ms = 100;
    config.tool.auto_update = false;
    config
}

type TestService = NanoClrService<FakeRunner, CountingScanner, TomlConfig>;

fn service_with(config: TomlConfig) -> (TestService, Arc<FakeRunner>, CountingScanner) {
    let runner = Arc::new(FakeRunner::default());
    let scanner = CountingScanner::default();
    let service = NanoClrService::new(runner.clone(), scanner.clone(), config).unwrap();
    (service, runner, scanner)
}

fn installed_service(config: TomlConfig) -> (TestService, Arc<FakeRunner>, CountingScanner) {
    let (service, runner, scanner) = service_with(config);
    runner.respond(TOOL_LIST, ok(&listing_with(Some("1.2.7"))));
    (service, runner, scanner)
}

#[tokio::test]
async fn test_probe_reports_installed_version() {
    let (service, _runner, _scanner) = installed_service(test_config());

    assert!(!service.nano_clr_is_installed());
    let version = service.refresh_install_state().await.unwrap();

    assert_eq!(version.unwrap().to_string(), "1.2.7");
    assert!(service.nano_clr_is_installed());
    assert!(service.can_start_virtual_device());
}

#[tokio::test]
async fn test_probe_without_dotnet() {
    let (service, runner, _scanner) = service_with(test_config());
    runner.program_missing("dotnet");

    let result = service.refresh_install_state().await;

    assert!(matches!(result, Err(VdevError::ToolNotFound { .. })));
    assert!(!service.nano_clr_is_installed());
    // init logs the problem instead of failing
    assert!(service.init_virtual_device().await.is_ok());
}

#[tokio::test]
async fn test_install_when_missing() {
    let (service, runner, _scanner) = service_with(test_config());
    runner
        .respond(TOOL_LIST, ok(&listing_with(None)))
        .respond(TOOL_LIST, ok(&listing_with(Some("1.2.7"))))
        .respond(
            "dotnet tool install -g nanoclr",
            ok("Tool 'nanoclr' (version '1.2.7') was successfully installed."),
        );

    service.install_nano_clr_tool().await.unwrap();

    assert!(runner.called("dotnet tool install -g nanoclr"));
    assert!(service.nano_clr_is_installed());
}

#[tokio::test]
async fn test_install_is_noop_when_present() {
    let (service, runner, _scanner) = installed_service(test_config());

    service.install_nano_clr_tool().await.unwrap();

    assert_eq!(runner.calls(), vec![TOOL_LIST.to_string()]);
}

#[tokio::test]
async fn test_install_failure_surfaces_tool_output() {
    let (service, runner, _scanner) = service_with(test_config());
    runner
        .respond(TOOL_LIST, ok(&listing_with(None)))
        .respond(
            "dotnet tool install -g nanoclr",
            failed("Unable to find package nanoclr."),
        );

    let err = service.install_nano_clr_tool().await.unwrap_err();

    match err {
        VdevError::CommandFailed { command, output, .. } => {
            assert_eq!(command, "dotnet tool install -g nanoclr");
            assert!(output.contains("Unable to find package"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!service.nano_clr_is_installed());
}

fn config_with_feed(server: &MockServer) -> TomlConfig {
    let mut config = test_config();
    config.tool.nuget_feed = server.url("/v3-flatcontainer");
    config
}

#[tokio::test]
async fn test_update_installs_newer_tool_and_refreshes_instance() {
    let server = MockServer::start();
    let feed = server.mock(|when, then| {
        when.method(GET).path("/v3-flatcontainer/nanoclr/index.json");
        then.status(200)
            .json_body(serde_json::json!({ "versions": ["1.2.7", "1.3.1", "1.4.0-preview.2"] }));
    });

    let (service, runner, _scanner) = installed_service(config_with_feed(&server));
    runner
        .respond("dotnet tool update -g nanoclr", ok("Tool 'nanoclr' was successfully updated"))
        .respond("nanoclr instance --update", ok("Updated to v1.9.1.12"));

    service.update_nano_clr().await.unwrap();

    feed.assert();
    assert!(runner.called("dotnet tool update -g nanoclr"));
    assert!(runner.called("nanoclr instance --update"));
}

#[tokio::test]
async fn test_update_skips_tool_when_current() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v3-flatcontainer/nanoclr/index.json");
        then.status(200)
            .json_body(serde_json::json!({ "versions": ["1.0.0", "1.2.7"] }));
    });

    let (service, runner, _scanner) = installed_service(config_with_feed(&server));
    runner.respond("nanoclr instance --update", ok("Instance is up to date"));

    service.update_nano_clr().await.unwrap();

    assert!(!runner.called("dotnet tool update -g nanoclr"));
    assert!(runner.called("nanoclr instance --update"));
}

#[tokio::test]
async fn test_update_picks_up_revision_release() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v3-flatcontainer/nanoclr/index.json");
        then.status(200)
            .json_body(serde_json::json!({ "versions": ["1.2.7", "1.2.7.1"] }));
    });

    let (service, runner, _scanner) = installed_service(config_with_feed(&server));
    runner
        .respond("dotnet tool update -g nanoclr", ok("Tool 'nanoclr' was successfully updated"))
        .respond("nanoclr instance --update", ok("Instance is up to date"));

    service.update_nano_clr().await.unwrap();

    assert!(runner.called("dotnet tool update -g nanoclr"));
}

#[tokio::test]
async fn test_update_with_preview_channel() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v3-flatcontainer/nanoclr/index.json");
        then.status(200)
            .json_body(serde_json::json!({ "versions": ["1.2.7", "1.3.0-preview.5"] }));
    });

    let mut config = config_with_feed(&server);
    config.tool.preview = true;
    let (service, runner, _scanner) = installed_service(config);
    runner
        .respond("dotnet tool update -g nanoclr --prerelease", ok("updated"))
        .respond("nanoclr instance --update --preview", ok("updated"));

    service.update_nano_clr().await.unwrap();

    assert!(runner.called("dotnet tool update -g nanoclr --prerelease"));
    assert!(runner.called("nanoclr instance --update --preview"));
}

#[tokio::test]
async fn test_update_still_runs_when_feed_unavailable() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v3-flatcontainer/nanoclr/index.json");
        then.status(500);
    });

    let (service, runner, _scanner) = installed_service(config_with_feed(&server));
    runner
        .respond("dotnet tool update -g nanoclr", ok("Tool 'nanoclr' is up to date"))
        .respond("nanoclr instance --update", ok("ok"));

    service.update_nano_clr().await.unwrap();

    assert!(runner.called("dotnet tool update -g nanoclr"));
}

#[tokio::test]
async fn test_update_requires_installed_tool() {
    let (service, runner, _scanner) = service_with(test_config());
    runner.respond(TOOL_LIST, ok(&listing_with(None)));

    let result = service.update_nano_clr().await;

    assert!(matches!(result, Err(VdevError::NotInstalled { .. })));
}

#[tokio::test]
async fn test_list_ports() {
    let (service, runner, _scanner) = installed_service(test_config());
    runner.respond(PORT_LIST, ok("  COM30\n  COM31\n"));

    let listing = service.list_virtual_serial_ports().await.unwrap();

    assert_eq!(listing, "COM30\n  COM31");
    assert!(service.port_exists("com31").await.unwrap());
    assert!(!service.port_exists("COM3").await.unwrap());
}

#[tokio::test]
async fn test_list_ports_requires_tool() {
    let (service, runner, _scanner) = service_with(test_config());
    runner.respond(TOOL_LIST, ok(&listing_with(None)));

    let result = service.list_virtual_serial_ports().await;

    assert!(matches!(result, Err(VdevError::NotInstalled { .. })));
    assert!(!runner.called(PORT_LIST));
}

#[tokio::test]
async fn test_create_port_rejects_bad_names_without_running_anything() {
    let (service, runner, _scanner) = installed_service(test_config());

    let result = service.create_virtual_serial_port("ttyUSB0").await;

    assert!(matches!(result, Err(VdevError::InvalidPortName { .. })));
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_create_port_reports_log_for_success_and_failure() {
    let (service, runner, _scanner) = installed_service(test_config());
    runner
        .respond("nanoclr virtualserial --create COM40", ok("Virtual serial port COM40 created"))
        .respond(
            "nanoclr virtualserial --create COM41",
            failed("Port COM41 already in use"),
        );

    let created = service.create_virtual_serial_port("com40").await.unwrap();
    assert!(created.created);
    assert_eq!(created.execution_log, "Virtual serial port COM40 created");

    let refused = service.create_virtual_serial_port("COM41").await.unwrap();
    assert!(!refused.created);
    assert!(refused.execution_log.contains("already in use"));
}

#[tokio::test]
async fn test_start_creates_missing_port_and_rescans() {
    let (service, runner, scanner) = installed_service(test_config());
    runner
        .respond(PORT_LIST, ok("No virtual serial ports"))
        .respond("nanoclr virtualserial --create COM30", ok("created"));

    assert!(service.start_virtual_device(true).await);

    assert!(runner.called("nanoclr virtualserial --create COM30"));
    assert_eq!(runner.spawned(), vec!["nanoclr run --serialport COM30".to_string()]);
    assert!(service.virtual_device_is_running());
    assert!(!service.can_start_virtual_device());
    assert_eq!(scanner.count(), 1);

    let session = service.session().unwrap();
    assert_eq!(session.serial_port, "COM30");
    assert_eq!(session.pid, Some(4242));
}

#[tokio::test]
async fn test_start_refuses_second_device() {
    let (service, runner, _scanner) = installed_service(test_config());
    runner.respond(PORT_LIST, ok("COM30"));

    assert!(service.start_virtual_device(false).await);
    assert!(!service.start_virtual_device(false).await);

    assert_eq!(runner.spawned().len(), 1);
}

#[tokio::test]
async fn test_start_without_rescan_and_existing_port() {
    let (service, runner, scanner) = installed_service(test_config());
    runner.respond(PORT_LIST, ok("COM30"));

    assert!(service.start_virtual_device(false).await);

    assert!(!runner.called("nanoclr virtualserial --create COM30"));
    assert_eq!(scanner.count(), 0);
}

#[tokio::test]
async fn test_start_passes_local_instance_and_parent_pid() {
    let mut config = test_config();
    config.virtual_device.serial_port = "com12".to_string();
    config.virtual_device.monitor_parent = true;
    config.tool.local_instance = Some("/opt/nf/nanoFramework.nanoCLR.dll".into());
    let (service, runner, _scanner) = installed_service(config);
    runner.respond(PORT_LIST, ok("COM12"));

    assert!(service.start_virtual_device(false).await);

    let expected = format!(
        "nanoclr run --serialport COM12 --localinstance /opt/nf/nanoFramework.nanoCLR.dll --monitorparentpid {}",
        std::process::id()
    );
    assert_eq!(runner.spawned(), vec![expected]);
}

#[tokio::test]
async fn test_start_fails_when_not_installed() {
    let (service, runner, _scanner) = service_with(test_config());
    runner.respond(TOOL_LIST, ok(&listing_with(None)));

    assert!(!service.start_virtual_device(true).await);
    assert!(runner.spawned().is_empty());
}

#[tokio::test]
async fn test_start_fails_when_disabled() {
    let mut config = test_config();
    config.virtual_device.enabled = false;
    let (service, runner, _scanner) = installed_service(config);
    service.refresh_install_state().await.unwrap();

    assert!(!service.can_start_virtual_device());
    assert!(!service.start_virtual_device(true).await);
    assert!(runner.spawned().is_empty());
}

#[tokio::test]
async fn test_start_fails_when_port_missing_and_creation_disabled() {
    let mut config = test_config();
    config.virtual_device.create_port_if_missing = false;
    let (service, runner, scanner) = installed_service(config);
    runner.respond(PORT_LIST, ok(""));

    assert!(!service.start_virtual_device(true).await);
    assert!(runner.spawned().is_empty());
    assert_eq!(scanner.count(), 0);
}

#[tokio::test]
async fn test_start_fails_when_port_creation_refused() {
    let (service, runner, _scanner) = installed_service(test_config());
    runner
        .respond(PORT_LIST, ok(""))
        .respond("nanoclr virtualserial --create COM30", failed("driver missing"));

    assert!(!service.start_virtual_device(true).await);
    assert!(runner.spawned().is_empty());
}

#[tokio::test]
async fn test_start_fails_when_process_exits_during_startup() {
    let (service, runner, scanner) = installed_service(test_config());
    runner.respond(PORT_LIST, ok("COM30"));
    runner.exits_on_spawn.store(true, Ordering::SeqCst);

    assert!(!service.start_virtual_device(true).await);

    assert_eq!(runner.spawned().len(), 1);
    assert!(!service.virtual_device_is_running());
    assert_eq!(scanner.count(), 0);
}

#[tokio::test]
async fn test_crashed_device_is_reaped() {
    let (service, runner, _scanner) = installed_service(test_config());
    runner.respond(PORT_LIST, ok("COM30"));
    assert!(service.start_virtual_device(false).await);

    runner.last_process().crash();

    assert!(!service.virtual_device_is_running());
    assert!(service.session().is_none());
    assert!(service.can_start_virtual_device());
}

#[tokio::test]
async fn test_stop_kills_and_rescans() {
    let (service, runner, scanner) = installed_service(test_config());
    runner.respond(PORT_LIST, ok("COM30"));
    assert!(service.start_virtual_device(false).await);

    service.stop_virtual_device(false).await.unwrap();

    assert!(runner.last_process().was_killed());
    assert!(!service.virtual_device_is_running());
    assert_eq!(scanner.count(), 1);
}

#[tokio::test]
async fn test_stop_gives_up_after_timeout_and_rescans() {
    let (service, runner, scanner) = installed_service(test_config());
    runner.respond(PORT_LIST, ok("COM30"));
    runner.ignores_kill.store(true, Ordering::SeqCst);
    assert!(service.start_virtual_device(false).await);

    let started = std::time::Instant::now();
    service.stop_virtual_device(false).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= std::time::Duration::from_millis(100));
    assert!(elapsed < std::time::Duration::from_secs(2));
    assert!(runner.last_process().was_killed());
    assert!(!service.virtual_device_is_running());
    assert_eq!(scanner.count(), 1);
}

#[tokio::test]
async fn test_stop_during_shutdown_skips_rescan() {
    let (service, runner, scanner) = installed_service(test_config());
    runner.respond(PORT_LIST, ok("COM30"));
    assert!(service.start_virtual_device(false).await);

    service.stop_virtual_device(true).await.unwrap();

    assert!(runner.last_process().was_killed());
    assert!(!service.virtual_device_is_running());
    assert_eq!(scanner.count(), 0);
}

#[tokio::test]
async fn test_stop_without_device_is_noop() {
    let (service, _runner, scanner) = installed_service(test_config());

    service.stop_virtual_device(false).await.unwrap();

    assert_eq!(scanner.count(), 0);
}

#[tokio::test]
async fn test_update_refused_while_running() {
    let (service, runner, _scanner) = installed_service(test_config());
    runner.respond(PORT_LIST, ok("COM30"));
    assert!(service.start_virtual_device(false).await);

    let result = service.update_nano_clr().await;

    assert!(matches!(result, Err(VdevError::DeviceError { .. })));
    assert!(!runner.called("nanoclr instance --update"));
}

#[tokio::test]
async fn test_init_disabled_does_nothing() {
    let mut config = test_config();
    config.virtual_device.enabled = false;
    let (service, runner, _scanner) = service_with(config);

    service.init_virtual_device().await.unwrap();

    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_init_installs_and_starts() {
    let mut config = test_config();
    config.virtual_device.auto_start = true;
    let (service, runner, scanner) = service_with(config);
    runner
        .respond(TOOL_LIST, ok(&listing_with(None)))
        .respond(TOOL_LIST, ok(&listing_with(None)))
        .respond(TOOL_LIST, ok(&listing_with(Some("1.2.7"))))
        .respond("dotnet tool install -g nanoclr", ok("installed"))
        .respond(PORT_LIST, ok("COM30"));

    service.init_virtual_device().await.unwrap();

    assert!(runner.called("dotnet tool install -g nanoclr"));
    assert!(service.virtual_device_is_running());
    assert_eq!(scanner.count(), 1);
}

#[tokio::test]
async fn test_init_without_auto_install_leaves_tool_missing() {
    let mut config = test_config();
    config.tool.auto_install = false;
    config.virtual_device.auto_start = true;
    let (service, runner, _scanner) = service_with(config);
    runner.respond(TOOL_LIST, ok(&listing_with(None)));

    service.init_virtual_device().await.unwrap();

    assert!(!runner.called("dotnet tool install -g nanoclr"));
    assert!(runner.spawned().is_empty());
}

#[tokio::test]
async fn test_init_tolerates_update_failure() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v3-flatcontainer/nanoclr/index.json");
        then.status(200)
            .json_body(serde_json::json!({ "versions": ["1.2.7"] }));
    });

    let mut config = config_with_feed(&server);
    config.tool.auto_update = true;
    config.virtual_device.auto_start = true;
    let (service, runner, _scanner) = installed_service(config);
    runner
        .respond("nanoclr instance --update", failed("network unreachable"))
        .respond(PORT_LIST, ok("COM30"));

    service.init_virtual_device().await.unwrap();

    assert!(runner.called("nanoclr instance --update"));
    assert!(service.virtual_device_is_running());
}
