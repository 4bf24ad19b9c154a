use crate::domain::model::CommandOutput;
use crate::domain::ports::{CommandRunner, ProcessHandle};
use crate::utils::error::{Result, VdevError};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Renders a command line for logs and error messages.
pub fn display_command(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

fn spawn_error(program: &str, e: std::io::Error) -> VdevError {
    if e.kind() == std::io::ErrorKind::NotFound {
        VdevError::ToolNotFound {
            program: program.to_string(),
        }
    } else {
        VdevError::IoError(e)
    }
}

/// `detached` runners leave spawned processes running when their handle is
/// dropped; otherwise dropping the handle kills the process.
#[derive(Debug, Clone, Default)]
pub struct TokioCommandRunner {
    detached: bool,
}

impl TokioCommandRunner {
    pub fn new() -> Self {
        Self { detached: false }
    }

    pub fn detached() -> Self {
        Self { detached: true }
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        tracing::debug!("Running: {}", display_command(program, args));

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| spawn_error(program, e))?;

        let result = CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::debug!("Exit status: {:?}", result.status);

        Ok(result)
    }

    fn spawn(&self, program: &str, args: &[String]) -> Result<Box<dyn ProcessHandle>> {
        tracing::debug!("Spawning: {}", display_command(program, args));

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(!self.detached)
            .spawn()
            .map_err(|e| spawn_error(program, e))?;

        Ok(Box::new(TokioProcess { child }))
    }
}

pub struct TokioProcess {
    child: Child,
}

#[async_trait]
impl ProcessHandle for TokioProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn has_exited(&mut self) -> Result<bool> {
        Ok(self.child.try_wait()?.is_some())
    }

    fn start_kill(&mut self) -> Result<()> {
        match self.child.start_kill() {
            Ok(()) => Ok(()),
            // already reaped
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(VdevError::IoError(e)),
        }
    }

    async fn wait(&mut self) -> Result<Option<i32>> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }
}
