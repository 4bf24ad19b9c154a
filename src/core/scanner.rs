use crate::core::runner::display_command;
use crate::domain::ports::{CommandRunner, DeviceScanner};
use crate::utils::error::{Result, VdevError};
use async_trait::async_trait;
use std::sync::Arc;

/// Rescan for hosts without device discovery of their own: re-lists the
/// virtual serial ports so the new state shows up in the log.
pub struct SerialPortScanner<R: CommandRunner> {
    runner: Arc<R>,
    nanoclr_path: String,
}

impl<R: CommandRunner> SerialPortScanner<R> {
    pub fn new(runner: Arc<R>, nanoclr_path: impl Into<String>) -> Self {
        Self {
            runner,
            nanoclr_path: nanoclr_path.into(),
        }
    }
}

#[async_trait]
impl<R: CommandRunner> DeviceScanner for SerialPortScanner<R> {
    async fn rescan(&self) -> Result<()> {
        let args = vec!["virtualserial".to_string(), "--list".to_string()];
        let output = self.runner.run(&self.nanoclr_path, &args).await?;
        if !output.success() {
            return Err(VdevError::CommandFailed {
                command: display_command(&self.nanoclr_path, &args),
                status: output.status,
                output: output.combined(),
            });
        }

        let listing = output.combined();
        if listing.is_empty() {
            tracing::info!("🔎 Device rescan: no virtual serial ports reported");
        } else {
            tracing::info!("🔎 Device rescan:\n{}", listing);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct NoopScanner;

#[async_trait]
impl DeviceScanner for NoopScanner {
    async fn rescan(&self) -> Result<()> {
        tracing::debug!("Device rescan requested, nothing to do");
        Ok(())
    }
}
