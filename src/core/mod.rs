pub mod nuget;
pub mod runner;
pub mod scanner;
pub mod service;
pub mod tool_list;

pub use crate::domain::model::{
    CommandOutput, DeviceSession, InstalledTool, SerialPortCreation, ToolVersion,
};
pub use crate::domain::ports::{
    CommandRunner, DeviceScanner, DeviceSettings, ProcessHandle, VirtualDeviceService,
};
pub use crate::utils::error::Result;
