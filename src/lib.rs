pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use config::TomlConfig;
pub use core::{
    runner::TokioCommandRunner,
    scanner::{NoopScanner, SerialPortScanner},
    service::NanoClrService,
};
pub use domain::ports::VirtualDeviceService;
pub use utils::error::{Result, VdevError};
