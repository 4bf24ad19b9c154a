// Domain layer: models and ports. Concrete process, feed and settings adapters live in core and config.

pub mod model;
pub mod ports;
