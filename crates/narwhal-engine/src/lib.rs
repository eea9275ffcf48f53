use std::sync::Arc;

// Re-export dependencies potentially needed by consumers (like the server)
pub use bollard;
pub use narwhal_common as common;

pub mod config;
pub mod engine;
mod error;
pub mod images;
pub mod logs;
pub mod ports;
pub mod request;
pub mod service;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::EngineConfig;
pub use engine::{BollardEngine, EngineClient, LogChunk, LogRequest, LogSource, LogStream};
pub use images::{ImageResolver, ImageStatus};
pub use logs::LogGateway;
pub use ports::translate_port_bindings;
pub use request::AdvancedCreateRequest;
pub use service::ContainerService;

/// Connects to the local engine and builds the service around it.
///
/// Failing to construct the engine client is fatal for callers; there is no
/// per-request reconnect.
pub fn connect(config: EngineConfig) -> common::Result<ContainerService> {
    config.validate()?;
    let engine = BollardEngine::connect().map_err(|e| {
        common::NarwhalError::Config(format!("failed to create engine client: {e}"))
    })?;
    Ok(ContainerService::new(Arc::new(engine), config))
}
