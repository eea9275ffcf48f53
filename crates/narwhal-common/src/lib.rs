// Re-export dependencies used in public interfaces of common types

pub use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod model;

pub use model::{
    BasicContainerStatistics, BasicResourceUsage, LogQuery, NodeResourceUsage, Resources,
    ResourceUsage, SimpleCreateRequest, SimpleHostConfig, DEFAULT_LOG_LINES,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NarwhalError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Failed to pull image {image}: {message}")]
    Pull { image: String, message: String },

    #[error("Failed to create container: {0}")]
    Create(String),

    /// The container exists but could not be started. It is left in place so
    /// the caller can retry the start or remove it.
    #[error("Failed to start container {container_id}: {message}")]
    Start {
        container_id: String,
        message: String,
    },

    #[error("Failed to stop container: {0}")]
    Stop(String),

    #[error("Failed to remove container: {0}")]
    Remove(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Container {0} is not running")]
    NotRunning(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl NarwhalError {
    /// Stable discriminator used in error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            NarwhalError::NotFound(_) => "not_found",
            NarwhalError::Engine(_) => "engine_error",
            NarwhalError::Pull { .. } => "pull_error",
            NarwhalError::Create(_) => "create_error",
            NarwhalError::Start { .. } => "start_error",
            NarwhalError::Stop(_) => "stop_error",
            NarwhalError::Remove(_) => "remove_error",
            NarwhalError::Cancelled(_) => "cancelled",
            NarwhalError::Validation(_) => "validation_error",
            NarwhalError::NotRunning(_) => "not_running",
            NarwhalError::Config(_) => "config_error",
        }
    }

    /// Id of a container left behind by a partially failed operation.
    pub fn container_id(&self) -> Option<&str> {
        match self {
            NarwhalError::Start { container_id, .. } if !container_id.is_empty() => {
                Some(container_id)
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, NarwhalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_error_keeps_container_id() {
        let err = NarwhalError::Start {
            container_id: "abc123".to_string(),
            message: "port is already allocated".to_string(),
        };
        assert_eq!(err.kind(), "start_error");
        assert_eq!(err.container_id(), Some("abc123"));
        assert!(err.to_string().contains("abc123"));
        assert!(err.to_string().contains("port is already allocated"));
    }

    #[test]
    fn test_other_errors_carry_no_container_id() {
        assert_eq!(NarwhalError::Create("conflict".into()).container_id(), None);
        assert_eq!(NarwhalError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(
            NarwhalError::Pull {
                image: "alpine".into(),
                message: "denied".into()
            }
            .kind(),
            "pull_error"
        );
    }
}
