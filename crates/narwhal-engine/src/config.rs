use std::time::Duration;

use narwhal_common::{NarwhalError, Result};

/// Timing knobs for engine calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long the engine waits after a stop request before killing the container.
    pub stop_timeout: Duration,
    /// Deadline for each single engine call.
    pub request_timeout: Duration,
    /// Deadline for pulling one image, including draining its progress stream.
    pub pull_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            pull_timeout: Duration::from_secs(600),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() || self.pull_timeout.is_zero() {
            return Err(NarwhalError::Config(
                "request and pull timeouts must be non-zero".to_string(),
            ));
        }
        // A stop call blocks for up to the grace period.
        if self.request_timeout <= self.stop_timeout {
            return Err(NarwhalError::Config(format!(
                "request timeout ({}s) must exceed the stop timeout ({}s)",
                self.request_timeout.as_secs(),
                self.stop_timeout.as_secs()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.stop_timeout, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_request_timeout_must_cover_stop() {
        let config = EngineConfig {
            stop_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(NarwhalError::Config(_))));
    }

    #[test]
    fn test_zero_timeouts_are_rejected() {
        let config = EngineConfig {
            pull_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
