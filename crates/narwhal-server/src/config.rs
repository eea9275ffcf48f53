use std::str::FromStr;
use std::time::Duration;

use narwhal_common::{NarwhalError, Result};
use narwhal_engine::EngineConfig;

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Reads `NARWHAL_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Unset keys keep their defaults;
    /// set but unparsable keys are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            host: lookup("NARWHAL_API_HOST")
                .filter(|host| !host.trim().is_empty())
                .unwrap_or(defaults.host),
            port: parse_var(&lookup, "NARWHAL_API_PORT")?.unwrap_or(defaults.port),
            engine: EngineConfig {
                stop_timeout: seconds(&lookup, "NARWHAL_STOP_TIMEOUT_SECS")?
                    .unwrap_or(defaults.engine.stop_timeout),
                request_timeout: seconds(&lookup, "NARWHAL_REQUEST_TIMEOUT_SECS")?
                    .unwrap_or(defaults.engine.request_timeout),
                pull_timeout: seconds(&lookup, "NARWHAL_PULL_TIMEOUT_SECS")?
                    .unwrap_or(defaults.engine.pull_timeout),
            },
        };
        config.engine.validate()?;
        Ok(config)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| NarwhalError::Config(format!("{key}={raw:?}: {e}"))),
    }
}

fn seconds<F>(lookup: &F, key: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_var::<F, u64>(lookup, key)?.map(Duration::from_secs))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.engine.stop_timeout, Duration::from_secs(10));
        assert_eq!(config.engine.request_timeout, Duration::from_secs(60));
        assert_eq!(config.engine.pull_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("NARWHAL_API_HOST", "127.0.0.1"),
            ("NARWHAL_API_PORT", "9000"),
            ("NARWHAL_STOP_TIMEOUT_SECS", "5"),
            ("NARWHAL_PULL_TIMEOUT_SECS", "120"),
        ]))
        .unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.engine.stop_timeout, Duration::from_secs(5));
        assert_eq!(config.engine.pull_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_invalid_port_is_fatal() {
        let err = ServerConfig::from_lookup(lookup(&[("NARWHAL_API_PORT", "eighty")])).unwrap_err();
        assert_eq!(err.kind(), "config_error");
        assert!(err.to_string().contains("NARWHAL_API_PORT"));
    }

    #[test]
    fn test_request_timeout_must_exceed_stop_grace() {
        let err = ServerConfig::from_lookup(lookup(&[
            ("NARWHAL_STOP_TIMEOUT_SECS", "30"),
            ("NARWHAL_REQUEST_TIMEOUT_SECS", "30"),
        ]))
        .unwrap_err();
        assert_eq!(err.kind(), "config_error");
    }
}
