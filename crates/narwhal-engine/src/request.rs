use bollard::container::{Config, NetworkingConfig};
use bollard::models::HostConfig;
use serde::{Deserialize, Serialize};

/// Full engine-native creation request. The configs are handed to the engine
/// as they are; only their JSON shape is checked when the request is decoded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdvancedCreateRequest {
    #[serde(default, alias = "Name")]
    pub name: Option<String>,
    #[serde(default, alias = "Config")]
    pub config: Config<String>,
    #[serde(default, alias = "Host")]
    pub host: Option<HostConfig>,
    #[serde(default, alias = "Network")]
    pub network: Option<NetworkingConfig<String>>,
}

impl AdvancedCreateRequest {
    /// Folds the separate host and network sections into one engine config.
    /// Sections given separately take precedence over ones embedded in `config`.
    pub fn engine_config(&self) -> Config<String> {
        let mut config = self.config.clone();
        if let Some(host) = &self.host {
            config.host_config = Some(host.clone());
        }
        if let Some(network) = &self.network {
            config.networking_config = Some(network.clone());
        }
        config
    }

    pub fn container_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|name| !name.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_native_shape_is_accepted() {
        let json = r#"{
            "Name": "web",
            "Config": {"Image": "nginx:alpine", "Cmd": ["nginx", "-g", "daemon off;"]},
            "Host": {"Memory": 268435456, "AutoRemove": true}
        }"#;
        let req: AdvancedCreateRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.container_name(), Some("web"));

        let config = req.engine_config();
        assert_eq!(config.image.as_deref(), Some("nginx:alpine"));
        let host = config.host_config.unwrap();
        assert_eq!(host.memory, Some(268435456));
        assert_eq!(host.auto_remove, Some(true));
        assert!(config.networking_config.is_none());
    }

    #[test]
    fn test_embedded_host_config_survives_without_override() {
        let json = r#"{"config": {"Image": "redis", "HostConfig": {"Privileged": false}}}"#;
        let req: AdvancedCreateRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.container_name(), None);
        assert_eq!(
            req.engine_config().host_config.and_then(|h| h.privileged),
            Some(false)
        );
    }
}
