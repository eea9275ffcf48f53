use std::collections::HashMap;
use std::sync::Arc;

use bollard::container::{Config, RemoveContainerOptions};
use bollard::errors::Error as BollardError;
use bollard::models::{
    ContainerCreateResponse, ContainerInspectResponse, ContainerSummary, HostConfig,
};
use narwhal_common::{
    BasicContainerStatistics, LogQuery, NarwhalError, NodeResourceUsage, Resources, Result,
    ResourceUsage, SimpleCreateRequest,
};
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::engine::{EngineClient, LogStream};
use crate::error::{classify, engine_message, with_deadline};
use crate::images::ImageResolver;
use crate::logs::LogGateway;
use crate::ports::translate_port_bindings;
use crate::request::AdvancedCreateRequest;

/// Container lifecycle operations on top of a shared engine handle.
///
/// Holds no container state: every call is a fresh round-trip to the engine.
#[derive(Clone)]
pub struct ContainerService {
    engine: Arc<dyn EngineClient>,
    images: ImageResolver,
    logs: LogGateway,
    config: EngineConfig,
}

impl ContainerService {
    pub fn new(engine: Arc<dyn EngineClient>, config: EngineConfig) -> Self {
        Self {
            images: ImageResolver::new(engine.clone(), config.request_timeout, config.pull_timeout),
            logs: LogGateway::new(engine.clone(), config.request_timeout),
            engine,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn images(&self) -> &ImageResolver {
        &self.images
    }

    pub async fn ping(&self) -> Result<()> {
        with_deadline(self.config.request_timeout, "ping", self.engine.ping())
            .await?
            .map_err(|e| NarwhalError::Engine(engine_message(&e)))
    }

    /// Running containers, or every container when `all` is set.
    #[instrument(skip(self))]
    pub async fn list(&self, all: bool) -> Result<Vec<ContainerSummary>> {
        let containers = with_deadline(
            self.config.request_timeout,
            "list",
            self.engine.list_containers(all),
        )
        .await?
        .map_err(|e| NarwhalError::Engine(engine_message(&e)))?;

        debug!(count = containers.len(), "Listed containers");
        Ok(containers)
    }

    #[instrument(skip(self), fields(container_id = %id))]
    pub async fn get(&self, id: &str) -> Result<ContainerInspectResponse> {
        with_deadline(
            self.config.request_timeout,
            "inspect",
            self.engine.inspect_container(id),
        )
        .await?
        .map_err(|e| classify(e, NarwhalError::Engine))
    }

    /// Pulls the image if needed, creates the container and optionally starts it.
    ///
    /// Steps run strictly in that order and stop at the first failure. When the
    /// create succeeds but the start fails the container is not removed: the
    /// error is [`NarwhalError::Start`] carrying the new container id, and the
    /// caller decides whether to retry the start or remove it.
    #[instrument(skip(self, req), fields(image = %req.image, name = %req.name))]
    pub async fn create_simple(&self, req: SimpleCreateRequest) -> Result<ContainerCreateResponse> {
        if req.needs_gpu {
            warn!("needs_gpu is set but GPU devices are not requested from the engine");
        }
        let config = simple_engine_config(&req)?;

        self.images.ensure_image(&req.image).await?;

        let name = (!req.name.is_empty()).then_some(req.name.as_str());
        let created = with_deadline(
            self.config.request_timeout,
            "create",
            self.engine.create_container(name, config),
        )
        .await?
        .map_err(|e| NarwhalError::Create(engine_message(&e)))?;
        info!(container_id = %created.id, "Container created");

        if req.start_on_create {
            let started = match with_deadline(
                self.config.request_timeout,
                "start",
                self.engine.start_container(&created.id),
            )
            .await
            {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(engine_message(&e)),
                Err(cancelled) => Err(cancelled.to_string()),
            };
            if let Err(message) = started {
                warn!(container_id = %created.id, %message, "Container created but failed to start, leaving it in place");
                return Err(NarwhalError::Start {
                    container_id: created.id,
                    message,
                });
            }
            info!(container_id = %created.id, "Container started");
        }

        Ok(created)
    }

    /// Creates a container from caller-supplied engine configs. No image pull
    /// and no start.
    #[instrument(skip(self, req), fields(name = req.container_name().unwrap_or("")))]
    pub async fn create(&self, req: &AdvancedCreateRequest) -> Result<()> {
        let created = with_deadline(
            self.config.request_timeout,
            "create",
            self.engine.create_container(req.container_name(), req.engine_config()),
        )
        .await?
        .map_err(|e| NarwhalError::Create(engine_message(&e)))?;

        info!(container_id = %created.id, "Container created");
        Ok(())
    }

    /// Starting a running container succeeds.
    #[instrument(skip(self), fields(container_id = %id))]
    pub async fn start(&self, id: &str) -> Result<()> {
        let result = with_deadline(
            self.config.request_timeout,
            "start",
            self.engine.start_container(id),
        )
        .await?;
        match result {
            Ok(()) => info!("Container started"),
            Err(e) if is_not_modified(&e) => debug!("Container already running"),
            Err(e) => {
                return Err(classify(e, |message| NarwhalError::Start {
                    container_id: id.to_string(),
                    message,
                }))
            }
        }
        Ok(())
    }

    /// Stops with the configured grace period before the engine kills the
    /// container. Stopping a stopped container succeeds.
    #[instrument(skip(self), fields(container_id = %id))]
    pub async fn stop(&self, id: &str) -> Result<()> {
        let result = with_deadline(
            self.config.request_timeout,
            "stop",
            self.engine.stop_container(id, self.config.stop_timeout),
        )
        .await?;
        match result {
            Ok(()) => info!("Container stopped"),
            Err(e) if is_not_modified(&e) => debug!("Container already stopped"),
            Err(e) => return Err(classify(e, NarwhalError::Stop)),
        }
        Ok(())
    }

    #[instrument(skip(self), fields(container_id = %id))]
    pub async fn remove(&self, id: &str, force: bool, remove_volumes: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            v: remove_volumes,
            ..Default::default()
        };
        with_deadline(
            self.config.request_timeout,
            "remove",
            self.engine.remove_container(id, options),
        )
        .await?
        .map_err(|e| classify(e, NarwhalError::Remove))?;

        info!("Container removed");
        Ok(())
    }

    /// One resource sample. Fails with [`NarwhalError::NotRunning`] for a
    /// container that is not running.
    #[instrument(skip(self), fields(container_id = %id))]
    pub async fn get_stats(&self, id: &str) -> Result<ResourceUsage> {
        let details = self.get(id).await?;
        if !is_running(&details) {
            return Err(NarwhalError::NotRunning(id.to_string()));
        }
        self.sample(id).await
    }

    /// Summary view of a container; resource usage is only sampled while it runs.
    #[instrument(skip(self), fields(container_id = %id))]
    pub async fn statistics(&self, id: &str) -> Result<BasicContainerStatistics> {
        let details = self.get(id).await?;
        let running = is_running(&details);
        let resource_usage = if running {
            Some(self.sample(id).await?.into())
        } else {
            None
        };

        let config = details.config.unwrap_or_default();
        let host = details.host_config.unwrap_or_default();
        Ok(BasicContainerStatistics {
            name: details
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            id: details.id.unwrap_or_default(),
            image: config.image.unwrap_or_default(),
            resource_usage,
            ram_total: host.memory.unwrap_or(0) as f64,
            cpu_total: host.nano_cpus.unwrap_or(0) as f64,
            start_cmd: config.cmd.unwrap_or_default().join(" "),
            is_running: running,
        })
    }

    #[instrument(skip(self))]
    pub async fn node_usage(&self) -> Result<NodeResourceUsage> {
        let info = with_deadline(self.config.request_timeout, "info", self.engine.info())
            .await?
            .map_err(|e| NarwhalError::Engine(engine_message(&e)))?;

        Ok(NodeResourceUsage {
            cpu_count: info.ncpu.unwrap_or(0),
            memory_total: info.mem_total.unwrap_or(0),
            containers_running: info.containers_running.unwrap_or(0),
            containers_paused: info.containers_paused.unwrap_or(0),
            containers_stopped: info.containers_stopped.unwrap_or(0),
        })
    }

    pub async fn logs(&self, id: &str, query: &LogQuery) -> Result<LogStream> {
        self.logs.open(id, query).await
    }

    async fn sample(&self, id: &str) -> Result<ResourceUsage> {
        with_deadline(self.config.request_timeout, "stats", self.engine.stats(id))
            .await?
            .map_err(|e| classify(e, NarwhalError::Engine))
    }
}

fn is_running(details: &ContainerInspectResponse) -> bool {
    details
        .state
        .as_ref()
        .and_then(|state| state.running)
        .unwrap_or(false)
}

/// The engine answers 304 when a start or stop would not change anything.
fn is_not_modified(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 304,
            ..
        }
    )
}

/// Engine config for a simple create: image, command, hostname from the name,
/// translated port bindings and every field of the resource section.
pub fn simple_engine_config(req: &SimpleCreateRequest) -> Result<Config<String>> {
    let host = req.host.clone().unwrap_or_default();
    let port_bindings = translate_port_bindings(&host.port_bindings);

    let exposed_ports = (!port_bindings.is_empty()).then(|| {
        port_bindings
            .keys()
            .map(|port| (port.clone(), HashMap::new()))
            .collect::<HashMap<_, _>>()
    });

    let mut host_config = host_config_with(host.resources.as_ref())?;
    host_config.port_bindings = Some(port_bindings);
    host_config.auto_remove = Some(host.auto_remove);

    Ok(Config {
        image: Some(req.image.clone()),
        cmd: req.cmd.clone(),
        hostname: (!req.name.is_empty()).then(|| req.name.clone()),
        exposed_ports,
        host_config: Some(host_config),
        ..Default::default()
    })
}

/// The engine's host config embeds the resource section under the same keys,
/// so the section is carried over through its JSON form.
fn host_config_with(resources: Option<&Resources>) -> Result<HostConfig> {
    let Some(resources) = resources else {
        return Ok(HostConfig::default());
    };
    serde_json::to_value(resources)
        .and_then(serde_json::from_value)
        .map_err(|e| NarwhalError::Validation(format!("invalid resources: {e}")))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use narwhal_common::SimpleHostConfig;

    use super::*;

    #[test]
    fn test_simple_engine_config() {
        let req = SimpleCreateRequest {
            image: "alpine:latest".to_string(),
            cmd: Some(vec!["echo".to_string(), "hi".to_string()]),
            name: "t1".to_string(),
            host: Some(SimpleHostConfig {
                port_bindings: BTreeMap::from([(8080, vec![80])]),
                resources: Some(Resources {
                    memory: Some(64 * 1024 * 1024),
                    nano_cpus: Some(500_000_000),
                    pids_limit: Some(128),
                    ..Default::default()
                }),
                auto_remove: true,
            }),
            needs_gpu: false,
            start_on_create: true,
        };

        let config = simple_engine_config(&req).unwrap();
        assert_eq!(config.image.as_deref(), Some("alpine:latest"));
        assert_eq!(config.hostname.as_deref(), Some("t1"));
        assert!(config.exposed_ports.unwrap().contains_key("80/tcp"));

        let host = config.host_config.unwrap();
        assert_eq!(host.auto_remove, Some(true));
        assert_eq!(host.memory, Some(64 * 1024 * 1024));
        assert_eq!(host.nano_cpus, Some(500_000_000));
        assert_eq!(host.pids_limit, Some(128));
        assert_eq!(host.cpu_quota, None);

        let bindings = host.port_bindings.unwrap();
        let binding = &bindings["80/tcp"].as_ref().unwrap()[0];
        assert_eq!(binding.host_port.as_deref(), Some("8080"));
        assert_eq!(binding.host_ip.as_deref(), Some(""));
    }

    #[test]
    fn test_simple_engine_config_without_host_section() {
        let req = SimpleCreateRequest {
            image: "redis".to_string(),
            ..Default::default()
        };
        let config = simple_engine_config(&req).unwrap();
        assert_eq!(config.hostname, None);
        assert_eq!(config.cmd, None);
        assert!(config.exposed_ports.is_none());

        let host = config.host_config.unwrap();
        assert_eq!(host.auto_remove, Some(false));
        assert!(host.port_bindings.unwrap().is_empty());
    }
}
