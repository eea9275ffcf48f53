//! In-memory engine for tests.
//!
//! Records every call, keeps a small model of images and containers, and can
//! be told to fail or hang on specific operations.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{Config, RemoveContainerOptions};
use bollard::errors::Error as BollardError;
use bollard::models::{
    ContainerConfig, ContainerCreateResponse, ContainerInspectResponse, ContainerState,
    ContainerSummary, CreateImageInfo, HostConfig, ImageInspect, SystemInfo,
};
use futures::StreamExt;
use narwhal_common::ResourceUsage;

use crate::engine::{
    parse_since, EngineClient, LogChunk, LogRequest, LogSource, LogStream, PullStream,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Ping,
    Info,
    List,
    Inspect,
    InspectImage,
    Pull,
    Create,
    Start,
    Stop,
    Remove,
    Stats,
    Logs,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Ping,
    Info,
    List { all: bool },
    Inspect(String),
    InspectImage(String),
    Pull(String),
    /// Recorded once a pull's progress stream has been consumed to the end.
    PullDrained(String),
    Create {
        name: Option<String>,
        config: Config<String>,
    },
    Start(String),
    Stop { id: String, grace: Duration },
    Remove {
        id: String,
        force: bool,
        remove_volumes: bool,
    },
    Stats(String),
    Logs { id: String, request: LogRequest },
}

impl EngineCall {
    pub fn operation(&self) -> Operation {
        match self {
            EngineCall::Ping => Operation::Ping,
            EngineCall::Info => Operation::Info,
            EngineCall::List { .. } => Operation::List,
            EngineCall::Inspect(_) => Operation::Inspect,
            EngineCall::InspectImage(_) => Operation::InspectImage,
            EngineCall::Pull(_) | EngineCall::PullDrained(_) => Operation::Pull,
            EngineCall::Create { .. } => Operation::Create,
            EngineCall::Start(_) => Operation::Start,
            EngineCall::Stop { .. } => Operation::Stop,
            EngineCall::Remove { .. } => Operation::Remove,
            EngineCall::Stats(_) => Operation::Stats,
            EngineCall::Logs { .. } => Operation::Logs,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub memory: i64,
    pub nano_cpus: i64,
    pub running: bool,
}

#[derive(Debug, Clone)]
enum Behavior {
    Fail { status_code: u16, message: String },
    Hang,
}

#[derive(Default)]
struct MockState {
    calls: Vec<EngineCall>,
    images: HashSet<String>,
    containers: BTreeMap<String, MockContainer>,
    behaviors: HashMap<Operation, Behavior>,
    logs: Vec<LogChunk>,
    usage: ResourceUsage,
    next_id: u64,
}

#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<Mutex<MockState>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(self, image: &str) -> Self {
        self.state().images.insert(image.to_string());
        self
    }

    pub fn with_logs(self, logs: Vec<LogChunk>) -> Self {
        self.state().logs = logs;
        self
    }

    pub fn with_usage(self, usage: ResourceUsage) -> Self {
        self.state().usage = usage;
        self
    }

    /// Makes every later call of `operation` fail with an engine response error.
    pub fn fail(&self, operation: Operation, status_code: u16, message: &str) {
        self.state().behaviors.insert(
            operation,
            Behavior::Fail {
                status_code,
                message: message.to_string(),
            },
        );
    }

    /// Makes every later call of `operation` block forever.
    pub fn hang(&self, operation: Operation) {
        self.state().behaviors.insert(operation, Behavior::Hang);
    }

    pub fn insert_container(&self, name: &str, image: &str, running: bool) -> String {
        let mut state = self.state();
        let id = next_id(&mut state);
        state.containers.insert(
            id.clone(),
            MockContainer {
                id: id.clone(),
                name: name.to_string(),
                image: image.to_string(),
                cmd: vec!["sleep".to_string(), "infinity".to_string()],
                memory: 0,
                nano_cpus: 0,
                running,
            },
        );
        id
    }

    pub fn container(&self, id: &str) -> Option<MockContainer> {
        self.state().containers.get(id).cloned()
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.state().images.contains(image)
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.state().calls.clone()
    }

    /// Number of requests issued for `operation`. A drained pull counts once.
    pub fn count(&self, operation: Operation) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| !matches!(call, EngineCall::PullDrained(_)))
            .filter(|call| call.operation() == operation)
            .count()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records the call and returns the configured misbehaviour, if any.
    async fn enter(&self, call: EngineCall) -> Result<(), BollardError> {
        let behavior = {
            let mut state = self.state();
            let behavior = state.behaviors.get(&call.operation()).cloned();
            state.calls.push(call);
            behavior
        };
        match behavior {
            None => Ok(()),
            Some(Behavior::Fail {
                status_code,
                message,
            }) => Err(BollardError::DockerResponseServerError {
                status_code,
                message,
            }),
            Some(Behavior::Hang) => std::future::pending().await,
        }
    }
}

fn next_id(state: &mut MockState) -> String {
    state.next_id += 1;
    format!("{:012x}", 0xc0ffee000000u64 + state.next_id)
}

fn server_error(status_code: u16, message: String) -> BollardError {
    BollardError::DockerResponseServerError {
        status_code,
        message,
    }
}

fn no_such_container(id: &str) -> BollardError {
    server_error(404, format!("No such container: {id}"))
}

#[async_trait]
impl EngineClient for MockEngine {
    async fn ping(&self) -> Result<(), BollardError> {
        self.enter(EngineCall::Ping).await
    }

    async fn info(&self) -> Result<SystemInfo, BollardError> {
        self.enter(EngineCall::Info).await?;
        let state = self.state();
        let running = state.containers.values().filter(|c| c.running).count() as i64;
        Ok(SystemInfo {
            ncpu: Some(8),
            mem_total: Some(16 * 1024 * 1024 * 1024),
            containers_running: Some(running),
            containers_paused: Some(0),
            containers_stopped: Some(state.containers.len() as i64 - running),
            ..Default::default()
        })
    }

    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, BollardError> {
        self.enter(EngineCall::List { all }).await?;
        Ok(self
            .state()
            .containers
            .values()
            .filter(|c| all || c.running)
            .map(|c| ContainerSummary {
                id: Some(c.id.clone()),
                names: Some(vec![format!("/{}", c.name)]),
                image: Some(c.image.clone()),
                state: Some(if c.running { "running" } else { "created" }.to_string()),
                ..Default::default()
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspectResponse, BollardError> {
        self.enter(EngineCall::Inspect(id.to_string())).await?;
        let state = self.state();
        let c = state.containers.get(id).ok_or_else(|| no_such_container(id))?;
        Ok(ContainerInspectResponse {
            id: Some(c.id.clone()),
            name: Some(format!("/{}", c.name)),
            config: Some(ContainerConfig {
                image: Some(c.image.clone()),
                cmd: Some(c.cmd.clone()),
                ..Default::default()
            }),
            host_config: Some(HostConfig {
                memory: Some(c.memory),
                nano_cpus: Some(c.nano_cpus),
                ..Default::default()
            }),
            state: Some(ContainerState {
                running: Some(c.running),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    async fn inspect_image(&self, image: &str) -> Result<ImageInspect, BollardError> {
        self.enter(EngineCall::InspectImage(image.to_string())).await?;
        if self.state().images.contains(image) {
            Ok(ImageInspect {
                id: Some(format!("sha256:{image}")),
                ..Default::default()
            })
        } else {
            Err(server_error(404, format!("No such image: {image}")))
        }
    }

    fn pull_image(&self, image: &str) -> PullStream {
        let behavior = {
            let mut state = self.state();
            state.calls.push(EngineCall::Pull(image.to_string()));
            state.behaviors.get(&Operation::Pull).cloned()
        };
        let progress = |status: &str| CreateImageInfo {
            status: Some(status.to_string()),
            ..Default::default()
        };

        match behavior {
            Some(Behavior::Fail {
                status_code,
                message,
            }) => futures::stream::iter(vec![
                Ok(progress("Pulling from library")),
                Err(server_error(status_code, message)),
            ])
            .boxed(),
            Some(Behavior::Hang) => futures::stream::pending().boxed(),
            None => {
                let state = self.state.clone();
                let image = image.to_string();
                let drained = futures::stream::once(async move {
                    let mut state = state.lock().unwrap_or_else(|p| p.into_inner());
                    state.images.insert(image.clone());
                    state.calls.push(EngineCall::PullDrained(image));
                })
                .filter_map(|()| futures::future::ready(None));
                futures::stream::iter(vec![
                    Ok(progress("Pulling from library")),
                    Ok(progress("Download complete")),
                    Ok(progress("Status: Downloaded newer image")),
                ])
                .chain(drained)
                .boxed()
            }
        }
    }

    async fn create_container(
        &self,
        name: Option<&str>,
        config: Config<String>,
    ) -> Result<ContainerCreateResponse, BollardError> {
        self.enter(EngineCall::Create {
            name: name.map(str::to_string),
            config: config.clone(),
        })
        .await?;

        let mut state = self.state();
        let image = config.image.clone().unwrap_or_default();
        if !state.images.contains(&image) {
            return Err(server_error(404, format!("No such image: {image}")));
        }
        if let Some(name) = name {
            if state.containers.values().any(|c| c.name == name) {
                return Err(server_error(
                    409,
                    format!("Conflict. The container name \"/{name}\" is already in use"),
                ));
            }
        }

        let id = next_id(&mut state);
        let host = config.host_config.unwrap_or_default();
        state.containers.insert(
            id.clone(),
            MockContainer {
                id: id.clone(),
                name: name.map(str::to_string).unwrap_or_else(|| format!("mock_{id}")),
                image,
                cmd: config.cmd.unwrap_or_default(),
                memory: host.memory.unwrap_or(0),
                nano_cpus: host.nano_cpus.unwrap_or(0),
                running: false,
            },
        );
        Ok(ContainerCreateResponse {
            id,
            warnings: Vec::new(),
        })
    }

    async fn start_container(&self, id: &str) -> Result<(), BollardError> {
        self.enter(EngineCall::Start(id.to_string())).await?;
        let mut state = self.state();
        let c = state.containers.get_mut(id).ok_or_else(|| no_such_container(id))?;
        if c.running {
            return Err(server_error(304, String::new()));
        }
        c.running = true;
        Ok(())
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), BollardError> {
        self.enter(EngineCall::Stop {
            id: id.to_string(),
            grace,
        })
        .await?;
        let mut state = self.state();
        let c = state.containers.get_mut(id).ok_or_else(|| no_such_container(id))?;
        if !c.running {
            return Err(server_error(304, String::new()));
        }
        c.running = false;
        Ok(())
    }

    async fn remove_container(
        &self,
        id: &str,
        options: RemoveContainerOptions,
    ) -> Result<(), BollardError> {
        self.enter(EngineCall::Remove {
            id: id.to_string(),
            force: options.force,
            remove_volumes: options.v,
        })
        .await?;
        let mut state = self.state();
        let running = state
            .containers
            .get(id)
            .map(|c| c.running)
            .ok_or_else(|| no_such_container(id))?;
        if running && !options.force {
            return Err(server_error(
                409,
                format!("cannot remove container {id}: container is running: stop the container before removing or force remove"),
            ));
        }
        state.containers.remove(id);
        Ok(())
    }

    async fn stats(&self, id: &str) -> Result<ResourceUsage, BollardError> {
        self.enter(EngineCall::Stats(id.to_string())).await?;
        let state = self.state();
        let c = state.containers.get(id).ok_or_else(|| no_such_container(id))?;
        Ok(if c.running {
            state.usage
        } else {
            ResourceUsage::default()
        })
    }

    async fn logs(&self, id: &str, request: LogRequest) -> Result<LogStream, BollardError> {
        self.enter(EngineCall::Logs {
            id: id.to_string(),
            request: request.clone(),
        })
        .await?;
        if let Some(since) = request.since.as_deref() {
            parse_since(since)?;
        }

        let state = self.state();
        if !state.containers.contains_key(id) {
            return Err(no_such_container(id));
        }
        let selected: Vec<_> = state
            .logs
            .iter()
            .filter(|chunk| match chunk.source {
                LogSource::Stdout | LogSource::Console => request.stdout,
                LogSource::Stderr => request.stderr,
                LogSource::Stdin => false,
            })
            .cloned()
            .collect();
        let skip = selected.len().saturating_sub(request.tail as usize);
        let history = futures::stream::iter(selected.into_iter().skip(skip).map(Ok));

        if request.follow {
            Ok(history.chain(futures::stream::pending()).boxed())
        } else {
            Ok(history.boxed())
        }
    }
}
