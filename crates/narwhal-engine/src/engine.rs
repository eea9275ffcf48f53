//! Engine client adapter.
//!
//! Everything above this module talks to the container engine through
//! [`EngineClient`], so the orchestrator can run against the real daemon
//! ([`BollardEngine`]) or an in-memory double.

use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, StatsOptions,
    StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerCreateResponse, ContainerInspectResponse, ContainerSummary, CreateImageInfo,
    ImageInspect, SystemInfo,
};
use bollard::Docker;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use narwhal_common::ResourceUsage;

pub type PullStream = BoxStream<'static, Result<CreateImageInfo, BollardError>>;
pub type LogStream = BoxStream<'static, Result<LogChunk, BollardError>>;

/// Options for one engine log read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRequest {
    pub stdout: bool,
    pub stderr: bool,
    pub follow: bool,
    pub tail: u32,
    /// Passed to the engine adapter untouched.
    pub since: Option<String>,
    pub timestamps: bool,
    pub details: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    Stdin,
    Stdout,
    Stderr,
    /// Output of a TTY container, where the engine does not separate streams.
    Console,
}

impl LogSource {
    /// Stream type byte of the engine's multiplexed-stream header.
    fn stream_type(self) -> u8 {
        match self {
            LogSource::Stdin => 0,
            LogSource::Stdout | LogSource::Console => 1,
            LogSource::Stderr => 2,
        }
    }
}

/// One piece of container output together with the stream it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogChunk {
    pub source: LogSource,
    pub message: Bytes,
}

impl LogChunk {
    pub fn stdout(message: impl Into<Bytes>) -> Self {
        Self {
            source: LogSource::Stdout,
            message: message.into(),
        }
    }

    pub fn stderr(message: impl Into<Bytes>) -> Self {
        Self {
            source: LogSource::Stderr,
            message: message.into(),
        }
    }

    /// Raw payload, or the payload behind an 8-byte multiplexed-stream header
    /// (stream type, three zero bytes, big-endian length) when `framed`.
    /// A payload too long for the 32-bit length is split over several frames.
    pub fn encode(&self, framed: bool) -> Bytes {
        if !framed {
            return self.message.clone();
        }
        self.frames(u32::MAX as usize)
    }

    fn frames(&self, max_payload: usize) -> Bytes {
        let max_payload = max_payload.clamp(1, u32::MAX as usize);
        let pieces = self.message.len().div_ceil(max_payload).max(1);
        let mut buf = BytesMut::with_capacity(8 * pieces + self.message.len());
        let mut rest: &[u8] = &self.message;
        loop {
            let (piece, tail) = rest.split_at(rest.len().min(max_payload));
            let len = u32::try_from(piece.len()).unwrap_or(u32::MAX);
            buf.put_u8(self.source.stream_type());
            buf.put_bytes(0, 3);
            buf.put_u32(len);
            buf.extend_from_slice(piece);
            if tail.is_empty() {
                break;
            }
            rest = tail;
        }
        buf.freeze()
    }
}

impl From<LogOutput> for LogChunk {
    fn from(output: LogOutput) -> Self {
        match output {
            LogOutput::StdIn { message } => Self {
                source: LogSource::Stdin,
                message,
            },
            LogOutput::StdOut { message } => Self {
                source: LogSource::Stdout,
                message,
            },
            LogOutput::StdErr { message } => Self {
                source: LogSource::Stderr,
                message,
            },
            LogOutput::Console { message } => Self {
                source: LogSource::Console,
                message,
            },
        }
    }
}

#[async_trait]
pub trait EngineClient: Send + Sync {
    async fn ping(&self) -> Result<(), BollardError>;
    async fn info(&self) -> Result<SystemInfo, BollardError>;
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, BollardError>;
    async fn inspect_container(&self, id: &str) -> Result<ContainerInspectResponse, BollardError>;
    async fn inspect_image(&self, image: &str) -> Result<ImageInspect, BollardError>;
    /// Starts a pull. The pull is only complete once the stream is exhausted.
    fn pull_image(&self, image: &str) -> PullStream;
    async fn create_container(
        &self,
        name: Option<&str>,
        config: Config<String>,
    ) -> Result<ContainerCreateResponse, BollardError>;
    async fn start_container(&self, id: &str) -> Result<(), BollardError>;
    /// Asks the engine to stop the container, killing it after `grace`.
    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), BollardError>;
    async fn remove_container(
        &self,
        id: &str,
        options: RemoveContainerOptions,
    ) -> Result<(), BollardError>;
    /// A single resource sample; only meaningful for running containers.
    async fn stats(&self, id: &str) -> Result<ResourceUsage, BollardError>;
    async fn logs(&self, id: &str, request: LogRequest) -> Result<LogStream, BollardError>;
}

/// [`EngineClient`] backed by the local Docker daemon.
#[derive(Clone)]
pub struct BollardEngine {
    docker: Docker,
}

impl BollardEngine {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connects using `DOCKER_HOST` and friends, falling back to the local socket.
    pub fn connect() -> Result<Self, BollardError> {
        Ok(Self::new(Docker::connect_with_local_defaults()?))
    }
}

#[async_trait]
impl EngineClient for BollardEngine {
    async fn ping(&self) -> Result<(), BollardError> {
        self.docker.ping().await.map(|_| ())
    }

    async fn info(&self) -> Result<SystemInfo, BollardError> {
        self.docker.info().await
    }

    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, BollardError> {
        let options = ListContainersOptions::<String> {
            all,
            ..Default::default()
        };
        self.docker.list_containers(Some(options)).await
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspectResponse, BollardError> {
        self.docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
    }

    async fn inspect_image(&self, image: &str) -> Result<ImageInspect, BollardError> {
        self.docker.inspect_image(image).await
    }

    fn pull_image(&self, image: &str) -> PullStream {
        let (from_image, tag) = split_reference(image);
        let options = CreateImageOptions {
            from_image,
            tag,
            ..Default::default()
        };
        self.docker.create_image(Some(options), None, None).boxed()
    }

    async fn create_container(
        &self,
        name: Option<&str>,
        config: Config<String>,
    ) -> Result<ContainerCreateResponse, BollardError> {
        let options = name.map(|name| CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        });
        self.docker.create_container(options, config).await
    }

    async fn start_container(&self, id: &str) -> Result<(), BollardError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), BollardError> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        self.docker.stop_container(id, Some(options)).await
    }

    async fn remove_container(
        &self,
        id: &str,
        options: RemoveContainerOptions,
    ) -> Result<(), BollardError> {
        self.docker.remove_container(id, Some(options)).await
    }

    async fn stats(&self, id: &str) -> Result<ResourceUsage, BollardError> {
        let options = StatsOptions {
            stream: false,
            one_shot: true,
        };
        let mut samples = self.docker.stats(id, Some(options)).boxed();
        let stats = samples
            .next()
            .await
            .unwrap_or_else(|| {
                Err(BollardError::DockerResponseServerError {
                    status_code: 500,
                    message: format!("engine returned no stats sample for {id}"),
                })
            })?;

        Ok(ResourceUsage {
            memory_usage: stats.memory_stats.usage.unwrap_or(0),
            cpu_total_usage: stats.cpu_stats.cpu_usage.total_usage,
        })
    }

    async fn logs(&self, id: &str, request: LogRequest) -> Result<LogStream, BollardError> {
        let since = match request.since.as_deref() {
            Some(cursor) => parse_since(cursor)?,
            None => 0,
        };
        // The daemon API has no switch for `details`; extra attributes are
        // only attached when the container's log driver is configured for them.
        let options = LogsOptions::<String> {
            follow: request.follow,
            stdout: request.stdout,
            stderr: request.stderr,
            since,
            timestamps: request.timestamps,
            tail: request.tail.to_string(),
            ..Default::default()
        };
        Ok(self
            .docker
            .logs(id, Some(options))
            .map(|item| item.map(LogChunk::from))
            .boxed())
    }
}

/// Splits `repo[:tag]` for the pull API. Without a tag the engine would pull
/// every tag of the repository, so `latest` is implied. Digest references are
/// passed whole.
pub(crate) fn split_reference(image: &str) -> (String, String) {
    if image.contains('@') {
        return (image.to_string(), String::new());
    }
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(i) => {
            let split = name_start + i;
            (image[..split].to_string(), image[split + 1..].to_string())
        }
        None => (image.to_string(), "latest".to_string()),
    }
}

/// Turns a `since` cursor into the Unix timestamp the daemon expects.
pub(crate) fn parse_since(cursor: &str) -> Result<i64, BollardError> {
    parse_since_at(cursor, Utc::now())
}

/// Accepted forms, in the order they are tried:
/// - a duration such as `10m` or `1h30m`, counted back from `now`
/// - integer or fractional Unix seconds
/// - RFC 3339
/// - `YYYY-MM-DD` with an optional zone, and `YYYY-MM-DDTHH[:MM[:SS[.f]]]`
///
/// Times without a zone are read as UTC.
fn parse_since_at(cursor: &str, now: DateTime<Utc>) -> Result<i64, BollardError> {
    let cursor = cursor.trim();
    // A bare "0" is a timestamp, not a zero duration.
    if cursor != "0" {
        if let Some(ago) = parse_go_duration(cursor) {
            if let Some(ts) = now.checked_sub_signed(ago) {
                return Ok(ts.timestamp());
            }
        }
    }
    if let Ok(secs) = cursor.parse::<i64>() {
        return Ok(secs);
    }
    if let Ok(secs) = cursor.parse::<f64>() {
        if secs.is_finite() {
            return Ok(secs.trunc() as i64);
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(cursor) {
        return Ok(ts.timestamp());
    }
    if let Some(ts) = parse_naive(cursor) {
        return Ok(ts);
    }
    Err(BollardError::DockerResponseServerError {
        status_code: 400,
        message: format!("invalid value for \"since\": {cursor}"),
    })
}

fn parse_naive(cursor: &str) -> Option<i64> {
    if let Ok(date) = NaiveDate::parse_from_str(cursor, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp());
    }
    // Date with a zone: 2024-05-01Z, 2024-05-01+02:00
    if let (Some(date), Some(zone)) = (cursor.get(..10), cursor.get(10..)) {
        if zone.starts_with(['Z', 'z', '+', '-']) && NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok() {
            let zone = if zone.eq_ignore_ascii_case("z") { "Z" } else { zone };
            if let Ok(ts) = DateTime::parse_from_rfc3339(&format!("{date}T00:00:00{zone}")) {
                return Some(ts.timestamp());
            }
        }
    }
    for layout in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(cursor, layout) {
            return Some(ts.and_utc().timestamp());
        }
    }
    if !cursor.contains(':') {
        if let Ok(ts) = NaiveDateTime::parse_from_str(&format!("{cursor}:00"), "%Y-%m-%dT%H:%M") {
            return Some(ts.and_utc().timestamp());
        }
    }
    None
}

/// Parses durations in the engine CLI's notation: a signed sequence of
/// decimal numbers, each with a unit (`ns`, `us`, `µs`, `ms`, `s`, `m`, `h`).
fn parse_go_duration(input: &str) -> Option<TimeDelta> {
    let (negative, mut rest) = match input.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, input.strip_prefix('+').unwrap_or(input)),
    };
    if rest.is_empty() {
        return None;
    }

    let mut nanos = 0f64;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let value: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };
        rest = &rest[unit_len..];
        nanos += value * scale;
    }

    if !nanos.is_finite() || nanos >= i64::MAX as f64 {
        return None;
    }
    let nanos = nanos as i64;
    Some(TimeDelta::nanoseconds(if negative { -nanos } else { nanos }))
}
