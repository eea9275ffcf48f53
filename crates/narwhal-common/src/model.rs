use std::collections::BTreeMap;

pub use bollard::models::Resources;
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Tail length used when the caller gives none, or gives one that does not parse.
pub const DEFAULT_LOG_LINES: u32 = 50;

/// Reduced-field creation request for typical callers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimpleCreateRequest {
    pub image: String,
    #[serde(default)]
    pub cmd: Option<Vec<String>>,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "config")]
    pub host: Option<SimpleHostConfig>,
    /// Accepted but not forwarded to the engine; there is no device-request mapping.
    #[serde(default)]
    pub needs_gpu: bool,
    #[serde(default)]
    pub start_on_create: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimpleHostConfig {
    /// Host port -> container ports it forwards to. A container port may be
    /// listed under several host ports.
    #[serde(default)]
    pub port_bindings: BTreeMap<i64, Vec<i64>>,
    /// Engine resource section, copied onto the host config field for field.
    #[serde(default, deserialize_with = "engine_resources")]
    pub resources: Option<Resources>,
    #[serde(default)]
    pub auto_remove: bool,
}

/// Resource keys of the engine API. Request keys are matched against them the
/// way the engine decodes JSON: ignoring case (and, here, underscores), so
/// `NanoCPUs`, `NanoCpus` and `nano_cpus` all land on `NanoCpus`.
const RESOURCE_KEYS: &[&str] = &[
    "CpuShares",
    "Memory",
    "CgroupParent",
    "BlkioWeight",
    "BlkioWeightDevice",
    "BlkioDeviceReadBps",
    "BlkioDeviceWriteBps",
    "BlkioDeviceReadIOps",
    "BlkioDeviceWriteIOps",
    "CpuPeriod",
    "CpuQuota",
    "CpuRealtimePeriod",
    "CpuRealtimeRuntime",
    "CpusetCpus",
    "CpusetMems",
    "Devices",
    "DeviceCgroupRules",
    "DeviceRequests",
    "KernelMemoryTCP",
    "MemoryReservation",
    "MemorySwap",
    "MemorySwappiness",
    "NanoCpus",
    "OomKillDisable",
    "Init",
    "PidsLimit",
    "Ulimits",
    "CpuCount",
    "CpuPercent",
    "IOMaximumIOps",
    "IOMaximumBandwidth",
];

fn canonical_resource_key(key: &str) -> Option<&'static str> {
    let folded: String = key
        .chars()
        .filter(|c| *c != '_')
        .collect::<String>()
        .to_ascii_lowercase();
    RESOURCE_KEYS
        .iter()
        .copied()
        .find(|canonical| canonical.to_ascii_lowercase() == folded)
}

fn engine_resources<'de, D>(deserializer: D) -> Result<Option<Resources>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<Map<String, Value>>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let normalized: Map<String, Value> = raw
        .into_iter()
        .map(|(key, value)| match canonical_resource_key(&key) {
            Some(canonical) => (canonical.to_string(), value),
            None => (key, value),
        })
        .collect();
    serde_json::from_value(Value::Object(normalized))
        .map(Some)
        .map_err(de::Error::custom)
}

/// Parameters of one log read. Each read opens a fresh engine stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogQuery {
    pub tail: u32,
    /// Engine-defined cursor, carried through uninterpreted.
    pub since: Option<String>,
    pub follow: bool,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            tail: DEFAULT_LOG_LINES,
            since: None,
            follow: false,
        }
    }
}

impl LogQuery {
    /// Builds a query from raw request parameters.
    ///
    /// A `lines` value that is missing or not a non-negative integer falls back
    /// to [`DEFAULT_LOG_LINES`] instead of failing. `follow` is only enabled by
    /// the literal string `"true"`.
    pub fn from_params(lines: Option<&str>, since: Option<&str>, follow: Option<&str>) -> Self {
        let tail = lines
            .and_then(|l| l.trim().parse::<u32>().ok())
            .unwrap_or(DEFAULT_LOG_LINES);
        let since = since
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Self {
            tail,
            since,
            follow: follow == Some("true"),
        }
    }
}

/// Raw resource sample reported by the engine for a running container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub memory_usage: u64,
    pub cpu_total_usage: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BasicResourceUsage {
    pub ram_usage: f64,
    pub cpu_usage: f64,
}

impl From<ResourceUsage> for BasicResourceUsage {
    fn from(usage: ResourceUsage) -> Self {
        Self {
            ram_usage: usage.memory_usage as f64,
            cpu_usage: usage.cpu_total_usage as f64,
        }
    }
}

/// Read-time view of a container; never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicContainerStatistics {
    pub name: String,
    pub id: String,
    pub image: String,
    /// Only present while the container is running.
    pub resource_usage: Option<BasicResourceUsage>,
    pub ram_total: f64,
    pub cpu_total: f64,
    pub start_cmd: String,
    pub is_running: bool,
}

/// Host-level view as reported by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeResourceUsage {
    pub cpu_count: i64,
    pub memory_total: i64,
    pub containers_running: i64,
    pub containers_paused: i64,
    pub containers_stopped: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_query_falls_back_to_default_lines() {
        for lines in [None, Some(""), Some("abc"), Some("-5"), Some("1.5")] {
            let query = LogQuery::from_params(lines, None, None);
            assert_eq!(query, LogQuery::from_params(Some("50"), None, None));
            assert_eq!(query.tail, DEFAULT_LOG_LINES);
        }
    }

    #[test]
    fn test_log_query_parses_params() {
        let query = LogQuery::from_params(Some("10"), Some("1700000000"), Some("true"));
        assert_eq!(query.tail, 10);
        assert_eq!(query.since.as_deref(), Some("1700000000"));
        assert!(query.follow);

        let query = LogQuery::from_params(Some("10"), Some(""), Some("TRUE"));
        assert_eq!(query.since, None);
        assert!(!query.follow);
    }

    #[test]
    fn test_simple_request_deserialization() {
        let json = r#"{
            "image": "alpine:latest",
            "cmd": ["echo", "hi"],
            "name": "t1",
            "config": {"port_bindings": {"8080": [80, 81]}, "auto_remove": true},
            "start_on_create": true
        }"#;
        let req: SimpleCreateRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.image, "alpine:latest");
        assert_eq!(req.cmd, Some(vec!["echo".to_string(), "hi".to_string()]));
        assert!(req.start_on_create);
        assert!(!req.needs_gpu);

        let host = req.host.unwrap();
        assert!(host.auto_remove);
        assert_eq!(host.port_bindings.get(&8080), Some(&vec![80, 81]));
        assert!(host.resources.is_none());
    }

    #[test]
    fn test_resources_use_engine_keys() {
        let json = r#"{
            "image": "alpine",
            "config": {"resources": {
                "Memory": 67108864,
                "NanoCPUs": 500000000,
                "cpu_quota": 50000,
                "Ulimits": [{"Name": "nofile", "Soft": 1024, "Hard": 2048}],
                "BlkioWeight": 300
            }}
        }"#;
        let req: SimpleCreateRequest = serde_json::from_str(json).unwrap();
        let resources = req.host.unwrap().resources.unwrap();
        assert_eq!(resources.memory, Some(67108864));
        assert_eq!(resources.nano_cpus, Some(500000000));
        assert_eq!(resources.cpu_quota, Some(50000));
        assert_eq!(resources.blkio_weight, Some(300));
        let ulimits = resources.ulimits.unwrap();
        assert_eq!(ulimits[0].name.as_deref(), Some("nofile"));
        assert_eq!(ulimits[0].hard, Some(2048));
    }

    #[test]
    fn test_resources_with_wrong_types_are_rejected() {
        let json = r#"{"image": "alpine", "config": {"resources": {"Memory": "lots"}}}"#;
        assert!(serde_json::from_str::<SimpleCreateRequest>(json).is_err());
    }

    #[test]
    fn test_simple_request_without_config() {
        let req: SimpleCreateRequest = serde_json::from_str(r#"{"image": "redis"}"#).unwrap();
        assert!(req.host.is_none());
        assert!(req.cmd.is_none());
        assert!(!req.start_on_create);
    }

    #[test]
    fn test_simple_request_requires_image() {
        assert!(serde_json::from_str::<SimpleCreateRequest>(r#"{"name": "x"}"#).is_err());
    }
}
