use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Measurement holding CPU percentages and raw CPU counters.
pub const MEASUREMENT_CPU: &str = "docker_container_cpu";
/// Measurement holding point-in-time memory values.
pub const MEASUREMENT_MEMORY: &str = "docker_container_mem";
/// Measurement holding cumulative network bytes and per-collection bandwidth.
pub const MEASUREMENT_NETWORK: &str = "docker_container_network";

pub const TAG_SERVICE_ID: &str = "micro_service_id";
pub const TAG_CONTAINER_NAME: &str = "container_name";
pub const TAG_CONTAINER_ID: &str = "container_id";

/// A collection target as stored in the node registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    /// `None` when the node has never been claimed for collection.
    pub last_collected_at: Option<DateTime<Utc>>,
}

/// A registered remote-access route to one node's container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tunnel {
    pub node_id: String,
    pub public_url: String,
    pub server: String,
    pub local_addr: String,
    pub established_at: DateTime<Utc>,
    pub is_established: bool,
}

impl Tunnel {
    /// URL used to reach the runtime API through this tunnel.
    ///
    /// Tunnels are registered with a raw `tcp://` scheme; the runtime speaks
    /// HTTP over it, so the scheme is rewritten.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::Utc;
    /// use fleetmon_common::types::Tunnel;
    ///
    /// let tunnel = Tunnel {
    ///     node_id: "node-1".into(),
    ///     public_url: "tcp://edge.example.com:41022".into(),
    ///     server: "edge-1".into(),
    ///     local_addr: "unix:///var/run/docker.sock".into(),
    ///     established_at: Utc::now(),
    ///     is_established: true,
    /// };
    /// assert_eq!(tunnel.runtime_url(), "http://edge.example.com:41022");
    /// ```
    pub fn runtime_url(&self) -> String {
        match self.public_url.strip_prefix("tcp") {
            Some(rest) => format!("http{rest}"),
            None => self.public_url.clone(),
        }
    }
}

/// A container selected for collection on one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerTarget {
    pub container_id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
}

impl ContainerTarget {
    /// Stable identity tags shared by every point derived from this container.
    pub fn tags(&self, service_label: &str) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        tags.insert(
            TAG_SERVICE_ID.to_string(),
            self.labels.get(service_label).cloned().unwrap_or_default(),
        );
        tags.insert(TAG_CONTAINER_NAME.to_string(), self.name.clone());
        tags.insert(TAG_CONTAINER_ID.to_string(), self.container_id.clone());
        tags
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuCounters {
    pub total: u64,
    pub user_mode: u64,
    pub kernel_mode: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub usage: u64,
    pub limit: u64,
    pub max_usage: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// One raw snapshot of a container's counters.
///
/// CPU and network values are cumulative since container start; memory values
/// are point-in-time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSample {
    pub observed_at: DateTime<Utc>,
    pub cpu: CpuCounters,
    pub system_cpu: u64,
    pub core_count: u32,
    pub memory: MemorySnapshot,
    pub network: NetworkCounters,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuPercent {
    pub total: f64,
    pub user_mode: f64,
    pub kernel_mode: f64,
}

/// Metrics derived from two ordered samples of the same container.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateMetric {
    /// Observation time of the later sample.
    pub observed_at: DateTime<Utc>,
    pub cpu_percent: CpuPercent,
    pub cpu: CpuCounters,
    pub system_cpu: u64,
    pub core_count: u32,
    pub memory: MemorySnapshot,
    pub network: NetworkCounters,
    pub bandwidth: NetworkCounters,
}

impl RateMetric {
    /// Expands the metric into the cpu, memory and network points for one container.
    pub fn to_points(&self, tags: &BTreeMap<String, String>) -> Vec<MetricPoint> {
        let cpu = MetricPoint::new(MEASUREMENT_CPU, tags.clone(), self.observed_at)
            .field("total_percent", self.cpu_percent.total)
            .field("usermode_percent", self.cpu_percent.user_mode)
            .field("kernelmode_percent", self.cpu_percent.kernel_mode)
            .field("total_usage", self.cpu.total)
            .field("usage_in_usermode", self.cpu.user_mode)
            .field("usage_in_kernelmode", self.cpu.kernel_mode)
            .field("system_cpu_usage", self.system_cpu)
            .field("cpu_size", u64::from(self.core_count));

        let memory = MetricPoint::new(MEASUREMENT_MEMORY, tags.clone(), self.observed_at)
            .field("usage", self.memory.usage)
            .field("limit", self.memory.limit)
            .field("max_usage", self.memory.max_usage);

        let network = MetricPoint::new(MEASUREMENT_NETWORK, tags.clone(), self.observed_at)
            .field("rx_bytes", self.network.rx_bytes)
            .field("tx_bytes", self.network.tx_bytes)
            .field("rx_bandwidth", self.bandwidth.rx_bytes)
            .field("tx_bandwidth", self.bandwidth.tx_bytes);

        vec![cpu, memory, network]
    }
}

/// A numeric field value.
///
/// # Examples
///
/// ```
/// use fleetmon_common::types::FieldValue;
///
/// assert_eq!(FieldValue::from(7u64), FieldValue::Integer(7));
/// assert_eq!(FieldValue::from(u64::MAX), FieldValue::Integer(i64::MAX));
/// assert_eq!(FieldValue::from(0.5), FieldValue::Float(0.5));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::Integer(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

/// A single time-series point handed to the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: DateTime<Utc>,
}

impl MetricPoint {
    pub fn new(
        measurement: &str,
        tags: BTreeMap<String, String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            measurement: measurement.to_string(),
            tags,
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    pub fn field(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }
}

/// Points produced by one node collection, written in a single sink call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricBatch {
    pub node_id: String,
    /// Runtime URL the points were collected through, kept for diagnostics.
    pub origin: String,
    pub points: Vec<MetricPoint>,
}

impl MetricBatch {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> ContainerTarget {
        let mut labels = HashMap::new();
        labels.insert("svc.id".to_string(), "orders".to_string());
        ContainerTarget {
            container_id: "abc123".to_string(),
            name: "orders-1".to_string(),
            labels,
        }
    }

    #[test]
    fn container_tags_carry_identity() {
        let tags = target().tags("svc.id");
        assert_eq!(tags.get(TAG_SERVICE_ID).map(String::as_str), Some("orders"));
        assert_eq!(tags.get(TAG_CONTAINER_NAME).map(String::as_str), Some("orders-1"));
        assert_eq!(tags.get(TAG_CONTAINER_ID).map(String::as_str), Some("abc123"));
    }

    #[test]
    fn rate_metric_expands_to_three_measurements() {
        let now = Utc::now();
        let metric = RateMetric {
            observed_at: now,
            cpu_percent: CpuPercent {
                total: 2.0,
                user_mode: 1.5,
                kernel_mode: 0.5,
            },
            cpu: CpuCounters {
                total: 150,
                user_mode: 100,
                kernel_mode: 50,
            },
            system_cpu: 1100,
            core_count: 4,
            memory: MemorySnapshot {
                usage: 10,
                limit: 100,
                max_usage: 20,
            },
            network: NetworkCounters {
                rx_bytes: 500,
                tx_bytes: 300,
            },
            bandwidth: NetworkCounters {
                rx_bytes: 50,
                tx_bytes: 30,
            },
        };

        let points = metric.to_points(&target().tags("svc.id"));
        let names: Vec<&str> = points.iter().map(|p| p.measurement.as_str()).collect();
        assert_eq!(names, vec![MEASUREMENT_CPU, MEASUREMENT_MEMORY, MEASUREMENT_NETWORK]);
        assert!(points.iter().all(|p| p.timestamp == now));
        assert_eq!(points[0].fields.get("total_percent"), Some(&FieldValue::Float(2.0)));
        assert_eq!(points[0].fields.get("cpu_size"), Some(&FieldValue::Integer(4)));
        assert_eq!(points[1].fields.len(), 3);
        assert_eq!(points[2].fields.get("rx_bandwidth"), Some(&FieldValue::Integer(50)));
    }

    #[test]
    fn runtime_url_keeps_http_scheme() {
        let tunnel = Tunnel {
            node_id: "n".into(),
            public_url: "http://10.0.0.1:2375".into(),
            server: "s".into(),
            local_addr: "unix:///var/run/docker.sock".into(),
            established_at: Utc::now(),
            is_established: true,
        };
        assert_eq!(tunnel.runtime_url(), "http://10.0.0.1:2375");
    }
}
