use anyhow::{bail, Context};
use fleetmon_collector::node::CollectorSettings;
use fleetmon_sink::InfluxSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub status: StatusConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// A node is due again once its last collection is older than this.
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: u64,
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Upper bound on nodes claimed per tick.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
    /// The reachable-node set is refetched every this many ticks.
    #[serde(default = "default_refresh_every_ticks")]
    pub refresh_every_ticks: u64,
    /// Delay between two node launches.
    #[serde(default = "default_stagger_ms")]
    pub stagger_ms: u64,
    #[serde(default = "default_dispatch_chunk_size")]
    pub dispatch_chunk_size: usize,
    /// 0 disables the cap.
    #[serde(default)]
    pub max_in_flight: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            staleness_secs: default_staleness_secs(),
            tick_secs: default_tick_secs(),
            batch_limit: default_batch_limit(),
            refresh_every_ticks: default_refresh_every_ticks(),
            stagger_ms: default_stagger_ms(),
            dispatch_chunk_size: default_dispatch_chunk_size(),
            max_in_flight: 0,
        }
    }
}

fn default_staleness_secs() -> u64 {
    120
}

fn default_tick_secs() -> u64 {
    6
}

fn default_batch_limit() -> usize {
    200
}

fn default_refresh_every_ticks() -> u64 {
    20
}

fn default_stagger_ms() -> u64 {
    50
}

fn default_dispatch_chunk_size() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Local endpoint a tunnel must forward to for it to reach the runtime.
    #[serde(default = "default_runtime_socket")]
    pub runtime_socket: String,
    #[serde(default = "default_service_label")]
    pub service_label: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_stats_timeout_secs")]
    pub stats_timeout_secs: u64,
    #[serde(default = "default_container_concurrency")]
    pub container_concurrency: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            runtime_socket: default_runtime_socket(),
            service_label: default_service_label(),
            connect_timeout_secs: default_connect_timeout_secs(),
            stats_timeout_secs: default_stats_timeout_secs(),
            container_concurrency: default_container_concurrency(),
        }
    }
}

impl CollectorConfig {
    pub fn settings(&self) -> CollectorSettings {
        CollectorSettings {
            service_label: self.service_label.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            stats_timeout: Duration::from_secs(self.stats_timeout_secs),
            container_concurrency: self.container_concurrency,
        }
    }
}

fn default_runtime_socket() -> String {
    "unix:///var/run/docker.sock".to_string()
}

fn default_service_label() -> String {
    "io.daocloud.sr.microservice-id".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    20
}

fn default_stats_timeout_secs() -> u64 {
    10
}

fn default_container_concurrency() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// A logged-in node is reachable while its heartbeat is younger than this.
    #[serde(default = "default_heartbeat_window_secs")]
    pub heartbeat_window_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            heartbeat_window_secs: default_heartbeat_window_secs(),
        }
    }
}

fn default_db_path() -> String {
    "data/fleetmon.db".to_string()
}

fn default_heartbeat_window_secs() -> u64 {
    25
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default = "default_sink_url")]
    pub url: String,
    #[serde(default = "default_sink_database")]
    pub database: String,
    #[serde(default = "default_retention_policy")]
    pub retention_policy: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_sink_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            url: default_sink_url(),
            database: default_sink_database(),
            retention_policy: default_retention_policy(),
            username: None,
            password: None,
            timeout_secs: default_sink_timeout_secs(),
        }
    }
}

impl SinkConfig {
    pub fn settings(&self) -> InfluxSettings {
        InfluxSettings {
            url: self.url.clone(),
            database: self.database.clone(),
            retention_policy: self.retention_policy.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

fn default_sink_url() -> String {
    "http://127.0.0.1:8086".to_string()
}

fn default_sink_database() -> String {
    "fleetmon".to_string()
}

fn default_retention_policy() -> String {
    "default".to_string()
}

fn default_sink_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_status_enabled")]
    pub enabled: bool,
    #[serde(default = "default_status_http_port")]
    pub http_port: u16,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: default_status_enabled(),
            http_port: default_status_http_port(),
        }
    }
}

fn default_status_enabled() -> bool {
    true
}

fn default_status_http_port() -> u16 {
    9102
}

// ---- Seed file types (used by `init-nodes` CLI subcommand) ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodesSeedFile {
    #[serde(default)]
    pub nodes: Vec<SeedNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedNode {
    pub node_id: String,
    #[serde(default = "default_seed_logged_in")]
    pub logged_in: bool,
    #[serde(default)]
    pub tunnel: Option<SeedTunnel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedTunnel {
    pub public_url: String,
    pub server: String,
    /// Defaults to `collector.runtime_socket`.
    #[serde(default)]
    pub local_addr: Option<String>,
    /// Whether the relay currently advertises this tunnel.
    #[serde(default = "default_seed_alive")]
    pub alive: bool,
}

fn default_seed_logged_in() -> bool {
    true
}

fn default_seed_alive() -> bool {
    true
}

impl FleetConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{path}'"))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file '{path}'"))?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies `FLEETMON_*` overrides looked up through `lookup`.
    ///
    /// A value that does not parse is an error, never silently ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_override(&lookup, "FLEETMON_STALENESS_SECS")? {
            self.scheduler.staleness_secs = v;
        }
        if let Some(v) = parse_override(&lookup, "FLEETMON_TICK_SECS")? {
            self.scheduler.tick_secs = v;
        }
        if let Some(v) = parse_override(&lookup, "FLEETMON_BATCH_LIMIT")? {
            self.scheduler.batch_limit = v;
        }
        if let Some(v) = parse_override(&lookup, "FLEETMON_REFRESH_EVERY_TICKS")? {
            self.scheduler.refresh_every_ticks = v;
        }
        if let Some(v) = parse_override(&lookup, "FLEETMON_STAGGER_MS")? {
            self.scheduler.stagger_ms = v;
        }
        if let Some(v) = lookup("FLEETMON_SINK_URL") {
            self.sink.url = v;
        }
        if let Some(v) = lookup("FLEETMON_SINK_DATABASE") {
            self.sink.database = v;
        }
        if let Some(v) = lookup("FLEETMON_DB_PATH") {
            self.registry.db_path = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let s = &self.scheduler;
        if s.tick_secs == 0 {
            bail!("scheduler.tick_secs must be greater than 0");
        }
        if s.batch_limit == 0 {
            bail!("scheduler.batch_limit must be greater than 0");
        }
        if s.refresh_every_ticks == 0 {
            bail!("scheduler.refresh_every_ticks must be greater than 0");
        }
        if s.dispatch_chunk_size == 0 {
            bail!("scheduler.dispatch_chunk_size must be greater than 0");
        }
        if self.collector.container_concurrency == 0 {
            bail!("collector.container_concurrency must be greater than 0");
        }
        if self.sink.url.trim().is_empty() {
            bail!("sink.url must not be empty");
        }
        Ok(())
    }

    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.scheduler.staleness_secs)
    }

    pub fn heartbeat_window(&self) -> Duration {
        Duration::from_secs(self.registry.heartbeat_window_secs)
    }
}

fn parse_override<F, T>(lookup: &F, key: &str) -> anyhow::Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid value '{raw}' for {key}: {e}")),
    }
}
