use serde::Deserialize;

/// Root application configuration. Loaded from environment variables with
/// the prefix `DOOH_EXPRESS__` and an optional TOML config file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub device_api: DeviceApiConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Forward-looking build horizon in minutes (§4.5, default 60).
    #[serde(default = "default_horizon_minutes")]
    pub horizon_minutes: i64,
    /// Slot granularity in minutes (§1/§4.5, default 5).
    #[serde(default = "default_slot_minutes")]
    pub slot_minutes: i64,
    /// How often a device's forward window is rebuilt, in minutes.
    #[serde(default = "default_rebuild_interval_minutes")]
    pub rebuild_interval_minutes: i64,
    /// Grace window added to `scheduledTime + G` before a SCHEDULED
    /// delivery is expired (§4.6), in minutes; defaults to one slot.
    #[serde(default = "default_grace_minutes")]
    pub grace_minutes: i64,
    /// Number of logical worker shards (§5), `hash(deviceID) mod N`.
    #[serde(default = "default_worker_shards")]
    pub worker_shards: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PricingConfig {
    #[serde(default = "default_rate_floor")]
    pub rate_floor: f64,
    /// Minimum historical impressions before blending observed CPM/CPE/CPA
    /// 50/50 into the base rate (§4.2 step 1).
    #[serde(default = "default_historical_blend_threshold")]
    pub historical_blend_threshold: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectionConfig {
    /// UCB1 "total pulls" constant used in the exploration bonus
    /// (`sqrt(2 * ln(K) / impressions)`); the spec's reference value is 100.
    #[serde(default = "default_ucb1_k")]
    pub ucb1_k: f64,
    /// End-of-flight score multiplier (§4.4 step 4).
    #[serde(default = "default_end_of_flight_boost")]
    pub end_of_flight_boost: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Default per-device `PullQueue` rate limit (§5 backpressure), reqs/sec.
    #[serde(default = "default_pull_queue_rps")]
    pub pull_queue_rps: u32,
    /// Device considered OFFLINE after this many seconds without a
    /// heartbeat (S5, default 2 minutes).
    #[serde(default = "default_offline_after_secs")]
    pub offline_after_secs: i64,
}

/// Placeholder for a future persistent backend. The core's only current
/// implementation is the in-memory `DashMap`-backed stores — swap this for
/// PostgreSQL / another vendor store for production, the way the teacher's
/// `ManagementStore` / `MeteringEngine` comments call out.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_node_id() -> String {
    "dooh-node-01".to_string()
}
fn default_horizon_minutes() -> i64 {
    60
}
fn default_slot_minutes() -> i64 {
    5
}
fn default_rebuild_interval_minutes() -> i64 {
    60
}
fn default_grace_minutes() -> i64 {
    5
}
fn default_worker_shards() -> u32 {
    8
}
fn default_rate_floor() -> f64 {
    0.01
}
fn default_historical_blend_threshold() -> u64 {
    1000
}
fn default_ucb1_k() -> f64 {
    100.0
}
fn default_end_of_flight_boost() -> f64 {
    1.5
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_pull_queue_rps() -> u32 {
    1
}
fn default_offline_after_secs() -> i64 {
    120
}
fn default_schema_version() -> u32 {
    1
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            horizon_minutes: default_horizon_minutes(),
            slot_minutes: default_slot_minutes(),
            rebuild_interval_minutes: default_rebuild_interval_minutes(),
            grace_minutes: default_grace_minutes(),
            worker_shards: default_worker_shards(),
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            rate_floor: default_rate_floor(),
            historical_blend_threshold: default_historical_blend_threshold(),
        }
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            ucb1_k: default_ucb1_k(),
            end_of_flight_boost: default_end_of_flight_boost(),
        }
    }
}

impl Default for DeviceApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            pull_queue_rps: default_pull_queue_rps(),
            offline_after_secs: default_offline_after_secs(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            scheduler: SchedulerConfig::default(),
            pricing: PricingConfig::default(),
            selection: SelectionConfig::default(),
            device_api: DeviceApiConfig::default(),
            store: StoreConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and optional config file.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("DOOH_EXPRESS")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
