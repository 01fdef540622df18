use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

use crate::controller::ReconcileSettings;
use crate::events::redis::RedisStreamSettings;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// How the control plane reaches this service
    #[serde(default)]
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub chirpstack: ChirpstackConfig,
    #[serde(default)]
    pub keycloak: KeycloakConfig,
    #[serde(default)]
    pub device_repo: DeviceRepoConfig,
    /// Device change-event stream
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.connector.public_host.is_empty() {
            return Err("connector.public_host must not be empty".into());
        }
        // Upstream endpoints
        if self.chirpstack.url.is_empty() {
            return Err("chirpstack.url must not be empty".into());
        }
        if self.chirpstack.request_timeout_ms == 0 {
            return Err("chirpstack.request_timeout_ms must be > 0".into());
        }
        if self.keycloak.url.is_empty() {
            return Err("keycloak.url must not be empty".into());
        }
        if self.keycloak.client_id.is_empty() {
            return Err("keycloak.client_id must not be empty".into());
        }
        if self.device_repo.url.is_empty() {
            return Err("device_repo.url must not be empty".into());
        }
        // Sync validations
        if self.sync.interval_secs == 0 {
            return Err("sync.interval_secs must be > 0".into());
        }
        if self.sync.page_size == 0 || self.sync.device_page_size == 0 {
            return Err("sync page sizes must be > 0".into());
        }
        if self.sync.max_concurrency == 0 {
            return Err("sync.max_concurrency must be > 0".into());
        }
        if self.sync.entity_timeout_ms == 0 || self.sync.orphan_sweep_timeout_secs == 0 {
            return Err("sync timeouts must be > 0".into());
        }
        // Events validation
        if self.events.enabled() && self.events.batch_size == 0 {
            return Err("events.batch_size must be > 0".into());
        }
        if self.events.enabled() && self.events.consumer.trim().is_empty() {
            return Err("events.consumer must not be empty".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    /// URL the control plane posts uplink events to.
    pub fn event_endpoint(&self) -> String {
        format!(
            "{}:{}{}",
            self.connector.public_host.trim_end_matches('/'),
            self.server.port,
            crate::EVENT_PATH
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.chirpstack.request_timeout_ms)
    }

    pub fn reconcile_settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            page_size: self.sync.page_size,
            device_page_size: self.sync.device_page_size,
            entity_timeout: Duration::from_millis(self.sync.entity_timeout_ms),
            orphan_sweep_timeout: Duration::from_secs(self.sync.orphan_sweep_timeout_secs),
            max_concurrency: self.sync.max_concurrency,
            compare_frame_counters: self.sync.compare_frame_counters,
            owner_cache_ttl: Duration::from_secs(self.sync.owner_cache_ttl_secs),
            protected_users: self.chirpstack.protected_users.clone(),
            event_endpoint: self.event_endpoint(),
        }
    }

    pub fn redis_stream_settings(&self) -> RedisStreamSettings {
        RedisStreamSettings {
            url: self.events.redis_url.clone(),
            stream: self.events.stream.clone(),
            group: self.events.group.clone(),
            consumer: self.events.consumer.clone(),
            block: Duration::from_millis(self.events.block_ms),
            batch_size: self.events.batch_size,
            claim_idle: Duration::from_millis(self.events.claim_idle_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Scheme and host of this service as seen from the control plane
    #[serde(default = "default_public_host")]
    pub public_host: String,
}

fn default_public_host() -> String {
    "http://lorawan-platform-connector".into()
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            public_host: default_public_host(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChirpstackConfig {
    #[serde(default = "default_chirpstack_url")]
    pub url: String,
    #[serde(default)]
    pub api_token: String,
    /// Users and tenants reconciliation never deletes
    #[serde(default = "default_protected_users")]
    pub protected_users: Vec<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_chirpstack_url() -> String {
    "http://chirpstack-rest-api:8090".into()
}
fn default_protected_users() -> Vec<String> {
    vec!["admin".into()]
}
fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for ChirpstackConfig {
    fn default() -> Self {
        Self {
            url: default_chirpstack_url(),
            api_token: String::new(),
            protected_users: default_protected_users(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeycloakConfig {
    #[serde(default = "default_keycloak_url")]
    pub url: String,
    #[serde(default = "default_realm")]
    pub realm: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Refresh the token this long before it expires
    #[serde(default = "default_refresh_margin_secs")]
    pub refresh_margin_secs: u64,
}

fn default_keycloak_url() -> String {
    "http://keycloak:8080".into()
}
fn default_realm() -> String {
    "master".into()
}
fn default_client_id() -> String {
    "lorawan-platform-connector".into()
}
fn default_refresh_margin_secs() -> u64 {
    10
}

impl Default for KeycloakConfig {
    fn default() -> Self {
        Self {
            url: default_keycloak_url(),
            realm: default_realm(),
            client_id: default_client_id(),
            client_secret: String::new(),
            refresh_margin_secs: default_refresh_margin_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRepoConfig {
    #[serde(default = "default_device_repo_url")]
    pub url: String,
}

fn default_device_repo_url() -> String {
    "http://device-repository:8080".into()
}

impl Default for DeviceRepoConfig {
    fn default() -> Self {
        Self {
            url: default_device_repo_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Redis connection URL; empty disables change events
    #[serde(default)]
    pub redis_url: String,
    #[serde(default = "default_stream")]
    pub stream: String,
    #[serde(default = "default_group")]
    pub group: String,
    /// Consumer name within the group; stable across restarts
    #[serde(default = "default_consumer")]
    pub consumer: String,
    #[serde(default = "default_block_ms")]
    pub block_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Claim entries other consumers left pending this long; 0 disables
    #[serde(default = "default_claim_idle_ms")]
    pub claim_idle_ms: u64,
}

fn default_stream() -> String {
    "devices".into()
}
fn default_group() -> String {
    "lorawan-platform-connector".into()
}
fn default_consumer() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "lorawan-platform-connector".into())
}
fn default_block_ms() -> u64 {
    5_000
}
fn default_batch_size() -> usize {
    16
}
fn default_claim_idle_ms() -> u64 {
    60_000
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            redis_url: String::new(),
            stream: default_stream(),
            group: default_group(),
            consumer: default_consumer(),
            block_ms: default_block_ms(),
            batch_size: default_batch_size(),
            claim_idle_ms: default_claim_idle_ms(),
        }
    }
}

impl EventsConfig {
    pub fn enabled(&self) -> bool {
        !self.redis_url.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_device_page_size")]
    pub device_page_size: usize,
    /// Upper bound for one identity or device
    #[serde(default = "default_entity_timeout_ms")]
    pub entity_timeout_ms: u64,
    #[serde(default = "default_orphan_sweep_timeout_secs")]
    pub orphan_sweep_timeout_secs: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Include network-server frame counters when comparing activations
    #[serde(default = "default_compare_frame_counters")]
    pub compare_frame_counters: bool,
    #[serde(default = "default_owner_cache_ttl_secs")]
    pub owner_cache_ttl_secs: u64,
}

fn default_interval_secs() -> u64 {
    3600
}
fn default_page_size() -> usize {
    1000
}
fn default_device_page_size() -> usize {
    100
}
fn default_entity_timeout_ms() -> u64 {
    10_000
}
fn default_orphan_sweep_timeout_secs() -> u64 {
    600
}
fn default_max_concurrency() -> usize {
    32
}
fn default_compare_frame_counters() -> bool {
    true
}
fn default_owner_cache_ttl_secs() -> u64 {
    60
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            page_size: default_page_size(),
            device_page_size: default_device_page_size(),
            entity_timeout_ms: default_entity_timeout_ms(),
            orphan_sweep_timeout_secs: default_orphan_sweep_timeout_secs(),
            max_concurrency: default_max_concurrency(),
            compare_frame_counters: default_compare_frame_counters(),
            owner_cache_ttl_secs: default_owner_cache_ttl_secs(),
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_PATH: &str = "lorawan-connector.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., LORAWAN_CONNECTOR__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("LORAWAN_CONNECTOR")
                .try_parsing(true)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("chirpstack.protected_users"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
