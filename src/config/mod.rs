//! Engine configuration
//!
//! A single YAML file, parsed once at start-up into immutable structs that
//! are handed to each component's constructor. Every section has defaults,
//! so an empty file (or no file at all) yields a runnable configuration
//! apart from the cluster list.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::RetryPolicy;

/// Default HTTP port for the command server
pub const DEFAULT_PORT: u16 = 8282;

/// Default config file location: ~/.faas-control/config.yaml
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".faas-control")
        .join("config.yaml")
}

/// Errors for loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// The complete configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    /// Retry policy for cluster reads
    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub logs: LogsConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub ingress: IngressConfig,

    /// Clusters the resolver can hand out
    #[serde(default)]
    pub clusters: Vec<ClusterEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: DEFAULT_PORT,
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_cluster_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_cluster_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

fn default_cluster_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

/// Metrics backend access and query defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_query_path")]
    pub query_path: String,
    /// Window used when a caller gives no range
    #[serde(default = "default_range_secs")]
    pub default_range_secs: i64,
    #[serde(default = "default_step_secs")]
    pub step_secs: i64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_metrics_attempts(),
            base_delay_ms: default_base_delay_ms(),
            scheme: default_scheme(),
            query_path: default_query_path(),
            default_range_secs: default_range_secs(),
            step_secs: default_step_secs(),
            timeout_secs: default_timeout_secs(),
            api_key_header: default_api_key_header(),
        }
    }
}

impl MetricsConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

fn default_metrics_attempts() -> u32 {
    5
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_query_path() -> String {
    "/prometheus/api/v1/query_range".to_string()
}

fn default_range_secs() -> i64 {
    3600
}

fn default_step_secs() -> i64 {
    60
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_api_key_header() -> String {
    "x-apikey-header".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogsConfig {
    #[serde(default = "default_tail_lines")]
    pub tail_lines: i64,
    /// Keep probe and scrape lines in log output
    #[serde(default)]
    pub show_noise: bool,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            tail_lines: default_tail_lines(),
            show_noise: false,
        }
    }
}

fn default_tail_lines() -> i64 {
    1000
}

/// Where deploy requests are sent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_dispatcher_url")]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            url: default_dispatcher_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_dispatcher_url() -> String {
    "http://127.0.0.1:8383/v1/deployments".to_string()
}

/// Names used when provisioning a namespace's ingress objects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    /// Namespace holding the platform's LoadBalancer service
    pub load_balancer_namespace: String,
    pub ingress_class: String,
    pub metrics_service_name: String,
    pub metrics_external_name: String,
    pub metrics_ingress_name: String,
    /// Header the ingress checks the namespace API key against
    pub api_key_header: String,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            load_balancer_namespace: "microfunctions".to_string(),
            ingress_class: "kong".to_string(),
            metrics_service_name: "prometheus-service".to_string(),
            metrics_external_name: "prometheus.microfunctions.svc.cluster.local".to_string(),
            metrics_ingress_name: "ingress-prometheus".to_string(),
            api_key_header: default_api_key_header(),
        }
    }
}

/// A cluster the engine may deploy to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterEntry {
    pub id: String,
    pub name: String,
    /// Inline kubeconfig document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<String>,
    /// Path to a kubeconfig file; `~` and `$VAR` are expanded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig_path: Option<String>,
    /// Users allowed to use this cluster; empty means everyone
    #[serde(default)]
    pub tenants: Vec<String>,
}

impl ClusterEntry {
    pub fn allows(&self, id_user: &str) -> bool {
        self.tenants.is_empty() || self.tenants.iter().any(|t| t == id_user)
    }
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

/// Parse config from YAML string
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = if content.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?
    };
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    for entry in &config.clusters {
        if entry.kubeconfig.is_none() && entry.kubeconfig_path.is_none() {
            return Err(ConfigError::Invalid(format!(
                "cluster '{}' needs kubeconfig or kubeconfig_path",
                entry.id
            )));
        }
    }
    let mut ids: Vec<&str> = config.clusters.iter().map(|c| c.id.as_str()).collect();
    ids.sort_unstable();
    if let Some(pair) = ids.windows(2).find(|w| w[0] == w[1]) {
        return Err(ConfigError::Invalid(format!(
            "cluster id '{}' is listed twice",
            pair[0]
        )));
    }
    if config.metrics.max_attempts == 0 {
        return Err(ConfigError::Invalid(
            "metrics.max_attempts must be at least 1".to_string(),
        ));
    }
    Ok(())
}

// ============================================================================
// I/O boundary functions
// ============================================================================

/// Load config from a path; a missing file yields the defaults
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}
