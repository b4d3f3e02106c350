//!
//! Configuration file for a colony.
//!
//! Parsed from `config.yaml` in the colony directory. Every section has
//! serde defaults so a minimal file (just `id` and `application`) is valid.
//!

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

/// Sample YAML configuration written into a fresh colony directory.
/// Why not render the Default value? `serde_yaml` cannot emit comments,
/// so we maintain this sample manually.
pub const SAMPLE_CONFIG: &str = include_str!("../../config.sample.yaml");

/// WireGuard overlay parameters. The colony core treats these as opaque
/// operational values owned by the interface-management collaborator.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WireguardConfig {
    #[serde(default = "default_wireguard_port")]
    pub port: u16,
    /// The colony's WireGuard public key, base64.
    #[serde(default)]
    pub public_key: String,
    #[serde(default = "default_mesh_ipv4")]
    pub mesh_ipv4: String,
    #[serde(default)]
    pub mesh_ipv6: String,
    #[serde(default = "default_mesh_network_ipv4")]
    pub mesh_network_ipv4: String,
    #[serde(default)]
    pub mesh_network_ipv6: String,
    #[serde(default = "default_mtu")]
    pub mtu: u32,
    /// Externally reachable `host:port` endpoints advertised to agents.
    #[serde(default)]
    pub public_endpoints: Vec<String>,
    #[serde(default = "default_interface_name")]
    pub interface_name: String,
}

fn default_wireguard_port() -> u16 {
    51820
}

fn default_mesh_ipv4() -> String {
    "10.82.0.1".to_string()
}

fn default_mesh_network_ipv4() -> String {
    "10.82.0.0/16".to_string()
}

fn default_mtu() -> u32 {
    1420
}

fn default_interface_name() -> String {
    "coral0".to_string()
}

impl Default for WireguardConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("all fields defaulted")
    }
}

/// Ports of the colony's own listeners on the overlay.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ServicesConfig {
    /// The mesh RPC listener agents connect to.
    #[serde(default = "default_connect_port")]
    pub connect_port: u16,
    /// Reserved for the dashboard collaborator.
    #[serde(default = "default_dashboard_port")]
    pub dashboard_port: u16,
}

fn default_connect_port() -> u16 {
    7133
}

fn default_dashboard_port() -> u16 {
    7134
}

impl Default for ServicesConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("all fields defaulted")
    }
}

/// Discovery-service integration used during remote enrollment.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub auto_register: bool,
    /// Seconds between registry refreshes against the discovery service.
    #[serde(default = "default_register_interval")]
    pub register_interval: u64,
    #[serde(default)]
    pub mesh_id: String,
    /// JWKS endpoint publishing the discovery service's ticket-signing keys.
    /// Required when `enabled`; startup fails if absent.
    #[serde(default)]
    pub jwks_url: Option<Url>,
}

fn default_register_interval() -> u64 {
    300
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("all fields defaulted")
    }
}

/// TLS material for the public endpoint. When unset, the embedded CA issues
/// the server certificate.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct PublicEndpointTls {
    #[serde(default)]
    pub cert_file: Option<PathBuf>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

/// Token-auth settings for the public endpoint.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct PublicEndpointAuth {
    /// Overrides the default `tokens.yaml` in the colony directory.
    #[serde(default)]
    pub tokens_file: Option<PathBuf>,
}

/// MCP exposure toggle on the public endpoint (the adapter itself is an
/// external collaborator).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct PublicEndpointMcp {
    #[serde(default)]
    pub enabled: bool,
}

/// The optional operator/AI-facing endpoint. Off by default.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PublicEndpointConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_public_host")]
    pub host: String,
    #[serde(default = "default_public_port")]
    pub port: u16,
    #[serde(default)]
    pub tls: PublicEndpointTls,
    #[serde(default)]
    pub auth: PublicEndpointAuth,
    #[serde(default)]
    pub mcp: PublicEndpointMcp,
}

fn default_public_host() -> String {
    "127.0.0.1".to_string()
}

fn default_public_port() -> u16 {
    7135
}

impl Default for PublicEndpointConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("all fields defaulted")
    }
}

/// Tool exposure policy for AI clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct McpConfig {
    #[serde(default)]
    pub disabled: bool,
    /// Empty list means all tools are enabled.
    #[serde(default)]
    pub enabled_tools: Vec<String>,
    #[serde(default)]
    pub security: McpSecurityConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct McpSecurityConfig {
    #[serde(default = "default_true")]
    pub require_rbac_for_actions: bool,
    #[serde(default = "default_true")]
    pub audit_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for McpSecurityConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("all fields defaulted")
    }
}

impl Default for McpConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("all fields defaulted")
    }
}

/// Per-table retention in days for the eBPF-derived telemetry tables.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_days")]
    pub http_days: u32,
    #[serde(default = "default_retention_days")]
    pub grpc_days: u32,
    #[serde(default = "default_retention_days")]
    pub sql_days: u32,
    #[serde(default = "default_retention_days")]
    pub traces_days: u32,
}

fn default_retention_days() -> u32 {
    7
}

impl Default for RetentionConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("all fields defaulted")
    }
}

/// The combined eBPF telemetry poller (HTTP/gRPC/SQL/traces).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BeylaConfig {
    /// Seconds between pull cycles.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    #[serde(default)]
    pub retention: RetentionConfig,
}

fn default_poll_interval() -> u64 {
    60
}

impl Default for BeylaConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("all fields defaulted")
    }
}

/// Host-level system metrics poller.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SystemMetricsConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for SystemMetricsConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("all fields defaulted")
    }
}

/// Continuous CPU profiling poller.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ContinuousProfilingConfig {
    #[serde(default = "default_profile_poll_interval")]
    pub poll_interval: u64,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_true")]
    pub enable_summary_enrichment: bool,
    #[serde(default = "default_top_k_hotspots")]
    pub top_k_hotspots: u32,
}

fn default_profile_poll_interval() -> u64 {
    30
}

fn default_top_k_hotspots() -> u32 {
    10
}

impl Default for ContinuousProfilingConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("all fields defaulted")
    }
}

/// Function-registry poller, mapping profile addresses to symbols.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FunctionRegistryConfig {
    #[serde(default)]
    pub disabled: bool,
    #[serde(default = "default_function_registry_interval")]
    pub poll_interval: u64,
}

fn default_function_registry_interval() -> u64 {
    300
}

impl Default for FunctionRegistryConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("all fields defaulted")
    }
}

/// The error that can occur when reading the config file
#[derive(Debug, thiserror::Error)]
pub enum ConfigReadError {
    /// The config file not found
    #[error("Config file not found. {0}")]
    ConfigFileNotFound(#[from] std::io::Error),
    /// The config file is not valid
    #[error("Config file is not valid. {0}")]
    ConfigFileNotValid(#[from] serde_yaml::Error),
}

/// The main colony configuration.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ColonyConfig {
    /// The colony identifier, e.g. `my-shop-prod-a3f2`. Immutable once set.
    pub id: String,
    /// The application this colony observes.
    #[serde(default)]
    pub application: String,
    /// Deployment environment label (e.g. `production`).
    #[serde(default)]
    pub environment: String,

    #[serde(default)]
    pub wireguard: WireguardConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub public_endpoint: PublicEndpointConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub beyla: BeylaConfig,
    #[serde(default)]
    pub system_metrics: SystemMetricsConfig,
    #[serde(default)]
    pub continuous_profiling: ContinuousProfilingConfig,
    #[serde(default)]
    pub function_registry: FunctionRegistryConfig,
}

impl ColonyConfig {
    /// Reads the configuration from a YAML file at the specified path.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigReadError> {
        let contents = std::fs::read_to_string(path)?;
        let config: ColonyConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// A minimal configuration for the given colony id with every section
    /// defaulted. Used by tests and by fresh-directory creation.
    pub fn with_id(id: impl Into<String>) -> Self {
        let mut config: ColonyConfig =
            serde_yaml::from_str("id: placeholder").expect("minimal config is valid");
        config.id = id.into();
        config
    }
}
