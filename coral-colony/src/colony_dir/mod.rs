//!
//! The on-disk home of a colony: `<config_dir>/colonies/<colony_id>/`.
//!
//! Holds `config.yaml`, the `ca/` material, `tokens.yaml` and `colony.db`.
//! Everything under it is private to the colony process; the directory is
//! created 0700.
//!

mod config_yaml;
mod mock_colony_dir;
mod persistent_colony_dir;

pub use config_yaml::{
    BeylaConfig, ColonyConfig, ConfigReadError, ContinuousProfilingConfig, DiscoveryConfig,
    FunctionRegistryConfig, McpConfig, McpSecurityConfig, PublicEndpointAuth,
    PublicEndpointConfig, PublicEndpointMcp, PublicEndpointTls, RetentionConfig, ServicesConfig,
    SystemMetricsConfig, WireguardConfig,
};
pub use mock_colony_dir::MockColonyDir;
pub use persistent_colony_dir::PersistentColonyDir;

use std::{fmt::Debug, path::Path};

/// Accessor for a colony's on-disk state directory.
///
/// Implemented by [PersistentColonyDir] for real deployments and
/// [MockColonyDir] for tests (temp dir, removed on drop).
pub trait ColonyDir: Debug + Send + Sync {
    /// The full path of the colony directory.
    fn path(&self) -> &Path;

    /// Create the directory (0700 on unix) and verify it is writable.
    fn ensure_dir_exists_and_is_writable(&self) -> anyhow::Result<()>;

    /// Read `config.yaml`, writing a commented sample first if absent.
    fn read_or_create_config(&self) -> anyhow::Result<ColonyConfig>;
}

/// Well-known file and directory names inside a colony directory.
pub mod paths {
    /// The colony configuration file.
    pub const CONFIG_FILE: &str = "config.yaml";
    /// CA certificates and private keys.
    pub const CA_DIR: &str = "ca";
    /// Public-endpoint token records.
    pub const TOKENS_FILE: &str = "tokens.yaml";
    /// The analytical store.
    pub const DB_FILE: &str = "colony.db";
}
