//! Layered configuration
//!
//! Values come from, in increasing priority: built-in defaults, an optional
//! TOML file, and `VDT_*` environment variables. Nested keys use a double
//! underscore, e.g. `VDT_SERVER__BASE_PORT=27050`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "vdt.toml";
const ENV_PREFIX: &str = "VDT";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevtoolsConfig {
    /// Level for the `vdt_*` log targets
    pub log_level: String,
    /// How long a correlated call waits for its reply
    pub rpc_timeout_ms: u64,
    /// Interval between `client-create` announcements
    pub handshake_retry_ms: u64,
    pub server: ServerConfig,
}

impl Default for DevtoolsConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            rpc_timeout_ms: 30_000,
            handshake_retry_ms: 1_000,
            server: ServerConfig::default(),
        }
    }
}

/// Build-tool server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    /// First port tried when binding
    pub base_port: u16,
    /// Number of consecutive ports tried
    pub port_attempts: u16,
    /// Project root, defaults to the working directory
    pub root: Option<PathBuf>,
    /// Characters returned by `server:text-asset-content` when the caller
    /// gives no limit
    pub text_asset_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            base_port: 27040,
            port_attempts: 10,
            root: None,
            text_asset_limit: 300,
        }
    }
}

impl DevtoolsConfig {
    /// Load from `path` (or the platform config file) and the process
    /// environment. A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);
        Self::load_with_env(path.as_deref(), None)
    }

    /// Like [`DevtoolsConfig::load`], reading environment overrides from
    /// `env` instead of the process when given
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            tracing::debug!("Reading config from {}", path.display());
            builder = builder.add_source(
                config::File::new(&path.to_string_lossy(), config::FileFormat::Toml)
                    .required(false),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// `vdt.toml` in the platform config directory
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "vdt", "vdt").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn handshake_retry(&self) -> Duration {
        Duration::from_millis(self.handshake_retry_ms)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            rpc_timeout: self.rpc_timeout(),
            handshake_retry: self.handshake_retry(),
        }
    }
}

/// Timing knobs shared by host and panel sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub rpc_timeout: Duration,
    pub handshake_retry: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        DevtoolsConfig::default().session_options()
    }
}
