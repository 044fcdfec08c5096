//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: CRUDPAQ_, sections separated by `__`,
//!    e.g. `CRUDPAQ_QUERY__MAX_PAGE_SIZE=100`)
//! 2. Current working directory: ./config.toml
//! 3. XDG config directory: ~/.config/crudpaq/{service_name}/config.toml
//! 4. System directory: /etc/crudpaq/{service_name}/config.toml
//! 5. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::protocol::{CountPolicy, Version};
use crate::shaping::ProjectionPolicy;
use crate::versioning::DefaultVersionBehaviour;

const APP_PREFIX: &str = "crudpaq";
const ENV_PREFIX: &str = "CRUDPAQ_";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,

    /// API version routing
    #[serde(default)]
    pub versioning: VersioningConfig,

    /// Query paging and counting
    #[serde(default)]
    pub query: QueryConfig,

    /// Field projection
    #[serde(default)]
    pub projection: ProjectionConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name
    pub name: String,

    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// API version routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersioningConfig {
    /// Handler to use when the client names no version
    #[serde(default)]
    pub default_behaviour: DefaultVersionBehaviour,

    /// Attach a warning when the client names no version
    #[serde(default = "default_true")]
    pub warning_enabled: bool,

    /// Agent name used in warning advice
    #[serde(default = "default_agent_name")]
    pub agent_name: String,

    /// Protocol version reported in `Content-API-Version` advice
    #[serde(default = "default_protocol_version")]
    pub protocol_version: Version,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            default_behaviour: DefaultVersionBehaviour::default(),
            warning_enabled: default_true(),
            agent_name: default_agent_name(),
            protocol_version: default_protocol_version(),
        }
    }
}

/// Query paging and counting configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Page size used when a query does not set one (0 = unpaged)
    #[serde(default)]
    pub default_page_size: u32,

    /// Upper bound on page size (0 = unbounded)
    #[serde(default)]
    pub max_page_size: u32,

    /// Count policy used when a query does not set one
    #[serde(default)]
    pub count_policy_default: CountPolicy,
}

/// Field projection configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectionConfig {
    /// How overlapping field pointers combine
    #[serde(default)]
    pub policy: ProjectionPolicy,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_agent_name() -> String {
    "CREST".to_string()
}

fn default_protocol_version() -> Version {
    Version::new(2, 0)
}

impl Config {
    /// Load configuration from all sources
    ///
    /// Searches for config files in this order (first found is used):
    /// 1. Current working directory: ./config.toml
    /// 2. XDG config directory: ~/.config/crudpaq/{service_name}/config.toml
    /// 3. System directory: /etc/crudpaq/{service_name}/config.toml
    ///
    /// Environment variables (CRUDPAQ_ prefix) override all file-based configs.
    pub fn load() -> Result<Self> {
        let service_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| APP_PREFIX.to_string());

        Self::load_for_service(&service_name)
    }

    /// Load configuration for a specific service name
    pub fn load_for_service(service_name: &str) -> Result<Self> {
        let config_paths = Self::find_config_paths(service_name);

        tracing::debug!("Searching for config files in order:");
        for path in &config_paths {
            tracing::debug!("  - {}", path.display());
        }

        let mut figment = Figment::new().merge(Serialized::defaults(Config::named(service_name)));

        // Lowest priority first so higher priority files override
        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!("Loading configuration from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config = figment.extract()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    ///
    /// This bypasses XDG directories and loads directly from the given path.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }

    /// Find all possible config file paths for a service
    ///
    /// Returns paths in priority order (highest first).
    fn find_config_paths(service_name: &str) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        let xdg_dirs = xdg::BaseDirectories::with_prefix(APP_PREFIX);
        let config_file_path = Path::new(service_name).join("config.toml");
        if let Some(path) = xdg_dirs.find_config_file(&config_file_path) {
            paths.push(path);
        }

        paths.push(
            PathBuf::from("/etc")
                .join(APP_PREFIX)
                .join(service_name)
                .join("config.toml"),
        );

        paths
    }

    /// Get the recommended config path for a service
    ///
    /// Returns: ~/.config/crudpaq/{service_name}/config.toml, creating the
    /// parent directories when possible.
    pub fn recommended_path(service_name: &str) -> PathBuf {
        let xdg_dirs = xdg::BaseDirectories::with_prefix(APP_PREFIX);
        let config_file_path = Path::new(service_name).join("config.toml");

        xdg_dirs
            .place_config_file(&config_file_path)
            .unwrap_or_else(|_| {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| String::from("~")))
                    .join(".config")
                    .join(APP_PREFIX)
                    .join(config_file_path)
            })
    }

    fn named(service_name: &str) -> Self {
        let mut config = Self::default();
        config.service.name = service_name.to_string();
        config
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                name: APP_PREFIX.to_string(),
                log_level: default_log_level(),
            },
            versioning: VersioningConfig::default(),
            query: QueryConfig::default(),
            projection: ProjectionConfig::default(),
        }
    }
}
