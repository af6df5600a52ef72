//! YAML configuration loading for the hub
//!
//! `configuration.yaml` in the config directory supports these tags:
//!
//! - `!include path` - Include another YAML file
//! - `!secret key` - Substitute from secrets.yaml
//! - `!env_var VAR [default]` - Environment variable substitution
//!
//! # Example
//!
//! ```ignore
//! use hub_config::HubConfig;
//!
//! let config = HubConfig::load("/config")?;
//! println!("serving on {}", config.api.bind);
//! ```

mod error;
mod hub_config;
mod loader;
mod secrets;

pub use error::{ConfigError, ConfigResult};
pub use hub_config::{ApiConfig, HubConfig, HubSection, QueueBackend, QueueConfig, StorageConfig};
pub use loader::{load_yaml, YamlLoader};
pub use secrets::Secrets;

pub use serde_yaml::Value;

/// Name of the main configuration file
pub const CONFIG_FILE: &str = "configuration.yaml";
