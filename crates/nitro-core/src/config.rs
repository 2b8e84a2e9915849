//! Environment configuration
//!
//! A [`Config`] selects the registry and transport implementations and
//! optionally pins the listen address. [`Config::from_env`] reads the
//! `NITRO_*` variables; unset values fall back to serde defaults, so a
//! config deserialized from a file behaves the same way.

use serde::{Deserialize, Serialize};

/// Overrides the listen address
pub const ENV_SERVER_ADDRESS: &str = "NITRO_SERVER_ADDRESS";
/// Selects the registry implementation
pub const ENV_REGISTRY: &str = "NITRO_REGISTRY";
/// Selects the transport implementation
pub const ENV_TRANSPORT: &str = "NITRO_TRANSPORT";

/// Program-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listen address; `None` lets the transport decide
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_address: Option<String>,

    /// Registry implementation name
    #[serde(default = "default_registry")]
    pub registry: String,

    /// Transport implementation name
    #[serde(default = "default_transport")]
    pub transport: String,
}

fn default_registry() -> String {
    "memory".to_string()
}

fn default_transport() -> String {
    "socket".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_address: None,
            registry: default_registry(),
            transport: default_transport(),
        }
    }
}

impl Config {
    /// Build a config from the `NITRO_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(address) = std::env::var(ENV_SERVER_ADDRESS) {
            if !address.is_empty() {
                config.server_address = Some(address);
            }
        }
        if let Ok(registry) = std::env::var(ENV_REGISTRY) {
            if !registry.is_empty() {
                config.registry = registry;
            }
        }
        if let Ok(transport) = std::env::var(ENV_TRANSPORT) {
            if !transport.is_empty() {
                config.transport = transport;
            }
        }
        config
    }
}
