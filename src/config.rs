use std::collections::HashMap;

use config::{Config as ConfigLib, ConfigBuilder, ConfigError, Environment, builder::DefaultState};
use serde::{Deserialize, Serialize};

use crate::outbound::webhook::{RetryPolicy, SubscriptionDefaults};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub webhooks: WebhooksConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhooksConfig {
    /// Sent as `User-Agent` on every delivery
    pub user_agent: String,
    pub default_max_retries: u32,
    pub default_timeout_seconds: u64,
    pub default_retry_policy: RetryPolicy,
    /// Bytes of each response body kept in results and audit rows
    pub response_body_limit: usize,
    /// Roles allowed to manage webhooks (comma separated in the environment)
    pub manager_roles: Vec<String>,
}

impl WebhooksConfig {
    pub fn subscription_defaults(&self) -> SubscriptionDefaults {
        SubscriptionDefaults {
            max_retries: self.default_max_retries,
            timeout_seconds: self.default_timeout_seconds,
            retry_policy: self.default_retry_policy,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    pub fn load_with_sources(
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Self::set_defaults()?;
        // If env_vars is provided, we use it instead of system environment
        // This is to avoid systems variables pollution across tests
        if let Some(vars) = env_vars {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            // Use system environment variables
            // Should be in the format APP_SERVER__PORT or APP_WEBHOOKS__USER_AGENT
            builder = builder.add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("webhooks.manager_roles")
                    .try_parsing(true),
            );
        }

        builder.build()?.try_deserialize()
    }

    /// Set default values for the configuration.
    /// This is used when no environment variables or config file are provided
    fn set_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        ConfigLib::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default(
                "webhooks.user_agent",
                format!("SaasBackend-Webhooks/{}", env!("CARGO_PKG_VERSION")),
            )?
            .set_default("webhooks.default_max_retries", 3)?
            .set_default("webhooks.default_timeout_seconds", 10)?
            .set_default("webhooks.default_retry_policy", "exponential")?
            .set_default("webhooks.response_body_limit", 2048)?
            .set_default("webhooks.manager_roles", vec!["owner", "admin"])
    }
}
