use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub remote: RemoteSettings,
    pub oauth: OAuthSettings,
    #[serde(default)]
    pub credentials: CredentialSettings,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Remote CRM association API.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSettings {
    pub endpoint: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_version() -> String {
    "2021-07-28".to_string()
}

// Per-call timeout so a stalled remote never wedges a worker.
fn default_timeout_secs() -> u64 {
    10
}

/// Marketplace app credentials for the refresh-token exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthSettings {
    pub token_endpoint: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialSettings {
    /// A token this close to expiry is refreshed before use.
    #[serde(default = "default_safety_margin_secs")]
    pub safety_margin_secs: i64,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            safety_margin_secs: default_safety_margin_secs(),
        }
    }
}

fn default_safety_margin_secs() -> i64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncSettings {
    /// Fixed pause between consecutive remote mutation calls.
    #[serde(default = "default_inter_call_delay_ms")]
    pub inter_call_delay_ms: u64,
    /// Reconciliation queue depth; a full queue rejects new triggers.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Background workers draining the queue.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            inter_call_delay_ms: default_inter_call_delay_ms(),
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
        }
    }
}

fn default_inter_call_delay_ms() -> u64 {
    250
}

fn default_queue_capacity() -> usize {
    256
}

fn default_workers() -> usize {
    4
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Settings {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values in the struct
    /// 2. Configuration file (config/default.toml)
    /// 3. Environment variables (prefixed with PROPSYNC_)
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            // Local config file for development overrides
            .add_source(File::with_name("config/local").required(false))
            // e.g. PROPSYNC_REMOTE__ENDPOINT -> remote.endpoint
            .add_source(
                Environment::with_prefix("PROPSYNC")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }

    /// Load configuration from a custom path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix("PROPSYNC")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }
}
