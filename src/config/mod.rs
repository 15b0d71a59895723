//! Configuration management
//!
//! Layers, lowest priority first:
//! 1. built-in defaults
//! 2. optional TOML file (`stasis.toml`, or an explicit path)
//! 3. `STASIS_<SECTION>__<KEY>` environment variables
//! 4. the classic ARI variables `ARI_APP`, `ARI_USERNAME`, `ARI_PASSWORD`,
//!    `ARI_URL`, `ARI_WS_URL`

use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "stasis.toml";

const ENV_PREFIX: &str = "STASIS";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ari: AriConfig,
    pub dial: DialConfig,
    pub server: ServerConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AriConfig {
    /// Stasis application whose call-start events we handle
    pub application: String,
    pub username: String,
    pub password: String,
    /// REST base URL, e.g. `http://localhost:8088/ari`
    pub url: String,
    /// Event feed URL, e.g. `ws://localhost:8088/ari/events`
    pub websocket_url: String,
    /// Application outbound legs are originated into
    pub originate_app: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialConfig {
    /// How long candidates may ring before the race gives up
    pub ring_timeout_secs: u64,
    /// Endpoint template, `{}` is replaced by the extension
    pub endpoint_template: String,
    /// Dialed number -> extensions rung concurrently
    pub ring_groups: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Serve /health, /metrics and /sessions
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive, overridden by RUST_LOG
    pub filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ari: AriConfig::default(),
            dial: DialConfig::default(),
            server: ServerConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for AriConfig {
    fn default() -> Self {
        Self {
            application: "stasis-orchestrator".to_string(),
            username: "asterisk".to_string(),
            password: "asterisk".to_string(),
            url: "http://localhost:8088/ari".to_string(),
            websocket_url: "ws://localhost:8088/ari/events".to_string(),
            originate_app: "callChildrens".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl Default for DialConfig {
    fn default() -> Self {
        let mut ring_groups = HashMap::new();
        ring_groups.insert(
            "100".to_string(),
            vec!["1101".to_string(), "1102".to_string()],
        );

        Self {
            ring_timeout_secs: 20,
            endpoint_template: "PJSIP/{}".to_string(),
            ring_groups,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 9090,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from all layers. A missing default file is fine; a
    /// missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = ::config::Config::try_from(&Config::default()).map_err(config_error)?;

        let file = match path {
            Some(path) => ::config::File::from(path).required(true),
            None => ::config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let builder = ::config::Config::builder()
            .add_source(defaults)
            .add_source(file)
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            );

        let builder = apply_ari_env(builder)?;

        let config: Config = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_error)?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the orchestrator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.ari.application.trim().is_empty() {
            return Err(DomainError::Config("ari.application must not be empty".to_string()));
        }
        if self.ari.originate_app.trim().is_empty() || self.ari.originate_app.contains(',') {
            return Err(DomainError::Config(format!(
                "ari.originate_app '{}' is not a valid application name",
                self.ari.originate_app
            )));
        }
        if self.ari.url.trim().is_empty() || self.ari.websocket_url.trim().is_empty() {
            return Err(DomainError::Config("ari.url and ari.websocket_url are required".to_string()));
        }
        if self.ari.request_timeout_secs == 0 {
            return Err(DomainError::Config("ari.request_timeout_secs must be > 0".to_string()));
        }
        if self.dial.ring_timeout_secs == 0 {
            return Err(DomainError::Config("dial.ring_timeout_secs must be > 0".to_string()));
        }
        if !self.dial.endpoint_template.contains("{}") {
            return Err(DomainError::Config(format!(
                "dial.endpoint_template '{}' has no {{}} placeholder",
                self.dial.endpoint_template
            )));
        }
        if let Some((number, _)) = self.dial.ring_groups.iter().find(|(_, exts)| exts.is_empty()) {
            return Err(DomainError::Config(format!("ring group '{}' has no extensions", number)));
        }
        Ok(())
    }
}

impl AriConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Applications the event feed subscribes to. ARI only delivers a
    /// channel's events to the application the channel is in, so outbound
    /// legs are only visible through `originate_app`.
    pub fn event_apps(&self) -> Vec<&str> {
        let mut apps = vec![self.application.as_str()];
        if self.originate_app != self.application {
            apps.push(self.originate_app.as_str());
        }
        apps
    }
}

impl DialConfig {
    pub fn ring_timeout(&self) -> Duration {
        Duration::from_secs(self.ring_timeout_secs)
    }
}

/// Map the classic `ARI_*` variables onto the `ari` section
fn apply_ari_env(
    builder: ::config::ConfigBuilder<::config::builder::DefaultState>,
) -> Result<::config::ConfigBuilder<::config::builder::DefaultState>> {
    const VARS: [(&str, &str); 5] = [
        ("ARI_APP", "ari.application"),
        ("ARI_USERNAME", "ari.username"),
        ("ARI_PASSWORD", "ari.password"),
        ("ARI_URL", "ari.url"),
        ("ARI_WS_URL", "ari.websocket_url"),
    ];

    let mut builder = builder;
    for (var, key) in VARS {
        let value = env::var(var).ok().filter(|v| !v.is_empty());
        builder = builder.set_override_option(key, value).map_err(config_error)?;
    }
    Ok(builder)
}

fn config_error(e: ::config::ConfigError) -> DomainError {
    DomainError::Config(e.to_string())
}
