use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use config::builder::DefaultState;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    pub supported_versions: Vec<String>,
    pub features: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    pub url: String,
    pub retry_interval_ms: u64,
    pub receive_timeout_ms: u64,
}

impl ClientConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMode {
    /// Send a `SessionStart` envelope.
    Binary,
    /// Send a plain text frame (legacy).
    Text,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProbeConfig {
    pub mode: ProbeMode,
    pub session_id: String,
    pub api_version: String,
    pub text: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub environment: String,
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub client: ClientConfig,
    pub probe: ProbeConfig,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        Self::defaults(run_mode.as_str())?
            // Add in settings from the config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // E.g., `APP_SERVER__PORT=5001` would set `Settings.server.port`
            .add_source(Self::environment())
            .build()?
            .try_deserialize()
    }

    #[cfg(test)]
    pub fn new_for_test() -> Result<Self, ConfigError> {
        Self::defaults("test")?
            .set_default("client.retry_interval_ms", 50)?
            .set_default("client.receive_timeout_ms", 500)?
            .add_source(Self::environment())
            .build()?
            .try_deserialize()
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    fn defaults(environment: &str) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("environment", environment)?
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 7766)?
            .set_default("session.supported_versions", vec!["1.0"])?
            .set_default("session.features", 0)?
            .set_default("client.url", "ws://127.0.0.1:7766")?
            .set_default("client.retry_interval_ms", 3000)?
            .set_default("client.receive_timeout_ms", 5000)?
            .set_default("probe.mode", "binary")?
            .set_default("probe.session_id", "mysession")?
            .set_default("probe.api_version", "1.0")?
            .set_default("probe.text", "Hello world!")
    }

    fn environment() -> Environment {
        Environment::with_prefix("app")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("session.supported_versions")
    }
}
