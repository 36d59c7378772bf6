use config::{Config, ConfigError, Environment};
use medgemma::bootstrap::ModelSettings;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationSettings {
    /// Applied to every chat request; clients cannot raise it
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: usize,
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
    /// How long the relay waits for the next fragment before giving up
    #[serde(default = "default_stream_timeout_secs")]
    pub stream_timeout_secs: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_temperature")]
    pub default_temperature: f64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_new_tokens: default_max_new_tokens(),
            max_input_tokens: default_max_input_tokens(),
            stream_timeout_secs: default_stream_timeout_secs(),
            queue_capacity: default_queue_capacity(),
            default_temperature: default_temperature(),
        }
    }
}

impl GenerationSettings {
    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_conversation_dir")]
    pub conversation_dir: PathBuf,
    /// Root that `file` content parts are resolved against
    #[serde(default = "default_upload_root")]
    pub upload_root: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            conversation_dir: default_conversation_dir(),
            upload_root: default_upload_root(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthSettings {
    /// Comma separated `key:user` pairs
    #[serde(default)]
    pub api_keys: String,
}

impl AuthSettings {
    /// API key to user id. Malformed entries are skipped.
    pub fn keys(&self) -> HashMap<String, String> {
        self.api_keys
            .split(',')
            .filter_map(|entry| {
                let (key, user) = entry.trim().split_once(':')?;
                let (key, user) = (key.trim(), user.trim());
                if key.is_empty() || user.is_empty() {
                    tracing::warn!("Ignoring malformed API key entry");
                    return None;
                }
                Some((key.to_string(), user.to_string()))
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub generation: GenerationSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub auth: AuthSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        // Start with default configuration
        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            // Layer on the environment variables
            .add_source(
                Environment::with_prefix("MEDGEMMA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Self = config.try_deserialize()?;
        tracing::debug!(
            "Loaded configuration: server {:?}, model {}",
            settings.server,
            settings.model.repo
        );
        Ok(settings)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8001
}

fn default_max_new_tokens() -> usize {
    512
}

fn default_max_input_tokens() -> usize {
    2048
}

fn default_stream_timeout_secs() -> u64 {
    30
}

fn default_queue_capacity() -> usize {
    64
}

fn default_temperature() -> f64 {
    0.7
}

fn default_conversation_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("medgemma")
        .join("conversations")
}

fn default_upload_root() -> PathBuf {
    PathBuf::from(".")
}
