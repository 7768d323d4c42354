use crate::codec::DEFAULT_MAX_FRAME_LENGTH;
use config::ConfigError;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

const MAX_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub client: ClientConfig,
    pub server: ServerConfig,
}

impl RpcConfig {
    /// Reads an optional config file named `name` (any format the `config`
    /// crate understands) and `TESSERA__*` environment variables, e.g.
    /// `TESSERA__CLIENT__RETRIES=10`.
    pub fn load(name: &str) -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(name).required(false))
            .add_source(config::Environment::with_prefix("TESSERA").separator("__"))
            .build();

        match config {
            Ok(config) => config.try_deserialize(),
            Err(ConfigError::NotFound(e)) => {
                warn!("config not found: {}", e);
                Ok(RpcConfig::default())
            }
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Connect attempts after the first one.
    pub retries: u32,
    pub connect_timeout_ms: u64,
    /// Delay before the first retry; doubled per attempt.
    pub retry_backoff_ms: u64,
    pub io_threads: usize,
    pub max_frame_length: usize,
}

impl ClientConfig {
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Base delay before retry number `retry` (starting at 1), capped.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let base = Duration::from_millis(self.retry_backoff_ms);
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        base.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            connect_timeout_ms: 3_000,
            retry_backoff_ms: 100,
            io_threads: 2,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    pub workers: usize,
    pub max_frame_length: usize,
}

impl ServerConfig {
    pub fn listen(mut self, listen: impl Into<String>) -> Self {
        self.listen = listen.into();
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:0".to_string(),
            workers: 2,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}
