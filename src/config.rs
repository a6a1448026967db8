use anyhow::Result;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Email of the account that should hold the default server's Admin role
    /// once it registers. Seeding-only: has no effect beyond the first
    /// `register` call that matches it.
    #[serde(default)]
    pub admin_email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Gateway session discipline — heartbeat/handshake timing and backpressure.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub heartbeat_interval_ms: u64,
    pub heartbeat_tolerance: f64,
    pub identify_timeout_ms: u64,
    pub outbound_queue_cap: usize,
    pub writer_drain_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 30_000,
            heartbeat_tolerance: 1.5,
            identify_timeout_ms: 10_000,
            outbound_queue_cap: 256,
            writer_drain_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl AppConfig {
    /// Load configuration from `concord.toml`, with `CONCORD__`-prefixed
    /// environment variable overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CONCORD_CONFIG").unwrap_or_else(|_| "concord.toml".to_string());

        let builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("database.max_connections", 10)?
            .set_default("session.heartbeat_interval_ms", 30_000)?
            .set_default("session.heartbeat_tolerance", 1.5)?
            .set_default("session.identify_timeout_ms", 10_000)?
            .set_default("session.outbound_queue_cap", 256)?
            .set_default("session.writer_drain_ms", 500)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "plain")?;

        let builder = if Path::new(&config_path).exists() {
            builder.add_source(config::File::with_name(&config_path))
        } else {
            tracing::warn!("config file '{}' not found, using defaults", config_path);
            builder
        };

        let settings = builder
            .add_source(
                config::Environment::with_prefix("CONCORD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        Ok(config)
    }
}
