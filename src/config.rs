// 10.0 config.rs: service settings in one place. engine, http server, logging, eligibility.
// 10.1 every section has defaults, so an empty file is a valid development config.

use crate::eligibility::EligibilityConfig;
use crate::engine::EngineConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

/// HTTP boundary settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Upper bound on one engine call before the request answers 504.
    pub request_timeout_ms: u64,
    /// Audit events buffered for the background writer before new ones are dropped.
    pub audit_buffer: usize,
    /// How often expired idempotency entries are swept.
    pub gc_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3030".to_string(),
            request_timeout_ms: 5_000,
            audit_buffer: 1_024,
            gc_interval_secs: 60,
        }
    }
}

/// Logging configuration. `RUST_LOG` overrides `level` when set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "json" or "pretty".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

impl LoggingConfig {
    /// Installs the global tracing subscriber.
    pub fn init(&self) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        match self.format.as_str() {
            "json" => {
                fmt().json().with_env_filter(filter).init();
            }
            _ => {
                fmt().with_env_filter(filter).init();
            }
        }
    }
}

/// Opening balance credited at startup. Stands in for the deposit collaborator in demos and tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedBalance {
    pub holder: u64,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub engine: EngineConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub eligibility: EligibilityConfig,
    pub seed_balances: Vec<SeedBalance>,
}

impl ServiceConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    // 10.2: production preset. json logs, tier policy enforced by default config, no seeds
    pub fn production() -> Self {
        let mut config = Self::default();
        config.server.bind = "0.0.0.0:8080".to_string();
        config.logging.format = "json".to_string();
        config
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server.bind.parse().map_err(|e| ConfigError::InvalidValue {
            field: "server.bind",
            reason: format!("{e}"),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        self.bind_addr()?;

        if self.server.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.request_timeout_ms",
                reason: "must be positive".to_string(),
            });
        }
        if self.server.gc_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.gc_interval_secs",
                reason: "must be positive".to_string(),
            });
        }

        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidValue {
                field: "logging.format",
                reason: format!("expected json or pretty, got {}", self.logging.format),
            });
        }

        // a tier above the engine ceiling would never be reachable
        for limit in &self.eligibility.tiers {
            if limit.max_multiplier > self.engine.max_multiplier {
                return Err(ConfigError::InvalidValue {
                    field: "eligibility.tiers",
                    reason: format!(
                        "tier {} allows {}x, above engine ceiling {}x",
                        limit.tier, limit.max_multiplier, self.engine.max_multiplier
                    ),
                });
            }
        }

        if let Some(seed) = self.seed_balances.iter().find(|s| s.amount < Decimal::ZERO) {
            return Err(ConfigError::InvalidValue {
                field: "seed_balances",
                reason: format!("negative amount {} for holder {}", seed.amount, seed.holder),
            });
        }

        Ok(())
    }
}
