//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `CHATSTATS_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `CHATSTATS_` override YAML values
//! 3. **MONGODB_URI** - Special case: overrides `database.uri` if set
//! 4. **PROMETHEUS_PORT** - Special case: overrides `port` if set
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `CHATSTATS_DATABASE__NAME=LibreChat` sets the `database.name` field.
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Override listen port
//! CHATSTATS_PORT=8000
//!
//! # Set database connection (preferred method)
//! MONGODB_URI="mongodb://mongodb:27017/"
//!
//! # Or use CHATSTATS_DATABASE__URI
//! CHATSTATS_DATABASE__URI="mongodb://mongodb:27017/"
//!
//! # Override nested values
//! CHATSTATS_COLLECTOR__INTERVAL=30s
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "CHATSTATS_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the exporter.
    /// Useful for CI/CD pipelines to catch config errors before deployment.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// This is the root configuration structure loaded from YAML and environment variables.
/// All fields have defaults defined in the `Default` implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port for the metrics endpoint
    pub port: u16,
    /// Special-case override slot for the `MONGODB_URI` environment variable.
    /// Moved into `database.uri` during load.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mongodb_uri: Option<String>,
    /// MongoDB connection settings
    pub database: DatabaseConfig,
    /// Collection cycle settings
    pub collector: CollectorConfig,
}

/// MongoDB connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// MongoDB connection string
    pub uri: String,
    /// Database name holding the chat collections
    pub name: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://mongodb:27017/".to_string(),
            name: "LibreChat".to_string(),
        }
    }
}

/// Collection cycle configuration.
///
/// The collector runs the full aggregation query set on a fixed interval. A cycle
/// that fails leaves the previously published values in place; the next tick is
/// the retry mechanism.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectorConfig {
    /// How often to run a collection cycle
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// How many days of history the per-day aggregations cover.
    /// Bounds the `day` label cardinality on the daily gauges.
    pub lookback_days: u32,
    /// Window for the active-user and active-conversation gauges
    #[serde(with = "humantime_serde")]
    pub active_window: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            lookback_days: 30,
            active_window: Duration::from_secs(5 * 60),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            mongodb_uri: None,
            database: DatabaseConfig::default(),
            collector: CollectorConfig::default(),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        // if MONGODB_URI was set, it wins over database.uri
        if let Some(uri) = config.mongodb_uri.take() {
            config.database.uri = uri;
        }

        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.uri.is_empty() {
            anyhow::bail!("Config validation: database.uri cannot be empty");
        }

        if self.database.name.is_empty() {
            anyhow::bail!("Config validation: database.name cannot be empty");
        }

        if self.collector.interval.is_zero() {
            anyhow::bail!("Config validation: collector.interval must be positive");
        }

        if self.collector.lookback_days == 0 {
            anyhow::bail!("Config validation: collector.lookback_days must be at least 1");
        }

        if self.collector.active_window.is_zero() {
            anyhow::bail!("Config validation: collector.active_window must be positive");
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("CHATSTATS_").split("__"))
            // Common MONGODB_URI pattern used by the chat application's own deployment
            .merge(Env::raw().only(&["MONGODB_URI"]))
            .merge(Env::raw().only(&["PROMETHEUS_PORT"]).map(|_| "port".into()))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
