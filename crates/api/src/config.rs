//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use event_log::topic::DEFAULT_NAMESPACE;
use event_log::{RetryConfig, Topics};
use saga::PaymentConfig;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Invalid value {value:?} for {name}")]
pub struct ConfigError {
    pub name: &'static str,
    pub value: String,
}

/// Server and pipeline configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`, `RUST_LOG`: listener and log filter
/// - `TOPIC_NAMESPACE`, `TOPIC_PARTITIONS`: event log layout
/// - `PAYMENT_LOCK_WAIT_MS`, `PAYMENT_LOCK_TTL_MS`, `PAYMENT_DEDUP_TTL_SECS`,
///   `PAYMENT_DEDUP_PREFIX`: payment critical section
/// - `CONSUMER_MAX_ATTEMPTS`, `CONSUMER_INITIAL_BACKOFF_MS`,
///   `CONSUMER_MAX_BACKOFF_MS`: redelivery before dead-lettering
/// - `GATEWAY_SUCCESS_RATE`, `GATEWAY_LATENCY_MS`, `STOCK_SUCCESS_RATE`,
///   `STOCK_LATENCY_MS`, `SIMULATION_SEED`: simulated collaborators
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub topic_namespace: String,
    pub topic_partitions: u32,
    pub payment: PaymentConfig,
    pub retry: RetryConfig,
    pub gateway_success_rate: f64,
    pub gateway_latency: Duration,
    pub stock_success_rate: f64,
    pub stock_latency: Duration,
    pub simulation_seed: Option<u64>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    ///
    /// Set but unparseable values are an error rather than silently ignored.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let parse = |name: &'static str| -> Result<Option<String>, ConfigError> {
            Ok(lookup(name).filter(|value| !value.trim().is_empty()))
        };
        let number = |name: &'static str| -> Result<Option<u64>, ConfigError> {
            parse(name)?.map(|value| parsed(name, value)).transpose()
        };
        let millis = |name: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(number(name)?.map(Duration::from_millis).unwrap_or(default))
        };
        let rate = |name: &'static str, default: f64| -> Result<f64, ConfigError> {
            match parse(name)? {
                Some(value) => {
                    let rate: f64 = parsed(name, value.clone())?;
                    if (0.0..=1.0).contains(&rate) {
                        Ok(rate)
                    } else {
                        Err(ConfigError { name, value })
                    }
                }
                None => Ok(default),
            }
        };

        Ok(Self {
            host: parse("HOST")?.unwrap_or(defaults.host),
            port: parse("PORT")?
                .map(|value| parsed("PORT", value))
                .transpose()?
                .unwrap_or(defaults.port),
            log_level: parse("RUST_LOG")?.unwrap_or(defaults.log_level),
            topic_namespace: parse("TOPIC_NAMESPACE")?.unwrap_or(defaults.topic_namespace),
            topic_partitions: parse("TOPIC_PARTITIONS")?
                .map(|value| parsed("TOPIC_PARTITIONS", value))
                .transpose()?
                .unwrap_or(defaults.topic_partitions),
            payment: PaymentConfig {
                lock_wait: millis("PAYMENT_LOCK_WAIT_MS", defaults.payment.lock_wait)?,
                lock_ttl: millis("PAYMENT_LOCK_TTL_MS", defaults.payment.lock_ttl)?,
                dedup_ttl: number("PAYMENT_DEDUP_TTL_SECS")?
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.payment.dedup_ttl),
                dedup_prefix: parse("PAYMENT_DEDUP_PREFIX")?
                    .unwrap_or(defaults.payment.dedup_prefix),
            },
            retry: RetryConfig {
                max_attempts: parse("CONSUMER_MAX_ATTEMPTS")?
                    .map(|value| parsed("CONSUMER_MAX_ATTEMPTS", value))
                    .transpose()?
                    .unwrap_or(defaults.retry.max_attempts),
                initial_backoff: millis(
                    "CONSUMER_INITIAL_BACKOFF_MS",
                    defaults.retry.initial_backoff,
                )?,
                max_backoff: millis("CONSUMER_MAX_BACKOFF_MS", defaults.retry.max_backoff)?,
            },
            gateway_success_rate: rate("GATEWAY_SUCCESS_RATE", defaults.gateway_success_rate)?,
            gateway_latency: millis("GATEWAY_LATENCY_MS", defaults.gateway_latency)?,
            stock_success_rate: rate("STOCK_SUCCESS_RATE", defaults.stock_success_rate)?,
            stock_latency: millis("STOCK_LATENCY_MS", defaults.stock_latency)?,
            simulation_seed: number("SIMULATION_SEED")?,
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn topics(&self) -> Topics {
        Topics::new(self.topic_namespace.clone())
    }

    /// Seed for the `n`th simulated collaborator, so each draws its own sequence.
    pub fn seed_for(&self, n: u64) -> Option<u64> {
        self.simulation_seed.map(|seed| seed.wrapping_add(n))
    }
}

fn parsed<T: FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError { name, value })
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            topic_namespace: DEFAULT_NAMESPACE.to_string(),
            topic_partitions: event_log::memory::DEFAULT_PARTITIONS,
            payment: PaymentConfig::default(),
            retry: RetryConfig::default(),
            gateway_success_rate: 0.9,
            gateway_latency: Duration::from_millis(100),
            stock_success_rate: 0.9,
            stock_latency: Duration::from_millis(50),
            simulation_seed: None,
        }
    }
}
