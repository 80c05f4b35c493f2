//! Process configuration, read once from the environment at startup.

use std::str::FromStr;
use std::time::Duration;

use crate::app::{AckPolicy, RetryPolicy};
use crate::domain::ConfigError;
use crate::observability::LogFormat;

const DEFAULT_BROKER_HOST: &str = "localhost";
const DEFAULT_BROKER_PORT: u16 = 5672;
const DEFAULT_QUEUE: &str = "logstash_ingest_queue";
const DEFAULT_SINK_ADDR: &str = "localhost:5044";
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;
const DEFAULT_WRITE_TIMEOUT_MS: u64 = 0;
const DEFAULT_FORWARD_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 0;
const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 1000;
const FORWARD_RETRY_BASE_DELAY: Duration = Duration::from_millis(200);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);
const RECONNECT_JITTER: f64 = 0.2;

/// Which messages are acknowledged, see [`AckPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    Always,
    OnSuccess,
}

impl FromStr for AckMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "on-success" | "on_success" => Ok(Self::OnSuccess),
            other => Err(format!("expected 'always' or 'on-success', got '{other}'")),
        }
    }
}

// Relay configuration sourced from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    // Broker host, used when no full URL is given.
    pub broker_host: String,
    // Broker AMQP port.
    pub broker_port: u16,
    // Full broker URL; overrides host and port.
    pub broker_url: Option<String>,
    // Queue (or address) to consume from and publish to.
    pub queue: String,
    // Downstream sink as host:port.
    pub sink_addr: String,
    // Dial timeout for the sink.
    pub connect_timeout: Duration,
    // Write timeout for the sink; None (the default) leaves the write unbounded.
    pub write_timeout: Option<Duration>,
    pub ack_mode: AckMode,
    // Total forward attempts per message under `on-success`.
    pub forward_max_attempts: u32,
    // Consecutive reconnects allowed; 0 makes broker failures fatal.
    pub reconnect_max_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub log_format: LogFormat,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            broker_host: DEFAULT_BROKER_HOST.to_string(),
            broker_port: DEFAULT_BROKER_PORT,
            broker_url: None,
            queue: DEFAULT_QUEUE.to_string(),
            sink_addr: DEFAULT_SINK_ADDR.to_string(),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            write_timeout: None,
            ack_mode: AckMode::Always,
            forward_max_attempts: DEFAULT_FORWARD_MAX_ATTEMPTS,
            reconnect_max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
            reconnect_base_delay: Duration::from_millis(DEFAULT_RECONNECT_BASE_DELAY_MS),
            log_format: LogFormat::Text,
        }
    }
}

fn parse<T>(key: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            }),
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let write_timeout_ms: u64 =
            parse("RELAY_WRITE_TIMEOUT_MS", get("RELAY_WRITE_TIMEOUT_MS"))?.unwrap_or(DEFAULT_WRITE_TIMEOUT_MS);

        let forward_max_attempts: u32 = parse("RELAY_FORWARD_MAX_ATTEMPTS", get("RELAY_FORWARD_MAX_ATTEMPTS"))?
            .unwrap_or(defaults.forward_max_attempts);
        if forward_max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "RELAY_FORWARD_MAX_ATTEMPTS",
                value: "0".to_string(),
                reason: "at least one attempt is required".to_string(),
            });
        }

        Ok(Self {
            broker_host: get("RELAY_BROKER_HOST").unwrap_or(defaults.broker_host),
            broker_port: parse("RELAY_BROKER_PORT", get("RELAY_BROKER_PORT"))?.unwrap_or(defaults.broker_port),
            broker_url: get("RELAY_BROKER_URL"),
            queue: get("RELAY_QUEUE").unwrap_or(defaults.queue),
            sink_addr: get("RELAY_SINK_ADDR").unwrap_or(defaults.sink_addr),
            connect_timeout: parse("RELAY_CONNECT_TIMEOUT_MS", get("RELAY_CONNECT_TIMEOUT_MS"))?
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
            write_timeout: (write_timeout_ms > 0).then(|| Duration::from_millis(write_timeout_ms)),
            ack_mode: parse("RELAY_ACK_POLICY", get("RELAY_ACK_POLICY"))?.unwrap_or(defaults.ack_mode),
            forward_max_attempts,
            reconnect_max_attempts: parse("RELAY_RECONNECT_MAX_ATTEMPTS", get("RELAY_RECONNECT_MAX_ATTEMPTS"))?
                .unwrap_or(defaults.reconnect_max_attempts),
            reconnect_base_delay: parse("RELAY_RECONNECT_BASE_DELAY_MS", get("RELAY_RECONNECT_BASE_DELAY_MS"))?
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnect_base_delay),
            log_format: parse("RELAY_LOG_FORMAT", get("RELAY_LOG_FORMAT"))?.unwrap_or(defaults.log_format),
        })
    }

    /// `amqp://host:port`, unless a full URL was configured.
    pub fn broker_url(&self) -> String {
        match &self.broker_url {
            Some(url) => url.clone(),
            None => format!("amqp://{}:{}", self.broker_host, self.broker_port),
        }
    }

    pub fn ack_policy(&self) -> AckPolicy {
        match self.ack_mode {
            AckMode::Always => AckPolicy::Always,
            AckMode::OnSuccess => AckPolicy::OnSuccess(RetryPolicy::exponential(
                self.forward_max_attempts,
                FORWARD_RETRY_BASE_DELAY,
            )),
        }
    }

    pub fn reconnect_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.reconnect_max_attempts, self.reconnect_base_delay)
            .with_max_delay(RECONNECT_MAX_DELAY)
            .with_jitter(RECONNECT_JITTER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<RelayConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RelayConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_match_the_single_shot_relay() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, RelayConfig::default());
        assert_eq!(config.broker_url(), "amqp://localhost:5672");
        assert_eq!(config.queue, "logstash_ingest_queue");
        assert_eq!(config.sink_addr, "localhost:5044");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.write_timeout, None);
        assert_eq!(config.ack_policy(), AckPolicy::Always);
        assert!(!config.reconnect_policy().allows(0));
    }

    #[test]
    fn host_and_port_build_the_url() {
        let config = config_from(&[("RELAY_BROKER_HOST", "broker"), ("RELAY_BROKER_PORT", "5673")]).unwrap();
        assert_eq!(config.broker_url(), "amqp://broker:5673");
    }

    #[test]
    fn explicit_url_wins() {
        let config = config_from(&[
            ("RELAY_BROKER_HOST", "ignored"),
            ("RELAY_BROKER_URL", "amqp://user@broker:5672"),
        ])
        .unwrap();
        assert_eq!(config.broker_url(), "amqp://user@broker:5672");
    }

    #[test]
    fn write_timeout_is_opt_in() {
        let config = config_from(&[("RELAY_WRITE_TIMEOUT_MS", "2500")]).unwrap();
        assert_eq!(config.write_timeout, Some(Duration::from_millis(2500)));
    }

    #[test]
    fn zero_write_timeout_disables_it() {
        let config = config_from(&[("RELAY_WRITE_TIMEOUT_MS", "0")]).unwrap();
        assert_eq!(config.write_timeout, None);
    }

    #[test]
    fn empty_values_fall_back_to_defaults() {
        let config = config_from(&[("RELAY_QUEUE", "  "), ("RELAY_BROKER_PORT", "")]).unwrap();
        assert_eq!(config.queue, "logstash_ingest_queue");
        assert_eq!(config.broker_port, 5672);
    }

    #[test]
    fn on_success_policy_carries_attempts() {
        let config = config_from(&[("RELAY_ACK_POLICY", "on-success"), ("RELAY_FORWARD_MAX_ATTEMPTS", "5")]).unwrap();
        match config.ack_policy() {
            AckPolicy::OnSuccess(retry) => assert_eq!(retry.max_attempts, 5),
            other => panic!("unexpected policy {other:?}"),
        }
    }

    #[rstest]
    #[case::port("RELAY_BROKER_PORT", "not-a-port")]
    #[case::port_range("RELAY_BROKER_PORT", "70000")]
    #[case::timeout("RELAY_CONNECT_TIMEOUT_MS", "-1")]
    #[case::policy("RELAY_ACK_POLICY", "sometimes")]
    #[case::attempts("RELAY_FORWARD_MAX_ATTEMPTS", "0")]
    #[case::log_format("RELAY_LOG_FORMAT", "xml")]
    fn invalid_values_are_rejected(#[case] key: &str, #[case] value: &str) {
        let err = config_from(&[(key, value)]).unwrap_err();
        let ConfigError::Invalid { key: reported, .. } = err;
        assert_eq!(reported, key);
    }
}
