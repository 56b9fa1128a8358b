//! Process configuration, read from environment variables.
//!
//! | Variable | Default |
//! |---|---|
//! | `API_PORT` | 8080 |
//! | `HTTP_READ_TIMEOUT` | 15s |
//! | `HTTP_WRITE_TIMEOUT` | 15s |
//! | `WORKERS` | 4 |
//! | `QUEUE_SIZE` | 64 |
//! | `ENQUEUE_TIMEOUT` | unset (wait for a slot indefinitely) |
//! | `STATUS_TTL` | unset (status entries are kept forever) |
//! | `HTTP_SHUTDOWN_TIMEOUT` | 5s |
//! | `SHUTDOWN_TIMEOUT` | 30s |
//!
//! Durations are either duration strings (`"500ms"`, `"15s"`, `"1m30s"`) or a
//! bare integer number of seconds.

use std::time::Duration;

use conveyor_core::{PoolConfig, ShutdownConfig};
use figment::Figment;
use figment::providers::Env;
use serde::Deserialize;
use thiserror::Error;

const VARIABLES: &[&str] = &[
    "API_PORT",
    "HTTP_READ_TIMEOUT",
    "HTTP_WRITE_TIMEOUT",
    "WORKERS",
    "QUEUE_SIZE",
    "ENQUEUE_TIMEOUT",
    "STATUS_TTL",
    "HTTP_SHUTDOWN_TIMEOUT",
    "SHUTDOWN_TIMEOUT",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Figment(#[from] figment::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Listen port; 0 is rejected by `validate`
    pub api_port: u16,

    /// Bound for reading a request body
    #[serde(deserialize_with = "duration::required")]
    pub http_read_timeout: Duration,

    /// Bound for handling a whole request
    #[serde(deserialize_with = "duration::required")]
    pub http_write_timeout: Duration,

    pub workers: usize,
    pub queue_size: usize,

    #[serde(deserialize_with = "duration::optional")]
    pub enqueue_timeout: Option<Duration>,

    /// Retention for finished task statuses; enables the status GC when set
    #[serde(deserialize_with = "duration::optional")]
    pub status_ttl: Option<Duration>,

    /// Bound for stopping the HTTP server during shutdown
    #[serde(deserialize_with = "duration::required")]
    pub http_shutdown_timeout: Duration,

    /// Bound for the whole shutdown sequence
    #[serde(deserialize_with = "duration::required")]
    pub shutdown_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_port: 8080,
            http_read_timeout: Duration::from_secs(15),
            http_write_timeout: Duration::from_secs(15),
            workers: 4,
            queue_size: 64,
            enqueue_timeout: None,
            status_ttl: None,
            http_shutdown_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl Settings {
    /// Defaults overridden by the process environment, then validated.
    pub fn load() -> Result<Self, ConfigError> {
        let settings: Settings = Self::figment().extract()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn figment() -> Figment {
        Figment::new().merge(Env::raw().only(VARIABLES))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_port == 0 {
            return Err(ConfigError::Invalid("http port must be greater than 0".into()));
        }
        self.pool_config()
            .validate()
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        if self.shutdown_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "shutdown timeout must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn pool_config(&self) -> PoolConfig {
        let config = PoolConfig::new(self.workers, self.queue_size);
        match self.enqueue_timeout {
            Some(timeout) => config.with_enqueue_timeout(timeout),
            None => config,
        }
    }

    pub fn shutdown_config(&self) -> ShutdownConfig {
        ShutdownConfig {
            transport_timeout: self.http_shutdown_timeout,
            deadline: self.shutdown_timeout,
        }
    }
}

mod duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, de};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    impl Raw {
        fn into_duration<E: de::Error>(self) -> Result<Duration, E> {
            match self {
                Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
                Raw::Text(text) => super::parse_duration(&text).map_err(E::custom),
            }
        }
    }

    pub fn required<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Raw::deserialize(deserializer)?.into_duration()
    }

    pub fn optional<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Raw::deserialize(deserializer)?.into_duration().map(Some)
    }
}

/// Parse `"300ms"`, `"1.5s"`, `"1m30s"`, `"2h"` and bare seconds (`"15"`).
///
/// Units: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. Negative values are rejected.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let text = input.trim();
    if text.is_empty() {
        return Err("empty duration".into());
    }
    if let Ok(secs) = text.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut nanos = 0f64;
    let mut rest = text;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(format!("invalid duration {input:?}"));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid duration {input:?}"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(format!("missing unit in duration {input:?}")),
            unit => return Err(format!("unknown unit {unit:?} in duration {input:?}")),
        };
        rest = &rest[unit_len..];
        nanos += value * scale;
    }

    if !nanos.is_finite() || nanos > u64::MAX as f64 {
        return Err(format!("duration {input:?} is out of range"));
    }
    Ok(Duration::from_nanos(nanos.round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.api_port, 8080);
        assert_eq!(settings.http_read_timeout, Duration::from_secs(15));
        assert_eq!(settings.http_write_timeout, Duration::from_secs(15));
        assert_eq!(settings.workers, 4);
        assert_eq!(settings.queue_size, 64);
        assert_eq!(settings.enqueue_timeout, None);
        assert_eq!(settings.status_ttl, None);
        assert_eq!(settings.shutdown_config(), ShutdownConfig::default());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn empty_environment_gives_defaults() {
        Jail::expect_with(|_jail| {
            assert_eq!(Settings::load().unwrap(), Settings::default());
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.set_env("API_PORT", "9090");
            jail.set_env("HTTP_READ_TIMEOUT", "2s");
            jail.set_env("HTTP_WRITE_TIMEOUT", "1m30s");
            jail.set_env("WORKERS", "8");
            jail.set_env("QUEUE_SIZE", "128");
            jail.set_env("ENQUEUE_TIMEOUT", "250ms");
            jail.set_env("STATUS_TTL", "10m");
            jail.set_env("SHUTDOWN_TIMEOUT", "45");

            let settings = Settings::load().unwrap();
            assert_eq!(settings.api_port, 9090);
            assert_eq!(settings.http_read_timeout, Duration::from_secs(2));
            assert_eq!(settings.http_write_timeout, Duration::from_secs(90));
            assert_eq!(settings.workers, 8);
            assert_eq!(settings.queue_size, 128);
            assert_eq!(settings.enqueue_timeout, Some(Duration::from_millis(250)));
            assert_eq!(settings.status_ttl, Some(Duration::from_secs(600)));
            assert_eq!(settings.shutdown_timeout, Duration::from_secs(45));
            assert_eq!(settings.pool_config().enqueue_timeout, Some(Duration::from_millis(250)));
            Ok(())
        });
    }

    #[test]
    fn unrelated_variables_are_ignored() {
        Jail::expect_with(|jail| {
            jail.set_env("PORT", "1");
            jail.set_env("TIMEOUT", "nonsense");
            assert_eq!(Settings::load().unwrap(), Settings::default());
            Ok(())
        });
    }

    #[rstest]
    #[case::port_zero("API_PORT", "0")]
    #[case::no_workers("WORKERS", "0")]
    #[case::no_queue("QUEUE_SIZE", "0")]
    #[case::no_shutdown_budget("SHUTDOWN_TIMEOUT", "0s")]
    fn out_of_range_values_are_invalid(#[case] key: &str, #[case] value: &str) {
        Jail::expect_with(|jail| {
            jail.set_env(key, value);
            let err = Settings::load().unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{key}={value}: {err}");
            Ok(())
        });
    }

    #[test]
    fn zero_port_is_invalid_without_the_environment() {
        let settings = Settings {
            api_port: 0,
            ..Settings::default()
        };
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));
    }

    #[rstest]
    #[case::not_a_number("WORKERS", "many")]
    #[case::port_too_big("API_PORT", "70000")]
    #[case::negative_port("API_PORT", "-80")]
    #[case::negative_workers("WORKERS", "-1")]
    #[case::bad_duration("HTTP_READ_TIMEOUT", "fast")]
    #[case::missing_unit("HTTP_WRITE_TIMEOUT", "1m30")]
    fn unparsable_values_are_rejected(#[case] key: &str, #[case] value: &str) {
        Jail::expect_with(|jail| {
            jail.set_env(key, value);
            let err = Settings::load().unwrap_err();
            assert!(matches!(err, ConfigError::Figment(_)), "{key}={value}: {err}");
            Ok(())
        });
    }

    #[rstest]
    #[case("15s", Duration::from_secs(15))]
    #[case("500ms", Duration::from_millis(500))]
    #[case("1m30s", Duration::from_secs(90))]
    #[case("2h", Duration::from_secs(7200))]
    #[case("1.5s", Duration::from_millis(1500))]
    #[case("250us", Duration::from_micros(250))]
    #[case("0", Duration::ZERO)]
    #[case("20", Duration::from_secs(20))]
    fn parses_duration_strings(#[case] input: &str, #[case] expected: Duration) {
        assert_eq!(parse_duration(input), Ok(expected));
    }

    #[rstest]
    #[case("")]
    #[case("s")]
    #[case("10x")]
    #[case("-5s")]
    #[case("1.2.3s")]
    fn rejects_bad_duration_strings(#[case] input: &str) {
        assert!(parse_duration(input).is_err(), "{input:?}");
    }
}
