//! Process configuration from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use engine::EngineConfig;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub api_base_url: String,
    pub api_token: String,
    pub rate_limit_per_minute: u32,
    pub poll_interval: Duration,
    pub job_timeout: Duration,
    pub cleanup_interval: Duration,
    pub failed_retention: Duration,
    pub storage_root: PathBuf,
    pub custom_fields_path: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_token = get("TRACKER_API_TOKEN").ok_or(ConfigError::Missing("TRACKER_API_TOKEN"))?;
        let log_format = match get("LOG_FORMAT").as_deref() {
            None | Some("pretty") | Some("text") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "LOG_FORMAT",
                    value: other.to_string(),
                    reason: "expected pretty or json".to_string(),
                });
            }
        };

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or_else(|| "mem://".to_string()),
            api_base_url: get("TRACKER_API_BASE")
                .unwrap_or_else(|| EngineConfig::default().api_base_url),
            api_token,
            rate_limit_per_minute: parse_or(&get, "TRACKER_RATE_LIMIT_PER_MINUTE", 100)?,
            poll_interval: Duration::from_secs(parse_or(&get, "DISPATCH_POLL_SECS", 5)?),
            job_timeout: Duration::from_secs(parse_or(&get, "JOB_TIMEOUT_SECS", 30 * 60)?),
            cleanup_interval: Duration::from_secs(parse_or(&get, "CLEANUP_INTERVAL_SECS", 3600)?),
            failed_retention: Duration::from_secs(
                parse_or::<u64>(&get, "FAILED_RETENTION_HOURS", 24)? * 3600,
            ),
            storage_root: get("STORAGE_FS_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/sheets")),
            custom_fields_path: get("CUSTOM_FIELDS_PATH").map(PathBuf::from),
            log_format,
        })
    }
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply() {
        let config = ServerConfig::from_lookup(lookup(&[("TRACKER_API_TOKEN", "pk_1")])).unwrap();
        assert_eq!(config.database_url, "mem://");
        assert_eq!(config.rate_limit_per_minute, 100);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.job_timeout, Duration::from_secs(1800));
        assert_eq!(config.failed_retention, Duration::from_secs(24 * 3600));
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.custom_fields_path.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("TRACKER_API_TOKEN", "pk_1"),
            ("TRACKER_RATE_LIMIT_PER_MINUTE", "60"),
            ("FAILED_RETENTION_HOURS", "2"),
            ("LOG_FORMAT", "json"),
            ("CUSTOM_FIELDS_PATH", "/etc/fields.json"),
        ]))
        .unwrap();
        assert_eq!(config.rate_limit_per_minute, 60);
        assert_eq!(config.failed_retention, Duration::from_secs(7200));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.custom_fields_path,
            Some(PathBuf::from("/etc/fields.json"))
        );
    }

    #[test]
    fn token_is_required() {
        let err = ServerConfig::from_lookup(lookup(&[("TRACKER_API_TOKEN", "  ")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("TRACKER_API_TOKEN"));
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let err = ServerConfig::from_lookup(lookup(&[
            ("TRACKER_API_TOKEN", "pk_1"),
            ("JOB_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "JOB_TIMEOUT_SECS", .. }));
    }
}
