use std::path::PathBuf;
use std::str::FromStr;

use crate::format::DecimalSeparator;
use crate::limits::MAX_PAGE_LIMIT;

const PREFIX: &str = "RENTLOG_";

/// Runtime settings, read from `RENTLOG_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    /// Journal appends since the last compaction that trigger a new one.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    /// Reject updates that land the day before or after another rental of the car.
    pub update_buffer_day: bool,
    pub decimal_separator: DecimalSeparator,
    pub default_page_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 7878,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            update_buffer_day: true,
            decimal_separator: DecimalSeparator::Comma,
            default_page_limit: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub key: String,
    pub value: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid value for {}: '{}'", self.key, self.value)
    }
}

impl std::error::Error for ConfigError {}

/// Boolean with the spellings people actually put in env files.
struct Flag(bool);

impl FromStr for Flag {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Flag(true)),
            "0" | "false" | "no" | "off" => Ok(Flag(false)),
            _ => Err(()),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys fall back to defaults;
    /// set but unparsable keys are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let get = |name: &str| {
            let key = format!("{PREFIX}{name}");
            lookup(&key).map(|value| (key, value))
        };
        fn parse<T: FromStr>((key, value): (String, String)) -> Result<T, ConfigError> {
            value.trim().parse().map_err(|_| ConfigError { key, value })
        }

        let mut config = Config {
            port: get("PORT").map(parse).transpose()?.unwrap_or(defaults.port),
            bind: get("BIND").map(|(_, v)| v).unwrap_or(defaults.bind),
            data_dir: get("DATA_DIR")
                .map(|(_, v)| PathBuf::from(v))
                .unwrap_or(defaults.data_dir),
            max_connections: get("MAX_CONNECTIONS")
                .map(parse)
                .transpose()?
                .unwrap_or(defaults.max_connections),
            compact_threshold: get("COMPACT_THRESHOLD")
                .map(parse)
                .transpose()?
                .unwrap_or(defaults.compact_threshold),
            metrics_port: get("METRICS_PORT").map(parse).transpose()?,
            update_buffer_day: get("UPDATE_BUFFER_DAY")
                .map(parse::<Flag>)
                .transpose()?
                .map_or(defaults.update_buffer_day, |f| f.0),
            decimal_separator: get("DECIMAL_SEPARATOR")
                .map(parse)
                .transpose()?
                .unwrap_or(defaults.decimal_separator),
            default_page_limit: get("DEFAULT_PAGE_LIMIT")
                .map(parse)
                .transpose()?
                .unwrap_or(defaults.default_page_limit),
        };

        if config.max_connections == 0 {
            return Err(ConfigError {
                key: format!("{PREFIX}MAX_CONNECTIONS"),
                value: "0".into(),
            });
        }
        config.default_page_limit = config.default_page_limit.clamp(1, MAX_PAGE_LIMIT);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert!(config.update_buffer_day);
        assert_eq!(config.decimal_separator, DecimalSeparator::Comma);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("RENTLOG_PORT", "9000"),
            ("RENTLOG_DATA_DIR", "/var/lib/rentlog"),
            ("RENTLOG_METRICS_PORT", "9100"),
            ("RENTLOG_UPDATE_BUFFER_DAY", "off"),
            ("RENTLOG_DECIMAL_SEPARATOR", "."),
            ("RENTLOG_DEFAULT_PAGE_LIMIT", "500"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/rentlog"));
        assert_eq!(config.metrics_port, Some(9100));
        assert!(!config.update_buffer_day);
        assert_eq!(config.decimal_separator, DecimalSeparator::Dot);
        assert_eq!(config.default_page_limit, MAX_PAGE_LIMIT);
    }

    #[test]
    fn garbage_value_names_the_key() {
        let err = Config::from_lookup(lookup(&[("RENTLOG_PORT", "seventy")])).unwrap_err();
        assert_eq!(err.key, "RENTLOG_PORT");
        assert_eq!(err.value, "seventy");

        let err = Config::from_lookup(lookup(&[("RENTLOG_UPDATE_BUFFER_DAY", "maybe")])).unwrap_err();
        assert_eq!(err.key, "RENTLOG_UPDATE_BUFFER_DAY");
    }

    #[test]
    fn zero_connections_rejected() {
        assert!(Config::from_lookup(lookup(&[("RENTLOG_MAX_CONNECTIONS", "0")])).is_err());
    }
}
