use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::FixedOffset;
use thiserror::Error;

use crate::engine::EngineSettings;
use crate::model::MINUTE_MS;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("{var}: {reason}")]
    OutOfRange { var: &'static str, reason: &'static str },
}

/// Process configuration, read from `FIELDBOOK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// WAL appends since the last compaction that trigger a new one.
    pub compact_threshold: u64,
    pub sweep_interval: Duration,
    pub engine: EngineSettings,
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

fn positive(value: u64, var: &'static str) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::OutOfRange { var, reason: "must be greater than zero" });
    }
    Ok(value)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; unset variables take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = lookup("FIELDBOOK_DATA_DIR").unwrap_or_else(|| "./data".into());
        let metrics_port = parse(&lookup, "FIELDBOOK_METRICS_PORT")?;
        let compact_threshold = parse(&lookup, "FIELDBOOK_COMPACT_THRESHOLD")?.unwrap_or(1000);

        let offset_minutes: i32 = parse(&lookup, "FIELDBOOK_UTC_OFFSET_MINUTES")?.unwrap_or(0);
        let zone = offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or(ConfigError::OutOfRange {
                var: "FIELDBOOK_UTC_OFFSET_MINUTES",
                reason: "offset must be within +/-24h",
            })?;

        let hold_secs = positive(
            parse(&lookup, "FIELDBOOK_HOLD_SECS")?.unwrap_or(900),
            "FIELDBOOK_HOLD_SECS",
        )?;
        let hold_duration_ms = i64::try_from(hold_secs)
            .ok()
            .and_then(|s| s.checked_mul(1000))
            .filter(|ms| *ms <= 7 * 24 * 60 * MINUTE_MS)
            .ok_or(ConfigError::OutOfRange {
                var: "FIELDBOOK_HOLD_SECS",
                reason: "hold may last at most one week",
            })?;

        let guard_timeout_ms = positive(
            parse(&lookup, "FIELDBOOK_GUARD_TIMEOUT_MS")?.unwrap_or(2000),
            "FIELDBOOK_GUARD_TIMEOUT_MS",
        )?;
        let sweep_secs = positive(
            parse(&lookup, "FIELDBOOK_SWEEP_INTERVAL_SECS")?.unwrap_or(5),
            "FIELDBOOK_SWEEP_INTERVAL_SECS",
        )?;

        Ok(Self {
            data_dir: PathBuf::from(data_dir),
            metrics_port,
            compact_threshold,
            sweep_interval: Duration::from_secs(sweep_secs),
            engine: EngineSettings {
                zone,
                hold_duration_ms,
                guard_timeout: Duration::from_millis(guard_timeout_ms),
            },
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("fieldbook.wal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.compact_threshold, 1000);
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.engine.zone.local_minus_utc(), 0);
        assert_eq!(config.engine.hold_duration_ms, 15 * MINUTE_MS);
        assert_eq!(config.engine.guard_timeout, Duration::from_secs(2));
        assert_eq!(config.wal_path(), PathBuf::from("./data/fieldbook.wal"));
    }

    #[test]
    fn overrides() {
        let config = from_pairs(&[
            ("FIELDBOOK_DATA_DIR", "/var/lib/fieldbook"),
            ("FIELDBOOK_METRICS_PORT", "9100"),
            ("FIELDBOOK_UTC_OFFSET_MINUTES", "-300"),
            ("FIELDBOOK_HOLD_SECS", "600"),
            ("FIELDBOOK_GUARD_TIMEOUT_MS", " 250 "),
        ])
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/fieldbook"));
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.engine.zone.local_minus_utc(), -300 * 60);
        assert_eq!(config.engine.hold_duration_ms, 10 * MINUTE_MS);
        assert_eq!(config.engine.guard_timeout, Duration::from_millis(250));
    }

    #[test]
    fn unparsable_value_names_the_variable() {
        let err = from_pairs(&[("FIELDBOOK_METRICS_PORT", "ninety")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid { var: "FIELDBOOK_METRICS_PORT", value: "ninety".into() }
        );
        assert!(err.to_string().starts_with("FIELDBOOK_METRICS_PORT"));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(matches!(
            from_pairs(&[("FIELDBOOK_UTC_OFFSET_MINUTES", "1500")]),
            Err(ConfigError::OutOfRange { var: "FIELDBOOK_UTC_OFFSET_MINUTES", .. })
        ));
        assert!(matches!(
            from_pairs(&[("FIELDBOOK_GUARD_TIMEOUT_MS", "0")]),
            Err(ConfigError::OutOfRange { var: "FIELDBOOK_GUARD_TIMEOUT_MS", .. })
        ));
        assert!(matches!(
            from_pairs(&[("FIELDBOOK_HOLD_SECS", "99999999")]),
            Err(ConfigError::OutOfRange { var: "FIELDBOOK_HOLD_SECS", .. })
        ));
    }
}
