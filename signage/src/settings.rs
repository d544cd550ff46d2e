//! Runtime settings from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;

use crate::config::{DEFAULT_FETCH_TIMEOUT, DEFAULT_REFRESH_INTERVAL};
use crate::scheduler::DEFAULT_EVALUATION_INTERVAL;
use crate::{Error, Result};

/// Where the configuration document comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Url(String),
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub source: ConfigSource,
    pub configuration_id: String,
    pub snapshot_dir: PathBuf,
    pub evaluation_interval: Duration,
    pub refresh_interval: Duration,
    pub fetch_timeout: Duration,
    pub timezone: Tz,
    pub log_dir: PathBuf,
    pub log_filter: Option<String>,
}

impl Settings {
    /// Read `SIGNAGE_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let source = match (var("SIGNAGE_CONFIG_URL"), var("SIGNAGE_CONFIG_FILE")) {
            (Some(url), None) => ConfigSource::Url(url),
            (None, Some(path)) => ConfigSource::File(PathBuf::from(path)),
            (Some(_), Some(_)) => {
                return Err(Error::config(
                    "set only one of SIGNAGE_CONFIG_URL and SIGNAGE_CONFIG_FILE",
                ));
            }
            (None, None) => {
                return Err(Error::config(
                    "SIGNAGE_CONFIG_URL or SIGNAGE_CONFIG_FILE is required",
                ));
            }
        };

        let seconds = |key: &str, default: Duration| -> Result<Duration> {
            match var(key) {
                None => Ok(default),
                Some(raw) => match raw.parse::<u64>() {
                    Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
                    _ => Err(Error::config(format!(
                        "{key} must be a positive number of seconds, got '{raw}'"
                    ))),
                },
            }
        };

        let timezone = match var("SIGNAGE_TIMEZONE") {
            None => Tz::UTC,
            Some(name) => Tz::from_str(&name)
                .map_err(|_| Error::config(format!("unknown timezone '{name}'")))?,
        };

        Ok(Self {
            source,
            configuration_id: var("SIGNAGE_CONFIGURATION_ID")
                .unwrap_or_else(|| "default".to_string()),
            snapshot_dir: var("SIGNAGE_SNAPSHOT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/snapshots")),
            evaluation_interval: seconds(
                "SIGNAGE_EVALUATION_INTERVAL_SECS",
                DEFAULT_EVALUATION_INTERVAL,
            )?,
            refresh_interval: seconds("SIGNAGE_REFRESH_INTERVAL_SECS", DEFAULT_REFRESH_INTERVAL)?,
            fetch_timeout: seconds("SIGNAGE_FETCH_TIMEOUT_SECS", DEFAULT_FETCH_TIMEOUT)?,
            timezone,
            log_dir: var("SIGNAGE_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("logs")),
            log_filter: var("SIGNAGE_LOG_FILTER"),
        })
    }
}
