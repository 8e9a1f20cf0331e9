use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::collector::CURRENT_CONDITIONS_PATH;

const DEFAULT_SETUP_CONFIG_PATH: &str = "/etc/airlink-sidecar/config.json";
const DEFAULT_PORT: u16 = 80;
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_ARCHIVE_INTERVAL_SECS: u32 = 300;
const DEFAULT_ARCHIVE_DELAY_SECS: u32 = 15;
const DEFAULT_ARCHIVE_TABLE: &str = "archive";
const DEFAULT_HTTP_BIND: &str = "127.0.0.1:9110";

/// One configured AirLink device. `index` is the failover priority (Sensor1 first).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SensorSource {
    pub index: usize,
    pub enable: bool,
    pub hostname: String,
    pub port: u16,
    pub timeout: Duration,
}

impl SensorSource {
    pub fn current_conditions_url(&self) -> String {
        format!(
            "http://{}:{}{}",
            self.hostname, self.port, CURRENT_CONDITIONS_PATH
        )
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub sources: Vec<SensorSource>,
    pub archive_interval_seconds: u32,
    pub archive_delay_seconds: u32,
    pub database_url: Option<String>,
    pub archive_table: String,
    pub http_bind: String,
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SetupConfigOverrides {
    #[serde(default)]
    archive_interval: Option<u32>,
    #[serde(default)]
    archive_delay: Option<u32>,
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default)]
    http_bind: Option<String>,
    #[serde(default)]
    sensors: Vec<SetupSensor>,
}

#[derive(Debug, Clone, Deserialize)]
struct SetupSensor {
    #[serde(default)]
    enable: bool,
    #[serde(default)]
    hostname: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_timeout_secs")]
    timeout: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn setup_config_path() -> PathBuf {
    env::var("AIRLINK_SETUP_CONFIG_PATH")
        .ok()
        .map(|path| path.trim().to_string())
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETUP_CONFIG_PATH))
}

fn load_setup_config_overrides(path: &Path) -> Option<SetupConfigOverrides> {
    if !path.exists() {
        return None;
    }
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "airlink-sidecar failed to read setup config; using env defaults"
            );
            return None;
        }
    };
    let mut bytes = contents.into_bytes();
    match simd_json::serde::from_slice(&mut bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "airlink-sidecar failed to parse setup config; using env defaults"
            );
            None
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        let overrides = load_setup_config_overrides(&setup_config_path());
        Self::from_lookup(|key| env::var(key).ok(), overrides.unwrap_or_default())
    }

    fn from_lookup<F>(lookup: F, overrides: SetupConfigOverrides) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut sources = sources_from_lookup(&lookup)?;
        if sources.is_empty() {
            sources = overrides
                .sensors
                .iter()
                .enumerate()
                .map(|(idx, sensor)| SensorSource {
                    index: idx + 1,
                    enable: sensor.enable,
                    hostname: sensor.hostname.trim().to_string(),
                    port: sensor.port,
                    timeout: Duration::from_secs(sensor.timeout),
                })
                .collect();
        }

        let archive_interval_seconds = match lookup("AIRLINK_ARCHIVE_INTERVAL") {
            Some(raw) => raw
                .parse::<u32>()
                .context("invalid AIRLINK_ARCHIVE_INTERVAL")?,
            None => overrides
                .archive_interval
                .filter(|value| *value != 0)
                .unwrap_or(DEFAULT_ARCHIVE_INTERVAL_SECS),
        };
        if archive_interval_seconds == 0 {
            bail!("AIRLINK_ARCHIVE_INTERVAL must be positive");
        }
        let archive_delay_seconds = match lookup("AIRLINK_ARCHIVE_DELAY") {
            Some(raw) => raw.parse::<u32>().context("invalid AIRLINK_ARCHIVE_DELAY")?,
            None => overrides
                .archive_delay
                .unwrap_or(DEFAULT_ARCHIVE_DELAY_SECS),
        };

        let database_url = lookup("AIRLINK_DATABASE_URL")
            .or_else(|| lookup("DATABASE_URL"))
            .or_else(|| {
                overrides
                    .database_url
                    .as_deref()
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string)
            });

        let archive_table =
            lookup("AIRLINK_ARCHIVE_TABLE").unwrap_or_else(|| DEFAULT_ARCHIVE_TABLE.to_string());
        if !is_valid_table_name(&archive_table) {
            bail!("invalid AIRLINK_ARCHIVE_TABLE {archive_table:?}");
        }

        let http_bind = lookup("AIRLINK_HTTP_BIND")
            .or_else(|| {
                overrides
                    .http_bind
                    .as_deref()
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| DEFAULT_HTTP_BIND.to_string());

        Ok(Self {
            sources,
            archive_interval_seconds,
            archive_delay_seconds,
            database_url,
            archive_table,
            http_bind,
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT"),
        })
    }
}

/// Reads `AIRLINK_SENSOR1_*`, `AIRLINK_SENSOR2_*`, ... until a number has none of its keys set.
fn sources_from_lookup<F>(lookup: F) -> Result<Vec<SensorSource>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut sources = Vec::new();
    for index in 1.. {
        let key = |suffix: &str| format!("AIRLINK_SENSOR{index}_{suffix}");
        let enable = lookup(&key("ENABLE"));
        let hostname = lookup(&key("HOSTNAME"));
        let port = lookup(&key("PORT"));
        let timeout = lookup(&key("TIMEOUT"));
        if enable.is_none() && hostname.is_none() && port.is_none() && timeout.is_none() {
            break;
        }

        let enable = match enable {
            Some(raw) => parse_bool(&raw).with_context(|| format!("invalid {}", key("ENABLE")))?,
            None => false,
        };
        let port = match port {
            Some(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("invalid {}", key("PORT")))?,
            None => DEFAULT_PORT,
        };
        let timeout = match timeout {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("invalid {}", key("TIMEOUT")))?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        sources.push(SensorSource {
            index,
            enable,
            hostname: hostname.unwrap_or_default(),
            port,
            timeout: Duration::from_secs(timeout),
        });
    }
    Ok(sources)
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got {other:?}"),
    }
}

fn is_valid_table_name(raw: &str) -> bool {
    let mut chars = raw.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
