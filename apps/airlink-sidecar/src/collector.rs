use chrono::Utc;
use reqwest::Client;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::config::SensorSource;
use crate::payload::{self, SanityError, LEGACY_STRUCTURE_TYPE};
use crate::reading::RawConcentrations;
use crate::units::UnitSystem;

pub const CURRENT_CONDITIONS_PATH: &str = "/v1/current_conditions";

// (record key, payload key)
const RECORD_FIELDS: [(&str, &str); 27] = [
    ("last_report_time", "last_report_time"),
    ("temp", "temp"),
    ("hum", "hum"),
    ("dew_point", "dew_point"),
    ("wet_bulb", "wet_bulb"),
    ("heat_index", "heat_index"),
    ("pct_pm_data_last_1_hour", "pct_pm_data_last_1_hour"),
    ("pct_pm_data_last_3_hours", "pct_pm_data_last_3_hours"),
    ("pct_pm_data_nowcast", "pct_pm_data_nowcast"),
    ("pct_pm_data_last_24_hours", "pct_pm_data_last_24_hours"),
    ("pm1_0", "pm_1_last"),
    ("pm2_5", "pm_2p5_last"),
    ("pm10_0", "pm_10_last"),
    ("pm_1", "pm_1"),
    ("pm_1_last", "pm_1_last"),
    ("pm_2p5_last", "pm_2p5_last"),
    ("pm_2p5", "pm_2p5"),
    ("pm_2p5_last_1_hour", "pm_2p5_last_1_hour"),
    ("pm_2p5_last_3_hours", "pm_2p5_last_3_hours"),
    ("pm_2p5_last_24_hours", "pm_2p5_last_24_hours"),
    ("pm_2p5_nowcast", "pm_2p5_nowcast"),
    ("pm_10_last", "pm_10_last"),
    ("pm_10", "pm_10"),
    ("pm_10_last_1_hour", "pm_10_last_1_hour"),
    ("pm_10_last_3_hours", "pm_10_last_3_hours"),
    ("pm_10_last_24_hours", "pm_10_last_24_hours"),
    ("pm_10_nowcast", "pm_10_nowcast"),
];

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("device returned error({code}): {message}")]
    Device { code: i64, message: String },
    #[error("reading not sane: {0}")]
    Insane(#[from] SanityError),
    #[error("ignoring reading, age: {age_seconds} seconds")]
    Stale { age_seconds: i64 },
    #[error("last_report_time must be time since boot: {last_report_time} seconds")]
    BootRelative { last_report_time: i64 },
}

/// One collector cycle's output, flattened from a validated payload.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedRecord {
    pub date_time: i64,
    pub us_units: UnitSystem,
    values: BTreeMap<&'static str, Option<f64>>,
    missing: Vec<&'static str>,
}

impl NormalizedRecord {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied().flatten()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn values(&self) -> impl Iterator<Item = (&'static str, Option<f64>)> + '_ {
        self.values.iter().map(|(name, value)| (*name, *value))
    }

    /// Payload keys the device did not report at all (as opposed to reporting null).
    pub fn missing(&self) -> &[&'static str] {
        &self.missing
    }
}

pub fn populate_record(date_time: i64, conditions: &Map<String, JsonValue>) -> NormalizedRecord {
    let mut values = BTreeMap::new();
    let mut missing = Vec::new();

    for (record_key, payload_key) in RECORD_FIELDS {
        let value = match conditions.get(payload_key) {
            Some(value) => value.as_f64(),
            None => {
                if !missing.contains(&payload_key) {
                    missing.push(payload_key);
                }
                None
            }
        };
        values.insert(record_key, value);
    }

    if !missing.is_empty() {
        tracing::info!("Sensor didn't report field(s): {}", missing.join(","));
    }

    NormalizedRecord {
        date_time,
        us_units: UnitSystem::Us,
        values,
        missing,
    }
}

/// Runs the decode-side pipeline on a `current_conditions` document:
/// device error check, type 5 migration, sanity check, freshness, flattening.
pub fn evaluate_payload(
    doc: &mut JsonValue,
    now: i64,
    archive_interval: i64,
) -> Result<NormalizedRecord, CollectError> {
    if let Some(error) = doc.get("error").filter(|error| !error.is_null()) {
        let code = error.get("code").and_then(JsonValue::as_i64).unwrap_or_default();
        let message = error
            .get("message")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(CollectError::Device { code, message });
    }

    if payload::structure_type(doc) == Some(LEGACY_STRUCTURE_TYPE) {
        payload::migrate_v5_to_v6(doc);
    }
    payload::is_sane(doc)?;

    let conditions = payload::conditions(doc).ok_or(SanityError::NoConditions)?;
    let last_report_time = conditions
        .get("last_report_time")
        .and_then(JsonValue::as_i64)
        .ok_or(SanityError::Malformed("last_report_time"))?;

    let age_seconds = now - last_report_time;
    if age_seconds > archive_interval {
        // A rebooted device reports seconds since boot until it syncs its clock,
        // and has no one minute average yet.
        if conditions.get("pm_1").map_or(true, JsonValue::is_null) {
            return Err(CollectError::BootRelative { last_report_time });
        }
        return Err(CollectError::Stale { age_seconds });
    }

    Ok(populate_record(last_report_time, conditions))
}

#[derive(Clone, Debug)]
pub struct Collector {
    http: Client,
}

impl Collector {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    /// Fetches one reading; any failure is logged and yields `None`.
    pub async fn fetch(
        &self,
        source: &SensorSource,
        archive_interval: i64,
    ) -> Option<RawConcentrations> {
        self.fetch_record(source, archive_interval)
            .await
            .map(|record| RawConcentrations::from_record(&record))
    }

    pub async fn fetch_record(
        &self,
        source: &SensorSource,
        archive_interval: i64,
    ) -> Option<NormalizedRecord> {
        match self.try_fetch(source, archive_interval).await {
            Ok(record) => {
                tracing::debug!(source = %source.hostname, "Successful read");
                Some(record)
            }
            Err(err) => {
                tracing::info!(
                    source = %source.hostname,
                    port = source.port,
                    error = %err,
                    "AirLink fetch failed"
                );
                None
            }
        }
    }

    async fn try_fetch(
        &self,
        source: &SensorSource,
        archive_interval: i64,
    ) -> Result<NormalizedRecord, CollectError> {
        let url = source.current_conditions_url();
        tracing::debug!(url = %url, timeout = ?source.timeout, "fetching current conditions");
        let response = self
            .http
            .get(&url)
            .timeout(source.timeout)
            .send()
            .await?
            .error_for_status()?;
        let mut doc: JsonValue = response.json().await?;
        tracing::trace!(source = %source.hostname, payload = %doc, "current conditions payload");
        evaluate_payload(&mut doc, Utc::now().timestamp(), archive_interval)
    }
}
