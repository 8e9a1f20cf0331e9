use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::collector::NormalizedRecord;

/// One successful device read. `timestamp` is the device's `last_report_time`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct RawConcentrations {
    pub timestamp: i64,
    pub pm_1_last: Option<f64>,
    pub pm_2p5_last: Option<f64>,
    pub pm_10_last: Option<f64>,
    pub pm_1: Option<f64>,
    pub pm_2p5: Option<f64>,
    pub pm_10: Option<f64>,
    pub pm_2p5_nowcast: Option<f64>,
    pub pm_10_nowcast: Option<f64>,
    pub hum: Option<f64>,
    pub temp: Option<f64>,
}

impl RawConcentrations {
    pub fn from_record(record: &NormalizedRecord) -> Self {
        Self {
            timestamp: record.date_time,
            pm_1_last: record.get("pm_1_last"),
            pm_2p5_last: record.get("pm_2p5_last"),
            pm_10_last: record.get("pm_10_last"),
            pm_1: record.get("pm_1"),
            pm_2p5: record.get("pm_2p5"),
            pm_10: record.get("pm_10"),
            pm_2p5_nowcast: record.get("pm_2p5_nowcast"),
            pm_10_nowcast: record.get("pm_10_nowcast"),
            hum: record.get("hum"),
            temp: record.get("temp"),
        }
    }

    pub fn age(&self, now: i64) -> i64 {
        now - self.timestamp
    }

    pub fn is_fresh(&self, archive_interval: i64, now: i64) -> bool {
        self.timestamp + archive_interval >= now
    }
}

/// Latest reading shared between the poller (sole writer) and the publication path.
///
/// The lock is only held to copy a value in or out.
#[derive(Clone, Debug, Default)]
pub struct SharedReading {
    inner: Arc<Mutex<Option<RawConcentrations>>>,
}

impl SharedReading {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_lock<T>(&self, f: impl FnOnce(&mut Option<RawConcentrations>) -> T) -> T {
        let (out, recovered) = match self.inner.lock() {
            Ok(mut guard) => (f(&mut guard), false),
            Err(poisoned) => {
                let mut guard = poisoned.into_inner();
                (f(&mut guard), true)
            }
        };
        // Guard is released; logging never runs under the lock.
        if recovered {
            tracing::warn!("Recovered shared AirLink reading from poisoned lock");
        }
        out
    }

    pub fn snapshot(&self) -> Option<RawConcentrations> {
        self.with_lock(|slot| *slot)
    }

    pub fn replace(&self, concentrations: RawConcentrations) {
        self.with_lock(|slot| *slot = Some(concentrations));
    }
}
