use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value as JsonValue};
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::time::Duration;

use crate::archive::{AggregateKind, AggregateRow, ArchiveRow, ArchiveStore, StoreError, TimeSpan};
use crate::collector::CURRENT_CONDITIONS_PATH;
use crate::config::SensorSource;

/// Type 6 document with every windowed value null and a boot-relative timestamp.
pub fn minimal_payload() -> JsonValue {
    json!({
        "data": {
            "did": null,
            "name": "paloaltoweather.com",
            "ts": 1600485172,
            "conditions": [{
                "lsid": null,
                "data_structure_type": 6,
                "temp": 70.8,
                "hum": 67.6,
                "dew_point": 59.5,
                "wet_bulb": 62.8,
                "heat_index": 70.9,
                "pm_1_last": 4,
                "pm_2p5_last": 9,
                "pm_10_last": 11,
                "pm_1": null,
                "pm_2p5": null,
                "pm_2p5_last_1_hour": null,
                "pm_2p5_last_3_hours": null,
                "pm_2p5_last_24_hours": null,
                "pm_2p5_nowcast": null,
                "pm_10": null,
                "pm_10_last_1_hour": null,
                "pm_10_last_3_hours": null,
                "pm_10_last_24_hours": null,
                "pm_10_nowcast": 12.84,
                "last_report_time": 100,
                "pct_pm_data_last_1_hour": 0,
                "pct_pm_data_last_3_hours": 0,
                "pct_pm_data_nowcast": 0,
                "pct_pm_data_last_24_hours": 0
            }]
        },
        "error": null
    })
}

/// As observed in the field right after a device restart.
pub fn null_pct_payload() -> JsonValue {
    json!({
        "data": {
            "did": "001D0A100214",
            "name": "airlink",
            "ts": 1601491799,
            "conditions": [{
                "lsid": 349506,
                "data_structure_type": 6,
                "temp": 71.9,
                "hum": 70.1,
                "dew_point": 61.6,
                "wet_bulb": 64.5,
                "heat_index": 72.5,
                "pm_1_last": 15,
                "pm_2p5_last": 24,
                "pm_10_last": 27,
                "pm_1": null,
                "pm_2p5": null,
                "pm_2p5_last_1_hour": null,
                "pm_2p5_last_3_hours": null,
                "pm_2p5_last_24_hours": null,
                "pm_2p5_nowcast": null,
                "pm_10": null,
                "pm_10_last_1_hour": null,
                "pm_10_last_3_hours": null,
                "pm_10_last_24_hours": null,
                "pm_10_nowcast": null,
                "last_report_time": 1601491799,
                "pct_pm_data_last_1_hour": null,
                "pct_pm_data_last_3_hours": null,
                "pct_pm_data_nowcast": null,
                "pct_pm_data_last_24_hours": null
            }]
        },
        "error": null
    })
}

pub fn good_payload(last_report_time: i64) -> JsonValue {
    json!({
        "data": {
            "did": "001D0A100214",
            "name": "paloaltoweather.com",
            "ts": last_report_time,
            "conditions": [{
                "lsid": 347825,
                "data_structure_type": 6,
                "temp": 70.8,
                "hum": 67.6,
                "dew_point": 59.5,
                "wet_bulb": 62.8,
                "heat_index": 70.9,
                "pm_1_last": 4,
                "pm_2p5_last": 9,
                "pm_10_last": 11,
                "pm_1": 5.43,
                "pm_2p5": 8.23,
                "pm_2p5_last_1_hour": 8.91,
                "pm_2p5_last_3_hours": 9.09,
                "pm_2p5_last_24_hours": 9.09,
                "pm_2p5_nowcast": 8.96,
                "pm_10": 11.90,
                "pm_10_last_1_hour": 12.54,
                "pm_10_last_3_hours": 13.11,
                "pm_10_last_24_hours": 13.11,
                "pm_10_nowcast": 12.84,
                "last_report_time": last_report_time,
                "pct_pm_data_last_1_hour": 100,
                "pct_pm_data_last_3_hours": 91,
                "pct_pm_data_nowcast": 22,
                "pct_pm_data_last_24_hours": 11
            }]
        },
        "error": null
    })
}

/// Structure type 5 firmware response (`pm_10p0*` naming).
pub fn v5_payload(last_report_time: i64) -> JsonValue {
    json!({
        "data": {
            "did": "001D0A1000AF",
            "name": "LusherClose Sheringham",
            "ts": last_report_time,
            "conditions": [{
                "lsid": 349639,
                "data_structure_type": 5,
                "temp": 59.0,
                "hum": 69.3,
                "dew_point": 48.9,
                "wet_bulb": 52.6,
                "heat_index": 58.1,
                "pm_1_last": 0,
                "pm_2p5_last": 0,
                "pm_10_last": 1,
                "pm_1": 0.61,
                "pm_2p5": 0.61,
                "pm_2p5_last_1_hour": 1.07,
                "pm_2p5_last_3_hours": 1.25,
                "pm_2p5_last_24_hours": 1.25,
                "pm_2p5_nowcast": 1.2,
                "pm_10p0": 3.3,
                "pm_10p0_last_1_hour": 1.9,
                "pm_10p0_last_3_hours": 2.52,
                "pm_10p0_last_24_hours": 2.52,
                "pm_10p0_nowcast": 2.27,
                "last_report_time": last_report_time,
                "pct_pm_data_last_1_hour": 100,
                "pct_pm_data_last_3_hours": 95,
                "pct_pm_data_nowcast": 23,
                "pct_pm_data_last_24_hours": 11
            }]
        },
        "error": null
    })
}

pub async fn spawn_stub_device(payload: JsonValue) -> SocketAddr {
    spawn_stub_device_with_status(StatusCode::OK, payload).await
}

/// Serves `payload` at the device's current conditions path on an ephemeral port.
pub async fn spawn_stub_device_with_status(status: StatusCode, payload: JsonValue) -> SocketAddr {
    let app = Router::new().route(
        CURRENT_CONDITIONS_PATH,
        get(move || {
            let payload = payload.clone();
            async move { (status, Json(payload)) }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub device");
    let addr = listener.local_addr().expect("stub device addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

pub fn source_for(addr: SocketAddr, index: usize, enable: bool) -> SensorSource {
    SensorSource {
        index,
        enable,
        hostname: addr.ip().to_string(),
        port: addr.port(),
        timeout: Duration::from_secs(2),
    }
}

/// A port nothing is listening on (bound, then released).
pub fn unused_local_port() -> u16 {
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind probe port");
    listener.local_addr().expect("probe addr").port()
}

/// In-memory archive with the same window semantics as the SQL templates.
#[derive(Clone, Debug, Default)]
pub struct MemoryArchive {
    rows: Vec<ArchiveRow>,
    fail: bool,
}

impl MemoryArchive {
    pub fn new(mut rows: Vec<ArchiveRow>) -> Self {
        rows.sort_by_key(|row| row.date_time);
        Self { rows, fail: false }
    }

    pub fn failing() -> Self {
        Self {
            rows: Vec::new(),
            fail: true,
        }
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail {
            return Err(StoreError::Unavailable("memory archive set to fail".to_string()));
        }
        Ok(())
    }
}

impl ArchiveStore for MemoryArchive {
    async fn pm2_5_samples(&self, span: TimeSpan) -> Result<Vec<ArchiveRow>, StoreError> {
        self.check()?;
        Ok(self
            .rows
            .iter()
            .filter(|row| row.date_time >= span.start && row.date_time <= span.stop)
            .cloned()
            .collect())
    }

    async fn aggregate_pm2_5(
        &self,
        kind: AggregateKind,
        span: TimeSpan,
    ) -> Result<Option<AggregateRow>, StoreError> {
        self.check()?;
        let rows: Vec<&ArchiveRow> = self
            .rows
            .iter()
            .filter(|row| row.date_time > span.start && row.date_time <= span.stop)
            .collect();
        let us_units = rows.iter().map(|row| row.us_units).min();
        let pick = |row: Option<&&ArchiveRow>| {
            row.map(|row| AggregateRow {
                value: Some(row.pm2_5),
                us_units: Some(row.us_units),
            })
        };

        let result = match kind {
            AggregateKind::Avg => Some(AggregateRow {
                value: (!rows.is_empty())
                    .then(|| rows.iter().map(|row| row.pm2_5).sum::<f64>() / rows.len() as f64),
                us_units,
            }),
            AggregateKind::Count => Some(AggregateRow {
                value: Some(rows.len() as f64),
                us_units,
            }),
            AggregateKind::Sum => Some(AggregateRow {
                value: (!rows.is_empty()).then(|| rows.iter().map(|row| row.pm2_5).sum::<f64>()),
                us_units,
            }),
            AggregateKind::First => pick(rows.first()),
            AggregateKind::Last => pick(rows.last()),
            AggregateKind::Min => pick(rows.iter().min_by(|a, b| a.pm2_5.total_cmp(&b.pm2_5))),
            AggregateKind::Max => pick(rows.iter().max_by(|a, b| a.pm2_5.total_cmp(&b.pm2_5))),
        };
        Ok(result)
    }
}
