use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Half-open on the left: `(start, stop]` for aggregates, closed for raw samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSpan {
    pub start: i64,
    pub stop: i64,
}

impl TimeSpan {
    pub fn new(start: i64, stop: i64) -> Self {
        Self { start, stop }
    }

    /// Consecutive windows of `interval` seconds covering the span; the last one is
    /// cut short at `stop`.
    pub fn intervals(&self, interval: i64) -> Vec<TimeSpan> {
        if interval <= 0 || self.stop <= self.start {
            return Vec::new();
        }
        let mut windows = Vec::new();
        let mut start = self.start;
        while start < self.stop {
            let stop = (start + interval).min(self.stop);
            windows.push(TimeSpan { start, stop });
            start = stop;
        }
        windows
    }
}

#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct ArchiveRow {
    pub date_time: i64,
    pub us_units: i32,
    pub interval_minutes: i32,
    pub pm2_5: f64,
}

#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct AggregateRow {
    pub value: Option<f64>,
    pub us_units: Option<i32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AggregateKind {
    Avg,
    Count,
    First,
    Last,
    Min,
    Max,
    Sum,
}

impl AggregateKind {
    pub const ALL: [AggregateKind; 7] = [
        AggregateKind::Avg,
        AggregateKind::Count,
        AggregateKind::First,
        AggregateKind::Last,
        AggregateKind::Min,
        AggregateKind::Max,
        AggregateKind::Sum,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Avg => "avg",
            Self::Count => "count",
            Self::First => "first",
            Self::Last => "last",
            Self::Min => "min",
            Self::Max => "max",
            Self::Sum => "sum",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("archive query failed: {0}")]
    Query(#[from] sqlx::Error),
    #[error("archive unavailable: {0}")]
    Unavailable(String),
}

/// Read side of the host's archive of raw samples.
pub trait ArchiveStore: Send + Sync + 'static {
    /// Rows with non-null PM2.5 and `start <= dateTime <= stop`, oldest first.
    fn pm2_5_samples(
        &self,
        span: TimeSpan,
    ) -> impl Future<Output = Result<Vec<ArchiveRow>, StoreError>> + Send;

    /// One aggregate of non-null PM2.5 over `start < dateTime <= stop`.
    fn aggregate_pm2_5(
        &self,
        kind: AggregateKind,
        span: TimeSpan,
    ) -> impl Future<Output = Result<Option<AggregateRow>, StoreError>> + Send;
}

#[derive(Clone, Debug)]
pub struct PgArchive {
    pool: PgPool,
    table: String,
}

impl PgArchive {
    /// `table` must already be a validated identifier.
    pub fn connect_lazy(database_url: &str, table: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(8))
            .connect_lazy(database_url)
            .context("Failed to create lazy archive database pool")?;
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    fn samples_sql(&self) -> String {
        format!(
            r#"SELECT "dateTime"::BIGINT AS date_time, "usUnits"::INT AS us_units,
                "interval"::INT AS interval_minutes, pm2_5::FLOAT8 AS pm2_5
            FROM {table}
            WHERE "dateTime" >= $1 AND "dateTime" <= $2 AND pm2_5 IS NOT NULL
            ORDER BY "dateTime" ASC"#,
            table = self.table
        )
    }

    fn aggregate_sql(&self, kind: AggregateKind) -> String {
        let table = &self.table;
        let window = r#""dateTime" > $1 AND "dateTime" <= $2 AND pm2_5 IS NOT NULL"#;
        match kind {
            AggregateKind::Avg => format!(
                r#"SELECT AVG(pm2_5)::FLOAT8 AS value, MIN("usUnits")::INT AS us_units
                FROM {table} WHERE {window}"#
            ),
            AggregateKind::Count => format!(
                r#"SELECT COUNT("dateTime")::FLOAT8 AS value, MIN("usUnits")::INT AS us_units
                FROM {table} WHERE {window}"#
            ),
            AggregateKind::Sum => format!(
                r#"SELECT SUM(pm2_5)::FLOAT8 AS value, MIN("usUnits")::INT AS us_units
                FROM {table} WHERE {window}"#
            ),
            AggregateKind::First => format!(
                r#"SELECT pm2_5::FLOAT8 AS value, "usUnits"::INT AS us_units FROM {table}
                WHERE "dateTime" = (SELECT MIN("dateTime") FROM {table} WHERE {window})"#
            ),
            AggregateKind::Last => format!(
                r#"SELECT pm2_5::FLOAT8 AS value, "usUnits"::INT AS us_units FROM {table}
                WHERE "dateTime" = (SELECT MAX("dateTime") FROM {table} WHERE {window})"#
            ),
            AggregateKind::Min => format!(
                r#"SELECT pm2_5::FLOAT8 AS value, "usUnits"::INT AS us_units FROM {table}
                WHERE {window} ORDER BY pm2_5 ASC LIMIT 1"#
            ),
            AggregateKind::Max => format!(
                r#"SELECT pm2_5::FLOAT8 AS value, "usUnits"::INT AS us_units FROM {table}
                WHERE {window} ORDER BY pm2_5 DESC LIMIT 1"#
            ),
        }
    }
}

impl ArchiveStore for PgArchive {
    async fn pm2_5_samples(&self, span: TimeSpan) -> Result<Vec<ArchiveRow>, StoreError> {
        let rows = sqlx::query_as::<_, ArchiveRow>(&self.samples_sql())
            .bind(span.start)
            .bind(span.stop)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn aggregate_pm2_5(
        &self,
        kind: AggregateKind,
        span: TimeSpan,
    ) -> Result<Option<AggregateRow>, StoreError> {
        let row = sqlx::query_as::<_, AggregateRow>(&self.aggregate_sql(kind))
            .bind(span.start)
            .bind(span.stop)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}
