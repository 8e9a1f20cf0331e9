//! Derived air-quality observation types computed from archived raw PM2.5.
//!
//! Nothing here is persisted: every point, series and aggregate query reads raw
//! `pm2_5` from the archive and applies the AQI math on the fly.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::aqi;
use crate::archive::{AggregateKind, ArchiveStore, StoreError, TimeSpan};
use crate::units::{UnitRegistry, UnitSystem};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DerivedType {
    Aqi,
    AqiColor,
    Lrapa,
    LrapaAqi,
    LrapaAqiColor,
    Unbc,
    UnbcAqi,
    UnbcAqiColor,
}

impl DerivedType {
    pub const ALL: [DerivedType; 8] = [
        DerivedType::Aqi,
        DerivedType::AqiColor,
        DerivedType::Lrapa,
        DerivedType::LrapaAqi,
        DerivedType::LrapaAqiColor,
        DerivedType::Unbc,
        DerivedType::UnbcAqi,
        DerivedType::UnbcAqiColor,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Aqi => "pm2_5_aqi",
            Self::AqiColor => "pm2_5_aqi_color",
            Self::Lrapa => "pm2_5_lrapa",
            Self::LrapaAqi => "pm2_5_lrapa_aqi",
            Self::LrapaAqiColor => "pm2_5_lrapa_aqi_color",
            Self::Unbc => "pm2_5_unbc",
            Self::UnbcAqi => "pm2_5_unbc_aqi",
            Self::UnbcAqiColor => "pm2_5_unbc_aqi_color",
        }
    }

    pub fn parse(obs_type: &str) -> Result<Self, XTypeError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == obs_type)
            .ok_or_else(|| XTypeError::UnknownType(obs_type.to_string()))
    }

    pub fn derive(self, pm2_5: f64) -> f64 {
        match self {
            Self::Aqi => aqi::pm2_5_aqi(pm2_5),
            Self::AqiColor => f64::from(aqi::aqi_color(aqi::pm2_5_aqi(pm2_5))),
            Self::Lrapa => aqi::lrapa_correction(pm2_5),
            Self::LrapaAqi => aqi::pm2_5_aqi(aqi::lrapa_correction(pm2_5)),
            Self::LrapaAqiColor => {
                f64::from(aqi::aqi_color(aqi::pm2_5_aqi(aqi::lrapa_correction(pm2_5))))
            }
            Self::Unbc => aqi::unbc_correction(pm2_5),
            Self::UnbcAqi => aqi::pm2_5_aqi(aqi::unbc_correction(pm2_5)),
            Self::UnbcAqiColor => {
                f64::from(aqi::aqi_color(aqi::pm2_5_aqi(aqi::unbc_correction(pm2_5))))
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum XTypeError {
    #[error("unknown observation type {0:?}")]
    UnknownType(String),
    #[error("unknown aggregation {0:?}")]
    UnknownAggregation(String),
    #[error("cannot calculate {0}: record has no pm2_5")]
    CannotCalculate(&'static str),
    #[error("unit type cannot change within a time interval ({from:?} vs {to:?})")]
    UnsupportedUnitChange { from: UnitSystem, to: UnitSystem },
    #[error("archive row has unknown unit system {0}")]
    UnknownUnitSystem(i32),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValueTuple {
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub group: Option<String>,
    /// Display suffix and format string registered for `unit`.
    pub label: Option<String>,
    pub format: Option<String>,
}

impl ValueTuple {
    fn new(
        units: &UnitRegistry,
        value: Option<f64>,
        unit: Option<String>,
        group: Option<String>,
    ) -> Self {
        let label = unit.as_deref().and_then(|unit| units.label(unit)).map(str::to_string);
        let format = unit.as_deref().and_then(|unit| units.format(unit)).map(str::to_string);
        Self {
            value,
            unit,
            group,
            label,
            format,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Series {
    pub start: Vec<i64>,
    pub stop: Vec<i64>,
    pub data: Vec<Option<f64>>,
    pub unit: Option<String>,
    pub group: Option<String>,
}

/// The slice of a host record a point query needs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SampleRecord {
    pub date_time: i64,
    pub us_units: UnitSystem,
    pub pm2_5: Option<f64>,
}

fn unit_pair(
    units: &UnitRegistry,
    system: Option<UnitSystem>,
    obs_type: &str,
    aggregate: Option<AggregateKind>,
) -> (Option<String>, Option<String>) {
    let standard = match system {
        Some(system) => units.standard_unit_type(system, obs_type, aggregate),
        None if aggregate == Some(AggregateKind::Count) => {
            units.standard_unit_type(UnitSystem::Us, obs_type, aggregate)
        }
        None => None,
    };
    match standard {
        Some((unit, group)) => (Some(unit), Some(group)),
        None => (None, None),
    }
}

/// Point query; needs no archive access.
pub fn scalar(
    units: &UnitRegistry,
    obs_type: &str,
    record: &SampleRecord,
) -> Result<ValueTuple, XTypeError> {
    let derived = DerivedType::parse(obs_type)?;
    let pm2_5 = record
        .pm2_5
        .ok_or(XTypeError::CannotCalculate(derived.name()))?;
    let (unit, group) = unit_pair(units, Some(record.us_units), derived.name(), None);
    Ok(ValueTuple::new(units, Some(derived.derive(pm2_5)), unit, group))
}

pub struct DerivedSeriesEngine<S> {
    store: S,
    units: Arc<UnitRegistry>,
}

impl<S: ArchiveStore> DerivedSeriesEngine<S> {
    pub fn new(store: S, units: Arc<UnitRegistry>) -> Self {
        Self { store, units }
    }

    pub fn get_scalar(&self, obs_type: &str, record: &SampleRecord) -> Result<ValueTuple, XTypeError> {
        scalar(&self.units, obs_type, record)
    }

    /// Raw series when `aggregation` is `None`, otherwise one aggregate per
    /// `(aggregate_type, interval_seconds)` window.
    pub async fn get_series(
        &self,
        obs_type: &str,
        span: TimeSpan,
        aggregation: Option<(&str, i64)>,
    ) -> Result<Series, XTypeError> {
        let derived = DerivedType::parse(obs_type)?;
        match aggregation {
            Some((aggregate_type, interval)) => {
                self.aggregated_series(derived, span, aggregate_type, interval)
                    .await
            }
            None => self.raw_series(derived, span).await,
        }
    }

    async fn raw_series(&self, derived: DerivedType, span: TimeSpan) -> Result<Series, XTypeError> {
        let rows = self.store.pm2_5_samples(span).await?;
        let mut series = Series::default();
        let mut std_unit_system: Option<UnitSystem> = None;

        for row in rows {
            let system =
                UnitSystem::from_code(row.us_units).ok_or(XTypeError::UnknownUnitSystem(row.us_units))?;
            match std_unit_system {
                Some(expected) if expected != system => {
                    return Err(XTypeError::UnsupportedUnitChange {
                        from: expected,
                        to: system,
                    });
                }
                Some(_) => {}
                None => std_unit_system = Some(system),
            }
            series
                .start
                .push(row.date_time - i64::from(row.interval_minutes) * 60);
            series.stop.push(row.date_time);
            series.data.push(Some(derived.derive(row.pm2_5)));
        }

        let (unit, group) = unit_pair(&self.units, std_unit_system, derived.name(), None);
        series.unit = unit;
        series.group = group;
        tracing::debug!(
            obs_type = derived.name(),
            samples = series.data.len(),
            "derived raw series"
        );
        Ok(series)
    }

    async fn aggregated_series(
        &self,
        derived: DerivedType,
        span: TimeSpan,
        aggregate_type: &str,
        interval: i64,
    ) -> Result<Series, XTypeError> {
        let kind = AggregateKind::parse(aggregate_type)
            .ok_or_else(|| XTypeError::UnknownAggregation(aggregate_type.to_string()))?;
        let mut series = Series::default();
        for window in span.intervals(interval) {
            let value = self.aggregate(derived, kind, window).await?;
            if series.unit.is_none() {
                series.unit = value.unit;
                series.group = value.group;
            }
            series.start.push(window.start);
            series.stop.push(window.stop);
            series.data.push(value.value);
        }
        Ok(series)
    }

    pub async fn get_aggregate(
        &self,
        obs_type: &str,
        span: TimeSpan,
        aggregate_type: &str,
    ) -> Result<ValueTuple, XTypeError> {
        let derived = DerivedType::parse(obs_type)?;
        let kind = AggregateKind::parse(aggregate_type)
            .ok_or_else(|| XTypeError::UnknownAggregation(aggregate_type.to_string()))?;
        self.aggregate(derived, kind, span).await
    }

    async fn aggregate(
        &self,
        derived: DerivedType,
        kind: AggregateKind,
        span: TimeSpan,
    ) -> Result<ValueTuple, XTypeError> {
        let row = self.store.aggregate_pm2_5(kind, span).await?;
        let (raw, system) = match row {
            Some(row) => match (row.value, row.us_units) {
                (Some(value), Some(code)) => (
                    Some(value),
                    Some(UnitSystem::from_code(code).ok_or(XTypeError::UnknownUnitSystem(code))?),
                ),
                // COUNT over no rows is 0 with a NULL unit system.
                (Some(value), None) if kind == AggregateKind::Count => (Some(value), None),
                _ => (None, None),
            },
            None => (None, None),
        };

        let value = match kind {
            AggregateKind::Count => raw,
            _ => raw.map(|pm2_5| derived.derive(pm2_5)),
        };
        let (unit, group) = unit_pair(&self.units, system, derived.name(), Some(kind));
        Ok(ValueTuple::new(&self.units, value, unit, group))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aqi::{COLOR_GREEN, COLOR_YELLOW};
    use crate::archive::ArchiveRow;
    use crate::test_support::MemoryArchive;
    use crate::units::{register_air_quality_units, UNIT_AQI, UNIT_AQI_COLOR, UNIT_COUNT};

    fn registry() -> Arc<UnitRegistry> {
        let mut units = UnitRegistry::new();
        register_air_quality_units(&mut units);
        Arc::new(units)
    }

    fn row(date_time: i64, us_units: i32, pm2_5: f64) -> ArchiveRow {
        ArchiveRow {
            date_time,
            us_units,
            interval_minutes: 5,
            pm2_5,
        }
    }

    fn engine(rows: Vec<ArchiveRow>) -> DerivedSeriesEngine<MemoryArchive> {
        DerivedSeriesEngine::new(MemoryArchive::new(rows), registry())
    }

    fn close(a: Option<f64>, b: f64) -> bool {
        a.is_some_and(|a| (a - b).abs() < 1e-6)
    }

    #[test]
    fn every_name_parses_back() {
        for kind in DerivedType::ALL {
            assert_eq!(DerivedType::parse(kind.name()).expect("known"), kind);
        }
        assert!(matches!(
            DerivedType::parse("pm10_0_aqi"),
            Err(XTypeError::UnknownType(name)) if name == "pm10_0_aqi"
        ));
    }

    #[test]
    fn derive_chains_corrections_into_aqi() {
        assert_eq!(DerivedType::Aqi.derive(12.0), 50.0);
        assert_eq!(DerivedType::AqiColor.derive(12.0), f64::from(COLOR_GREEN));
        assert!((DerivedType::Lrapa.derive(20.0) - 9.34).abs() < 1e-9);
        assert_eq!(
            DerivedType::LrapaAqi.derive(20.0),
            aqi::pm2_5_aqi(aqi::lrapa_correction(20.0))
        );
        assert!((DerivedType::Unbc.derive(10.0) - 9.4).abs() < 1e-9);
        assert_eq!(DerivedType::UnbcAqiColor.derive(30.0), f64::from(COLOR_YELLOW));
    }

    #[test]
    fn scalar_requires_pm2_5() {
        let units = registry();
        let record = SampleRecord {
            date_time: 1_000,
            us_units: UnitSystem::Us,
            pm2_5: Some(6.0),
        };
        let value = scalar(&units, "pm2_5_aqi", &record).expect("scalar");
        assert_eq!(value.value, Some(25.0));
        assert_eq!(value.unit.as_deref(), Some(UNIT_AQI));
        assert_eq!(value.label.as_deref(), Some(" AQI"));
        assert_eq!(value.format.as_deref(), Some("%d"));

        let missing = SampleRecord {
            pm2_5: None,
            ..record
        };
        assert!(matches!(
            scalar(&units, "pm2_5_aqi", &missing),
            Err(XTypeError::CannotCalculate("pm2_5_aqi"))
        ));
        assert!(matches!(
            scalar(&units, "outTemp", &record),
            Err(XTypeError::UnknownType(_))
        ));
    }

    #[tokio::test]
    async fn raw_series_derives_each_sample_in_order() {
        let engine = engine(vec![
            row(1_300, 1, 12.1),
            row(1_000, 1, 0.0),
            row(1_600, 1, 35.5),
            row(2_000, 1, 6.0),
        ]);
        let series = engine
            .get_series("pm2_5_aqi", TimeSpan::new(1_000, 1_600), None)
            .await
            .expect("series");

        assert_eq!(series.stop, vec![1_000, 1_300, 1_600]);
        assert_eq!(series.start, vec![700, 1_000, 1_300]);
        assert_eq!(series.data, vec![Some(0.0), Some(51.0), Some(101.0)]);
        assert_eq!(series.unit.as_deref(), Some(UNIT_AQI));
    }

    #[tokio::test]
    async fn raw_series_rejects_unit_system_change() {
        let engine = engine(vec![row(1_000, 1, 5.0), row(1_300, 16, 5.0)]);
        let err = engine
            .get_series("pm2_5_aqi_color", TimeSpan::new(0, 2_000), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            XTypeError::UnsupportedUnitChange {
                from: UnitSystem::Us,
                to: UnitSystem::Metric
            }
        ));
    }

    #[tokio::test]
    async fn empty_series_has_no_unit() {
        let series = engine(Vec::new())
            .get_series("pm2_5_aqi", TimeSpan::new(0, 100), None)
            .await
            .expect("series");
        assert!(series.data.is_empty());
        assert_eq!(series.unit, None);
    }

    #[tokio::test]
    async fn aggregate_applies_derivation_to_raw_value() {
        let engine = engine(vec![
            row(1_000, 1, 6.0),
            row(1_300, 1, 12.0),
            row(1_600, 1, 35.4),
        ]);
        let span = TimeSpan::new(1_000, 1_600);

        let max = engine
            .get_aggregate("pm2_5_aqi", span, "max")
            .await
            .expect("max");
        assert!(close(max.value, 100.0));

        let first = engine
            .get_aggregate("pm2_5_aqi_color", span, "first")
            .await
            .expect("first");
        assert_eq!(first.value, Some(f64::from(COLOR_GREEN)));
        assert_eq!(first.unit.as_deref(), Some(UNIT_AQI_COLOR));

        let avg = engine
            .get_aggregate("pm2_5_lrapa", span, "avg")
            .await
            .expect("avg");
        assert!(close(avg.value, aqi::lrapa_correction((12.0 + 35.4) / 2.0)));
    }

    #[tokio::test]
    async fn count_is_not_derived() {
        let engine = engine(vec![row(1_300, 1, 12.0), row(1_600, 1, 35.4)]);
        let count = engine
            .get_aggregate("pm2_5_aqi", TimeSpan::new(1_000, 1_600), "count")
            .await
            .expect("count");
        assert_eq!(count.value, Some(2.0));
        assert_eq!(count.unit.as_deref(), Some(UNIT_COUNT));
    }

    #[tokio::test]
    async fn count_over_empty_span_is_zero() {
        let count = engine(vec![row(5_000, 1, 1.0)])
            .get_aggregate("pm2_5_aqi", TimeSpan::new(0, 100), "count")
            .await
            .expect("count");
        assert_eq!(count.value, Some(0.0));
        assert_eq!(count.unit.as_deref(), Some(UNIT_COUNT));
    }

    #[tokio::test]
    async fn aggregate_over_empty_span_is_none() {
        let value = engine(vec![row(5_000, 1, 1.0)])
            .get_aggregate("pm2_5_aqi", TimeSpan::new(0, 100), "avg")
            .await
            .expect("avg");
        assert_eq!(value.value, None);
        assert_eq!(value.unit, None);
        assert_eq!(value.label, None);
    }

    #[tokio::test]
    async fn unknown_names_fail_before_touching_the_store() {
        let engine = DerivedSeriesEngine::new(MemoryArchive::failing(), registry());
        let span = TimeSpan::new(0, 100);
        assert!(matches!(
            engine.get_aggregate("pm2_5_aqi", span, "median").await,
            Err(XTypeError::UnknownAggregation(name)) if name == "median"
        ));
        assert!(matches!(
            engine.get_aggregate("pm2_5_nope", span, "avg").await,
            Err(XTypeError::UnknownType(_))
        ));
        assert!(matches!(
            engine.get_series("pm2_5_nope", span, None).await,
            Err(XTypeError::UnknownType(_))
        ));
        assert!(matches!(
            engine.get_series("pm2_5_aqi", span, None).await,
            Err(XTypeError::Store(_))
        ));
    }

    #[tokio::test]
    async fn aggregated_series_evaluates_each_window() {
        let engine = engine(vec![
            row(1_100, 1, 6.0),
            row(1_200, 1, 12.0),
            row(1_400, 1, 35.4),
        ]);
        let series = engine
            .get_series("pm2_5_aqi", TimeSpan::new(1_000, 1_600), Some(("max", 300)))
            .await
            .expect("series");

        assert_eq!(series.start, vec![1_000, 1_300]);
        assert_eq!(series.stop, vec![1_300, 1_600]);
        assert!(close(series.data[0], 50.0));
        assert!(close(series.data[1], 100.0));
        assert_eq!(series.unit.as_deref(), Some(UNIT_AQI));

        assert!(matches!(
            engine
                .get_series("pm2_5_aqi", TimeSpan::new(1_000, 1_600), Some(("mode", 300)))
                .await,
            Err(XTypeError::UnknownAggregation(_))
        ));
    }
}
