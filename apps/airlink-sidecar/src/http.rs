use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;

use crate::archive::{ArchiveStore, TimeSpan};
use crate::derived::{self, DerivedSeriesEngine, SampleRecord, Series, ValueTuple, XTypeError};
use crate::publish::{self, Packet, PublishError};
use crate::reading::RawConcentrations;
use crate::state::SharedState;
use crate::units::{UnitRegistry, UnitSystem};

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

impl From<XTypeError> for HttpError {
    fn from(err: XTypeError) -> Self {
        let status = match &err {
            XTypeError::UnknownType(_) => StatusCode::NOT_FOUND,
            XTypeError::UnknownAggregation(_) => StatusCode::BAD_REQUEST,
            XTypeError::CannotCalculate(_) => StatusCode::UNPROCESSABLE_ENTITY,
            XTypeError::UnsupportedUnitChange { .. } => StatusCode::CONFLICT,
            XTypeError::UnknownUnitSystem(_) | XTypeError::Store(_) => {
                tracing::error!(error = %err, "derived query failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

impl From<PublishError> for HttpError {
    fn from(err: PublishError) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
    }
}

type HttpResult<T> = Result<T, HttpError>;

pub struct HttpState<S> {
    pub shared: SharedState,
    pub units: Arc<UnitRegistry>,
    pub engine: Option<Arc<DerivedSeriesEngine<S>>>,
}

impl<S> Clone for HttpState<S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            units: self.units.clone(),
            engine: self.engine.clone(),
        }
    }
}

impl<S: ArchiveStore> HttpState<S> {
    fn engine(&self) -> HttpResult<&DerivedSeriesEngine<S>> {
        self.engine.as_deref().ok_or_else(|| {
            HttpError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "no historical store configured",
            )
        })
    }
}

pub fn router<S: ArchiveStore>(state: HttpState<S>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/concentrations", get(concentrations::<S>))
        .route("/v1/packet", get(packet::<S>))
        .route("/v1/xtypes/{obs_type}/scalar", get(scalar::<S>))
        .route("/v1/xtypes/{obs_type}/series", get(series::<S>))
        .route("/v1/xtypes/{obs_type}/aggregate", get(aggregate::<S>))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn concentrations<S: ArchiveStore>(
    State(state): State<HttpState<S>>,
) -> HttpResult<Json<RawConcentrations>> {
    state
        .shared
        .reading
        .snapshot()
        .map(Json)
        .ok_or_else(|| HttpError::new(StatusCode::NOT_FOUND, "no concentrations collected yet"))
}

async fn packet<S: ArchiveStore>(State(state): State<HttpState<S>>) -> HttpResult<Json<Packet>> {
    let mut packet = Packet::new();
    publish::fill_in_packet(&state.shared, &mut packet)?;
    Ok(Json(packet))
}

#[derive(Debug, Deserialize)]
struct ScalarQuery {
    pm2_5: Option<f64>,
    date_time: Option<i64>,
    us_units: Option<i32>,
}

async fn scalar<S: ArchiveStore>(
    State(state): State<HttpState<S>>,
    Path(obs_type): Path<String>,
    Query(query): Query<ScalarQuery>,
) -> HttpResult<Json<ValueTuple>> {
    let code = query.us_units.unwrap_or(UnitSystem::Us.code());
    let us_units = UnitSystem::from_code(code).ok_or_else(|| {
        HttpError::new(StatusCode::BAD_REQUEST, format!("unknown us_units {code}"))
    })?;
    let record = SampleRecord {
        date_time: query.date_time.unwrap_or_default(),
        us_units,
        pm2_5: query.pm2_5,
    };
    Ok(Json(derived::scalar(&state.units, &obs_type, &record)?))
}

#[derive(Debug, Deserialize)]
struct SeriesQuery {
    start: i64,
    stop: i64,
    aggregate_type: Option<String>,
    aggregate_interval: Option<i64>,
}

async fn series<S: ArchiveStore>(
    State(state): State<HttpState<S>>,
    Path(obs_type): Path<String>,
    Query(query): Query<SeriesQuery>,
) -> HttpResult<Json<Series>> {
    let aggregation = match (query.aggregate_type.as_deref(), query.aggregate_interval) {
        (Some(kind), Some(interval)) if interval > 0 => Some((kind, interval)),
        (Some(_), _) => {
            return Err(HttpError::new(
                StatusCode::BAD_REQUEST,
                "aggregate_interval must be a positive number of seconds",
            ))
        }
        (None, _) => None,
    };
    let span = TimeSpan::new(query.start, query.stop);
    let series = state
        .engine()?
        .get_series(&obs_type, span, aggregation)
        .await?;
    Ok(Json(series))
}

#[derive(Debug, Deserialize)]
struct AggregateQuery {
    start: i64,
    stop: i64,
    aggregate_type: String,
}

async fn aggregate<S: ArchiveStore>(
    State(state): State<HttpState<S>>,
    Path(obs_type): Path<String>,
    Query(query): Query<AggregateQuery>,
) -> HttpResult<Json<ValueTuple>> {
    let span = TimeSpan::new(query.start, query.stop);
    let value = state
        .engine()?
        .get_aggregate(&obs_type, span, &query.aggregate_type)
        .await?;
    Ok(Json(value))
}
