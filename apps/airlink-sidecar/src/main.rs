use airlink_sidecar::archive::PgArchive;
use airlink_sidecar::cli::{Args, Command};
use airlink_sidecar::collector::Collector;
use airlink_sidecar::config::{Config, SensorSource};
use airlink_sidecar::derived::DerivedSeriesEngine;
use airlink_sidecar::http::{self, HttpState};
use airlink_sidecar::poller::DevicePoller;
use airlink_sidecar::publish::{self, Packet};
use airlink_sidecar::state::{SharedState, POLL_INTERVAL};
use airlink_sidecar::units::{register_air_quality_units, UnitRegistry};
use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// OTLP over HTTP expects the signal path; bare collector addresses get `/v1/traces`.
fn traces_endpoint(raw: &str) -> Option<String> {
    let endpoint = raw.trim().trim_end_matches('/');
    if endpoint.is_empty() {
        None
    } else if endpoint.ends_with("/v1/traces") {
        Some(endpoint.to_string())
    } else {
        Some(format!("{endpoint}/v1/traces"))
    }
}

fn otlp_tracer(endpoint: String) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace::Config as TraceConfig, Resource};

    let resource = Resource::new(vec![KeyValue::new("service.name", env!("CARGO_PKG_NAME"))]);
    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(opentelemetry_otlp::new_exporter().http().with_endpoint(endpoint))
        .with_trace_config(TraceConfig::default().with_resource(resource))
        .install_batch(Tokio)
        .context("failed to install OTLP trace pipeline")
}

fn init_tracing(otlp_endpoint: Option<&str>) -> Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,airlink_sidecar=info".into());
    let otel = otlp_endpoint
        .and_then(traces_endpoint)
        .map(otlp_tracer)
        .transpose()?
        .map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(otel)
        .try_init()?;
    Ok(())
}

async fn bind_listener(addr: &str) -> Result<TcpListener> {
    let err = match TcpListener::bind(addr).await {
        Ok(listener) => return Ok(listener),
        Err(err) => err,
    };
    let hint = match err.kind() {
        std::io::ErrorKind::AddrInUse => "; address in use, pick another with AIRLINK_HTTP_BIND",
        std::io::ErrorKind::PermissionDenied => "; permission denied, use a port above 1023",
        _ => "",
    };
    Err(anyhow::Error::new(err).context(format!("cannot listen on {addr}{hint}")))
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("airlink-sidecar/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")
}

async fn serve(config: Config) -> Result<()> {
    let mut units = UnitRegistry::new();
    register_air_quality_units(&mut units);
    let units = Arc::new(units);

    let shared = SharedState::from_config(&config);
    for source in shared.enabled_sources() {
        tracing::info!(
            "Source {} for AirLink readings: {}:{}, timeout: {}",
            source.index,
            source.hostname,
            source.port,
            source.timeout.as_secs()
        );
    }

    let cancel = CancellationToken::new();
    let poller_handle = if shared.enabled_sources().next().is_some() {
        let poller = DevicePoller::new(Collector::new(http_client()?), shared.clone());
        // Prime the reading so the first live sample has concentrations.
        poller.run_cycle().await;
        Some(poller.start(cancel.clone()))
    } else {
        tracing::error!("No sources enabled; AirLink extension is inoperable.");
        None
    };

    let engine = match &config.database_url {
        Some(url) => {
            let store = PgArchive::connect_lazy(url, &config.archive_table)?;
            Some(Arc::new(DerivedSeriesEngine::new(store, units.clone())))
        }
        None => {
            tracing::info!("no database configured; derived series queries disabled");
            None
        }
    };

    let app = http::router(HttpState {
        shared,
        units,
        engine,
    });
    let listener = bind_listener(&config.http_bind).await?;
    tracing::info!(bind = %config.http_bind, "airlink-sidecar listening");

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("shutdown signal received"),
                _ = shutdown.cancelled() => {}
            }
        })
        .await?;

    cancel.cancel();
    if let Some(handle) = poller_handle {
        if let Err(err) = handle.await {
            tracing::warn!(error = %err, "poller task failed");
        }
    }
    Ok(())
}

async fn probe(config: Config, hostname: String, port: u16, timeout: u64) -> Result<()> {
    let source = SensorSource {
        index: 1,
        enable: true,
        hostname,
        port,
        timeout: Duration::from_secs(timeout),
    };
    let shared = SharedState::new(
        vec![source],
        i64::from(config.archive_interval_seconds),
        i64::from(config.archive_delay_seconds),
        POLL_INTERVAL,
    );
    let poller = DevicePoller::new(Collector::new(http_client()?), shared.clone());

    loop {
        poller.run_cycle().await;
        match shared.reading.snapshot() {
            Some(concentrations) => println!("Concentrations: {concentrations:?}"),
            None => println!("Concentrations: none"),
        }
        let mut packet = Packet::new();
        if publish::fill_in_packet(&shared, &mut packet).is_ok() {
            println!("Fields inserted into packet: {}", serde_json::to_string(&packet)?);
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(shared.poll_interval) => {}
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_env()?;
    init_tracing(config.otlp_endpoint.as_deref())?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Probe {
            hostname,
            port,
            timeout,
        } => probe(config, hostname, port, timeout).await,
    }
}
