use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collector::Collector;
use crate::reading::RawConcentrations;
use crate::state::SharedState;

/// Tries enabled sources in priority order; the first fresh reading wins.
pub async fn get_concentrations(
    collector: &Collector,
    state: &SharedState,
) -> Option<RawConcentrations> {
    for source in state.enabled_sources() {
        let Some(concentrations) = collector.fetch(source, state.archive_interval).await else {
            continue;
        };
        let age = concentrations.age(Utc::now().timestamp());
        if age > state.archive_interval {
            tracing::info!(
                source = %source.hostname,
                age_seconds = age,
                "Ignoring reading from source, age too large"
            );
            continue;
        }
        return Some(concentrations);
    }
    tracing::error!("Could not get concentrations from any source.");
    None
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Sole writer of the shared reading.
#[derive(Clone)]
pub struct DevicePoller {
    collector: Collector,
    state: SharedState,
}

impl DevicePoller {
    pub fn new(collector: Collector, state: SharedState) -> Self {
        Self { collector, state }
    }

    /// One cycle with panics contained; a panic counts as no result.
    pub async fn poll_once(&self) -> Option<RawConcentrations> {
        match AssertUnwindSafe(get_concentrations(&self.collector, &self.state))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => {
                tracing::error!(
                    panic = %panic_message(payload.as_ref()),
                    "AirLink poll cycle panicked"
                );
                None
            }
        }
    }

    /// Returns whether the shared reading was replaced.
    pub async fn run_cycle(&self) -> bool {
        match self.poll_once().await {
            Some(concentrations) => {
                tracing::debug!(timestamp = concentrations.timestamp, "replacing shared reading");
                self.state.reading.replace(concentrations);
                true
            }
            None => false,
        }
    }

    pub fn start(self, cancel: CancellationToken) -> JoinHandle<()> {
        let interval = self.state.poll_interval;
        tokio::spawn(async move {
            tracing::info!(interval = ?interval, "AirLink poller started");
            loop {
                self.run_cycle().await;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            tracing::info!("AirLink poller stopped");
        })
    }
}
