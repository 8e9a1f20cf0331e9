use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, SensorSource};
use crate::reading::SharedReading;

pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Process-wide state: the latest reading plus immutable configuration.
#[derive(Clone, Debug)]
pub struct SharedState {
    pub reading: SharedReading,
    pub archive_interval: i64,
    pub archive_delay: i64,
    pub poll_interval: Duration,
    pub sources: Arc<[SensorSource]>,
}

impl SharedState {
    pub fn new(
        sources: Vec<SensorSource>,
        archive_interval: i64,
        archive_delay: i64,
        poll_interval: Duration,
    ) -> Self {
        Self {
            reading: SharedReading::new(),
            archive_interval,
            archive_delay,
            poll_interval,
            sources: sources.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.sources.clone(),
            i64::from(config.archive_interval_seconds),
            i64::from(config.archive_delay_seconds),
            POLL_INTERVAL,
        )
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &SensorSource> {
        self.sources.iter().filter(|source| source.enable)
    }
}
