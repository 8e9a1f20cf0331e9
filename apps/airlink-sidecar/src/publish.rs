use chrono::Utc;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::aqi;
use crate::reading::RawConcentrations;
use crate::state::SharedState;

/// Flat observation → value record merged into a live sample.
pub type Packet = BTreeMap<String, f64>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("Found no fresh concentrations to insert.")]
    NoFreshConcentrations,
}

pub fn fill_in_packet(state: &SharedState, packet: &mut Packet) -> Result<(), PublishError> {
    fill_in_packet_at(state, packet, Utc::now().timestamp())
}

pub fn fill_in_packet_at(
    state: &SharedState,
    packet: &mut Packet,
    now: i64,
) -> Result<(), PublishError> {
    let Some(concentrations) = state
        .reading
        .snapshot()
        .filter(|reading| reading.is_fresh(state.archive_interval, now))
    else {
        tracing::error!("{}", PublishError::NoFreshConcentrations);
        return Err(PublishError::NoFreshConcentrations);
    };

    tracing::debug!(
        timestamp = concentrations.timestamp,
        "inserting AirLink reading into packet"
    );
    insert_concentrations(&concentrations, packet);
    Ok(())
}

fn insert_with_aqi(packet: &mut Packet, name: &str, pm2_5: f64) {
    let index = aqi::pm2_5_aqi(pm2_5);
    packet.insert(name.to_string(), pm2_5);
    packet.insert(format!("{name}_aqi"), index);
    packet.insert(format!("{name}_aqi_color"), f64::from(aqi::aqi_color(index)));
}

fn insert_concentrations(c: &RawConcentrations, packet: &mut Packet) {
    if let Some(pm1_0) = c.pm_1_last {
        packet.insert("pm1_0".to_string(), pm1_0);
    }
    if let Some(pm2_5) = c.pm_2p5_last {
        insert_with_aqi(packet, "pm2_5", pm2_5);
        insert_with_aqi(packet, "pm2_5_lrapa", aqi::lrapa_correction(pm2_5));
        insert_with_aqi(packet, "pm2_5_unbc", aqi::unbc_correction(pm2_5));
    }
    if let Some(pm10_0) = c.pm_10_last {
        packet.insert("pm10_0".to_string(), pm10_0);
    }

    // One minute averages fall back to the last reading.
    if let Some(pm1_0) = c.pm_1.or(c.pm_1_last) {
        packet.insert("pm1_0_1m".to_string(), pm1_0);
    }
    if let Some(pm2_5) = c.pm_2p5.or(c.pm_2p5_last) {
        insert_with_aqi(packet, "pm2_5_1m", pm2_5);
    }
    if let Some(pm10_0) = c.pm_10.or(c.pm_10_last) {
        packet.insert("pm10_0_1m".to_string(), pm10_0);
    }

    if let Some(pm2_5) = c.pm_2p5_nowcast {
        insert_with_aqi(packet, "pm2_5_nowcast", pm2_5);
    }
    if let Some(pm10_0) = c.pm_10_nowcast {
        packet.insert("pm10_0_nowcast".to_string(), pm10_0);
    }
}
