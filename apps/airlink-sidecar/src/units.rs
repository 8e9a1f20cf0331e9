use serde::Serialize;
use std::collections::HashMap;

use crate::archive::AggregateKind;

pub const GROUP_CONCENTRATION: &str = "group_concentration";
pub const GROUP_COUNT: &str = "group_count";
pub const GROUP_TIME: &str = "group_time";
pub const GROUP_AQI: &str = "air_quality_index";
pub const GROUP_AQI_COLOR: &str = "air_quality_color";

pub const UNIT_CONCENTRATION: &str = "microgram_per_meter_cubed";
pub const UNIT_COUNT: &str = "count";
pub const UNIT_EPOCH: &str = "unix_epoch";
pub const UNIT_AQI: &str = "aqi";
pub const UNIT_AQI_COLOR: &str = "aqi_color";

/// Archive `usUnits` codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum UnitSystem {
    Us,
    Metric,
    MetricWx,
}

impl UnitSystem {
    pub const ALL: [UnitSystem; 3] = [UnitSystem::Us, UnitSystem::Metric, UnitSystem::MetricWx];

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0x01 => Some(Self::Us),
            0x10 => Some(Self::Metric),
            0x11 => Some(Self::MetricWx),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Us => 0x01,
            Self::Metric => 0x10,
            Self::MetricWx => 0x11,
        }
    }
}

/// Observation → unit group → unit lookups, populated once at startup.
#[derive(Clone, Debug)]
pub struct UnitRegistry {
    obs_groups: HashMap<String, String>,
    group_units: HashMap<(UnitSystem, String), String>,
    labels: HashMap<String, String>,
    formats: HashMap<String, String>,
}

impl Default for UnitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitRegistry {
    /// Registry with the base groups the archive columns use.
    pub fn new() -> Self {
        let mut registry = Self {
            obs_groups: HashMap::new(),
            group_units: HashMap::new(),
            labels: HashMap::new(),
            formats: HashMap::new(),
        };
        registry.add_group(GROUP_CONCENTRATION, UNIT_CONCENTRATION, " µg/m³", "%.1f");
        registry.add_group(GROUP_COUNT, UNIT_COUNT, "", "%d");
        registry.add_group(GROUP_TIME, UNIT_EPOCH, "", "%d");
        for obs in ["pm1_0", "pm2_5", "pm10_0"] {
            registry.set_obs_group(obs, GROUP_CONCENTRATION);
        }
        registry.set_obs_group("dateTime", GROUP_TIME);
        registry
    }

    /// Same unit in every unit system.
    pub fn add_group(&mut self, group: &str, unit: &str, label: &str, format: &str) {
        for system in UnitSystem::ALL {
            self.group_units
                .insert((system, group.to_string()), unit.to_string());
        }
        self.labels.insert(unit.to_string(), label.to_string());
        self.formats.insert(unit.to_string(), format.to_string());
    }

    pub fn set_obs_group(&mut self, obs_type: &str, group: &str) {
        self.obs_groups
            .insert(obs_type.to_string(), group.to_string());
    }

    pub fn group_for(&self, obs_type: &str) -> Option<&str> {
        self.obs_groups.get(obs_type).map(String::as_str)
    }

    pub fn unit_for(&self, system: UnitSystem, group: &str) -> Option<&str> {
        self.group_units
            .get(&(system, group.to_string()))
            .map(String::as_str)
    }

    pub fn label(&self, unit: &str) -> Option<&str> {
        self.labels.get(unit).map(String::as_str)
    }

    pub fn format(&self, unit: &str) -> Option<&str> {
        self.formats.get(unit).map(String::as_str)
    }

    /// `(unit, group)` a value of `obs_type` is reported in; `count` aggregates are counts.
    pub fn standard_unit_type(
        &self,
        system: UnitSystem,
        obs_type: &str,
        aggregate: Option<AggregateKind>,
    ) -> Option<(String, String)> {
        if aggregate == Some(AggregateKind::Count) {
            return Some((UNIT_COUNT.to_string(), GROUP_COUNT.to_string()));
        }
        let group = self.group_for(obs_type)?;
        let unit = self.unit_for(system, group)?;
        Some((unit.to_string(), group.to_string()))
    }
}

const AQI_OBSERVATIONS: [&str; 5] = [
    "pm2_5_aqi",
    "pm2_5_1m_aqi",
    "pm2_5_nowcast_aqi",
    "pm2_5_lrapa_aqi",
    "pm2_5_unbc_aqi",
];

const AQI_COLOR_OBSERVATIONS: [&str; 5] = [
    "pm2_5_aqi_color",
    "pm2_5_1m_aqi_color",
    "pm2_5_nowcast_aqi_color",
    "pm2_5_lrapa_aqi_color",
    "pm2_5_unbc_aqi_color",
];

const CONCENTRATION_OBSERVATIONS: [&str; 7] = [
    "pm1_0_1m",
    "pm2_5_1m",
    "pm10_0_1m",
    "pm2_5_nowcast",
    "pm10_0_nowcast",
    "pm2_5_lrapa",
    "pm2_5_unbc",
];

pub fn register_air_quality_units(registry: &mut UnitRegistry) {
    registry.add_group(GROUP_AQI, UNIT_AQI, " AQI", "%d");
    registry.add_group(GROUP_AQI_COLOR, UNIT_AQI_COLOR, " RGB", "%d");

    for obs in AQI_OBSERVATIONS {
        registry.set_obs_group(obs, GROUP_AQI);
    }
    for obs in AQI_COLOR_OBSERVATIONS {
        registry.set_obs_group(obs, GROUP_AQI_COLOR);
    }
    for obs in CONCENTRATION_OBSERVATIONS {
        registry.set_obs_group(obs, GROUP_CONCENTRATION);
    }
    tracing::debug!("registered air quality unit groups");
}
