//! U.S. EPA PM2.5 air quality index and the regional sensor corrections.
//!
//! ```text
//!  AQI Category    AQI Value  24-hr PM2.5
//!  Good              0 -  50    0.0 -  12.0
//!  Moderate         51 - 100   12.1 -  35.4
//!  USG             101 - 150   35.5 -  55.4
//!  Unhealthy       151 - 200   55.5 - 150.4
//!  Very Unhealthy  201 - 300  150.5 - 250.4
//!  Hazardous       301 - 400  250.5 - 350.4
//!  Hazardous       401 - 500  350.5 - 500.4
//! ```
//!
//! Callers holding optional readings propagate absence with `Option::map`.

pub const COLOR_GREEN: u32 = 128 << 8;
pub const COLOR_YELLOW: u32 = (255 << 16) + (255 << 8);
pub const COLOR_ORANGE: u32 = (255 << 16) + (140 << 8);
pub const COLOR_RED: u32 = 255 << 16;
pub const COLOR_PURPLE: u32 = (128 << 16) + 128;
pub const COLOR_MAROON: u32 = 128 << 16;

struct Segment {
    c_low: f64,
    c_high: f64,
    i_low: f64,
    i_high: f64,
}

// Upper bounds are inclusive. The last segment extrapolates past 500.4.
const SEGMENTS: [Segment; 7] = [
    Segment { c_low: 0.0, c_high: 12.0, i_low: 0.0, i_high: 50.0 },
    Segment { c_low: 12.1, c_high: 35.4, i_low: 51.0, i_high: 100.0 },
    Segment { c_low: 35.5, c_high: 55.4, i_low: 101.0, i_high: 150.0 },
    Segment { c_low: 55.5, c_high: 150.4, i_low: 151.0, i_high: 200.0 },
    Segment { c_low: 150.5, c_high: 250.4, i_low: 201.0, i_high: 300.0 },
    Segment { c_low: 250.5, c_high: 350.4, i_low: 301.0, i_high: 400.0 },
    Segment { c_low: 350.5, c_high: 500.4, i_low: 401.0, i_high: 500.0 },
];

/// EPA AQI for a PM2.5 concentration in µg/m³.
///
/// The concentration is truncated (not rounded) to one decimal place first,
/// as the EPA technical assistance document requires.
pub fn pm2_5_aqi(pm2_5: f64) -> f64 {
    let x = (pm2_5 * 10.0).trunc() / 10.0;
    let last = &SEGMENTS[SEGMENTS.len() - 1];
    let segment = SEGMENTS
        .iter()
        .find(|segment| x <= segment.c_high)
        .unwrap_or(last);
    (x - segment.c_low) / (segment.c_high - segment.c_low) * (segment.i_high - segment.i_low)
        + segment.i_low
}

/// Packed 0xRRGGBB color for an AQI value. Boundaries belong to the lower category.
pub fn aqi_color(aqi: f64) -> u32 {
    if aqi <= 50.0 {
        COLOR_GREEN
    } else if aqi <= 100.0 {
        COLOR_YELLOW
    } else if aqi <= 150.0 {
        COLOR_ORANGE
    } else if aqi <= 200.0 {
        COLOR_RED
    } else if aqi <= 300.0 {
        COLOR_PURPLE
    } else {
        COLOR_MAROON
    }
}

/// Lane Regional Air Protection Agency correction for PurpleAir-class sensors.
pub fn lrapa_correction(pm2_5: f64) -> f64 {
    (pm2_5 / 2.0 - 0.66).max(0.0)
}

/// University of Northern British Columbia piecewise correction.
pub fn unbc_correction(pm2_5: f64) -> f64 {
    if pm2_5 <= 0.0 {
        0.0
    } else if pm2_5 <= 20.0 {
        0.6 * pm2_5 + 3.4
    } else if pm2_5 <= 200.0 {
        0.6 * pm2_5 + 2.5
    } else {
        1.6 * pm2_5 - 194.0
    }
}

/// US EPA nationwide correction: `0.541*PA_cf1 - 0.0618*RH + 0.00534*T + 3.634`, floored at 0.
pub fn epa_us_correction(pm_cf1: f64, humidity: f64, temp: f64) -> f64 {
    (0.541 * pm_cf1 - 0.0618 * humidity + 0.00534 * temp + 3.634).max(0.0)
}
