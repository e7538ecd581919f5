//! Position fixes: admission filter, air-pressure attachment and the rolling
//! buffer of fixes waiting for the next report window.

use serde::{Deserialize, Serialize};
use tracing::debug;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const DEFAULT_MAX_ACCURACY_M: f64 = 200.0;
pub const DEFAULT_DUPLICATE_INTERVAL_MS: i64 = 10_000;
pub const DEFAULT_DUPLICATE_DISTANCE_M: f64 = 30.0;
pub const DEFAULT_PRESSURE_MAX_AGE_MS: i64 = 2_000;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSource {
    Gps,
    Network,
    Fused,
}

/// A location fix. `timestamp` is device monotonic time in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    /// Air pressure in hPa, attached from the barometer stream.
    #[serde(default)]
    pub pressure: Option<f64>,
    pub timestamp: i64,
    #[serde(default = "default_source")]
    pub source: PositionSource,
}

fn default_source() -> PositionSource {
    PositionSource::Gps
}

impl Position {
    pub fn new(latitude: f64, longitude: f64, timestamp: i64) -> Self {
        Position {
            latitude,
            longitude,
            accuracy: None,
            altitude: None,
            heading: None,
            speed: None,
            pressure: None,
            timestamp,
            source: PositionSource::Gps,
        }
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    /// Great-circle distance to `other` in meters.
    pub fn distance_m(&self, other: &Position) -> f64 {
        haversine_m(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AirPressureReading {
    /// hPa
    pub value: f64,
    pub timestamp: i64,
}

/// Great-circle distance in meters.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    EARTH_RADIUS_M * 2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}

// ---------------------------------------------------------------------------
// Admission filter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// Accuracy missing or worse than the maximum.
    Inaccurate,
    /// Too close in both time and space to the previous admitted fix.
    Duplicate,
}

/// Decides which fixes are worth buffering.
#[derive(Debug, Clone)]
pub struct PositionFilter {
    pub max_accuracy_m: f64,
    pub duplicate_interval_ms: i64,
    pub duplicate_distance_m: f64,
    last_admitted: Option<Position>,
}

impl Default for PositionFilter {
    fn default() -> Self {
        PositionFilter::new(
            DEFAULT_MAX_ACCURACY_M,
            DEFAULT_DUPLICATE_INTERVAL_MS,
            DEFAULT_DUPLICATE_DISTANCE_M,
        )
    }
}

impl PositionFilter {
    pub fn new(max_accuracy_m: f64, duplicate_interval_ms: i64, duplicate_distance_m: f64) -> Self {
        PositionFilter {
            max_accuracy_m,
            duplicate_interval_ms,
            duplicate_distance_m,
            last_admitted: None,
        }
    }

    /// Check a fix and remember it when accepted.
    ///
    /// A fix is a duplicate only when it is both within the interval and
    /// within the distance of the last admitted one.
    pub fn admit(&mut self, position: &Position) -> Admission {
        match position.accuracy {
            Some(acc) if acc <= self.max_accuracy_m => {}
            _ => {
                debug!(accuracy = ?position.accuracy, "position rejected: inaccurate");
                return Admission::Inaccurate;
            }
        }

        if let Some(last) = &self.last_admitted {
            let dt = (position.timestamp - last.timestamp).abs();
            let distance = position.distance_m(last);
            if dt <= self.duplicate_interval_ms && distance <= self.duplicate_distance_m {
                debug!(dt_ms = dt, distance_m = distance, "position rejected: duplicate");
                return Admission::Duplicate;
            }
        }

        self.last_admitted = Some(position.clone());
        Admission::Accepted
    }
}

// ---------------------------------------------------------------------------
// Air pressure
// ---------------------------------------------------------------------------

/// Keeps the latest barometer reading and attaches it to fixes taken close
/// enough in time.
#[derive(Debug, Clone)]
pub struct PressureTracker {
    pub max_age_ms: i64,
    latest: Option<AirPressureReading>,
}

impl Default for PressureTracker {
    fn default() -> Self {
        PressureTracker::new(DEFAULT_PRESSURE_MAX_AGE_MS)
    }
}

impl PressureTracker {
    pub fn new(max_age_ms: i64) -> Self {
        PressureTracker {
            max_age_ms,
            latest: None,
        }
    }

    pub fn record(&mut self, reading: AirPressureReading) {
        self.latest = Some(reading);
    }

    /// Set `position.pressure` unless the fix already carries one or the
    /// latest reading is too far from it.
    pub fn attach(&self, position: &mut Position) {
        if position.pressure.is_some() {
            return;
        }
        if let Some(reading) = self.latest {
            if (position.timestamp - reading.timestamp).abs() <= self.max_age_ms {
                position.pressure = Some(reading.value);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Buffer
// ---------------------------------------------------------------------------

/// Admitted fixes of the current window.
#[derive(Debug, Clone, Default)]
pub struct PositionBuffer {
    positions: Vec<Position>,
}

impl PositionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, position: Position) {
        self.positions.push(position);
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Timestamp of the oldest buffered fix.
    pub fn first_timestamp(&self) -> Option<i64> {
        self.positions.iter().map(|p| p.timestamp).min()
    }

    /// Take all buffered fixes, oldest first.
    pub fn drain(&mut self) -> Vec<Position> {
        let mut positions = std::mem::take(&mut self.positions);
        positions.sort_by_key(|p| p.timestamp);
        positions
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
