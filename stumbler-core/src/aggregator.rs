//! Per-session aggregation state machine.
//!
//! Pure logic, no clock and no I/O: callers feed observation batches and
//! fixes, and decide when a window has elapsed. The agent drives it from a
//! timer; the replay command drives it from data timestamps.

use tracing::{debug, info};

use crate::accumulator::Accumulators;
use crate::emitter::{BluetoothBeacon, CellTower, Observation, WifiAccessPoint};
use crate::position::{
    Admission, AirPressureReading, Position, PositionBuffer, PositionFilter, PressureTracker,
    DEFAULT_DUPLICATE_DISTANCE_M, DEFAULT_DUPLICATE_INTERVAL_MS, DEFAULT_MAX_ACCURACY_M,
    DEFAULT_PRESSURE_MAX_AGE_MS,
};
use crate::report::{assemble_reports, AssemblyConfig, ReportData};

pub const DEFAULT_WINDOW_MS: i64 = 10_000;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregatorConfig {
    pub window_ms: i64,
    pub assembly: AssemblyConfig,
    pub max_accuracy_m: f64,
    pub duplicate_interval_ms: i64,
    pub duplicate_distance_m: f64,
    pub pressure_max_age_ms: i64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        AggregatorConfig {
            window_ms: DEFAULT_WINDOW_MS,
            assembly: AssemblyConfig::default(),
            max_accuracy_m: DEFAULT_MAX_ACCURACY_M,
            duplicate_interval_ms: DEFAULT_DUPLICATE_INTERVAL_MS,
            duplicate_distance_m: DEFAULT_DUPLICATE_DISTANCE_M,
            pressure_max_age_ms: DEFAULT_PRESSURE_MAX_AGE_MS,
        }
    }
}

// ---------------------------------------------------------------------------
// Movement
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementState {
    Idle,
    Moving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    Stop,
}

/// Turns a raw movement signal into state transitions. Repeated values are
/// ignored.
#[derive(Debug, Clone)]
pub struct MovementGate {
    state: MovementState,
}

impl Default for MovementGate {
    fn default() -> Self {
        MovementGate {
            state: MovementState::Idle,
        }
    }
}

impl MovementGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MovementState {
        self.state
    }

    pub fn is_moving(&self) -> bool {
        self.state == MovementState::Moving
    }

    pub fn observe(&mut self, moving: bool) -> Option<Transition> {
        match (self.state, moving) {
            (MovementState::Idle, true) => {
                self.state = MovementState::Moving;
                Some(Transition::Start)
            }
            (MovementState::Moving, false) => {
                self.state = MovementState::Idle;
                Some(Transition::Stop)
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Owns the accumulators and the position buffer of one scanning session.
pub struct Aggregator {
    pub config: AggregatorConfig,
    accumulators: Accumulators,
    filter: PositionFilter,
    pressure: PressureTracker,
    buffer: PositionBuffer,

    // Counters
    pub positions_received: u64,
    pub positions_admitted: u64,
    pub positions_rejected: u64,
    pub flushes: u64,
    pub reports_built: u64,
}

impl Default for Aggregator {
    fn default() -> Self {
        Aggregator::new(AggregatorConfig::default())
    }
}

impl Aggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Aggregator {
            config,
            accumulators: Accumulators::new(),
            filter: PositionFilter::new(
                config.max_accuracy_m,
                config.duplicate_interval_ms,
                config.duplicate_distance_m,
            ),
            pressure: PressureTracker::new(config.pressure_max_age_ms),
            buffer: PositionBuffer::new(),
            positions_received: 0,
            positions_admitted: 0,
            positions_rejected: 0,
            flushes: 0,
            reports_built: 0,
        }
    }

    pub fn record_wifi(&mut self, batch: Vec<Observation<WifiAccessPoint>>) {
        self.accumulators.record_wifi(batch);
    }

    pub fn record_cells(&mut self, batch: Vec<Observation<CellTower>>) {
        self.accumulators.record_cells(batch);
    }

    pub fn record_bluetooth(&mut self, batch: Vec<Observation<BluetoothBeacon>>) {
        self.accumulators.record_bluetooth(batch);
    }

    pub fn record_pressure(&mut self, reading: AirPressureReading) {
        self.pressure.record(reading);
    }

    /// Filter a fix and buffer it. Returns whether it was admitted.
    pub fn record_position(&mut self, mut position: Position) -> bool {
        self.positions_received += 1;
        if self.filter.admit(&position) != Admission::Accepted {
            self.positions_rejected += 1;
            return false;
        }
        self.pressure.attach(&mut position);
        self.positions_admitted += 1;
        self.buffer.push(position);
        true
    }

    /// Timestamp of the oldest buffered fix, which opens the current window.
    pub fn window_start(&self) -> Option<i64> {
        self.buffer.first_timestamp()
    }

    /// Whether a fix at `now` lies past the end of the current window.
    pub fn window_elapsed(&self, now: i64) -> bool {
        self.window_start()
            .is_some_and(|start| now - start >= self.config.window_ms)
    }

    pub fn buffered_positions(&self) -> usize {
        self.buffer.len()
    }

    /// Number of emitters waiting for the next flush.
    pub fn pending_emitters(&self) -> usize {
        self.accumulators.wifi.len()
            + self.accumulators.cells.len()
            + self.accumulators.bluetooth.len()
    }

    pub fn hidden_networks_dropped(&self) -> u64 {
        self.accumulators.hidden_dropped
    }

    pub fn unidentifiable_cells_dropped(&self) -> u64 {
        self.accumulators.unidentifiable_dropped
    }

    /// Close the window. With no buffered fix nothing happens and the
    /// accumulated emitters wait for the next window.
    pub fn flush(&mut self) -> Vec<ReportData> {
        if self.buffer.is_empty() {
            debug!(pending = self.pending_emitters(), "flush skipped: no positions");
            return Vec::new();
        }
        let positions = self.buffer.drain();
        let snapshot = self.accumulators.snapshot_and_clear();
        let position_count = positions.len();
        let reports = assemble_reports(positions, snapshot, &self.config.assembly);

        self.flushes += 1;
        self.reports_built += reports.len() as u64;
        info!(
            positions = position_count,
            reports = reports.len(),
            "window flushed"
        );
        reports
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
