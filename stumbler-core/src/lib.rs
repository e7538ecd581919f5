//! stumbler-core: beacon decoding and report assembly for wireless stumbling.
//!
//! No async, no I/O beyond the config file. The beacon decoder turns raw BLE
//! advertisements into typed identifiers; the aggregator correlates emitter
//! observations with position fixes into reports. `stumbler-agent` drives
//! both from live or replayed sources.

pub mod accumulator;
pub mod aggregator;
pub mod beacon;
pub mod config;
pub mod emitter;
pub mod identifier;
pub mod layout;
pub mod pdu;
pub mod position;
pub mod report;
pub mod types;

// Re-export commonly used types at crate root
pub use aggregator::{Aggregator, AggregatorConfig, MovementGate, MovementState, Transition};
pub use beacon::{decode, decode_first, BeaconData};
pub use emitter::{BluetoothBeacon, CellTower, Emitter, Observation, RadioType, WifiAccessPoint};
pub use identifier::{bytes_to_identifier, Identifier};
pub use layout::{default_layouts, parse_layouts, BeaconLayout};
pub use pdu::{split_pdus, Pdu};
pub use position::{AirPressureReading, Position, PositionSource};
pub use report::{assemble_reports, AssemblyConfig, ReportData};
pub use types::*;
