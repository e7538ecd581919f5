//! Join a flushed window of positions with the emitters seen around them.
//!
//! Each emitter is attributed to the buffered position nearest in time,
//! then stale attributions are dropped and one report is built per position.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::accumulator::Snapshot;
use crate::emitter::{BluetoothBeacon, CellTower, Emitter, Observation, WifiAccessPoint};
use crate::position::Position;

pub const DEFAULT_FRESHNESS_MS: i64 = 30_000;
pub const DEFAULT_MIN_WIFI_ACCESS_POINTS: usize = 2;

/// One position plus everything observed near it. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportData {
    pub position: Position,
    pub wifi_access_points: Vec<Observation<WifiAccessPoint>>,
    pub cell_towers: Vec<Observation<CellTower>>,
    pub bluetooth_beacons: Vec<Observation<BluetoothBeacon>>,
}

impl ReportData {
    pub fn is_empty(&self) -> bool {
        self.wifi_access_points.is_empty()
            && self.cell_towers.is_empty()
            && self.bluetooth_beacons.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblyConfig {
    /// Emitters further than this from their position (either direction) are dropped.
    pub freshness_ms: i64,
    /// A window with fewer Wi-Fi access points than this reports none of them.
    pub min_wifi_access_points: usize,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        AssemblyConfig {
            freshness_ms: DEFAULT_FRESHNESS_MS,
            min_wifi_access_points: DEFAULT_MIN_WIFI_ACCESS_POINTS,
        }
    }
}

/// Build the reports of one flush, in position timestamp order.
pub fn assemble_reports(
    mut positions: Vec<Position>,
    snapshot: Snapshot,
    config: &AssemblyConfig,
) -> Vec<ReportData> {
    if positions.is_empty() {
        return Vec::new();
    }
    positions.sort_by_key(|p| p.timestamp);

    let Snapshot {
        mut wifi,
        cells,
        bluetooth,
    } = snapshot;
    if wifi.len() < config.min_wifi_access_points {
        wifi.clear();
    }

    let mut wifi = group_by_position(&positions, wifi, config.freshness_ms);
    let mut cells = group_by_position(&positions, cells, config.freshness_ms);
    let mut bluetooth = group_by_position(&positions, bluetooth, config.freshness_ms);

    let keys: BTreeSet<usize> = wifi
        .keys()
        .chain(cells.keys())
        .chain(bluetooth.keys())
        .copied()
        .collect();

    keys.into_iter()
        .map(|index| ReportData {
            position: positions[index].clone(),
            wifi_access_points: wifi.remove(&index).unwrap_or_default(),
            cell_towers: cells.remove(&index).unwrap_or_default(),
            bluetooth_beacons: bluetooth.remove(&index).unwrap_or_default(),
        })
        .filter(|report| !report.is_empty())
        .collect()
}

/// Index of the position closest in time. Ties go to the earlier position.
/// `positions` must be sorted by timestamp.
pub fn nearest_position(positions: &[Position], timestamp: i64) -> Option<usize> {
    let mut best: Option<(usize, i64)> = None;
    for (index, position) in positions.iter().enumerate() {
        let dt = (position.timestamp - timestamp).abs();
        match best {
            Some((_, best_dt)) if dt >= best_dt => {}
            _ => best = Some((index, dt)),
        }
    }
    best.map(|(index, _)| index)
}

fn group_by_position<E: Emitter>(
    positions: &[Position],
    observations: Vec<Observation<E>>,
    freshness_ms: i64,
) -> BTreeMap<usize, Vec<Observation<E>>> {
    let mut groups: BTreeMap<usize, Vec<Observation<E>>> = BTreeMap::new();
    for obs in observations {
        let Some(index) = nearest_position(positions, obs.timestamp) else {
            continue;
        };
        if obs.age_at(&positions[index]).abs() > freshness_ms {
            continue;
        }
        groups.entry(index).or_default().push(obs);
    }
    for group in groups.values_mut() {
        group.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.emitter.unique_key().cmp(&b.emitter.unique_key()))
        });
    }
    groups
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::RadioType;
    use crate::types::MacAddress;

    fn pos(timestamp: i64) -> Position {
        Position::new(60.17, 24.94, timestamp).with_accuracy(5.0)
    }

    fn ap(last: u8, timestamp: i64) -> Observation<WifiAccessPoint> {
        let mac = MacAddress([0x02, 0, 0, 0, 0, last]);
        Observation::new(WifiAccessPoint::new(mac, Some("net")), timestamp)
    }

    fn tower(cell_id: u64, timestamp: i64) -> Observation<CellTower> {
        Observation::new(
            CellTower {
                radio_type: RadioType::Wcdma,
                mobile_country_code: Some(310),
                mobile_network_code: Some("260".into()),
                location_area_code: Some(1),
                cell_id: Some(cell_id),
                primary_scrambling_code: None,
                signal_strength: None,
                asu: None,
                timing_advance: None,
                arfcn: None,
            },
            timestamp,
        )
    }

    fn snapshot(
        wifi: Vec<Observation<WifiAccessPoint>>,
        cells: Vec<Observation<CellTower>>,
    ) -> Snapshot {
        Snapshot {
            wifi,
            cells,
            bluetooth: Vec::new(),
        }
    }

    #[test]
    fn test_end_to_end_nearest_position() {
        let reports = assemble_reports(
            vec![pos(0), pos(5_000)],
            snapshot(vec![ap(1, 2_000), ap(2, 2_100)], Vec::new()),
            &AssemblyConfig::default(),
        );
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].position.timestamp, 0);
        assert_eq!(reports[0].wifi_access_points.len(), 2);
        assert_eq!(reports[0].wifi_access_points[0].timestamp, 2_000);
    }

    #[test]
    fn test_single_wifi_discarded() {
        let reports = assemble_reports(
            vec![pos(0)],
            snapshot(vec![ap(1, 0)], Vec::new()),
            &AssemblyConfig::default(),
        );
        assert!(reports.is_empty());
    }

    #[test]
    fn test_two_wifi_kept() {
        let reports = assemble_reports(
            vec![pos(0)],
            snapshot(vec![ap(1, 0), ap(2, 0)], Vec::new()),
            &AssemblyConfig::default(),
        );
        assert_eq!(reports.len(), 1);
    }

    #[test]
    fn test_wifi_minimum_leaves_cells() {
        let reports = assemble_reports(
            vec![pos(0)],
            snapshot(vec![ap(1, 0)], vec![tower(7, 0)]),
            &AssemblyConfig::default(),
        );
        assert_eq!(reports.len(), 1);
        assert!(reports[0].wifi_access_points.is_empty());
        assert_eq!(reports[0].cell_towers.len(), 1);
    }

    #[test]
    fn test_freshness_threshold() {
        let reports = assemble_reports(
            vec![pos(40_000)],
            snapshot(Vec::new(), vec![tower(1, 9_000), tower(2, 11_000)]),
            &AssemblyConfig::default(),
        );
        assert_eq!(reports.len(), 1);
        let towers = &reports[0].cell_towers;
        assert_eq!(towers.len(), 1);
        assert_eq!(towers[0].emitter.cell_id, Some(2));
    }

    #[test]
    fn test_freshness_applies_after_fix() {
        let reports = assemble_reports(
            vec![pos(0)],
            snapshot(Vec::new(), vec![tower(1, 29_000), tower(2, 31_000)]),
            &AssemblyConfig::default(),
        );
        assert_eq!(reports[0].cell_towers.len(), 1);
        assert_eq!(reports[0].cell_towers[0].emitter.cell_id, Some(1));
    }

    #[test]
    fn test_reports_ordered_by_position() {
        let reports = assemble_reports(
            vec![pos(20_000), pos(0), pos(10_000)],
            snapshot(Vec::new(), vec![tower(1, 19_000), tower(2, 1_000), tower(3, 9_000)]),
            &AssemblyConfig::default(),
        );
        let times: Vec<i64> = reports.iter().map(|r| r.position.timestamp).collect();
        assert_eq!(times, vec![0, 10_000, 20_000]);
        assert_eq!(reports[1].cell_towers[0].emitter.cell_id, Some(3));
    }

    #[test]
    fn test_positions_without_emitters_produce_nothing() {
        let reports = assemble_reports(
            vec![pos(0), pos(10_000)],
            snapshot(Vec::new(), vec![tower(1, 500)]),
            &AssemblyConfig::default(),
        );
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].position.timestamp, 0);
    }

    #[test]
    fn test_nearest_tie_goes_to_earlier() {
        let positions = vec![pos(0), pos(1_000)];
        assert_eq!(nearest_position(&positions, 500), Some(0));
        assert_eq!(nearest_position(&positions, 501), Some(1));
        assert_eq!(nearest_position(&[], 0), None);
    }

    #[test]
    fn test_group_sorted_by_time_then_key() {
        let reports = assemble_reports(
            vec![pos(0)],
            snapshot(vec![ap(9, 100), ap(3, 100), ap(1, 200)], Vec::new()),
            &AssemblyConfig::default(),
        );
        let macs: Vec<u8> = reports[0]
            .wifi_access_points
            .iter()
            .map(|o| o.emitter.mac_address.0[5])
            .collect();
        assert_eq!(macs, vec![3, 9, 1]);
    }
}
