//! Offline beacon decoding for the `decode` command.
//!
//! Input lines are `hex` or `mac;hex`. Blank lines and `#` comments are
//! skipped. Lines that are not UTF-8 or whose hex does not parse count as
//! invalid.

use std::collections::BTreeMap;
use std::io::{BufRead, ErrorKind};

use comfy_table::{Cell, Table};
use tracing::warn;

use stumbler_core::types::hex_decode;
use stumbler_core::{decode_first, BeaconData, BeaconLayout, MacAddress};

/// One decoded advertisement.
#[derive(Debug, Clone)]
pub struct DecodedLine {
    pub line: usize,
    pub mac: Option<MacAddress>,
    pub layout: String,
    pub data: BeaconData,
}

/// All sightings of one beacon identity.
#[derive(Debug, Clone)]
pub struct BeaconRow {
    pub beacon_type: u64,
    pub identifiers: Vec<String>,
    pub data_fields: Vec<u64>,
    pub last_mac: Option<MacAddress>,
    pub count: u32,
}

#[derive(Debug, Default)]
pub struct DecodeSummary {
    pub total_lines: u64,
    pub invalid_lines: u64,
    pub decoded: Vec<DecodedLine>,
}

impl DecodeSummary {
    /// Group decoded lines by beacon type and identifiers.
    pub fn beacons(&self) -> Vec<BeaconRow> {
        let mut rows: BTreeMap<(u64, Vec<String>), BeaconRow> = BTreeMap::new();
        for d in &self.decoded {
            let identifiers: Vec<String> =
                d.data.identifiers.iter().map(|id| id.to_string()).collect();
            let row = rows
                .entry((d.data.beacon_type, identifiers.clone()))
                .or_insert_with(|| BeaconRow {
                    beacon_type: d.data.beacon_type,
                    identifiers,
                    data_fields: Vec::new(),
                    last_mac: None,
                    count: 0,
                });
            row.count += 1;
            row.data_fields = d.data.data_fields.clone();
            if d.mac.is_some() {
                row.last_mac = d.mac;
            }
        }
        rows.into_values().collect()
    }
}

/// Decode every advertisement line of `reader` with `layouts`.
pub fn decode_lines<R: BufRead>(reader: R, layouts: &[BeaconLayout]) -> DecodeSummary {
    let mut summary = DecodeSummary::default();

    for (index, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(l) => l,
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                summary.total_lines += 1;
                summary.invalid_lines += 1;
                continue;
            }
            Err(e) => {
                warn!(line = index + 1, error = %e, "read failed, stopping");
                break;
            }
        };
        let text = line.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        summary.total_lines += 1;

        let (mac, hex) = match text.split_once(';') {
            Some((m, h)) => (m.trim().parse::<MacAddress>().ok(), h.trim()),
            None => (None, text),
        };
        let Some(bytes) = hex_decode(hex) else {
            summary.invalid_lines += 1;
            continue;
        };

        if let Some((layout, data)) = decode_first(layouts, &bytes) {
            summary.decoded.push(DecodedLine {
                line: index + 1,
                mac,
                layout: layout.as_str().to_string(),
                data,
            });
        }
    }

    summary
}

pub fn beacon_table(rows: &[BeaconRow]) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Type", "Id1", "Id2", "Id3", "Data", "MAC", "Seen"]);
    for row in rows {
        let id = |i: usize| row.identifiers.get(i).map(String::as_str).unwrap_or("-");
        let data = if row.data_fields.is_empty() {
            "-".to_string()
        } else {
            row.data_fields
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(",")
        };
        table.add_row(vec![
            Cell::new(format!("0x{:04x}", row.beacon_type)),
            Cell::new(id(0)),
            Cell::new(id(1)),
            Cell::new(id(2)),
            Cell::new(data),
            Cell::new(
                row.last_mac
                    .map(|m| m.to_string())
                    .unwrap_or("-".into()),
            ),
            Cell::new(row.count),
        ]);
    }
    table
}
