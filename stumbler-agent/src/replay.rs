//! Replay a recorded observation log through the aggregator.
//!
//! The log is NDJSON, one event per line, tagged by `kind`:
//!
//! ```text
//! {"kind":"moving","value":true}
//! {"kind":"position","latitude":60.17,"longitude":24.94,"accuracy":8.0,"timestamp":0}
//! {"kind":"pressure","value":1009.8,"timestamp":0}
//! {"kind":"wifi","observations":[{"emitter":{"mac_address":"aa:bb:cc:dd:ee:01","ssid":"x"},"timestamp":0}]}
//! {"kind":"cell","observations":[...]}
//! {"kind":"bluetooth","observations":[{"mac_address":"..","advertisement":"1bff1801beac..","timestamp":0}]}
//! ```
//!
//! Windows follow data time instead of the wall clock: a position more than
//! one window after the oldest buffered fix closes the window first.

use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use stumbler_core::types::hex_decode;
use stumbler_core::{
    Aggregator, AggregatorConfig, AirPressureReading, BeaconLayout, BluetoothBeacon, CellTower,
    MacAddress, MovementGate, Observation, Position, Transition, WifiAccessPoint,
};

use crate::error::AgentError;
use crate::sink::ReportSink;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplayEvent {
    Moving {
        value: bool,
    },
    Position(Position),
    Pressure(AirPressureReading),
    Wifi {
        observations: Vec<Observation<WifiAccessPoint>>,
    },
    Cell {
        observations: Vec<Observation<CellTower>>,
    },
    Bluetooth {
        observations: Vec<RawAdvertisement>,
    },
}

/// A Bluetooth scan result before beacon decoding.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAdvertisement {
    pub mac_address: MacAddress,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub signal_strength: Option<i32>,
    /// Advertisement bytes as hex.
    pub advertisement: String,
    pub timestamp: i64,
}

impl RawAdvertisement {
    pub fn decode(self, layouts: &[BeaconLayout]) -> Option<Observation<BluetoothBeacon>> {
        let bytes = hex_decode(&self.advertisement)?;
        let beacon = BluetoothBeacon::from_advertisement(
            self.mac_address,
            self.name,
            self.signal_strength,
            &bytes,
            layouts,
        );
        Some(Observation::new(beacon, self.timestamp))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub lines: u64,
    pub events: u64,
    pub skipped_lines: u64,
    /// Events that arrived while the device was idle.
    pub ignored_events: u64,
    pub reports: u64,
    pub hidden_networks_dropped: u64,
    pub unidentifiable_cells_dropped: u64,
}

pub struct Replayer {
    aggregator: Aggregator,
    gate: MovementGate,
    layouts: Vec<BeaconLayout>,
    flush_remaining: bool,
    summary: ReplaySummary,
}

impl Replayer {
    pub fn new(config: AggregatorConfig, layouts: Vec<BeaconLayout>) -> Self {
        Replayer {
            aggregator: Aggregator::new(config),
            gate: MovementGate::new(),
            layouts,
            flush_remaining: false,
            summary: ReplaySummary::default(),
        }
    }

    /// Flush the last, partial window when the log ends.
    pub fn flush_remaining(mut self, flush: bool) -> Self {
        self.flush_remaining = flush;
        self
    }

    /// Feed every line of `reader` through the aggregator, persisting
    /// reports as windows close. Sink errors abort the replay.
    pub async fn run<R>(
        mut self,
        reader: R,
        sink: &dyn ReportSink,
    ) -> Result<ReplaySummary, AgentError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            self.summary.lines += 1;
            let text = line.trim();
            if text.is_empty() || text.starts_with('#') {
                continue;
            }
            let event: ReplayEvent = match serde_json::from_str(text) {
                Ok(event) => event,
                Err(e) => {
                    warn!(line = self.summary.lines, error = %e, "skipping malformed event");
                    self.summary.skipped_lines += 1;
                    continue;
                }
            };
            self.summary.events += 1;
            self.apply(event, sink).await?;
        }

        if self.flush_remaining {
            self.flush(sink).await?;
        } else if self.aggregator.buffered_positions() > 0 {
            debug!(
                positions = self.aggregator.buffered_positions(),
                "partial window dropped"
            );
        }

        self.summary.hidden_networks_dropped = self.aggregator.hidden_networks_dropped();
        self.summary.unidentifiable_cells_dropped = self.aggregator.unidentifiable_cells_dropped();

        info!(
            events = self.summary.events,
            reports = self.summary.reports,
            "replay complete"
        );
        Ok(self.summary)
    }

    async fn apply(&mut self, event: ReplayEvent, sink: &dyn ReportSink) -> Result<(), AgentError> {
        if let ReplayEvent::Moving { value } = event {
            match self.gate.observe(value) {
                Some(Transition::Start) => info!("movement started"),
                Some(Transition::Stop) => info!("movement stopped"),
                None => {}
            }
            return Ok(());
        }
        if !self.gate.is_moving() {
            self.summary.ignored_events += 1;
            return Ok(());
        }

        match event {
            ReplayEvent::Moving { .. } => {}
            ReplayEvent::Position(position) => {
                if self.aggregator.window_elapsed(position.timestamp) {
                    self.flush(sink).await?;
                }
                self.aggregator.record_position(position);
            }
            ReplayEvent::Pressure(reading) => self.aggregator.record_pressure(reading),
            ReplayEvent::Wifi { observations } => self.aggregator.record_wifi(observations),
            ReplayEvent::Cell { observations } => self.aggregator.record_cells(observations),
            ReplayEvent::Bluetooth { observations } => {
                let beacons = observations
                    .into_iter()
                    .filter_map(|raw| {
                        let mac = raw.mac_address;
                        let decoded = raw.decode(&self.layouts);
                        if decoded.is_none() {
                            warn!(%mac, "skipping advertisement with invalid hex");
                        }
                        decoded
                    })
                    .collect();
                self.aggregator.record_bluetooth(beacons);
            }
        }
        Ok(())
    }

    async fn flush(&mut self, sink: &dyn ReportSink) -> Result<(), AgentError> {
        for report in self.aggregator.flush() {
            sink.persist(report).await?;
            self.summary.reports += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ChannelSink;
    use stumbler_core::default_layouts;

    const LOG: &str = r#"
# a short walk
{"kind":"wifi","observations":[{"emitter":{"mac_address":"02:00:00:00:00:09","ssid":"early"},"timestamp":0}]}
{"kind":"moving","value":true}
{"kind":"pressure","value":1009.5,"timestamp":0}
{"kind":"position","latitude":60.17,"longitude":24.94,"accuracy":8.0,"timestamp":0}
{"kind":"wifi","observations":[{"emitter":{"mac_address":"02:00:00:00:00:01","ssid":"a"},"timestamp":2000},{"emitter":{"mac_address":"02:00:00:00:00:02","ssid":"b"},"timestamp":2100}]}
{"kind":"bluetooth","observations":[{"mac_address":"c0:00:00:00:00:01","advertisement":"1bff1801beac111111111111111111111111111111110001000ac500","timestamp":2500}]}
not json
{"kind":"position","latitude":60.18,"longitude":24.94,"accuracy":8.0,"timestamp":12000}
{"kind":"cell","observations":[{"emitter":{"radio_type":"lte","mobile_country_code":244,"mobile_network_code":"91","cell_id":77},"timestamp":12500}]}
"#;

    async fn replay(flush_remaining: bool) -> (ReplaySummary, Vec<stumbler_core::ReportData>) {
        let (sink, mut rx) = ChannelSink::channel(16);
        let summary = Replayer::new(AggregatorConfig::default(), default_layouts())
            .flush_remaining(flush_remaining)
            .run(LOG.as_bytes(), &sink)
            .await
            .unwrap();
        drop(sink);
        let mut reports = Vec::new();
        while let Some(report) = rx.recv().await {
            reports.push(report);
        }
        (summary, reports)
    }

    #[tokio::test]
    async fn test_replay_closes_windows_on_data_time() {
        let (summary, reports) = replay(false).await;
        assert_eq!(summary.skipped_lines, 1);
        assert_eq!(summary.ignored_events, 1);
        assert_eq!(summary.reports, 1);
        assert_eq!(reports.len(), 1);

        let report = &reports[0];
        assert_eq!(report.position.timestamp, 0);
        assert_eq!(report.position.pressure, Some(1009.5));
        assert_eq!(report.wifi_access_points.len(), 2);
        assert_eq!(report.bluetooth_beacons.len(), 1);
        let beacon = &report.bluetooth_beacons[0].emitter;
        assert_eq!(beacon.beacon_type, Some(0xBEAC));
        assert_eq!(beacon.id2.as_deref(), Some("1"));
        assert_eq!(beacon.id3.as_deref(), Some("10"));
    }

    #[tokio::test]
    async fn test_replay_flush_remaining() {
        let (summary, reports) = replay(true).await;
        assert_eq!(summary.reports, 2);
        assert_eq!(reports[1].position.timestamp, 12_000);
        assert_eq!(reports[1].cell_towers.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_does_not_flush() {
        let log = r#"{"kind":"moving","value":true}
{"kind":"position","latitude":1.0,"longitude":1.0,"accuracy":5.0,"timestamp":0}
{"kind":"cell","observations":[{"emitter":{"radio_type":"gsm","mobile_country_code":1,"mobile_network_code":"01","cell_id":1},"timestamp":0}]}
{"kind":"moving","value":false}
{"kind":"position","latitude":2.0,"longitude":2.0,"accuracy":5.0,"timestamp":50000}
"#;
        let (sink, mut rx) = ChannelSink::channel(4);
        let summary = Replayer::new(AggregatorConfig::default(), default_layouts())
            .run(log.as_bytes(), &sink)
            .await
            .unwrap();
        assert_eq!(summary.reports, 0);
        assert_eq!(summary.ignored_events, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_summary_counts_dropped_emitters() {
        let log = r#"{"kind":"moving","value":true}
{"kind":"wifi","observations":[{"emitter":{"mac_address":"02:00:00:00:00:01","ssid":"cafe_nomap"},"timestamp":0},{"emitter":{"mac_address":"02:00:00:00:00:02","ssid":""},"timestamp":0},{"emitter":{"mac_address":"02:00:00:00:00:03","ssid":"home"},"timestamp":0}]}
{"kind":"cell","observations":[{"emitter":{"radio_type":"lte","mobile_country_code":244},"timestamp":0}]}
"#;
        let (sink, _rx) = ChannelSink::channel(4);
        let summary = Replayer::new(AggregatorConfig::default(), default_layouts())
            .run(log.as_bytes(), &sink)
            .await
            .unwrap();
        assert_eq!(summary.hidden_networks_dropped, 2);
        assert_eq!(summary.unidentifiable_cells_dropped, 1);
    }

    #[test]
    fn test_invalid_advertisement_hex() {
        let raw = RawAdvertisement {
            mac_address: "c0:00:00:00:00:01".parse().unwrap(),
            name: None,
            signal_strength: None,
            advertisement: "zz".into(),
            timestamp: 0,
        };
        assert!(raw.decode(&default_layouts()).is_none());
    }
}
