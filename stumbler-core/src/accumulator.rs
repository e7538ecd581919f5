//! Latest-observation maps, one per emitter category.
//!
//! Every batch overwrites earlier sightings of the same emitter, so a flush
//! sees at most one observation per key.

use std::collections::HashMap;

use crate::emitter::{BluetoothBeacon, CellTower, Emitter, Observation, WifiAccessPoint};

/// `unique_key -> latest observation`.
#[derive(Debug, Clone)]
pub struct EmitterAccumulator<E> {
    entries: HashMap<String, Observation<E>>,
}

impl<E> Default for EmitterAccumulator<E> {
    fn default() -> Self {
        EmitterAccumulator {
            entries: HashMap::new(),
        }
    }
}

impl<E: Emitter> EmitterAccumulator<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write per key wins.
    pub fn record(&mut self, observation: Observation<E>) {
        self.entries
            .insert(observation.emitter.unique_key(), observation);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take every entry, leaving the accumulator empty.
    pub fn take(&mut self) -> Vec<Observation<E>> {
        self.entries.drain().map(|(_, obs)| obs).collect()
    }
}

/// Contents of all three accumulators at one flush.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub wifi: Vec<Observation<WifiAccessPoint>>,
    pub cells: Vec<Observation<CellTower>>,
    pub bluetooth: Vec<Observation<BluetoothBeacon>>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.wifi.is_empty() && self.cells.is_empty() && self.bluetooth.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Accumulators {
    pub wifi: EmitterAccumulator<WifiAccessPoint>,
    pub cells: EmitterAccumulator<CellTower>,
    pub bluetooth: EmitterAccumulator<BluetoothBeacon>,

    // Counters
    pub hidden_dropped: u64,
    pub unidentifiable_dropped: u64,
}

impl Accumulators {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hidden and opted-out networks are dropped here and never reach a report.
    pub fn record_wifi<I>(&mut self, batch: I)
    where
        I: IntoIterator<Item = Observation<WifiAccessPoint>>,
    {
        for obs in batch {
            if obs.emitter.is_hidden() {
                self.hidden_dropped += 1;
                continue;
            }
            self.wifi.record(obs);
        }
    }

    pub fn record_cells<I>(&mut self, batch: I)
    where
        I: IntoIterator<Item = Observation<CellTower>>,
    {
        for obs in batch {
            if !obs.emitter.is_identifiable() {
                self.unidentifiable_dropped += 1;
                continue;
            }
            self.cells.record(obs);
        }
    }

    pub fn record_bluetooth<I>(&mut self, batch: I)
    where
        I: IntoIterator<Item = Observation<BluetoothBeacon>>,
    {
        for obs in batch {
            self.bluetooth.record(obs);
        }
    }

    /// Take all three categories at once.
    pub fn snapshot_and_clear(&mut self) -> Snapshot {
        Snapshot {
            wifi: self.wifi.take(),
            cells: self.cells.take(),
            bluetooth: self.bluetooth.take(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
