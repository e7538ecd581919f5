//! Observation sources consumed by the assembler.
//!
//! Every call returns a fresh stream; calling again after the previous stream
//! was dropped is how a source gets resubscribed.

use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use stumbler_core::{
    AirPressureReading, BluetoothBeacon, CellTower, Observation, Position, WifiAccessPoint,
};

pub type Batch<E> = Vec<Observation<E>>;

pub trait ObservationSources: Send + Sync {
    fn positions(&self) -> BoxStream<'static, Position>;
    fn air_pressure(&self) -> BoxStream<'static, AirPressureReading>;
    fn cell_towers(&self) -> BoxStream<'static, Batch<CellTower>>;
    fn wifi_access_points(&self) -> BoxStream<'static, Batch<WifiAccessPoint>>;
    fn bluetooth_beacons(&self) -> BoxStream<'static, Batch<BluetoothBeacon>>;
}

// ---------------------------------------------------------------------------
// In-memory sources
// ---------------------------------------------------------------------------

/// Sources backed by broadcast channels. Publishing while nobody is
/// subscribed drops the item, like a scan result nobody listens to.
pub struct BroadcastSources {
    movement: broadcast::Sender<bool>,
    positions: broadcast::Sender<Position>,
    pressure: broadcast::Sender<AirPressureReading>,
    cells: broadcast::Sender<Batch<CellTower>>,
    wifi: broadcast::Sender<Batch<WifiAccessPoint>>,
    bluetooth: broadcast::Sender<Batch<BluetoothBeacon>>,
}

impl BroadcastSources {
    pub fn new(capacity: usize) -> Self {
        BroadcastSources {
            movement: broadcast::channel(capacity).0,
            positions: broadcast::channel(capacity).0,
            pressure: broadcast::channel(capacity).0,
            cells: broadcast::channel(capacity).0,
            wifi: broadcast::channel(capacity).0,
            bluetooth: broadcast::channel(capacity).0,
        }
    }

    /// Movement signal for the assembler.
    pub fn movement(&self) -> BoxStream<'static, bool> {
        subscribe(&self.movement, "movement")
    }

    pub fn publish_movement(&self, moving: bool) {
        let _ = self.movement.send(moving);
    }

    pub fn publish_position(&self, position: Position) {
        let _ = self.positions.send(position);
    }

    pub fn publish_pressure(&self, reading: AirPressureReading) {
        let _ = self.pressure.send(reading);
    }

    pub fn publish_cells(&self, batch: Batch<CellTower>) {
        let _ = self.cells.send(batch);
    }

    pub fn publish_wifi(&self, batch: Batch<WifiAccessPoint>) {
        let _ = self.wifi.send(batch);
    }

    pub fn publish_bluetooth(&self, batch: Batch<BluetoothBeacon>) {
        let _ = self.bluetooth.send(batch);
    }

    /// Live subscriptions across the five observation sources (movement excluded).
    pub fn subscriber_count(&self) -> usize {
        self.positions.receiver_count()
            + self.pressure.receiver_count()
            + self.cells.receiver_count()
            + self.wifi.receiver_count()
            + self.bluetooth.receiver_count()
    }
}

impl ObservationSources for BroadcastSources {
    fn positions(&self) -> BoxStream<'static, Position> {
        subscribe(&self.positions, "positions")
    }

    fn air_pressure(&self) -> BoxStream<'static, AirPressureReading> {
        subscribe(&self.pressure, "air_pressure")
    }

    fn cell_towers(&self) -> BoxStream<'static, Batch<CellTower>> {
        subscribe(&self.cells, "cell_towers")
    }

    fn wifi_access_points(&self) -> BoxStream<'static, Batch<WifiAccessPoint>> {
        subscribe(&self.wifi, "wifi_access_points")
    }

    fn bluetooth_beacons(&self) -> BoxStream<'static, Batch<BluetoothBeacon>> {
        subscribe(&self.bluetooth, "bluetooth_beacons")
    }
}

/// Subscribe now and yield items until the sender is gone. Lagged items are
/// skipped.
fn subscribe<T>(tx: &broadcast::Sender<T>, source: &'static str) -> BoxStream<'static, T>
where
    T: Clone + Send + 'static,
{
    stream::unfold(tx.subscribe(), move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(item) => return Some((item, rx)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(source, skipped, "source lagged, observations dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}
