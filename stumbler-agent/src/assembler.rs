//! Concurrent report assembler.
//!
//! A supervising task owns the `Aggregator` and applies one message at a
//! time. While the device moves, one task per observation category (plus one
//! for positions and air pressure) forwards source items to it over an mpsc
//! channel. A window timer flushes the aggregator and hands the reports to the
//! sink in position order.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use stumbler_core::{
    Aggregator, AggregatorConfig, AirPressureReading, BluetoothBeacon, CellTower, MovementGate,
    Observation, Position, Transition, WifiAccessPoint,
};

use crate::sink::ReportSink;
use crate::source::ObservationSources;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Messages from the subscription tasks to the supervisor.
#[derive(Debug)]
enum Event {
    Position(Position),
    Pressure(AirPressureReading),
    Cells(Vec<Observation<CellTower>>),
    Wifi(Vec<Observation<WifiAccessPoint>>),
    Bluetooth(Vec<Observation<BluetoothBeacon>>),
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

/// Source tasks of one moving period.
struct Subscriptions {
    token: CancellationToken,
    tasks: JoinSet<()>,
}

impl Subscriptions {
    fn start(
        sources: &dyn ObservationSources,
        tx: &mpsc::Sender<Event>,
        parent: &CancellationToken,
    ) -> Self {
        let token = parent.child_token();
        let mut tasks = JoinSet::new();

        tasks.spawn(position_pipeline(
            sources.positions(),
            sources.air_pressure(),
            tx.clone(),
            token.clone(),
        ));
        tasks.spawn(forward(
            sources.cell_towers(),
            Event::Cells,
            tx.clone(),
            token.clone(),
        ));
        tasks.spawn(forward(
            sources.wifi_access_points(),
            Event::Wifi,
            tx.clone(),
            token.clone(),
        ));
        tasks.spawn(forward(
            sources.bluetooth_beacons(),
            Event::Bluetooth,
            tx.clone(),
            token.clone(),
        ));

        Subscriptions { token, tasks }
    }

    /// Cancel every task and wait for all of them to finish.
    async fn stop(mut self) {
        self.token.cancel();
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "source task failed");
            }
        }
    }
}

/// Send unless cancelled first. Returns false when the task should exit.
async fn deliver(tx: &mpsc::Sender<Event>, token: &CancellationToken, event: Event) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        sent = tx.send(event) => sent.is_ok(),
    }
}

async fn forward<T, F>(
    mut stream: BoxStream<'static, T>,
    wrap: F,
    tx: mpsc::Sender<Event>,
    token: CancellationToken,
) where
    T: Send + 'static,
    F: Fn(T) -> Event + Send + 'static,
{
    loop {
        let item = tokio::select! {
            _ = token.cancelled() => break,
            item = stream.next() => match item {
                Some(item) => item,
                None => break,
            },
        };
        if !deliver(&tx, &token, wrap(item)).await {
            break;
        }
    }
}

async fn position_pipeline(
    positions: BoxStream<'static, Position>,
    pressure: BoxStream<'static, AirPressureReading>,
    tx: mpsc::Sender<Event>,
    token: CancellationToken,
) {
    let mut positions = positions.fuse();
    let mut pressure = pressure.fuse();
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            Some(position) = positions.next() => Event::Position(position),
            Some(reading) = pressure.next() => Event::Pressure(reading),
            else => break,
        };
        if !deliver(&tx, &token, event).await {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

pub struct ReportAssembler {
    aggregator: Aggregator,
    window: Duration,
}

impl ReportAssembler {
    pub fn new(config: AggregatorConfig) -> Self {
        let window = Duration::from_millis(config.window_ms.max(1) as u64);
        ReportAssembler {
            aggregator: Aggregator::new(config),
            window,
        }
    }

    /// Run until `cancel` fires, then return the aggregator with whatever it
    /// still holds. Shutdown does not flush a partial window.
    pub async fn run(
        mut self,
        sources: Arc<dyn ObservationSources>,
        mut movement: BoxStream<'static, bool>,
        sink: Arc<dyn ReportSink>,
        cancel: CancellationToken,
    ) -> Aggregator {
        let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut gate = MovementGate::new();
        let mut subscriptions: Option<Subscriptions> = None;
        let mut movement_open = true;

        let mut ticker = interval_at(Instant::now() + self.window, self.window);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(window_ms = self.window.as_millis() as u64, "assembler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("assembler shutting down");
                    break;
                }
                moving = movement.next(), if movement_open => match moving {
                    Some(moving) => match gate.observe(moving) {
                        Some(Transition::Start) => {
                            info!("movement started, subscribing to sources");
                            subscriptions = Some(Subscriptions::start(sources.as_ref(), &tx, &cancel));
                        }
                        Some(Transition::Stop) => {
                            info!("movement stopped, cancelling sources");
                            if let Some(subs) = subscriptions.take() {
                                subs.stop().await;
                            }
                        }
                        None => {}
                    },
                    None => {
                        debug!("movement signal ended");
                        movement_open = false;
                    }
                },
                Some(event) = rx.recv() => self.apply(event),
                _ = ticker.tick() => self.flush(sink.as_ref(), &cancel).await,
            }
        }

        if let Some(subs) = subscriptions.take() {
            subs.stop().await;
        }
        self.aggregator
    }

    fn apply(&mut self, event: Event) {
        match event {
            Event::Position(position) => {
                self.aggregator.record_position(position);
            }
            Event::Pressure(reading) => self.aggregator.record_pressure(reading),
            Event::Cells(batch) => self.aggregator.record_cells(batch),
            Event::Wifi(batch) => self.aggregator.record_wifi(batch),
            Event::Bluetooth(batch) => self.aggregator.record_bluetooth(batch),
        }
    }

    /// Hand the window's reports to the sink. A slow sink never holds up
    /// shutdown; reports not yet persisted when `cancel` fires are dropped.
    async fn flush(&mut self, sink: &dyn ReportSink, cancel: &CancellationToken) {
        let reports = self.aggregator.flush();
        let total = reports.len();
        for (sent, report) in reports.into_iter().enumerate() {
            let timestamp = report.position.timestamp;
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(unsent = total - sent, "shutdown while persisting, reports dropped");
                    return;
                }
                result = sink.persist(report) => {
                    if let Err(e) = result {
                        warn!(error = %e, timestamp, "report dropped by sink");
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
