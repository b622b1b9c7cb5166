//! Sink Manager
//!
//! **Purpose:** Serialize every operation that touches the Bluetooth
//! adapter and own the link state.
//!
//! **Architecture:**
//! - [`SinkManager`] is a cheap, cloneable handle. Each operation becomes a
//!   `SinkCommand` carrying a oneshot reply channel.
//! - A single `SinkWorker` task owns the adapter and drains the command
//!   queue strictly FIFO, one operation at a time.
//! - After every operation the worker commits its working state into a
//!   shared snapshot. [`SinkManager::current_link_state`] reads only that
//!   snapshot, so it never waits behind an adapter call and never observes
//!   a half-finished operation.
//!
//! Startup reconciliation ([`SinkManager::reconcile`]) submits ordinary
//! queued connects and sleeps between rounds outside the worker, so
//! management requests interleave with it.

use super::adapter::{BluetoothAdapter, DeviceInfo, SinkDevice};
use super::store::{LinkStore, PersistedLinkState};
use crate::config::SinkConfig;
use crate::error::{Error, Result};
use chrono::Utc;
use jukebox_common::events::{EventBus, JukeboxEvent};
use jukebox_common::MacAddress;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, error, info, warn};

/// Slack on top of the configured scan duration before a scan is abandoned
const SCAN_BUDGET_GRACE: Duration = Duration::from_secs(10);

/// Committed link state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkLinkState {
    /// Result of the last scan
    pub known_devices: Vec<SinkDevice>,
    /// The single active link, if any
    pub connected: Option<MacAddress>,
    pub auto_connect: BTreeSet<MacAddress>,
    pub preferred_device: Option<MacAddress>,
    /// Set when startup reconciliation gave up
    pub degraded: Option<String>,
    /// Operation the worker is executing right now
    pub operation_in_flight: Option<String>,
}

impl SinkLinkState {
    fn persisted(&self) -> PersistedLinkState {
        PersistedLinkState {
            auto_connect: self.auto_connect.clone(),
            preferred_device: self.preferred_device,
        }
    }
}

/// How startup reconciliation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing connected and no preferred or auto-connect device configured
    NothingToDo,
    /// The adapter already had a connected device
    AlreadyConnected(MacAddress),
    Connected(MacAddress),
    /// Retry budget spent; link marked degraded
    Exhausted,
    /// Worker went away (shutdown)
    Aborted,
}

/// Reconnection targets: preferred device first, then the auto-connect set
pub fn reconnect_candidates(state: &SinkLinkState) -> Vec<MacAddress> {
    let mut candidates: Vec<MacAddress> = state.preferred_device.into_iter().collect();
    for mac in &state.auto_connect {
        if !candidates.contains(mac) {
            candidates.push(*mac);
        }
    }
    candidates
}

// ========================================
// Commands
// ========================================

type Reply<T> = oneshot::Sender<Result<T>>;

enum SinkCommand {
    Scan(Reply<Vec<SinkDevice>>),
    Pair(MacAddress, Reply<()>),
    Connect(MacAddress, Reply<()>),
    Disconnect(MacAddress, Reply<()>),
    Trust(MacAddress, Reply<()>),
    Remove(MacAddress, Reply<()>),
    Info(MacAddress, Reply<DeviceInfo>),
    SetAutoConnect(MacAddress, bool, Reply<()>),
    SetPreferred(Option<MacAddress>, Reply<()>),
    RefreshConnected(Reply<Option<MacAddress>>),
    MarkDegraded(String, Reply<()>),
}

impl SinkCommand {
    fn describe(&self) -> String {
        match self {
            SinkCommand::Scan(_) => "scan".to_string(),
            SinkCommand::Pair(mac, _) => format!("pair {}", mac),
            SinkCommand::Connect(mac, _) => format!("connect {}", mac),
            SinkCommand::Disconnect(mac, _) => format!("disconnect {}", mac),
            SinkCommand::Trust(mac, _) => format!("trust {}", mac),
            SinkCommand::Remove(mac, _) => format!("remove {}", mac),
            SinkCommand::Info(mac, _) => format!("info {}", mac),
            SinkCommand::SetAutoConnect(mac, enabled, _) => {
                format!("set auto-connect {} {}", mac, enabled)
            }
            SinkCommand::SetPreferred(Some(mac), _) => format!("set preferred {}", mac),
            SinkCommand::SetPreferred(None, _) => "clear preferred".to_string(),
            SinkCommand::RefreshConnected(_) => "refresh connected".to_string(),
            SinkCommand::MarkDegraded(_, _) => "mark degraded".to_string(),
        }
    }
}

// ========================================
// Handle
// ========================================

#[derive(Clone)]
pub struct SinkManager {
    tx: mpsc::Sender<SinkCommand>,
    snapshot: Arc<RwLock<SinkLinkState>>,
    config: SinkConfig,
}

impl SinkManager {
    /// Load persisted preferences and spawn the worker
    ///
    /// The worker exits once every handle has been dropped and the queue
    /// is drained.
    pub fn start(
        adapter: Box<dyn BluetoothAdapter>,
        store: LinkStore,
        config: SinkConfig,
        events: EventBus,
    ) -> Self {
        let persisted = store.load();
        info!(
            auto_connect = persisted.auto_connect.len(),
            preferred = ?persisted.preferred_device.map(|m| m.to_string()),
            "Loaded link preferences"
        );

        let state = SinkLinkState {
            auto_connect: persisted.auto_connect,
            preferred_device: persisted.preferred_device,
            ..SinkLinkState::default()
        };
        let snapshot = Arc::new(RwLock::new(state.clone()));
        let (tx, rx) = mpsc::channel(config.command_queue_capacity);

        let worker = SinkWorker {
            adapter,
            store,
            state,
            snapshot: Arc::clone(&snapshot),
            events,
            scan_duration: config.scan_duration(),
        };
        tokio::spawn(worker.run(rx));

        Self {
            tx,
            snapshot,
            config,
        }
    }

    async fn submit<T>(&self, command: impl FnOnce(Reply<T>) -> SinkCommand) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(command(reply_tx))
            .await
            .map_err(|_| Error::ChannelClosed("sink manager"))?;
        reply_rx
            .await
            .map_err(|_| Error::ChannelClosed("sink manager"))?
    }

    pub async fn scan(&self) -> Result<Vec<SinkDevice>> {
        self.submit(SinkCommand::Scan).await
    }

    pub async fn pair(&self, mac: MacAddress) -> Result<()> {
        self.submit(|reply| SinkCommand::Pair(mac, reply)).await
    }

    /// Connect `mac`, releasing any other connected device first
    pub async fn connect(&self, mac: MacAddress) -> Result<()> {
        self.submit(|reply| SinkCommand::Connect(mac, reply)).await
    }

    pub async fn disconnect(&self, mac: MacAddress) -> Result<()> {
        self.submit(|reply| SinkCommand::Disconnect(mac, reply)).await
    }

    pub async fn trust(&self, mac: MacAddress) -> Result<()> {
        self.submit(|reply| SinkCommand::Trust(mac, reply)).await
    }

    /// Unpair and forget `mac` everywhere it is referenced
    pub async fn remove(&self, mac: MacAddress) -> Result<()> {
        self.submit(|reply| SinkCommand::Remove(mac, reply)).await
    }

    pub async fn info(&self, mac: MacAddress) -> Result<DeviceInfo> {
        self.submit(|reply| SinkCommand::Info(mac, reply)).await
    }

    pub async fn set_auto_connect(&self, mac: MacAddress, enabled: bool) -> Result<()> {
        self.submit(|reply| SinkCommand::SetAutoConnect(mac, enabled, reply))
            .await
    }

    pub async fn set_preferred(&self, mac: Option<MacAddress>) -> Result<()> {
        self.submit(|reply| SinkCommand::SetPreferred(mac, reply)).await
    }

    /// Re-read the adapter's connected devices into `connected`
    pub async fn refresh_connected(&self) -> Result<Option<MacAddress>> {
        self.submit(SinkCommand::RefreshConnected).await
    }

    /// Last committed state; never queued
    pub async fn current_link_state(&self) -> SinkLinkState {
        self.snapshot.read().await.clone()
    }

    pub async fn connected(&self) -> Option<MacAddress> {
        self.snapshot.read().await.connected
    }

    /// Startup reconciliation with bounded retries
    ///
    /// A link the adapter already holds is adopted as is. Otherwise each round tries every candidate once; rounds are separated by
    /// exponential backoff. When the budget is spent the link is marked
    /// degraded and `connected` stays empty.
    pub async fn reconcile(&self) -> ReconcileOutcome {
        match self.refresh_connected().await {
            Ok(Some(mac)) => {
                info!(mac = %mac, "Sink already connected");
                return ReconcileOutcome::AlreadyConnected(mac);
            }
            Ok(None) => {}
            Err(Error::ChannelClosed(_)) => return ReconcileOutcome::Aborted,
            Err(e) => warn!(error = %e, "Could not read connected devices"),
        }

        let candidates = reconnect_candidates(&self.current_link_state().await);
        if candidates.is_empty() {
            info!("No preferred or auto-connect sink configured");
            return ReconcileOutcome::NothingToDo;
        }

        let rounds = self.config.reconnect_attempts.max(1);
        for round in 0..rounds {
            if round > 0 {
                let delay = self.config.reconnect_backoff(round - 1);
                debug!(round, delay_ms = delay.as_millis() as u64, "Reconnect backoff");
                tokio::time::sleep(delay).await;
            }

            for mac in &candidates {
                match self.connect(*mac).await {
                    Ok(()) => {
                        info!(mac = %mac, round, "Reconnected to sink");
                        return ReconcileOutcome::Connected(*mac);
                    }
                    Err(Error::ChannelClosed(_)) => return ReconcileOutcome::Aborted,
                    Err(e) => warn!(mac = %mac, round, error = %e, "Reconnect attempt failed"),
                }
            }
        }

        let reason = format!(
            "could not reconnect to {} device(s) after {} round(s)",
            candidates.len(),
            rounds
        );
        error!("Sink link degraded: {}", reason);
        match self.submit(|reply| SinkCommand::MarkDegraded(reason, reply)).await {
            Ok(()) => ReconcileOutcome::Exhausted,
            Err(_) => ReconcileOutcome::Aborted,
        }
    }
}

// ========================================
// Worker
// ========================================

struct SinkWorker {
    adapter: Box<dyn BluetoothAdapter>,
    store: LinkStore,
    /// Working copy; published by `commit`
    state: SinkLinkState,
    snapshot: Arc<RwLock<SinkLinkState>>,
    events: EventBus,
    scan_duration: Duration,
}

impl SinkWorker {
    async fn run(mut self, mut rx: mpsc::Receiver<SinkCommand>) {
        info!("Sink manager worker started");

        while let Some(command) = rx.recv().await {
            let operation = command.describe();
            debug!(operation = %operation, "Executing adapter operation");
            self.snapshot.write().await.operation_in_flight = Some(operation);

            match command {
                SinkCommand::Scan(reply) => {
                    let result = self.scan().await;
                    self.complete(reply, result).await;
                }
                SinkCommand::Pair(mac, reply) => {
                    let result = self.adapter.pair(mac).await;
                    self.complete(reply, result).await;
                }
                SinkCommand::Connect(mac, reply) => {
                    let result = self.connect(mac).await;
                    self.complete(reply, result).await;
                }
                SinkCommand::Disconnect(mac, reply) => {
                    let result = self.disconnect(mac).await;
                    self.complete(reply, result).await;
                }
                SinkCommand::Trust(mac, reply) => {
                    let result = self.adapter.trust(mac).await;
                    self.complete(reply, result).await;
                }
                SinkCommand::Remove(mac, reply) => {
                    let result = self.remove(mac).await;
                    self.complete(reply, result).await;
                }
                SinkCommand::Info(mac, reply) => {
                    let result = self.adapter.info(mac).await;
                    self.complete(reply, result).await;
                }
                SinkCommand::SetAutoConnect(mac, enabled, reply) => {
                    let result = self.set_auto_connect(mac, enabled);
                    self.complete(reply, result).await;
                }
                SinkCommand::SetPreferred(mac, reply) => {
                    let result = self.set_preferred(mac);
                    self.complete(reply, result).await;
                }
                SinkCommand::RefreshConnected(reply) => {
                    let result = self.refresh_connected().await;
                    self.complete(reply, result).await;
                }
                SinkCommand::MarkDegraded(reason, reply) => {
                    self.state.degraded = Some(reason.clone());
                    self.events.emit_lossy(JukeboxEvent::LinkDegraded {
                        reason,
                        timestamp: Utc::now(),
                    });
                    self.complete(reply, Ok(())).await;
                }
            }
        }

        info!("Sink manager worker stopped");
    }

    /// Publish the working state, then answer the caller
    async fn complete<T>(&mut self, reply: Reply<T>, result: Result<T>) {
        self.state.operation_in_flight = None;
        let previous = {
            let mut snapshot = self.snapshot.write().await;
            let previous = snapshot.connected;
            *snapshot = self.state.clone();
            previous
        };

        if previous != self.state.connected {
            self.events.emit_lossy(JukeboxEvent::LinkStateChanged {
                connected: self.state.connected,
                timestamp: Utc::now(),
            });
        }

        if let Err(e) = &result {
            warn!(error = %e, "Adapter operation failed");
        }
        let _ = reply.send(result);
    }

    async fn scan(&mut self) -> Result<Vec<SinkDevice>> {
        let budget = self.scan_duration + SCAN_BUDGET_GRACE;
        let devices = match tokio::time::timeout(budget, self.adapter.scan(self.scan_duration)).await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    budget_secs = budget.as_secs(),
                    "Scan exceeded its budget; keeping previous results"
                );
                self.state.known_devices.clone()
            }
        };

        info!(device_count = devices.len(), "Scan completed");
        self.state.known_devices = devices.clone();
        self.events.emit_lossy(JukeboxEvent::ScanCompleted {
            device_count: devices.len(),
            timestamp: Utc::now(),
        });
        Ok(devices)
    }

    async fn connect(&mut self, mac: MacAddress) -> Result<()> {
        // The adapter may hold links this worker never made
        let linked: Vec<MacAddress> = match self.adapter.connected_devices().await {
            Ok(devices) => devices.into_iter().map(|d| d.mac).collect(),
            Err(e) => {
                debug!(error = %e, "Connected list unavailable; using tracked link");
                self.state.connected.into_iter().collect()
            }
        };

        for current in linked.iter().copied().filter(|m| *m != mac) {
            info!(from = %current, to = %mac, "Releasing current sink");
            self.adapter.disconnect(current).await?;
            if self.state.connected == Some(current) {
                self.state.connected = None;
            }
        }

        if linked.contains(&mac) {
            debug!(mac = %mac, "Already connected");
            self.state.connected = Some(mac);
            self.state.degraded = None;
            return Ok(());
        }
        self.state.connected = None;

        let paired = match self.adapter.info(mac).await {
            Ok(info) => info.paired,
            Err(e) => {
                debug!(mac = %mac, error = %e, "Device info unavailable before connect");
                false
            }
        };
        if !paired {
            info!(mac = %mac, "Pairing before connect");
            self.adapter.pair(mac).await?;
        }

        self.adapter.connect(mac).await?;
        self.state.connected = Some(mac);
        self.state.degraded = None;
        info!(mac = %mac, "Sink connected");
        Ok(())
    }

    async fn disconnect(&mut self, mac: MacAddress) -> Result<()> {
        self.adapter.disconnect(mac).await?;
        if self.state.connected == Some(mac) {
            self.state.connected = None;
            info!(mac = %mac, "Sink disconnected");
        }
        Ok(())
    }

    async fn remove(&mut self, mac: MacAddress) -> Result<()> {
        self.adapter.remove(mac).await?;

        if self.state.connected == Some(mac) {
            self.state.connected = None;
        }

        let mut next = self.state.persisted();
        next.auto_connect.remove(&mac);
        if next.preferred_device == Some(mac) {
            next.preferred_device = None;
        }
        self.persist(next)?;
        info!(mac = %mac, "Device removed");
        Ok(())
    }

    fn set_auto_connect(&mut self, mac: MacAddress, enabled: bool) -> Result<()> {
        let mut next = self.state.persisted();
        if enabled {
            next.auto_connect.insert(mac);
        } else {
            next.auto_connect.remove(&mac);
        }
        self.persist(next)
    }

    fn set_preferred(&mut self, mac: Option<MacAddress>) -> Result<()> {
        let mut next = self.state.persisted();
        next.preferred_device = mac;
        self.persist(next)
    }

    /// Save first; the working state only changes if the write succeeded
    fn persist(&mut self, next: PersistedLinkState) -> Result<()> {
        if next == self.state.persisted() {
            return Ok(());
        }
        self.store.save(&next)?;
        self.state.auto_connect = next.auto_connect;
        self.state.preferred_device = next.preferred_device;
        Ok(())
    }

    async fn refresh_connected(&mut self) -> Result<Option<MacAddress>> {
        let devices = self.adapter.connected_devices().await?;
        if devices.len() > 1 {
            warn!(
                count = devices.len(),
                "Adapter reports several connected devices; tracking the first"
            );
        }
        self.state.connected = devices.first().map(|d| d.mac);
        Ok(self.state.connected)
    }
}
