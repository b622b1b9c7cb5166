//! In-memory adapter
//!
//! Simulates a Bluetooth stack for tests and bench runs without hardware.
//! Cloned handles share state, so a test can keep one handle to script
//! failures and inspect calls while the Sink Manager owns another.

use super::adapter::{BluetoothAdapter, DeviceInfo, SinkDevice};
use crate::error::{Error, Result};
use async_trait::async_trait;
use jukebox_common::MacAddress;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct MockState {
    /// Devices in range, by address
    in_range: BTreeMap<MacAddress, String>,
    paired: BTreeSet<MacAddress>,
    trusted: BTreeSet<MacAddress>,
    connected: BTreeSet<MacAddress>,
    /// Remaining scripted connect failures per device
    connect_failures: HashMap<MacAddress, u32>,
    /// Every operation, in call order ("connect AA:..")
    calls: Vec<String>,
    /// Artificial latency applied to every operation
    latency: Duration,
    /// Operations currently executing
    in_flight: u32,
    /// Highest `in_flight` ever observed
    max_in_flight: u32,
}

#[derive(Debug, Clone, Default)]
pub struct MockAdapter {
    state: Arc<Mutex<MockState>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Put a device in radio range
    pub fn add_device(&self, mac: MacAddress, name: &str) {
        self.lock().in_range.insert(mac, name.to_string());
    }

    pub fn set_paired(&self, mac: MacAddress) {
        self.lock().paired.insert(mac);
    }

    /// Make the adapter report `mac` as already connected
    pub fn set_connected(&self, mac: MacAddress) {
        self.lock().connected.insert(mac);
    }

    /// The next `count` connects to `mac` fail
    pub fn fail_connects(&self, mac: MacAddress, count: u32) {
        self.lock().connect_failures.insert(mac, count);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn connected(&self) -> Vec<MacAddress> {
        self.lock().connected.iter().copied().collect()
    }

    pub fn max_in_flight(&self) -> u32 {
        self.lock().max_in_flight
    }

    async fn begin(&self, call: String) {
        let latency = {
            let mut state = self.lock();
            state.calls.push(call);
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn end(&self) {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
    }

    fn require_in_range(state: &MockState, mac: MacAddress) -> Result<()> {
        if state.in_range.contains_key(&mac) {
            Ok(())
        } else {
            Err(Error::Adapter(format!("Device {} not available", mac)))
        }
    }
}

#[async_trait]
impl BluetoothAdapter for MockAdapter {
    async fn scan(&mut self, _duration: Duration) -> Result<Vec<SinkDevice>> {
        self.begin("scan".to_string()).await;
        let devices = self
            .lock()
            .in_range
            .iter()
            .map(|(mac, name)| SinkDevice {
                mac: *mac,
                name: name.clone(),
            })
            .collect();
        self.end();
        Ok(devices)
    }

    async fn pair(&mut self, mac: MacAddress) -> Result<()> {
        self.begin(format!("pair {}", mac)).await;
        let result = {
            let mut state = self.lock();
            Self::require_in_range(&state, mac).map(|_| {
                state.paired.insert(mac);
            })
        };
        self.end();
        result
    }

    async fn connect(&mut self, mac: MacAddress) -> Result<()> {
        self.begin(format!("connect {}", mac)).await;
        let result = {
            let mut state = self.lock();
            let scripted_failure = match state.connect_failures.get_mut(&mac) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            };

            if scripted_failure {
                Err(Error::Adapter(format!("Failed to connect: {}", mac)))
            } else if let Err(e) = Self::require_in_range(&state, mac) {
                Err(e)
            } else if state.paired.contains(&mac) {
                state.connected.insert(mac);
                Ok(())
            } else {
                Err(Error::Adapter(format!("Device {} not paired", mac)))
            }
        };
        self.end();
        result
    }

    async fn disconnect(&mut self, mac: MacAddress) -> Result<()> {
        self.begin(format!("disconnect {}", mac)).await;
        self.lock().connected.remove(&mac);
        self.end();
        Ok(())
    }

    async fn trust(&mut self, mac: MacAddress) -> Result<()> {
        self.begin(format!("trust {}", mac)).await;
        let result = {
            let mut state = self.lock();
            Self::require_in_range(&state, mac).map(|_| {
                state.trusted.insert(mac);
            })
        };
        self.end();
        result
    }

    async fn remove(&mut self, mac: MacAddress) -> Result<()> {
        self.begin(format!("remove {}", mac)).await;
        {
            let mut state = self.lock();
            state.paired.remove(&mac);
            state.trusted.remove(&mac);
            state.connected.remove(&mac);
        }
        self.end();
        Ok(())
    }

    async fn info(&mut self, mac: MacAddress) -> Result<DeviceInfo> {
        self.begin(format!("info {}", mac)).await;
        let result = {
            let state = self.lock();
            Self::require_in_range(&state, mac).map(|_| DeviceInfo {
                mac,
                name: state.in_range.get(&mac).cloned(),
                paired: state.paired.contains(&mac),
                trusted: state.trusted.contains(&mac),
                connected: state.connected.contains(&mac),
                raw: String::new(),
            })
        };
        self.end();
        result
    }

    async fn connected_devices(&mut self) -> Result<Vec<SinkDevice>> {
        self.begin("connected_devices".to_string()).await;
        let devices = {
            let state = self.lock();
            state
                .connected
                .iter()
                .map(|mac| SinkDevice {
                    mac: *mac,
                    name: state.in_range.get(mac).cloned().unwrap_or_default(),
                })
                .collect()
        };
        self.end();
        Ok(devices)
    }
}
