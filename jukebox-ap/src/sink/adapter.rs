//! Bluetooth adapter abstraction
//!
//! The Sink Manager worker is the only caller, so implementations may
//! assume exclusive, sequential use.

use crate::error::Result;
use async_trait::async_trait;
use jukebox_common::MacAddress;
use serde::Serialize;
use std::time::Duration;

/// A device seen by the adapter
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SinkDevice {
    pub mac: MacAddress,
    pub name: String,
}

/// Adapter-reported details for one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub mac: MacAddress,
    pub name: Option<String>,
    pub paired: bool,
    pub trusted: bool,
    pub connected: bool,
    /// Unparsed adapter output
    pub raw: String,
}

#[async_trait]
pub trait BluetoothAdapter: Send {
    /// Discover devices for about `duration`
    ///
    /// Devices discovered before a timeout are still returned.
    async fn scan(&mut self, duration: Duration) -> Result<Vec<SinkDevice>>;

    async fn pair(&mut self, mac: MacAddress) -> Result<()>;

    async fn connect(&mut self, mac: MacAddress) -> Result<()>;

    async fn disconnect(&mut self, mac: MacAddress) -> Result<()>;

    async fn trust(&mut self, mac: MacAddress) -> Result<()>;

    /// Forget the device (unpair)
    async fn remove(&mut self, mac: MacAddress) -> Result<()>;

    async fn info(&mut self, mac: MacAddress) -> Result<DeviceInfo>;

    /// Devices the adapter currently reports as connected
    async fn connected_devices(&mut self) -> Result<Vec<SinkDevice>>;
}
