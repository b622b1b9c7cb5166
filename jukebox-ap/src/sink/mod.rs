//! Wireless audio sink management
//!
//! - [`adapter`]: the adapter trait and device types
//! - [`bluetoothctl`]: BlueZ adapter driven through `bluetoothctl`
//! - `mock`: in-memory adapter (`test-util` feature)
//! - [`store`]: persisted auto-connect / preferred device
//! - [`manager`]: single-worker operation queue and link state

pub mod adapter;
pub mod bluetoothctl;
pub mod manager;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod store;

pub use adapter::{BluetoothAdapter, DeviceInfo, SinkDevice};
pub use bluetoothctl::Bluetoothctl;
pub use manager::{ReconcileOutcome, SinkLinkState, SinkManager};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockAdapter;
pub use store::{LinkStore, PersistedLinkState};
