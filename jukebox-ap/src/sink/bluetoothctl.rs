//! `bluetoothctl` adapter
//!
//! Drives BlueZ through its command-line client, one short-lived process
//! per operation. Every invocation is bounded by a timeout and killed if
//! it overruns.

use super::adapter::{BluetoothAdapter, DeviceInfo, SinkDevice};
use crate::error::{Error, Result};
use async_trait::async_trait;
use jukebox_common::MacAddress;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Upper bound for a single non-scan invocation (pairing can be slow)
const OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Extra time granted to `scan on` beyond its own `--timeout`
const SCAN_GRACE: Duration = Duration::from_secs(5);

pub struct Bluetoothctl {
    program: String,
    op_timeout: Duration,
}

impl Bluetoothctl {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            op_timeout: OPERATION_TIMEOUT,
        }
    }

    async fn run(&self, args: &[&str], timeout: Duration) -> Result<String> {
        let label = args.join(" ");
        debug!("{} {}", self.program, label);

        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| Error::Adapter(format!("bluetoothctl {} timed out", label)))?
            .map_err(|e| Error::Adapter(format!("cannot run {}: {}", self.program, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stdout.trim().is_empty() {
                stderr.trim().to_string()
            } else {
                stdout.trim().to_string()
            };
            return Err(Error::Adapter(format!(
                "bluetoothctl {} failed: {}",
                label, detail
            )));
        }
        Ok(stdout)
    }

    /// Run a device operation, also treating in-band failure messages as errors
    async fn run_device_op(&self, op: &str, mac: MacAddress) -> Result<()> {
        let mac = mac.to_string();
        let stdout = self.run(&[op, &mac], self.op_timeout).await?;
        match reported_failure(&stdout) {
            Some(line) => Err(Error::Adapter(format!("bluetoothctl {} {}: {}", op, mac, line))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BluetoothAdapter for Bluetoothctl {
    async fn scan(&mut self, duration: Duration) -> Result<Vec<SinkDevice>> {
        let secs = duration.as_secs().max(1).to_string();
        // Running out the clock is normal; whatever BlueZ cached is listed below
        if let Err(e) = self
            .run(&["--timeout", &secs, "scan", "on"], duration + SCAN_GRACE)
            .await
        {
            warn!("Scan ended early: {}", e);
        }

        let stdout = self.run(&["devices"], self.op_timeout).await?;
        Ok(parse_device_list(&stdout))
    }

    async fn pair(&mut self, mac: MacAddress) -> Result<()> {
        self.run_device_op("pair", mac).await
    }

    async fn connect(&mut self, mac: MacAddress) -> Result<()> {
        self.run_device_op("connect", mac).await
    }

    async fn disconnect(&mut self, mac: MacAddress) -> Result<()> {
        self.run_device_op("disconnect", mac).await
    }

    async fn trust(&mut self, mac: MacAddress) -> Result<()> {
        self.run_device_op("trust", mac).await
    }

    async fn remove(&mut self, mac: MacAddress) -> Result<()> {
        self.run_device_op("remove", mac).await
    }

    async fn info(&mut self, mac: MacAddress) -> Result<DeviceInfo> {
        let stdout = self
            .run(&["info", &mac.to_string()], self.op_timeout)
            .await?;
        if let Some(line) = reported_failure(&stdout) {
            return Err(Error::Adapter(line.to_string()));
        }
        Ok(parse_info(mac, &stdout))
    }

    async fn connected_devices(&mut self) -> Result<Vec<SinkDevice>> {
        let stdout = self.run(&["devices", "Connected"], self.op_timeout).await?;
        Ok(parse_device_list(&stdout))
    }
}

// ========================================
// Output parsing
// ========================================

/// Parse `Device AA:BB:CC:DD:EE:FF Some Name` lines
pub fn parse_device_list(output: &str) -> Vec<SinkDevice> {
    let mut devices: Vec<SinkDevice> = output
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("Device ")?;
            let (mac, name) = match rest.split_once(' ') {
                Some((mac, name)) => (mac, name.trim()),
                None => (rest, ""),
            };
            let mac: MacAddress = mac.parse().ok()?;
            Some(SinkDevice {
                mac,
                name: name.to_string(),
            })
        })
        .collect();
    devices.sort();
    devices.dedup_by(|a, b| a.mac == b.mac);
    devices
}

/// Parse the `key: value` block printed by `bluetoothctl info`
pub fn parse_info(mac: MacAddress, output: &str) -> DeviceInfo {
    let mut info = DeviceInfo {
        mac,
        name: None,
        paired: false,
        trusted: false,
        connected: false,
        raw: output.to_string(),
    };

    for line in output.lines() {
        let Some((key, value)) = line.trim().split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key {
            "Name" => info.name = Some(value.to_string()),
            "Paired" => info.paired = value == "yes",
            "Trusted" => info.trusted = value == "yes",
            "Connected" => info.connected = value == "yes",
            _ => {}
        }
    }
    info
}

/// First line in which bluetoothctl reports a failure despite exit status 0
fn reported_failure(output: &str) -> Option<&str> {
    output.lines().map(str::trim).find(|line| {
        line.starts_with("Failed to") || line.ends_with("not available")
    })
}
