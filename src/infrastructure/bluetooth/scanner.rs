//! BLE Scanner Module
//!
//! Tracks the scan session and the set of ValedoHome devices seen during it.
//! The scan itself runs inside the platform stack; the auto-stop timer is
//! owned by the dispatcher.

use crate::domain::models::DiscoveredDevice;
use crate::infrastructure::bluetooth::dispatcher::Publisher;
use crate::infrastructure::bluetooth::error::PlatformError;
use crate::infrastructure::bluetooth::platform::BlePlatform;
use std::collections::HashMap;
use tracing::{debug, info};

pub struct Scanner {
    expected_name: String,
    devices: HashMap<String, DiscoveredDevice>,
    scanning: bool,
}

impl Scanner {
    pub fn new(expected_name: impl Into<String>) -> Self {
        Self {
            expected_name: expected_name.into(),
            devices: HashMap::new(),
            scanning: false,
        }
    }

    /// Clear the discovery set and start a new scan.
    pub fn start<P: BlePlatform + ?Sized>(
        &mut self,
        platform: &mut P,
        publisher: &mut Publisher,
    ) -> Result<(), PlatformError> {
        // Stop any existing scan
        self.stop(platform, publisher)?;
        self.devices.clear();

        info!("Starting BLE scan for devices named {:?}", self.expected_name);
        platform.start_scan()?;
        self.scanning = true;
        publisher.scan_status(true);
        Ok(())
    }

    pub fn stop<P: BlePlatform + ?Sized>(
        &mut self,
        platform: &mut P,
        publisher: &mut Publisher,
    ) -> Result<(), PlatformError> {
        if !self.scanning {
            return Ok(());
        }
        info!("Stopping BLE scan...");
        self.scanning = false;
        publisher.scan_status(false);
        platform.stop_scan()
    }

    /// Record a scan result. Returns true when the device was newly added.
    pub fn on_device_discovered(
        &mut self,
        id: &str,
        name: Option<&str>,
        rssi: i16,
        publisher: &mut Publisher,
    ) -> bool {
        info!("New LE Device: {} @ {}", name.unwrap_or("Unknown"), rssi);

        if name != Some(self.expected_name.as_str()) {
            return false;
        }
        if self.devices.contains_key(id) {
            debug!("Device {} already listed", id);
            return false;
        }

        let device = DiscoveredDevice {
            id: id.to_string(),
            display_name: self.expected_name.clone(),
        };
        self.devices.insert(id.to_string(), device.clone());
        publisher.device_found(&device);
        true
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn device(&self, id: &str) -> Option<&DiscoveredDevice> {
        self.devices.get(id)
    }

    pub fn devices(&self) -> impl Iterator<Item = &DiscoveredDevice> {
        self.devices.values()
    }
}
