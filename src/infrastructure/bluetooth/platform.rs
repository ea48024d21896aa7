//! Bluetooth platform seam
//!
//! The core never calls a Bluetooth stack directly. It issues commands
//! through [`BlePlatform`] and every command completes later as a
//! [`PlatformEvent`] posted to the dispatcher. Commands return as soon as the
//! request has been handed over.

use crate::domain::models::SensorDescriptor;
use crate::infrastructure::bluetooth::error::PlatformError;
use uuid::Uuid;

/// Status attached to every GATT callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattStatus {
    Success,
    /// Any other status code reported by the stack
    Failure(u16),
}

impl GattStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Connecting,
    Disconnecting,
    Disconnected,
}

/// Completion callbacks for an active GATT connection
#[derive(Debug, Clone, PartialEq)]
pub enum GattEvent {
    ConnectionStateChanged {
        status: GattStatus,
        state: LinkState,
    },
    ServicesDiscovered {
        status: GattStatus,
    },
    CharacteristicRead {
        characteristic: Uuid,
        value: Vec<u8>,
        status: GattStatus,
    },
    CharacteristicWritten {
        characteristic: Uuid,
        status: GattStatus,
    },
    DescriptorWritten {
        characteristic: Uuid,
        descriptor: Uuid,
        status: GattStatus,
    },
    /// Notification carrying a new value
    CharacteristicChanged {
        characteristic: Uuid,
        value: Vec<u8>,
    },
    RemoteRssi {
        rssi: i16,
        status: GattStatus,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    DeviceDiscovered {
        id: String,
        name: Option<String>,
        rssi: i16,
        advertisement: Vec<u8>,
    },
    Gatt(GattEvent),
}

/// Commands the core issues to the Bluetooth stack.
pub trait BlePlatform: Send {
    fn start_scan(&mut self) -> Result<(), PlatformError>;

    fn stop_scan(&mut self) -> Result<(), PlatformError>;

    /// Open a GATT connection; completes with `ConnectionStateChanged`.
    fn connect(&mut self, device_id: &str) -> Result<(), PlatformError>;

    /// Completes with `ServicesDiscovered`.
    fn discover_services(&mut self) -> Result<(), PlatformError>;

    /// Local notification routing only, no completion event.
    fn set_characteristic_notification(
        &mut self,
        sensor: &SensorDescriptor,
        enabled: bool,
    ) -> Result<(), PlatformError>;

    /// Completes with `DescriptorWritten`.
    fn write_descriptor(
        &mut self,
        sensor: &SensorDescriptor,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), PlatformError>;

    /// Completes with `CharacteristicRead`.
    fn read_characteristic(&mut self, sensor: &SensorDescriptor) -> Result<(), PlatformError>;

    /// Completes with `ConnectionStateChanged { state: Disconnected }`.
    fn disconnect(&mut self) -> Result<(), PlatformError>;
}

impl<T: BlePlatform + ?Sized> BlePlatform for Box<T> {
    fn start_scan(&mut self) -> Result<(), PlatformError> {
        (**self).start_scan()
    }

    fn stop_scan(&mut self) -> Result<(), PlatformError> {
        (**self).stop_scan()
    }

    fn connect(&mut self, device_id: &str) -> Result<(), PlatformError> {
        (**self).connect(device_id)
    }

    fn discover_services(&mut self) -> Result<(), PlatformError> {
        (**self).discover_services()
    }

    fn set_characteristic_notification(
        &mut self,
        sensor: &SensorDescriptor,
        enabled: bool,
    ) -> Result<(), PlatformError> {
        (**self).set_characteristic_notification(sensor, enabled)
    }

    fn write_descriptor(
        &mut self,
        sensor: &SensorDescriptor,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), PlatformError> {
        (**self).write_descriptor(sensor, descriptor, value)
    }

    fn read_characteristic(&mut self, sensor: &SensorDescriptor) -> Result<(), PlatformError> {
        (**self).read_characteristic(sensor)
    }

    fn disconnect(&mut self) -> Result<(), PlatformError> {
        (**self).disconnect()
    }
}

/// Bookkeeping for a backend whose connect completes on another task.
///
/// A disconnect cancels the outstanding attempt, and a completion that
/// arrives afterwards is recognised as stale.
#[derive(Debug, Default)]
pub struct PendingConnect {
    attempt: u64,
    in_flight: bool,
}

impl PendingConnect {
    /// Start a new attempt, superseding any earlier one.
    pub fn begin(&mut self) -> u64 {
        self.attempt += 1;
        self.in_flight = true;
        self.attempt
    }

    /// Whether `attempt` is still the live one. Ends it either way.
    pub fn finish(&mut self, attempt: u64) -> bool {
        let live = self.in_flight && attempt == self.attempt;
        if live {
            self.in_flight = false;
        }
        live
    }

    /// Cancel the outstanding attempt. Returns whether one was in flight.
    pub fn cancel(&mut self) -> bool {
        self.attempt += 1;
        std::mem::replace(&mut self.in_flight, false)
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }
}
