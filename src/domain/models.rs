use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Orientation quaternion reported by the Awinda orientation characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OrientationSample {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl OrientationSample {
    pub fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    pub fn components(&self) -> [f32; 4] {
        [self.w, self.x, self.y, self.z]
    }
}

/// High-pass filtered velocity, same four-float layout as the orientation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VelocitySample {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl VelocitySample {
    pub fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    pub fn components(&self) -> [f32; 4] {
        [self.w, self.x, self.y, self.z]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorKind {
    Orientation,
    HighPassVelocity,
}

/// One sensor the enablement sequence walks through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorDescriptor {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub kind: SensorKind,
}

/// A scan result that matched the expected device name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// Platform identifier, stable for the lifetime of the discovery set
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Ready,
    Disconnecting,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

/// Events published to the display layer.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    Orientation(OrientationSample),
    Velocity(VelocitySample),
    /// Show (or update) the progress indicator with this message
    Progress(String),
    SensorsReady,
    /// Reset displayed values to the unknown placeholder
    Cleared,
    DeviceFound(DiscoveredDevice),
    ScanStatus(bool),
    ConnectionStatus(ConnectionStatus),
    LogMessage(StatusMessage),
}

/// Requests from the display layer into the Bluetooth core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BluetoothCommand {
    StartScan,
    StopScan,
    Connect(String),
    Disconnect,
    Shutdown,
}
