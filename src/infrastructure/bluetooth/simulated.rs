//! Simulated ValedoHome sensor
//!
//! In-process stand-in for a Bluetooth stack. Every command completes by
//! posting the matching event to the dispatcher, and once notifications are
//! switched on the sensor streams synthetic samples at 50 Hz.

use crate::domain::models::{SensorDescriptor, SensorKind};
use crate::infrastructure::bluetooth::dispatcher::DispatcherHandle;
use crate::infrastructure::bluetooth::error::{DispatchError, PlatformError};
use crate::infrastructure::bluetooth::platform::{
    BlePlatform, GattEvent, GattStatus, LinkState, PlatformEvent,
};
use crate::infrastructure::bluetooth::protocol::{
    encode_sample, ClientConfiguration, CLIENT_CONFIG_DESCRIPTOR, DEVICE_NAME,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// Address reported for the simulated sensor
pub const SIMULATED_DEVICE_ID: &str = "D4:CA:6E:00:56:01";
const OTHER_DEVICE_ID: &str = "5C:F3:70:12:34:56";

const STREAM_INTERVAL: Duration = Duration::from_millis(20);

/// Synthetic sample for `kind` at time `t` seconds
pub fn simulated_sample(kind: SensorKind, t: f32) -> [f32; 4] {
    match kind {
        // Slow rotation about the vertical axis, unit quaternion
        SensorKind::Orientation => {
            let half = t * 0.25;
            [half.cos(), 0.0, 0.0, half.sin()]
        }
        SensorKind::HighPassVelocity => [0.0, t.sin() * 0.5, (t * 0.5).cos() * 0.25, 0.0],
    }
}

pub struct SimulatedPlatform {
    handle: DispatcherHandle,
    connected: Option<String>,
    streams: HashMap<Uuid, JoinHandle<()>>,
    ticks: u64,
}

impl SimulatedPlatform {
    pub fn new(handle: DispatcherHandle) -> Self {
        Self {
            handle,
            connected: None,
            streams: HashMap::new(),
            ticks: 0,
        }
    }

    pub fn is_streaming(&self, characteristic: &Uuid) -> bool {
        self.streams.contains_key(characteristic)
    }

    fn post(&self, event: GattEvent) -> Result<(), PlatformError> {
        self.handle.post_gatt(event).map_err(closed)
    }

    fn require_connection(&self) -> Result<(), PlatformError> {
        if self.connected.is_some() {
            Ok(())
        } else {
            Err(PlatformError::NotConnected)
        }
    }

    fn start_stream(&mut self, sensor: &SensorDescriptor) {
        if self.streams.contains_key(&sensor.characteristic) {
            return;
        }
        debug!("Streaming {:?}", sensor.kind);

        let handle = self.handle.clone();
        let characteristic = sensor.characteristic;
        let kind = sensor.kind;
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(STREAM_INTERVAL);
            let mut tick: u32 = 0;
            loop {
                interval.tick().await;
                let t = tick as f32 * STREAM_INTERVAL.as_secs_f32();
                let event = GattEvent::CharacteristicChanged {
                    characteristic,
                    value: encode_sample(simulated_sample(kind, t)).to_vec(),
                };
                if handle.post_gatt(event).is_err() {
                    break;
                }
                tick = tick.wrapping_add(1);
            }
        });
        self.streams.insert(characteristic, task);
    }

    fn stop_streams(&mut self) {
        for (_, task) in self.streams.drain() {
            task.abort();
        }
    }
}

fn closed(_: DispatchError) -> PlatformError {
    PlatformError::Backend("dispatcher closed".to_string())
}

impl BlePlatform for SimulatedPlatform {
    fn start_scan(&mut self) -> Result<(), PlatformError> {
        info!("Simulated scan started");
        let adverts = [
            (OTHER_DEVICE_ID, Some("Other"), -78),
            (SIMULATED_DEVICE_ID, Some(DEVICE_NAME), -52),
        ];
        for (id, name, rssi) in adverts {
            self.handle
                .post(PlatformEvent::DeviceDiscovered {
                    id: id.to_string(),
                    name: name.map(str::to_string),
                    rssi,
                    advertisement: Vec::new(),
                })
                .map_err(closed)?;
        }
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), PlatformError> {
        Ok(())
    }

    fn connect(&mut self, device_id: &str) -> Result<(), PlatformError> {
        if device_id != SIMULATED_DEVICE_ID {
            return Err(PlatformError::Backend(format!(
                "Unknown simulated device {}",
                device_id
            )));
        }
        self.connected = Some(device_id.to_string());
        self.post(GattEvent::ConnectionStateChanged {
            status: GattStatus::Success,
            state: LinkState::Connected,
        })
    }

    fn discover_services(&mut self) -> Result<(), PlatformError> {
        self.require_connection()?;
        self.post(GattEvent::ServicesDiscovered {
            status: GattStatus::Success,
        })
    }

    fn set_characteristic_notification(
        &mut self,
        sensor: &SensorDescriptor,
        enabled: bool,
    ) -> Result<(), PlatformError> {
        self.require_connection()?;
        if !enabled {
            if let Some(task) = self.streams.remove(&sensor.characteristic) {
                task.abort();
            }
        }
        Ok(())
    }

    fn write_descriptor(
        &mut self,
        sensor: &SensorDescriptor,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), PlatformError> {
        self.require_connection()?;
        let status = if descriptor != CLIENT_CONFIG_DESCRIPTOR {
            GattStatus::Failure(0x0A)
        } else {
            match ClientConfiguration::from_bytes(value) {
                Ok(ClientConfiguration::Notify) => {
                    self.start_stream(sensor);
                    GattStatus::Success
                }
                Ok(_) => GattStatus::Success,
                Err(_) => GattStatus::Failure(0x0D),
            }
        };
        self.post(GattEvent::DescriptorWritten {
            characteristic: sensor.characteristic,
            descriptor,
            status,
        })
    }

    fn read_characteristic(&mut self, sensor: &SensorDescriptor) -> Result<(), PlatformError> {
        self.require_connection()?;
        self.ticks += 1;
        let t = self.ticks as f32 * STREAM_INTERVAL.as_secs_f32();
        self.post(GattEvent::CharacteristicRead {
            characteristic: sensor.characteristic,
            value: encode_sample(simulated_sample(sensor.kind, t)).to_vec(),
            status: GattStatus::Success,
        })
    }

    fn disconnect(&mut self) -> Result<(), PlatformError> {
        self.stop_streams();
        if self.connected.take().is_none() {
            return Ok(());
        }
        self.post(GattEvent::ConnectionStateChanged {
            status: GattStatus::Success,
            state: LinkState::Disconnected,
        })
    }
}

impl Drop for SimulatedPlatform {
    fn drop(&mut self) {
        self.stop_streams();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::dispatcher::{channel, DispatchEvent, Inbox};
    use crate::infrastructure::bluetooth::protocol::{
        decode_quaternion, notification_enable_payload, sensor_descriptors, ORIENTATION,
    };

    async fn next_gatt(inbox: &mut Inbox) -> GattEvent {
        match tokio::time::timeout(Duration::from_secs(1), inbox.recv()).await {
            Ok(Some(DispatchEvent::Platform(PlatformEvent::Gatt(event)))) => event,
            other => panic!("expected a GATT event, got {:?}", other),
        }
    }

    #[test]
    fn test_orientation_is_unit_quaternion() {
        for t in [0.0, 0.3, 1.7, 12.5] {
            let [w, x, y, z] = simulated_sample(SensorKind::Orientation, t);
            let norm = (w * w + x * x + y * y + z * z).sqrt();
            assert!((norm - 1.0).abs() < 1e-5);
        }
    }

    #[tokio::test]
    async fn test_scan_advertises_sensor_and_stranger() {
        let (handle, mut inbox) = channel();
        let mut platform = SimulatedPlatform::new(handle);
        platform.start_scan().unwrap();

        let mut names = Vec::new();
        for _ in 0..2 {
            if let Some(DispatchEvent::Platform(PlatformEvent::DeviceDiscovered { name, .. })) =
                inbox.recv().await
            {
                names.push(name);
            }
        }
        assert_eq!(
            names,
            vec![Some("Other".to_string()), Some(DEVICE_NAME.to_string())]
        );
    }

    #[tokio::test]
    async fn test_commands_require_connection() {
        let (handle, _inbox) = channel();
        let mut platform = SimulatedPlatform::new(handle);
        assert_eq!(platform.discover_services(), Err(PlatformError::NotConnected));
        assert!(platform.connect("AA:BB:CC:DD:EE:FF").is_err());
    }

    #[tokio::test]
    async fn test_notify_write_starts_stream() {
        let (handle, mut inbox) = channel();
        let mut platform = SimulatedPlatform::new(handle);
        let orientation = sensor_descriptors()[0];

        platform.connect(SIMULATED_DEVICE_ID).unwrap();
        assert!(matches!(
            next_gatt(&mut inbox).await,
            GattEvent::ConnectionStateChanged {
                state: LinkState::Connected,
                ..
            }
        ));

        platform
            .write_descriptor(
                &orientation,
                CLIENT_CONFIG_DESCRIPTOR,
                &notification_enable_payload(),
            )
            .unwrap();
        assert!(platform.is_streaming(&ORIENTATION));

        let mut written = false;
        let mut sample = None;
        while sample.is_none() {
            match next_gatt(&mut inbox).await {
                GattEvent::DescriptorWritten { status, .. } => {
                    written = status.is_success();
                }
                GattEvent::CharacteristicChanged { value, .. } => {
                    sample = Some(decode_quaternion(&value).unwrap());
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(written);

        platform.disconnect().unwrap();
        assert!(!platform.is_streaming(&ORIENTATION));
    }
}
