//! WinRT Bluetooth LE backend
//!
//! Drives the Windows Bluetooth stack. Async WinRT operations run on Tokio
//! tasks and report back to the dispatcher as [`GattEvent`]s, so each command
//! returns as soon as the operation has been started.

use crate::domain::models::SensorDescriptor;
use crate::infrastructure::bluetooth::dispatcher::DispatcherHandle;
use crate::infrastructure::bluetooth::error::PlatformError;
use crate::infrastructure::bluetooth::platform::{
    BlePlatform, GattEvent, GattStatus, LinkState, PendingConnect, PlatformEvent,
};
use crate::infrastructure::bluetooth::protocol::{
    sensor_descriptors, ClientConfiguration, AWINDA_SERVICE, CLIENT_CONFIG_DESCRIPTOR,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use windows::core::GUID;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattClientCharacteristicConfigurationDescriptorValue,
    GattCommunicationStatus, GattValueChangedEventArgs,
};
use windows::Devices::Bluetooth::{
    BluetoothCacheMode, BluetoothConnectionStatus, BluetoothLEDevice,
};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, IBuffer};

// Android's GATT_ERROR, reported when WinRT gives no status of its own
const GATT_ERROR: u16 = 0x85;

fn guid(uuid: Uuid) -> GUID {
    GUID::from_u128(uuid.as_u128())
}

fn backend(e: windows::core::Error) -> PlatformError {
    PlatformError::Backend(e.message().to_string())
}

fn status_of(status: GattCommunicationStatus) -> GattStatus {
    if status == GattCommunicationStatus::Success {
        GattStatus::Success
    } else {
        GattStatus::Failure(status.0 as u16)
    }
}

fn buffer_bytes(buffer: &IBuffer) -> windows::core::Result<Vec<u8>> {
    let reader = DataReader::FromBuffer(buffer)?;
    let length = reader.UnconsumedBufferLength()? as usize;
    let mut bytes = vec![0u8; length];
    reader.ReadBytes(&mut bytes)?;
    Ok(bytes)
}

/// Device id used in discovery events, the 48-bit address in hex
pub fn device_id(address: u64) -> String {
    format!("{:012X}", address)
}

fn parse_device_id(id: &str) -> Result<u64, PlatformError> {
    u64::from_str_radix(id, 16)
        .map_err(|_| PlatformError::Backend(format!("Invalid device address {:?}", id)))
}

#[derive(Default)]
struct Link {
    device: Option<BluetoothLEDevice>,
    status_token: Option<i64>,
    characteristics: HashMap<Uuid, GattCharacteristic>,
    value_tokens: HashMap<Uuid, i64>,
    connect: PendingConnect,
    connect_task: Option<JoinHandle<()>>,
}

impl Link {
    fn characteristic(&self, uuid: Uuid) -> Result<GattCharacteristic, PlatformError> {
        if self.device.is_none() {
            return Err(PlatformError::NotConnected);
        }
        self.characteristics
            .get(&uuid)
            .cloned()
            .ok_or(PlatformError::CharacteristicNotFound(uuid))
    }

    /// Abort a connect still in flight. Returns whether there was one.
    fn cancel_connect(&mut self) -> bool {
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        self.connect.cancel()
    }

    fn close(&mut self) {
        for (uuid, token) in self.value_tokens.drain() {
            if let Some(c) = self.characteristics.get(&uuid) {
                let _ = c.RemoveValueChanged(token);
            }
        }
        self.characteristics.clear();
        if let Some(device) = self.device.take() {
            if let Some(token) = self.status_token.take() {
                let _ = device.RemoveConnectionStatusChanged(token);
            }
            let _ = device.Close();
        }
    }
}

pub struct WinRtPlatform {
    handle: DispatcherHandle,
    watcher: Option<BluetoothLEAdvertisementWatcher>,
    link: Arc<Mutex<Link>>,
}

impl WinRtPlatform {
    pub fn new(handle: DispatcherHandle) -> Self {
        Self {
            handle,
            watcher: None,
            link: Arc::new(Mutex::new(Link::default())),
        }
    }

    fn with_link<T>(&self, f: impl FnOnce(&mut Link) -> T) -> Result<T, PlatformError> {
        let mut link = self
            .link
            .lock()
            .map_err(|_| PlatformError::Backend("Lock error".to_string()))?;
        Ok(f(&mut link))
    }

    fn post_completion(handle: &DispatcherHandle, event: GattEvent) {
        if handle.post_gatt(event).is_err() {
            debug!("Dispatcher gone, dropping completion");
        }
    }
}

async fn open_device(
    address: u64,
    handle: DispatcherHandle,
) -> windows::core::Result<(BluetoothLEDevice, i64)> {
    let device = BluetoothLEDevice::FromBluetoothAddressAsync(address)?.await?;
    info!("Device opened: {:?}", device.Name()?);

    let status_handler =
        TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
            if let Some(dev) = dev.as_ref() {
                if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                    let _ = handle.post_gatt(GattEvent::ConnectionStateChanged {
                        status: GattStatus::Success,
                        state: LinkState::Disconnected,
                    });
                }
            }
            Ok(())
        });
    let token = device.ConnectionStatusChanged(&status_handler)?;
    Ok((device, token))
}

async fn discover(
    device: BluetoothLEDevice,
) -> windows::core::Result<(GattStatus, HashMap<Uuid, GattCharacteristic>)> {
    let mut found = HashMap::new();

    let services_result = device
        .GetGattServicesForUuidAsync(guid(AWINDA_SERVICE))?
        .await?;
    let status = services_result.Status()?;
    if status != GattCommunicationStatus::Success {
        error!("Failed to get GATT services: {:?}", status);
        return Ok((status_of(status), found));
    }

    let services = services_result.Services()?;
    if services.Size()? == 0 {
        warn!("Awinda service not found");
        return Ok((GattStatus::Failure(GATT_ERROR), found));
    }
    let service = services.GetAt(0)?;

    let chars_result = service.GetCharacteristicsAsync()?.await?;
    let status = chars_result.Status()?;
    if status != GattCommunicationStatus::Success {
        return Ok((status_of(status), found));
    }

    let characteristics = chars_result.Characteristics()?;
    info!("Found {} characteristics", characteristics.Size()?);
    for i in 0..characteristics.Size()? {
        let c = characteristics.GetAt(i)?;
        let uuid = c.Uuid()?;
        if let Some(d) = sensor_descriptors()
            .into_iter()
            .find(|d| guid(d.characteristic) == uuid)
        {
            debug!("Found {:?} characteristic", d.kind);
            found.insert(d.characteristic, c);
        }
    }
    Ok((GattStatus::Success, found))
}

impl BlePlatform for WinRtPlatform {
    fn start_scan(&mut self) -> Result<(), PlatformError> {
        self.stop_scan()?;

        let watcher = BluetoothLEAdvertisementWatcher::new().map_err(backend)?;
        watcher
            .SetScanningMode(BluetoothLEScanningMode::Active)
            .map_err(backend)?;

        let handle = self.handle.clone();
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let adv = args.Advertisement()?;
                    let name = adv.LocalName()?.to_string();
                    let _ = handle.post(PlatformEvent::DeviceDiscovered {
                        id: device_id(args.BluetoothAddress()?),
                        name: (!name.is_empty()).then_some(name),
                        rssi: args.RawSignalStrengthInDBm()?,
                        advertisement: Vec::new(),
                    });
                }
                Ok(())
            },
        );

        watcher.Received(&handler).map_err(backend)?;
        watcher.Start().map_err(backend)?;
        self.watcher = Some(watcher);
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), PlatformError> {
        if let Some(watcher) = self.watcher.take() {
            watcher.Stop().map_err(backend)?;
        }
        Ok(())
    }

    fn connect(&mut self, device_id: &str) -> Result<(), PlatformError> {
        let address = parse_device_id(device_id)?;
        info!("Connecting to Bluetooth device: {:#X}", address);

        let attempt = self.with_link(|link| {
            link.cancel_connect();
            link.connect.begin()
        })?;
        let handle = self.handle.clone();
        let link = self.link.clone();
        let task = tokio::spawn(async move {
            let opened = open_device(address, handle.clone()).await;
            let Ok(mut link) = link.lock() else {
                return;
            };
            if !link.connect.finish(attempt) {
                debug!("Connect attempt {} was cancelled", attempt);
                if let Ok((device, token)) = opened {
                    let _ = device.RemoveConnectionStatusChanged(token);
                    let _ = device.Close();
                }
                return;
            }
            link.connect_task = None;
            let event = match opened {
                Ok((device, token)) => {
                    link.close();
                    link.device = Some(device);
                    link.status_token = Some(token);
                    GattEvent::ConnectionStateChanged {
                        status: GattStatus::Success,
                        state: LinkState::Connected,
                    }
                }
                Err(e) => {
                    error!("Connection failed: {}", e.message());
                    GattEvent::ConnectionStateChanged {
                        status: GattStatus::Failure(GATT_ERROR),
                        state: LinkState::Disconnected,
                    }
                }
            };
            drop(link);
            Self::post_completion(&handle, event);
        });
        self.with_link(|link| {
            if link.connect.is_in_flight() {
                link.connect_task = Some(task);
            }
        })?;
        Ok(())
    }

    fn discover_services(&mut self) -> Result<(), PlatformError> {
        let device = self
            .with_link(|link| link.device.clone())?
            .ok_or(PlatformError::NotConnected)?;

        let handle = self.handle.clone();
        let link = self.link.clone();
        tokio::spawn(async move {
            let status = match discover(device).await {
                Ok((status, found)) => {
                    if let Ok(mut link) = link.lock() {
                        link.characteristics = found;
                    }
                    status
                }
                Err(e) => {
                    error!("Service discovery failed: {}", e.message());
                    GattStatus::Failure(GATT_ERROR)
                }
            };
            Self::post_completion(&handle, GattEvent::ServicesDiscovered { status });
        });
        Ok(())
    }

    fn set_characteristic_notification(
        &mut self,
        sensor: &SensorDescriptor,
        enabled: bool,
    ) -> Result<(), PlatformError> {
        let uuid = sensor.characteristic;
        let characteristic = self.with_link(|link| link.characteristic(uuid))??;

        if let Some(token) = self.with_link(|link| link.value_tokens.remove(&uuid))? {
            characteristic.RemoveValueChanged(token).map_err(backend)?;
        }
        if !enabled {
            return Ok(());
        }

        let handle = self.handle.clone();
        let data_handler = TypedEventHandler::new(
            move |_: windows::core::Ref<GattCharacteristic>,
                  args: windows::core::Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let value = buffer_bytes(&args.CharacteristicValue()?)?;
                    let _ = handle.post_gatt(GattEvent::CharacteristicChanged {
                        characteristic: uuid,
                        value,
                    });
                }
                Ok(())
            },
        );
        let token = characteristic.ValueChanged(&data_handler).map_err(backend)?;
        self.with_link(|link| link.value_tokens.insert(uuid, token))?;
        Ok(())
    }

    fn write_descriptor(
        &mut self,
        sensor: &SensorDescriptor,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), PlatformError> {
        if descriptor != CLIENT_CONFIG_DESCRIPTOR {
            return Err(PlatformError::Unsupported(format!(
                "Writing descriptor {}",
                descriptor
            )));
        }
        let configuration = match ClientConfiguration::from_bytes(value) {
            Ok(ClientConfiguration::Disabled) => {
                GattClientCharacteristicConfigurationDescriptorValue::None
            }
            Ok(ClientConfiguration::Notify) => {
                GattClientCharacteristicConfigurationDescriptorValue::Notify
            }
            Ok(ClientConfiguration::Indicate) => {
                GattClientCharacteristicConfigurationDescriptorValue::Indicate
            }
            Err(e) => return Err(PlatformError::Backend(e.to_string())),
        };

        let uuid = sensor.characteristic;
        let characteristic = self.with_link(|link| link.characteristic(uuid))??;
        let handle = self.handle.clone();
        tokio::spawn(async move {
            let result = async {
                characteristic
                    .WriteClientCharacteristicConfigurationDescriptorAsync(configuration)?
                    .await
            }
            .await;
            let status = match result {
                Ok(status) => status_of(status),
                Err(e) => {
                    warn!("Descriptor write on {} failed: {}", uuid, e.message());
                    GattStatus::Failure(GATT_ERROR)
                }
            };
            Self::post_completion(
                &handle,
                GattEvent::DescriptorWritten {
                    characteristic: uuid,
                    descriptor,
                    status,
                },
            );
        });
        Ok(())
    }

    fn read_characteristic(&mut self, sensor: &SensorDescriptor) -> Result<(), PlatformError> {
        let uuid = sensor.characteristic;
        let characteristic = self.with_link(|link| link.characteristic(uuid))??;
        let handle = self.handle.clone();
        tokio::spawn(async move {
            let result = async {
                let read = characteristic
                    .ReadValueWithCacheModeAsync(BluetoothCacheMode::Uncached)?
                    .await?;
                let status = read.Status()?;
                let value = if status == GattCommunicationStatus::Success {
                    buffer_bytes(&read.Value()?)?
                } else {
                    Vec::new()
                };
                Ok::<_, windows::core::Error>((status_of(status), value))
            }
            .await;
            let (status, value) = result.unwrap_or_else(|e| {
                warn!("Read of {} failed: {}", uuid, e.message());
                (GattStatus::Failure(GATT_ERROR), Vec::new())
            });
            Self::post_completion(
                &handle,
                GattEvent::CharacteristicRead {
                    characteristic: uuid,
                    value,
                    status,
                },
            );
        });
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), PlatformError> {
        let was_open = self.with_link(|link| {
            let connecting = link.cancel_connect();
            let open = link.device.is_some();
            link.close();
            open || connecting
        })?;
        if was_open {
            info!("Disconnected from device");
            Self::post_completion(
                &self.handle,
                GattEvent::ConnectionStateChanged {
                    status: GattStatus::Success,
                    state: LinkState::Disconnected,
                },
            );
        }
        Ok(())
    }
}

impl Drop for WinRtPlatform {
    fn drop(&mut self) {
        let _ = self.stop_scan();
        if let Ok(mut link) = self.link.lock() {
            link.cancel_connect();
            link.close();
        }
    }
}
