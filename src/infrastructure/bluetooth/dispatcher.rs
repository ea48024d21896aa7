//! Event Dispatcher
//!
//! Single ordered processing point for everything that touches the scanner
//! and the session. Platform callbacks, user commands and the scan timer all
//! arrive through one mailbox and are handled one at a time, in arrival
//! order, on the dispatcher task. Results are fanned out to the registered
//! [`SensorObserver`]s from that same task.

use crate::domain::models::{
    AppEvent, BluetoothCommand, ConnectionStatus, DiscoveredDevice, MessageSeverity,
    OrientationSample, StatusMessage, VelocitySample,
};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::error::{DispatchError, SessionError};
use crate::infrastructure::bluetooth::platform::{BlePlatform, GattEvent, PlatformEvent};
use crate::infrastructure::bluetooth::protocol::sensor_descriptors;
use crate::infrastructure::bluetooth::scanner::Scanner;
use crate::infrastructure::bluetooth::session::{SessionManager, SessionState};
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Display-side consumer of the core's output
pub trait SensorObserver: Send {
    fn on_orientation(&mut self, _sample: &OrientationSample) {}
    fn on_velocity(&mut self, _sample: &VelocitySample) {}
    fn on_progress(&mut self, _message: &str) {}
    fn on_sensors_ready(&mut self) {}
    fn on_cleared(&mut self) {}
    fn on_device_found(&mut self, _device: &DiscoveredDevice) {}
    fn on_scan_status(&mut self, _scanning: bool) {}
    fn on_connection_status(&mut self, _status: ConnectionStatus) {}
    fn on_message(&mut self, _message: &StatusMessage) {}
}

/// Forwards everything to another task's event loop
impl SensorObserver for mpsc::UnboundedSender<AppEvent> {
    fn on_orientation(&mut self, sample: &OrientationSample) {
        let _ = self.send(AppEvent::Orientation(*sample));
    }

    fn on_velocity(&mut self, sample: &VelocitySample) {
        let _ = self.send(AppEvent::Velocity(*sample));
    }

    fn on_progress(&mut self, message: &str) {
        let _ = self.send(AppEvent::Progress(message.to_string()));
    }

    fn on_sensors_ready(&mut self) {
        let _ = self.send(AppEvent::SensorsReady);
    }

    fn on_cleared(&mut self) {
        let _ = self.send(AppEvent::Cleared);
    }

    fn on_device_found(&mut self, device: &DiscoveredDevice) {
        let _ = self.send(AppEvent::DeviceFound(device.clone()));
    }

    fn on_scan_status(&mut self, scanning: bool) {
        let _ = self.send(AppEvent::ScanStatus(scanning));
    }

    fn on_connection_status(&mut self, status: ConnectionStatus) {
        let _ = self.send(AppEvent::ConnectionStatus(status));
    }

    fn on_message(&mut self, message: &StatusMessage) {
        let _ = self.send(AppEvent::LogMessage(message.clone()));
    }
}

#[derive(Default)]
pub struct Publisher {
    observers: Vec<Box<dyn SensorObserver>>,
}

impl Publisher {
    pub fn subscribe(&mut self, observer: Box<dyn SensorObserver>) {
        self.observers.push(observer);
    }

    pub fn orientation(&mut self, sample: OrientationSample) {
        self.observers.iter_mut().for_each(|o| o.on_orientation(&sample));
    }

    pub fn velocity(&mut self, sample: VelocitySample) {
        self.observers.iter_mut().for_each(|o| o.on_velocity(&sample));
    }

    pub fn progress(&mut self, message: &str) {
        self.observers.iter_mut().for_each(|o| o.on_progress(message));
    }

    pub fn sensors_ready(&mut self) {
        self.observers.iter_mut().for_each(|o| o.on_sensors_ready());
    }

    pub fn cleared(&mut self) {
        self.observers.iter_mut().for_each(|o| o.on_cleared());
    }

    pub fn device_found(&mut self, device: &DiscoveredDevice) {
        self.observers.iter_mut().for_each(|o| o.on_device_found(device));
    }

    pub fn scan_status(&mut self, scanning: bool) {
        self.observers.iter_mut().for_each(|o| o.on_scan_status(scanning));
    }

    pub fn connection_status(&mut self, status: ConnectionStatus) {
        self.observers
            .iter_mut()
            .for_each(|o| o.on_connection_status(status));
    }

    pub fn message(&mut self, message: &str, severity: MessageSeverity) {
        let message = StatusMessage {
            message: message.to_string(),
            severity,
        };
        self.observers.iter_mut().for_each(|o| o.on_message(&message));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    Platform(PlatformEvent),
    Command(BluetoothCommand),
    ScanTimeout { generation: u64 },
}

/// Sending side of the dispatcher mailbox, handed to backends and the UI
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::UnboundedSender<DispatchEvent>,
}

impl DispatcherHandle {
    pub fn send_command(&self, command: BluetoothCommand) -> Result<(), DispatchError> {
        self.tx
            .send(DispatchEvent::Command(command))
            .map_err(|_| DispatchError::Closed)
    }

    pub fn post(&self, event: PlatformEvent) -> Result<(), DispatchError> {
        self.tx
            .send(DispatchEvent::Platform(event))
            .map_err(|_| DispatchError::Closed)
    }

    pub fn post_gatt(&self, event: GattEvent) -> Result<(), DispatchError> {
        self.post(PlatformEvent::Gatt(event))
    }
}

pub struct Inbox {
    rx: mpsc::UnboundedReceiver<DispatchEvent>,
    // Weak so the loop ends once every external handle is gone
    timer_tx: mpsc::WeakUnboundedSender<DispatchEvent>,
}

impl Inbox {
    pub async fn recv(&mut self) -> Option<DispatchEvent> {
        self.rx.recv().await
    }
}

pub fn channel() -> (DispatcherHandle, Inbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    let timer_tx = tx.downgrade();
    (DispatcherHandle { tx }, Inbox { rx, timer_tx })
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub device_name: String,
    pub scan_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for DispatcherConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            device_name: settings.device_name.clone(),
            scan_timeout: Duration::from_millis(settings.scan_timeout_ms),
        }
    }
}

pub struct Dispatcher<P: BlePlatform> {
    platform: P,
    inbox: Inbox,
    config: DispatcherConfig,
    scanner: Scanner,
    session: SessionManager,
    publisher: Publisher,
    scan_timer: Option<JoinHandle<()>>,
    scan_generation: u64,
}

impl<P: BlePlatform> Dispatcher<P> {
    pub fn new(platform: P, inbox: Inbox, config: DispatcherConfig) -> Self {
        Self {
            platform,
            inbox,
            scanner: Scanner::new(config.device_name.clone()),
            session: SessionManager::new(sensor_descriptors()),
            publisher: Publisher::default(),
            config,
            scan_timer: None,
            scan_generation: 0,
        }
    }

    pub fn subscribe(&mut self, observer: Box<dyn SensorObserver>) {
        self.publisher.subscribe(observer);
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Process mailbox events until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        info!("Dispatcher started");
        while let Some(event) = self.inbox.recv().await {
            if self.dispatch(event).is_break() {
                break;
            }
        }
        self.shutdown();
        info!("Dispatcher stopped");
    }

    /// Handle a single event. Must be called from within a Tokio runtime.
    pub fn dispatch(&mut self, event: DispatchEvent) -> ControlFlow<()> {
        match event {
            DispatchEvent::Platform(PlatformEvent::DeviceDiscovered {
                id,
                name,
                rssi,
                advertisement,
            }) => {
                debug!("Advertisement from {}: {} bytes", id, advertisement.len());
                self.scanner
                    .on_device_discovered(&id, name.as_deref(), rssi, &mut self.publisher);
            }
            DispatchEvent::Platform(PlatformEvent::Gatt(event)) => {
                self.session
                    .handle_gatt_event(&mut self.platform, event, &mut self.publisher);
            }
            DispatchEvent::ScanTimeout { generation } => {
                if generation == self.scan_generation {
                    info!("Scan timed out");
                    self.scan_timer = None;
                    self.stop_scan();
                } else {
                    debug!("Ignoring timeout of earlier scan {}", generation);
                }
            }
            DispatchEvent::Command(command) => return self.handle_command(command),
        }
        ControlFlow::Continue(())
    }

    fn handle_command(&mut self, command: BluetoothCommand) -> ControlFlow<()> {
        info!("Command: {:?}", command);
        match command {
            BluetoothCommand::StartScan => self.start_scan(),
            BluetoothCommand::StopScan => {
                self.cancel_scan_timer();
                self.stop_scan();
            }
            BluetoothCommand::Connect(device_id) => self.connect(&device_id),
            BluetoothCommand::Disconnect => {
                self.session.disconnect(&mut self.platform, &mut self.publisher)
            }
            BluetoothCommand::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    fn start_scan(&mut self) {
        match self.scanner.start(&mut self.platform, &mut self.publisher) {
            Ok(()) => self.arm_scan_timer(),
            Err(e) => {
                error!("Failed to start scan: {}", e);
                self.publisher
                    .message(&format!("Failed to start scan: {}", e), MessageSeverity::Error);
            }
        }
    }

    fn stop_scan(&mut self) {
        if let Err(e) = self.scanner.stop(&mut self.platform, &mut self.publisher) {
            error!("Failed to stop scan: {}", e);
        }
    }

    fn connect(&mut self, device_id: &str) {
        let result = match self.scanner.device(device_id).cloned() {
            Some(device) => self
                .session
                .connect(&mut self.platform, device, &mut self.publisher),
            None => Err(SessionError::DeviceNotFound(device_id.to_string())),
        };

        if let Err(e) = result {
            warn!("Connect to {} failed: {}", device_id, e);
            let severity = match e {
                SessionError::AlreadyConnected => MessageSeverity::Warning,
                _ => MessageSeverity::Error,
            };
            self.publisher.message(&e.to_string(), severity);
        }
    }

    fn arm_scan_timer(&mut self) {
        self.cancel_scan_timer();
        self.scan_generation += 1;
        let generation = self.scan_generation;

        let Some(tx) = self.inbox.timer_tx.upgrade() else {
            return;
        };
        let timeout = self.config.scan_timeout;
        self.scan_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(DispatchEvent::ScanTimeout { generation });
        }));
    }

    fn cancel_scan_timer(&mut self) {
        if let Some(timer) = self.scan_timer.take() {
            timer.abort();
        }
    }

    /// Cancel the scan and drop the session.
    pub fn shutdown(&mut self) {
        self.cancel_scan_timer();
        self.stop_scan();
        self.session.stop(&mut self.platform, &mut self.publisher);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::OrientationSample;
    use crate::infrastructure::bluetooth::platform::testing::{Issued, RecordingPlatform};
    use crate::infrastructure::bluetooth::platform::{GattStatus, LinkState};
    use crate::infrastructure::bluetooth::protocol::{
        encode_sample, CLIENT_CONFIG_DESCRIPTOR, HIGH_PASS_VELOCITY, ORIENTATION,
    };

    fn discovered(id: &str, name: &str) -> DispatchEvent {
        DispatchEvent::Platform(PlatformEvent::DeviceDiscovered {
            id: id.to_string(),
            name: Some(name.to_string()),
            rssi: -55,
            advertisement: Vec::new(),
        })
    }

    fn gatt(event: GattEvent) -> DispatchEvent {
        DispatchEvent::Platform(PlatformEvent::Gatt(event))
    }

    fn command(command: BluetoothCommand) -> DispatchEvent {
        DispatchEvent::Command(command)
    }

    fn dispatcher(
        scan_timeout: Duration,
    ) -> (
        Dispatcher<RecordingPlatform>,
        DispatcherHandle,
        mpsc::UnboundedReceiver<AppEvent>,
    ) {
        let (handle, inbox) = channel();
        let config = DispatcherConfig {
            device_name: "ValedoHome".to_string(),
            scan_timeout,
        };
        let mut dispatcher = Dispatcher::new(RecordingPlatform::default(), inbox, config);
        let (tx, rx) = mpsc::unbounded_channel();
        dispatcher.subscribe(Box::new(tx));
        (dispatcher, handle, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<AppEvent>) -> Vec<AppEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_full_enablement_in_arrival_order() {
        let (mut d, _handle, mut rx) = dispatcher(Duration::from_secs(60));

        let events = vec![
            command(BluetoothCommand::StartScan),
            discovered("dev-1", "ValedoHome"),
            command(BluetoothCommand::Connect("dev-1".to_string())),
            gatt(GattEvent::ConnectionStateChanged {
                status: GattStatus::Success,
                state: LinkState::Connected,
            }),
            gatt(GattEvent::ServicesDiscovered {
                status: GattStatus::Success,
            }),
            gatt(GattEvent::DescriptorWritten {
                characteristic: ORIENTATION,
                descriptor: CLIENT_CONFIG_DESCRIPTOR,
                status: GattStatus::Success,
            }),
            gatt(GattEvent::DescriptorWritten {
                characteristic: HIGH_PASS_VELOCITY,
                descriptor: CLIENT_CONFIG_DESCRIPTOR,
                status: GattStatus::Success,
            }),
            gatt(GattEvent::CharacteristicChanged {
                characteristic: ORIENTATION,
                value: encode_sample([1.0, 0.0, 0.0, 0.0]).to_vec(),
            }),
        ];
        for event in events {
            assert!(d.dispatch(event).is_continue());
        }

        assert_eq!(d.session_state(), SessionState::Ready);
        let out = drain(&mut rx);
        let ready = out.iter().position(|e| *e == AppEvent::SensorsReady).unwrap();
        let sample = out
            .iter()
            .position(|e| *e == AppEvent::Orientation(OrientationSample::new(1.0, 0.0, 0.0, 0.0)))
            .unwrap();
        assert!(ready < sample);
        d.shutdown();
    }

    #[tokio::test]
    async fn test_connect_to_unknown_device_reports_error() {
        let (mut d, _handle, mut rx) = dispatcher(Duration::from_secs(60));
        assert!(d.dispatch(command(BluetoothCommand::Connect("nope".to_string()))).is_continue());

        assert_eq!(d.session_state(), SessionState::Disconnected);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [AppEvent::LogMessage(StatusMessage {
                severity: MessageSeverity::Error,
                ..
            })]
        ));
    }

    #[tokio::test]
    async fn test_second_connect_reports_already_connected() {
        let (mut d, _handle, mut rx) = dispatcher(Duration::from_secs(60));
        assert!(d.dispatch(command(BluetoothCommand::StartScan)).is_continue());
        assert!(d.dispatch(discovered("dev-1", "ValedoHome")).is_continue());
        assert!(d.dispatch(discovered("dev-2", "ValedoHome")).is_continue());
        assert!(d.dispatch(command(BluetoothCommand::Connect("dev-1".to_string()))).is_continue());
        drain(&mut rx);

        assert!(d.dispatch(command(BluetoothCommand::Connect("dev-2".to_string()))).is_continue());
        let out = drain(&mut rx);
        assert!(matches!(
            out.as_slice(),
            [AppEvent::LogMessage(StatusMessage {
                severity: MessageSeverity::Warning,
                ..
            })]
        ));
        assert_eq!(
            d.session().session().map(|s| s.device().id.clone()),
            Some("dev-1".to_string())
        );
        d.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_stops_after_timeout() {
        let (mut d, _handle, mut rx) = dispatcher(Duration::from_millis(2500));
        assert!(d.dispatch(command(BluetoothCommand::StartScan)).is_continue());
        assert!(d.scanner().is_scanning());

        let timeout = tokio::time::timeout(Duration::from_secs(5), d.inbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(timeout, DispatchEvent::ScanTimeout { generation: 1 });
        assert!(d.dispatch(timeout).is_continue());

        assert!(!d.scanner().is_scanning());
        assert_eq!(
            drain(&mut rx),
            vec![AppEvent::ScanStatus(true), AppEvent::ScanStatus(false)]
        );
    }

    #[tokio::test]
    async fn test_timeout_from_earlier_scan_is_ignored() {
        let (mut d, _handle, _rx) = dispatcher(Duration::from_secs(60));
        assert!(d.dispatch(command(BluetoothCommand::StartScan)).is_continue());
        assert!(d.dispatch(command(BluetoothCommand::StartScan)).is_continue());

        assert!(d.dispatch(DispatchEvent::ScanTimeout { generation: 1 }).is_continue());
        assert!(d.scanner().is_scanning());

        assert!(d.dispatch(DispatchEvent::ScanTimeout { generation: 2 }).is_continue());
        assert!(!d.scanner().is_scanning());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_scan_and_session() {
        let (mut d, _handle, mut rx) = dispatcher(Duration::from_secs(60));
        assert!(d.dispatch(command(BluetoothCommand::StartScan)).is_continue());
        assert!(d.dispatch(discovered("dev-1", "ValedoHome")).is_continue());
        assert!(d.dispatch(command(BluetoothCommand::Connect("dev-1".to_string()))).is_continue());
        drain(&mut rx);

        assert!(d.dispatch(command(BluetoothCommand::Shutdown)).is_break());
        d.shutdown();

        assert!(d.scan_timer.is_none());
        assert!(!d.scanner().is_scanning());
        assert!(!d.session().is_active());
        let issued = &d.platform().issued;
        assert_eq!(
            &issued[issued.len() - 2..],
            &[Issued::StopScan, Issued::Disconnect]
        );
        assert!(drain(&mut rx).contains(&AppEvent::Cleared));
    }

    #[tokio::test]
    async fn test_run_ends_when_handles_are_dropped() {
        let (d, handle, _rx) = dispatcher(Duration::from_secs(60));
        let task = tokio::spawn(d.run());
        handle
            .post(PlatformEvent::DeviceDiscovered {
                id: "x".to_string(),
                name: None,
                rssi: -90,
                advertisement: Vec::new(),
            })
            .unwrap();
        drop(handle);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
