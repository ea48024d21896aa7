//! Connection Session Module
//!
//! Owns the single GATT session: connect, service discovery, sensor
//! enablement and teardown. Any non-success status ends the session; there is
//! no automatic retry.

use crate::domain::enablement::{Action, EnablementMachine};
use crate::domain::models::{
    ConnectionStatus, DiscoveredDevice, MessageSeverity, SensorDescriptor, SensorKind,
};
use crate::infrastructure::bluetooth::dispatcher::Publisher;
use crate::infrastructure::bluetooth::error::SessionError;
use crate::infrastructure::bluetooth::platform::{BlePlatform, GattEvent, GattStatus, LinkState};
use crate::infrastructure::bluetooth::protocol::{
    self, notification_enable_payload, CLIENT_CONFIG_DESCRIPTOR,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    ServiceDiscovery,
    Enabling,
    Ready,
    Disconnecting,
    Disconnected,
}

/// The one live connection and its enablement progress
#[derive(Debug)]
pub struct ConnectionSession {
    device: DiscoveredDevice,
    state: SessionState,
    enablement: EnablementMachine,
}

impl ConnectionSession {
    pub fn device(&self) -> &DiscoveredDevice {
        &self.device
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn enablement(&self) -> &EnablementMachine {
        &self.enablement
    }
}

pub struct SessionManager {
    descriptors: Vec<SensorDescriptor>,
    session: Option<ConnectionSession>,
}

impl SessionManager {
    pub fn new(descriptors: Vec<SensorDescriptor>) -> Self {
        Self {
            descriptors,
            session: None,
        }
    }

    pub fn session(&self) -> Option<&ConnectionSession> {
        self.session.as_ref()
    }

    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(SessionState::Disconnected)
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Open a connection to `device`. Fails without side effects when a
    /// session already exists.
    pub fn connect<P: BlePlatform + ?Sized>(
        &mut self,
        platform: &mut P,
        device: DiscoveredDevice,
        publisher: &mut Publisher,
    ) -> Result<(), SessionError> {
        if let Some(session) = &self.session {
            warn!(
                "Refusing to connect to {}: session with {} is {:?}",
                device.id, session.device.id, session.state
            );
            return Err(SessionError::AlreadyConnected);
        }

        info!("Connecting to {} ({})", device.display_name, device.id);
        platform.connect(&device.id)?;

        publisher.progress(&format!("Connecting to {}...", device.display_name));
        publisher.connection_status(ConnectionStatus::Connecting);
        self.session = Some(ConnectionSession {
            device,
            state: SessionState::Connecting,
            enablement: EnablementMachine::new(self.descriptors.clone()),
        });
        Ok(())
    }

    /// User-requested disconnect; the session ends when the stack confirms.
    pub fn disconnect<P: BlePlatform + ?Sized>(
        &mut self,
        platform: &mut P,
        publisher: &mut Publisher,
    ) {
        let Some(session) = self.session.as_mut() else {
            debug!("Disconnect requested without a session");
            return;
        };
        if session.state == SessionState::Disconnecting {
            return;
        }
        info!("Disconnecting from {}", session.device.id);
        session.state = SessionState::Disconnecting;
        publisher.connection_status(ConnectionStatus::Disconnecting);
        if let Err(e) = platform.disconnect() {
            warn!("Disconnect failed: {}", e);
            self.finish_teardown(publisher);
        }
    }

    /// Drop the session immediately. Safe to call without a session.
    pub fn stop<P: BlePlatform + ?Sized>(
        &mut self,
        platform: &mut P,
        publisher: &mut Publisher,
    ) {
        if self.session.is_none() {
            return;
        }
        info!("Stopping session");
        if let Err(e) = platform.disconnect() {
            warn!("Disconnect on stop failed: {}", e);
        }
        self.finish_teardown(publisher);
    }

    pub fn handle_gatt_event<P: BlePlatform + ?Sized>(
        &mut self,
        platform: &mut P,
        event: GattEvent,
        publisher: &mut Publisher,
    ) {
        if self.session.is_none() {
            debug!("Ignoring {:?} without a session", event);
            return;
        }
        // Only the link-down confirmation matters once teardown has started
        if self.state() == SessionState::Disconnecting
            && !matches!(
                event,
                GattEvent::ConnectionStateChanged {
                    state: LinkState::Disconnected,
                    ..
                }
            )
        {
            debug!("Ignoring {:?} while disconnecting", event);
            return;
        }

        match event {
            GattEvent::ConnectionStateChanged { status, state } => {
                self.on_connection_state_changed(platform, status, state, publisher)
            }
            GattEvent::ServicesDiscovered { status } => {
                self.on_services_discovered(platform, status, publisher)
            }
            GattEvent::DescriptorWritten {
                characteristic,
                descriptor,
                status,
            } => {
                info!("onDescriptorWrite {} / {}", characteristic, descriptor);
                if !status.is_success() {
                    return self.fail(platform, status, "descriptor write", publisher);
                }
                let actions = self
                    .session
                    .as_mut()
                    .map(|s| s.enablement.on_descriptor_written(characteristic))
                    .unwrap_or_default();
                self.apply(platform, actions, publisher);
            }
            GattEvent::CharacteristicRead {
                characteristic,
                value,
                status,
            } => {
                info!("onCharacteristicRead {}", characteristic);
                if !status.is_success() {
                    return self.fail(platform, status, "characteristic read", publisher);
                }
                Self::publish_value(characteristic, &value, publisher);
                let actions = self
                    .session
                    .as_mut()
                    .map(|s| s.enablement.on_characteristic_read(characteristic))
                    .unwrap_or_default();
                self.apply(platform, actions, publisher);
            }
            GattEvent::CharacteristicWritten {
                characteristic,
                status,
            } => {
                info!("onCharacteristicWrite {}", characteristic);
                if !status.is_success() {
                    self.fail(platform, status, "characteristic write", publisher);
                }
            }
            GattEvent::CharacteristicChanged {
                characteristic,
                value,
            } => {
                debug!("onCharacteristicChanged {}", characteristic);
                Self::publish_value(characteristic, &value, publisher);
            }
            GattEvent::RemoteRssi { rssi, status } => {
                debug!("Remote RSSI: {} ({:?})", rssi, status);
                if !status.is_success() {
                    self.fail(platform, status, "remote RSSI read", publisher);
                }
            }
        }
    }

    fn on_connection_state_changed<P: BlePlatform + ?Sized>(
        &mut self,
        platform: &mut P,
        status: GattStatus,
        state: LinkState,
        publisher: &mut Publisher,
    ) {
        info!("Connection State Change: {:?} -> {:?}", status, state);
        match (status, state) {
            (GattStatus::Success, LinkState::Connected) => {
                if self.state() != SessionState::Connecting {
                    debug!("Already connected, state is {:?}", self.state());
                    return;
                }
                if let Err(e) = platform.discover_services() {
                    warn!("Service discovery could not start: {}", e);
                    return self.fail(
                        platform,
                        GattStatus::Failure(0),
                        "service discovery",
                        publisher,
                    );
                }
                if let Some(session) = self.session.as_mut() {
                    session.state = SessionState::ServiceDiscovery;
                }
                publisher.connection_status(ConnectionStatus::Connected);
                publisher.progress("Discovering Services...");
            }
            (GattStatus::Success, LinkState::Disconnected) => {
                self.finish_teardown(publisher);
            }
            (GattStatus::Success, other) => {
                debug!("Link is {:?}", other);
            }
            (failure, LinkState::Disconnected) => {
                // Link is already gone; release the handle and clear right away
                warn!("Connection lost with status {:?}", failure);
                if let Err(e) = platform.disconnect() {
                    warn!("Disconnect failed: {}", e);
                }
                self.finish_teardown(publisher);
            }
            (failure, _) => self.fail(platform, failure, "connection state change", publisher),
        }
    }

    fn on_services_discovered<P: BlePlatform + ?Sized>(
        &mut self,
        platform: &mut P,
        status: GattStatus,
        publisher: &mut Publisher,
    ) {
        info!("Services Discovered: {:?}", status);
        if self.state() != SessionState::ServiceDiscovery {
            debug!("Ignoring service discovery in state {:?}", self.state());
            return;
        }
        if !status.is_success() {
            return self.fail(platform, status, "service discovery", publisher);
        }

        let actions = match self.session.as_mut() {
            Some(session) => {
                session.state = SessionState::Enabling;
                session.enablement.reset();
                session.enablement.enable_current()
            }
            None => return,
        };
        publisher.progress("Reading Sensors...");
        self.apply(platform, actions, publisher);
    }

    fn apply<P: BlePlatform + ?Sized>(
        &mut self,
        platform: &mut P,
        actions: Vec<Action>,
        publisher: &mut Publisher,
    ) {
        for action in actions {
            let issued = match action {
                Action::EnableNotification(sensor) => platform
                    .set_characteristic_notification(&sensor, true)
                    .and_then(|_| {
                        platform.write_descriptor(
                            &sensor,
                            CLIENT_CONFIG_DESCRIPTOR,
                            &notification_enable_payload(),
                        )
                    }),
                Action::Read(sensor) => {
                    debug!("Reading {:?}", sensor.kind);
                    platform.read_characteristic(&sensor)
                }
                Action::AllEnabled => {
                    if let Some(session) = self.session.as_mut() {
                        session.state = SessionState::Ready;
                    }
                    publisher.connection_status(ConnectionStatus::Ready);
                    publisher.sensors_ready();
                    Ok(())
                }
            };

            if let Err(e) = issued {
                warn!("Could not issue {:?}: {}", action, e);
                return self.fail(platform, GattStatus::Failure(0), "command issue", publisher);
            }
        }
    }

    /// Fatal for the session: disconnect, wait for the stack to confirm.
    fn fail<P: BlePlatform + ?Sized>(
        &mut self,
        platform: &mut P,
        status: GattStatus,
        stage: &str,
        publisher: &mut Publisher,
    ) {
        let error = SessionError::ConnectionFailure(format!("{} returned {:?}", stage, status));
        warn!("{}", error);
        publisher.message(&error.to_string(), MessageSeverity::Error);

        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.state == SessionState::Disconnecting {
            return;
        }
        session.state = SessionState::Disconnecting;
        publisher.connection_status(ConnectionStatus::Disconnecting);
        if let Err(e) = platform.disconnect() {
            warn!("Disconnect failed: {}", e);
            self.finish_teardown(publisher);
        }
    }

    fn finish_teardown(&mut self, publisher: &mut Publisher) {
        if let Some(session) = self.session.take() {
            info!("Session with {} closed", session.device.id);
        }
        publisher.connection_status(ConnectionStatus::Disconnected);
        publisher.cleared();
    }

    fn publish_value(characteristic: Uuid, value: &[u8], publisher: &mut Publisher) {
        match protocol::sensor_kind(characteristic) {
            Some(SensorKind::Orientation) => match protocol::decode_quaternion(value) {
                Ok(sample) => publisher.orientation(sample),
                Err(e) => warn!("Dropping orientation sample: {}", e),
            },
            Some(SensorKind::HighPassVelocity) => match protocol::decode_velocity(value) {
                Ok(sample) => publisher.velocity(sample),
                Err(e) => warn!("Dropping velocity sample: {}", e),
            },
            None => debug!("Value for unexpected characteristic {}", characteristic),
        }
    }
}
