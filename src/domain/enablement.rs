//! Sensor Enablement
//!
//! Walks the fixed sensor list one entry at a time. For the current sensor it
//! asks for notifications to be switched on (local flag plus the remote
//! client configuration descriptor) and for an explicit read of the current
//! value. The descriptor write completing moves the machine to the next
//! sensor; once every sensor is enabled the machine reports it exactly once.
//!
//! The machine only decides; it never talks to a Bluetooth stack. Callers
//! execute the returned [`Action`]s.

use crate::domain::models::SensorDescriptor;
use tracing::{debug, info};
use uuid::Uuid;

/// Work the caller has to carry out after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Enable local notifications and write the enable value to the
    /// characteristic's client configuration descriptor
    EnableNotification(SensorDescriptor),
    /// Read the characteristic's current value
    Read(SensorDescriptor),
    /// Every sensor has been enabled
    AllEnabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnablementState {
    /// Reset, nothing issued yet
    Idle,
    /// Enable cycle for the sensor at this index is in flight
    Enabling(usize),
    Complete,
}

#[derive(Debug, Clone)]
pub struct EnablementMachine {
    descriptors: Vec<SensorDescriptor>,
    index: usize,
    awaiting_write: bool,
    awaiting_read: bool,
    ready_signalled: bool,
}

impl EnablementMachine {
    pub fn new(descriptors: Vec<SensorDescriptor>) -> Self {
        Self {
            descriptors,
            index: 0,
            awaiting_write: false,
            awaiting_read: false,
            ready_signalled: false,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.index >= self.descriptors.len()
    }

    pub fn state(&self) -> EnablementState {
        if self.is_complete() {
            EnablementState::Complete
        } else if self.index == 0 && !self.in_flight() {
            EnablementState::Idle
        } else {
            EnablementState::Enabling(self.index)
        }
    }

    /// Descriptor whose enable cycle is currently running
    pub fn current(&self) -> Option<&SensorDescriptor> {
        self.descriptors.get(self.index)
    }

    fn in_flight(&self) -> bool {
        self.awaiting_write || self.awaiting_read
    }

    pub fn reset(&mut self) {
        self.index = 0;
        self.awaiting_write = false;
        self.awaiting_read = false;
        self.ready_signalled = false;
    }

    fn advance(&mut self) {
        self.index += 1;
        self.awaiting_write = false;
        self.awaiting_read = false;
    }

    /// Start the enable cycle for the current sensor.
    ///
    /// Issues nothing while a cycle for this index is still in flight. Past
    /// the last sensor it yields [`Action::AllEnabled`] the first time only.
    pub fn enable_current(&mut self) -> Vec<Action> {
        let Some(descriptor) = self.descriptors.get(self.index).copied() else {
            if self.ready_signalled {
                debug!("All sensors already enabled");
                return Vec::new();
            }
            self.ready_signalled = true;
            info!("All Sensors Enabled");
            return vec![Action::AllEnabled];
        };

        if self.in_flight() {
            debug!(
                "Enable cycle for sensor {} ({:?}) still in flight",
                self.index, descriptor.kind
            );
            return Vec::new();
        }

        info!("Set notify {:?} (sensor {})", descriptor.kind, self.index);
        self.awaiting_write = true;
        self.awaiting_read = true;
        vec![
            Action::EnableNotification(descriptor),
            Action::Read(descriptor),
        ]
    }

    fn is_current(&self, characteristic: Uuid) -> bool {
        self.current()
            .map(|d| d.characteristic == characteristic)
            .unwrap_or(false)
    }

    /// The enable value has been written for `characteristic`.
    pub fn on_descriptor_written(&mut self, characteristic: Uuid) -> Vec<Action> {
        if !self.awaiting_write || !self.is_current(characteristic) {
            debug!("Ignoring stale descriptor write for {}", characteristic);
            return Vec::new();
        }
        self.advance();
        self.enable_current()
    }

    /// The explicit read of `characteristic` has completed.
    ///
    /// Re-drives the current sensor, which is a no-op while its descriptor
    /// write is outstanding.
    pub fn on_characteristic_read(&mut self, characteristic: Uuid) -> Vec<Action> {
        if !self.awaiting_read || !self.is_current(characteristic) {
            debug!("Ignoring stale read completion for {}", characteristic);
            return Vec::new();
        }
        self.awaiting_read = false;
        self.enable_current()
    }
}
