//! Bluetooth Module
//!
//! Connects to a ValedoHome sensor and streams its orientation and velocity.
//!
//! ## Architecture
//!
//! ```text
//!   UI commands        platform callbacks        scan timer
//!        │                     │                      │
//!        └─────────────────────┼──────────────────────┘
//!                              ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                       Dispatcher                         │
//! │   (single mailbox, one event at a time, in order)        │
//! └─────────────┬──────────────────────────┬────────────────┘
//!               │                          │
//!               ▼                          ▼
//!        ┌────────────┐          ┌──────────────────┐
//!        │  Scanner   │          │  SessionManager  │
//!        │            │          │                  │
//!        │ - name     │          │ - GATT lifecycle │
//!        │   filter   │          │ - enablement     │
//!        └────────────┘          └────────┬─────────┘
//!                                         │ commands
//!                                         ▼
//!                                ┌──────────────────┐
//!                                │   BlePlatform    │
//!                                │ WinRT | simulated│
//!                                └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - GATT identifiers and the sample codec
//! - [`platform`] - Command/callback seam to the Bluetooth stack
//! - [`scanner`] - Device discovery
//! - [`session`] - Connection lifecycle and sensor enablement
//! - [`dispatcher`] - Event loop and observer fan-out
//! - [`simulated`] - In-process sensor
//! - `winrt` - Windows backend

pub mod dispatcher;
pub mod error;
pub mod platform;
pub mod protocol;
pub mod scanner;
pub mod session;
pub mod simulated;
#[cfg(windows)]
pub mod winrt;

pub use dispatcher::{channel, Dispatcher, DispatcherConfig, DispatcherHandle, SensorObserver};
pub use error::{CodecError, DispatchError, PlatformError, SessionError};
pub use platform::BlePlatform;

use crate::domain::settings::BackendKind;

/// Build the Bluetooth backend selected in the settings
pub fn create_platform(
    kind: BackendKind,
    handle: DispatcherHandle,
) -> Result<Box<dyn BlePlatform>, PlatformError> {
    match kind {
        BackendKind::Simulated => Ok(Box::new(simulated::SimulatedPlatform::new(handle))),
        #[cfg(windows)]
        BackendKind::Native => Ok(Box::new(winrt::WinRtPlatform::new(handle))),
        #[cfg(not(windows))]
        BackendKind::Native => Err(PlatformError::Unsupported(
            "no native Bluetooth backend on this platform, use the simulated backend".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_backend_is_always_available() {
        let (handle, _inbox) = channel();
        assert!(create_platform(BackendKind::Simulated, handle).is_ok());
    }

    #[cfg(not(windows))]
    #[test]
    fn test_native_backend_unsupported() {
        let (handle, _inbox) = channel();
        assert!(matches!(
            create_platform(BackendKind::Native, handle),
            Err(PlatformError::Unsupported(_))
        ));
    }
}
