use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Malformed payload: expected at least {expected} bytes, got {actual}")]
    MalformedPayload { expected: usize, actual: usize },

    #[error("Unknown client configuration value: {0:02X?}")]
    UnknownClientConfiguration(Vec<u8>),
}

/// Failure to hand a command to the Bluetooth stack
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("No device connected")]
    NotConnected,

    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(Uuid),

    #[error("Not supported: {0}")]
    Unsupported(String),

    #[error("Bluetooth error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("A device is already connected")]
    AlreadyConnected,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailure(String),

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("Dispatcher is no longer running")]
    Closed,
}
