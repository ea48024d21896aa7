//! ValedoHome Sensor Protocol
//!
//! GATT identifiers exposed by the ValedoHome sensor and the codec for the
//! values carried by its characteristics.

use crate::domain::models::{OrientationSample, SensorDescriptor, SensorKind, VelocitySample};
use crate::infrastructure::bluetooth::error::CodecError;
use uuid::Uuid;

/// Advertised name of the sensor
pub const DEVICE_NAME: &str = "ValedoHome";

// Device Configuration service
pub const DEVICE_CONFIGURATION: Uuid = Uuid::from_u128(0x14a1893f_9b14_4b60_a530_97a302993374);
pub const POWER_CONTROL: Uuid = Uuid::from_u128(0x97f6bc36_00f3_4730_aab8_bb33836c14aa);
pub const LED_STATE: Uuid = Uuid::from_u128(0xee5159fe_4a05_4aab_833d_9f88b5a42b48);
pub const LOCAL_NAME: Uuid = Uuid::from_u128(0x69a53fba_f69c_454b_9b3b_fd8d33128dad);
pub const SELF_TEST_REPORT: Uuid = Uuid::from_u128(0x5e8236b8_b94d_4a65_8b9f_2ddaa6d69bb7);
pub const HEADING_REDEFINITION_CONTROL: Uuid =
    Uuid::from_u128(0x4ec79fb8_88bf_4392_84ec_a0475823f8fb);

// Awinda service
pub const AWINDA_SERVICE: Uuid = Uuid::from_u128(0xe8a68b2a_b616_45c0_b8d0_d9ddf447731e);
pub const ORIENTATION: Uuid = Uuid::from_u128(0xcf54bf43_3d66_4666_8fd3_7df5788b73c1);
pub const HIGH_PASS_VELOCITY: Uuid = Uuid::from_u128(0x1a431fae_e870_485a_aba3_89b3b525c570);

/// Standard Client Characteristic Configuration descriptor
pub const CLIENT_CONFIG_DESCRIPTOR: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// Size of a four-float sample payload
pub const SAMPLE_PAYLOAD_LEN: usize = 16;

/// Sensors in the order they are enabled
pub fn sensor_descriptors() -> Vec<SensorDescriptor> {
    vec![
        SensorDescriptor {
            service: AWINDA_SERVICE,
            characteristic: ORIENTATION,
            kind: SensorKind::Orientation,
        },
        SensorDescriptor {
            service: AWINDA_SERVICE,
            characteristic: HIGH_PASS_VELOCITY,
            kind: SensorKind::HighPassVelocity,
        },
    ]
}

/// Which sensor a characteristic carries, if it is one of ours
pub fn sensor_kind(characteristic: Uuid) -> Option<SensorKind> {
    if characteristic == ORIENTATION {
        Some(SensorKind::Orientation)
    } else if characteristic == HIGH_PASS_VELOCITY {
        Some(SensorKind::HighPassVelocity)
    } else {
        None
    }
}

/// Value of a Client Characteristic Configuration descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientConfiguration {
    Disabled,
    Notify,
    Indicate,
}

impl ClientConfiguration {
    pub fn to_bytes(&self) -> [u8; 2] {
        match self {
            Self::Disabled => [0x00, 0x00],
            Self::Notify => [0x01, 0x00],
            Self::Indicate => [0x02, 0x00],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        match bytes {
            [0x00, 0x00] => Ok(Self::Disabled),
            [0x01, 0x00] => Ok(Self::Notify),
            [0x02, 0x00] => Ok(Self::Indicate),
            other => Err(CodecError::UnknownClientConfiguration(other.to_vec())),
        }
    }
}

/// Descriptor value that switches notifications on
pub fn notification_enable_payload() -> [u8; 2] {
    ClientConfiguration::Notify.to_bytes()
}

/// Four little-endian `f32`s at byte offsets 0, 4, 8 and 12.
///
/// ```text
/// [0-3]   : w (f32 little-endian)
/// [4-7]   : x
/// [8-11]  : y
/// [12-15] : z
/// [16..]  : ignored
/// ```
fn read_four_floats(bytes: &[u8]) -> Result<[f32; 4], CodecError> {
    if bytes.len() < SAMPLE_PAYLOAD_LEN {
        return Err(CodecError::MalformedPayload {
            expected: SAMPLE_PAYLOAD_LEN,
            actual: bytes.len(),
        });
    }

    #[cfg(debug_assertions)]
    tracing::trace!("Raw sample: {:02X?}", &bytes[..SAMPLE_PAYLOAD_LEN]);

    let float_at = |offset: usize| {
        f32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ])
    };
    Ok([float_at(0), float_at(4), float_at(8), float_at(12)])
}

pub fn decode_quaternion(bytes: &[u8]) -> Result<OrientationSample, CodecError> {
    let [w, x, y, z] = read_four_floats(bytes)?;
    Ok(OrientationSample { w, x, y, z })
}

pub fn decode_velocity(bytes: &[u8]) -> Result<VelocitySample, CodecError> {
    let [w, x, y, z] = read_four_floats(bytes)?;
    Ok(VelocitySample { w, x, y, z })
}

/// Inverse of the sample layout, used by the simulated sensor
pub fn encode_sample(components: [f32; 4]) -> [u8; SAMPLE_PAYLOAD_LEN] {
    let mut bytes = [0u8; SAMPLE_PAYLOAD_LEN];
    for (chunk, value) in bytes.chunks_exact_mut(4).zip(components) {
        chunk.copy_from_slice(&value.to_le_bytes());
    }
    bytes
}
