//! GATT profile and client capability for camera synchronization
//!
//! This module names the characteristics the camera exposes for time and
//! geotag updates, classifies the errors a GATT client can report, and defines
//! the capability traits a platform BLE binding implements. The session logic
//! is written against these traits only.

use super::device::{Advertisement, PeripheralInfo};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Date/time service exposed by the camera
pub const DATE_TIME_SERVICE_UUID: Uuid = Uuid::from_u128(0x4b445988_caa0_4dd3_941d_37b4f52aca86);

/// Characteristic accepting the 7-byte date/time block
pub const DATE_TIME_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xfa46bbdd_8a8f_4796_8cf3_aa58949b130a);

/// Geotag service exposed by the camera
pub const GEO_TAG_SERVICE_UUID: Uuid = Uuid::from_u128(0x84a0dd62_e8aa_4a4c_8a5b_8ea6e0a5e40d);

/// Characteristic accepting the 32-byte location block
pub const GEO_TAG_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x28f59d60_8b8e_4fcd_a81f_61bdb46595a9);

/// A characteristic addressed by its service and characteristic UUIDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacteristicRef {
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl CharacteristicRef {
    pub const fn new(service: Uuid, characteristic: Uuid) -> Self {
        Self {
            service,
            characteristic,
        }
    }
}

impl fmt::Display for CharacteristicRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.characteristic)
    }
}

/// The set of characteristics a sync session writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattProfile {
    /// Target of the date/time block
    pub date_time: CharacteristicRef,
    /// Target of the location block
    pub location: CharacteristicRef,
    /// Whether writes wait for the peripheral's acknowledgment
    pub write_with_response: bool,
}

impl Default for GattProfile {
    fn default() -> Self {
        Self {
            date_time: CharacteristicRef::new(DATE_TIME_SERVICE_UUID, DATE_TIME_CHARACTERISTIC_UUID),
            location: CharacteristicRef::new(GEO_TAG_SERVICE_UUID, GEO_TAG_CHARACTERISTIC_UUID),
            write_with_response: true,
        }
    }
}

impl GattProfile {
    /// Characteristics that must be present for the device to be usable
    pub fn required_characteristics(&self) -> [CharacteristicRef; 2] {
        [self.date_time, self.location]
    }
}

/// Errors raised while establishing a connection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Peripheral unreachable: {0}")]
    Unreachable(String),
    #[error("Connection attempt timed out")]
    Timeout,
    #[error("Bluetooth permission denied")]
    PermissionDenied,
    #[error("Unsupported device: {0}")]
    UnsupportedDevice(String),
}

impl ConnectionError {
    /// Whether another connection attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConnectionError::Unreachable(_) | ConnectionError::Timeout)
    }
}

/// Errors raised by a characteristic write
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    #[error("Write failed (retryable): {0}")]
    Retryable(String),
    #[error("Connection lost")]
    ConnectionLost,
}

/// Why a peripheral link went down without the session asking for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peripheral closed the link (camera switched off, out of range)
    Remote,
    /// The platform stack reported a failure
    LinkLost(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Remote => write!(f, "disconnected by peripheral"),
            DisconnectReason::LinkLost(reason) => write!(f, "link lost: {}", reason),
        }
    }
}

/// One characteristic write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattWrite {
    /// Characteristic to write to
    pub target: CharacteristicRef,
    /// Data to write
    pub data: Vec<u8>,
}

/// Central-role capability: turns an advertisement into a connected peripheral
///
/// Implementations connect, discover services and verify that the profile's
/// characteristics exist before returning.
#[async_trait]
pub trait BleCentral: Send + Sync {
    async fn connect(
        &self,
        advertisement: &Advertisement,
    ) -> Result<Arc<dyn GattPeripheral>, ConnectionError>;
}

/// A connected peripheral
#[async_trait]
pub trait GattPeripheral: Send + Sync {
    /// Identity of the connected device
    fn info(&self) -> PeripheralInfo;

    /// Write to a characteristic, waiting for the acknowledgment when `with_response` is set
    async fn write_characteristic(
        &self,
        target: &CharacteristicRef,
        data: &[u8],
        with_response: bool,
    ) -> Result<(), WriteError>;

    /// Resolves once the link drops for a reason other than [`GattPeripheral::disconnect`]
    async fn wait_for_disconnect(&self) -> DisconnectReason;

    /// Release the link
    async fn disconnect(&self) -> Result<(), ConnectionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile_uuids() {
        let profile = GattProfile::default();
        assert_eq!(
            profile.date_time.characteristic.to_string(),
            "fa46bbdd-8a8f-4796-8cf3-aa58949b130a"
        );
        assert_eq!(
            profile.location.service.to_string(),
            "84a0dd62-e8aa-4a4c-8a5b-8ea6e0a5e40d"
        );
        assert!(profile.write_with_response);
    }

    #[test]
    fn test_required_characteristics() {
        let profile = GattProfile::default();
        let required = profile.required_characteristics();
        assert_eq!(required[0], profile.date_time);
        assert_eq!(required[1], profile.location);
    }

    #[test]
    fn test_connection_error_retryable() {
        assert!(ConnectionError::Timeout.is_retryable());
        assert!(ConnectionError::Unreachable("gone".to_string()).is_retryable());
        assert!(!ConnectionError::PermissionDenied.is_retryable());
        assert!(!ConnectionError::UnsupportedDevice("no geotag".to_string()).is_retryable());
    }

    #[test]
    fn test_characteristic_ref_display() {
        let target = CharacteristicRef::new(DATE_TIME_SERVICE_UUID, DATE_TIME_CHARACTERISTIC_UUID);
        assert_eq!(
            target.to_string(),
            "4b445988-caa0-4dd3-941d-37b4f52aca86/fa46bbdd-8a8f-4796-8cf3-aa58949b130a"
        );
    }
}
