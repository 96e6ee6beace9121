//! BLE (Bluetooth Low Energy) Transport Module
//!
//! This module provides the protocol-level abstractions the sync session needs
//! from a BLE stack. It includes:
//!
//! - **device**: advertisement and connected-peripheral descriptors
//! - **gatt**: camera GATT profile, error taxonomy and the central/peripheral capability traits
//! - **locator**: timeout-bounded resolution of an advertisement into a connected peripheral
//!
//! The module is designed to work with platform-specific implementations
//! (btleplug on desktop, Kotlin/Swift bindings on mobile) that handle the actual
//! BLE hardware operations. The core logic here is testable without BLE hardware.

pub mod device;
pub mod gatt;
pub mod locator;

// Re-export commonly used types
pub use device::{Advertisement, PeripheralInfo};

pub use gatt::{
    BleCentral, CharacteristicRef, ConnectionError, DisconnectReason, GattPeripheral, GattProfile,
    GattWrite, WriteError, DATE_TIME_CHARACTERISTIC_UUID, DATE_TIME_SERVICE_UUID,
    GEO_TAG_CHARACTERISTIC_UUID, GEO_TAG_SERVICE_UUID,
};

pub use locator::{PeripheralLocator, DEFAULT_CONNECT_TIMEOUT};
