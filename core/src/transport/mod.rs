// Transport module: BLE capability interface consumed by the sync session

pub mod ble;

pub use ble::{
    Advertisement, BleCentral, CharacteristicRef, ConnectionError, DisconnectReason,
    GattPeripheral, GattProfile, GattWrite, PeripheralInfo, PeripheralLocator, WriteError,
};
