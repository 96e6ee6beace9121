// RicohSync Core: camera time and location sync over BLE
//
// Everything platform-specific (the BLE radio, the GPS, the process that
// hosts us) arrives through a trait. What lives here is the session: connect,
// push the clock and the last fix on a timer, survive disconnects, and tell
// whoever is watching what is going on.

pub mod config;
pub mod location;
pub mod payload;
pub mod sync;
pub mod transport;

pub use config::{ConfigError, SyncConfig};
pub use location::{Clock, LocationFeed, LocationSource, SystemClock};
pub use payload::{EncodingError, LocationSample, PayloadDecoder, PayloadEncoder, SyncPayload};
pub use sync::{
    ManagerError, RetryPolicy, SessionError, SessionManager, SessionStateStore,
    StateSubscription, SyncFailure, SyncSession, SyncState,
};
pub use transport::{
    Advertisement, BleCentral, CharacteristicRef, ConnectionError, DisconnectReason,
    GattPeripheral, GattProfile, PeripheralInfo, PeripheralLocator, WriteError,
};

// ============================================================================
// LOGGING
// ============================================================================

/// Install a `tracing` subscriber honouring `RUST_LOG`, falling back to `default_filter`
///
/// Idempotent: a subscriber installed earlier (by the host or a previous call) wins.
pub fn init_logging(default_filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .try_init();
}
