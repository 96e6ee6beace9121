//! Peripheral locator: advertisement -> connected peripheral, with a bounded timeout

use super::device::Advertisement;
use super::gatt::{BleCentral, ConnectionError, GattPeripheral};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default bound on a single connection attempt
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolves advertisements into connected peripherals through a [`BleCentral`]
#[derive(Clone)]
pub struct PeripheralLocator {
    central: Arc<dyn BleCentral>,
    connect_timeout: Duration,
}

impl PeripheralLocator {
    /// Create a locator with the default timeout
    pub fn new(central: Arc<dyn BleCentral>) -> Self {
        Self::with_timeout(central, DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_timeout(central: Arc<dyn BleCentral>, connect_timeout: Duration) -> Self {
        Self {
            central,
            connect_timeout,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Open one connection to the advertised device
    ///
    /// The caller owns the returned handle and must hand it back to
    /// [`PeripheralLocator::release`] once done.
    pub async fn resolve(
        &self,
        advertisement: &Advertisement,
    ) -> Result<Arc<dyn GattPeripheral>, ConnectionError> {
        debug!("Resolving peripheral {}", advertisement);

        match tokio::time::timeout(self.connect_timeout, self.central.connect(advertisement)).await
        {
            Ok(Ok(peripheral)) => {
                info!("Connected to {}", advertisement.display_name());
                Ok(peripheral)
            }
            Ok(Err(e)) => {
                warn!("Connection to {} failed: {}", advertisement.display_name(), e);
                Err(e)
            }
            Err(_) => {
                warn!(
                    "Connection to {} timed out after {:?}",
                    advertisement.display_name(),
                    self.connect_timeout
                );
                Err(ConnectionError::Timeout)
            }
        }
    }

    /// Disconnect a peripheral obtained from [`PeripheralLocator::resolve`]
    pub async fn release(&self, peripheral: Arc<dyn GattPeripheral>) {
        let info = peripheral.info();
        match tokio::time::timeout(self.connect_timeout, peripheral.disconnect()).await {
            Ok(Ok(())) => debug!("Released peripheral {}", info.id),
            Ok(Err(e)) => warn!("Failed to release peripheral {}: {}", info.id, e),
            Err(_) => warn!("Timed out releasing peripheral {}", info.id),
        }
    }
}
