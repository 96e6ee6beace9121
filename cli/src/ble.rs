// btleplug-backed BLE central for the CLI
//
// Implements the core's BleCentral/GattPeripheral capabilities on top of the
// platform adapter. Disconnects are observed through the adapter event
// stream and fanned out to the matching peripheral handle.

use anyhow::{Context, Result};
use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use parking_lot::Mutex;
use ricohsync_core::transport::{
    Advertisement, BleCentral, CharacteristicRef, ConnectionError, DisconnectReason,
    GattPeripheral, GattProfile, PeripheralInfo, WriteError,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

type LinkMap = Arc<Mutex<HashMap<PeripheralId, watch::Sender<Option<DisconnectReason>>>>>;

const RESCAN_POLL: Duration = Duration::from_millis(500);

pub struct BtleCentral {
    adapter: Adapter,
    profile: GattProfile,
    links: LinkMap,
    events_task: JoinHandle<()>,
}

impl BtleCentral {
    /// Open the first Bluetooth adapter
    pub async fn new(profile: GattProfile) -> Result<Self> {
        let manager = Manager::new()
            .await
            .context("Failed to open Bluetooth manager")?;
        let adapter = manager
            .adapters()
            .await
            .context("Failed to list Bluetooth adapters")?
            .into_iter()
            .next()
            .context("No Bluetooth adapter available")?;

        let links: LinkMap = Arc::new(Mutex::new(HashMap::new()));
        let mut events = adapter
            .events()
            .await
            .context("Failed to subscribe to adapter events")?;

        let links_rx = Arc::clone(&links);
        let events_task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    tracing::debug!("Device disconnected: {:?}", id);
                    if let Some(link) = links_rx.lock().remove(&id) {
                        link.send_replace(Some(DisconnectReason::Remote));
                    }
                }
            }
            tracing::debug!("Adapter event stream ended");
        });

        Ok(Self {
            adapter,
            profile,
            links,
            events_task,
        })
    }

    /// Listen for advertisements for `duration`
    pub async fn scan(
        &self,
        duration: Duration,
        name_filter: Option<&str>,
    ) -> Result<Vec<Advertisement>> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .context("Failed to start scan")?;
        let scanning = self.scan_cleanup();
        tokio::time::sleep(duration).await;
        let peripherals = self.adapter.peripherals().await;
        scanning.disarm();
        stop_scan(&self.adapter).await;

        let mut found = Vec::new();
        for peripheral in peripherals.context("Failed to list peripherals")? {
            let advertisement = advertisement_of(&peripheral).await;
            let keep = match name_filter {
                Some(filter) => advertisement.matches(filter),
                None => true,
            };
            if keep {
                found.push(advertisement);
            }
        }
        // Strongest signal first
        found.sort_by(|a, b| b.rssi.unwrap_or(i16::MIN).cmp(&a.rssi.unwrap_or(i16::MIN)));
        Ok(found)
    }

    /// Find the platform peripheral for an advertisement, scanning until it shows up
    async fn find(&self, advertisement: &Advertisement) -> Result<Peripheral, ConnectionError> {
        if let Some(peripheral) = self.known(advertisement).await? {
            return Ok(peripheral);
        }

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(connection_error)?;
        // Unbounded here; the locator drops this future on timeout or stop
        let scanning = self.scan_cleanup();
        let found = loop {
            if let Some(peripheral) = self.known(advertisement).await? {
                break peripheral;
            }
            tokio::time::sleep(RESCAN_POLL).await;
        };
        scanning.disarm();
        stop_scan(&self.adapter).await;
        Ok(found)
    }

    /// Stops the active scan if the scanning future is dropped early
    fn scan_cleanup(&self) -> Cleanup {
        let adapter = self.adapter.clone();
        Cleanup::new(move || {
            spawn_cleanup(async move {
                tracing::debug!("Scan abandoned, stopping");
                stop_scan(&adapter).await;
            })
        })
    }

    async fn known(&self, advertisement: &Advertisement) -> Result<Option<Peripheral>, ConnectionError> {
        for peripheral in self.adapter.peripherals().await.map_err(connection_error)? {
            if peripheral_key(&peripheral) == advertisement.id {
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }

    /// Map the profile's characteristics to discovered ones
    fn resolve_characteristics(
        &self,
        peripheral: &Peripheral,
    ) -> Result<HashMap<CharacteristicRef, Characteristic>, ConnectionError> {
        let discovered = peripheral.characteristics();
        let mut resolved = HashMap::new();

        for required in self.profile.required_characteristics() {
            let characteristic = discovered
                .iter()
                .find(|c| c.service_uuid == required.service && c.uuid == required.characteristic)
                .ok_or_else(|| {
                    ConnectionError::UnsupportedDevice(format!("missing characteristic {}", required))
                })?;
            resolved.insert(required, characteristic.clone());
        }
        Ok(resolved)
    }
}

impl Drop for BtleCentral {
    fn drop(&mut self) {
        self.events_task.abort();
    }
}

#[async_trait]
impl BleCentral for BtleCentral {
    async fn connect(
        &self,
        advertisement: &Advertisement,
    ) -> Result<Arc<dyn GattPeripheral>, ConnectionError> {
        let peripheral = self.find(advertisement).await?;

        // Register before connecting so an early disconnect is not missed
        let (link, link_rx) = watch::channel(None);
        self.links.lock().insert(peripheral.id(), link);

        // Undone on error, timeout or cancellation until the link is handed out
        let pending = {
            let links = Arc::clone(&self.links);
            let peripheral = peripheral.clone();
            Cleanup::new(move || {
                links.lock().remove(&peripheral.id());
                spawn_cleanup(async move {
                    if let Err(e) = peripheral.disconnect().await {
                        tracing::debug!("Disconnect after abandoned connect: {}", e);
                    }
                })
            })
        };

        if !peripheral.is_connected().await.map_err(connection_error)? {
            peripheral.connect().await.map_err(connection_error)?;
        }
        peripheral
            .discover_services()
            .await
            .map_err(connection_error)?;
        let characteristics = self.resolve_characteristics(&peripheral)?;
        pending.disarm();

        Ok(Arc::new(BtlePeripheral {
            info: PeripheralInfo::from(advertisement),
            peripheral,
            characteristics,
            link: link_rx,
            links: Arc::clone(&self.links),
        }))
    }
}

struct BtlePeripheral {
    info: PeripheralInfo,
    peripheral: Peripheral,
    characteristics: HashMap<CharacteristicRef, Characteristic>,
    link: watch::Receiver<Option<DisconnectReason>>,
    links: LinkMap,
}

#[async_trait]
impl GattPeripheral for BtlePeripheral {
    fn info(&self) -> PeripheralInfo {
        self.info.clone()
    }

    async fn write_characteristic(
        &self,
        target: &CharacteristicRef,
        data: &[u8],
        with_response: bool,
    ) -> Result<(), WriteError> {
        let characteristic = self
            .characteristics
            .get(target)
            .ok_or_else(|| WriteError::Retryable(format!("unknown characteristic {}", target)))?;
        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        tracing::trace!("Write {} <- {}", target, hex::encode(data));
        self.peripheral
            .write(characteristic, data, write_type)
            .await
            .map_err(write_error)
    }

    async fn wait_for_disconnect(&self) -> DisconnectReason {
        let mut link = self.link.clone();
        loop {
            let current = link.borrow_and_update().clone();
            if let Some(reason) = current {
                return reason;
            }
            if link.changed().await.is_err() {
                // Adapter event stream is gone; nothing will report a disconnect
                return std::future::pending().await;
            }
        }
    }

    async fn disconnect(&self) -> Result<(), ConnectionError> {
        self.links.lock().remove(&self.peripheral.id());
        self.peripheral.disconnect().await.map_err(connection_error)
    }
}

/// Runs its action on drop unless disarmed
///
/// Adapter calls are async and a dropped future never reaches the code after
/// its last `.await`, so platform state started mid-operation is undone here.
struct Cleanup {
    action: Option<Box<dyn FnOnce() + Send>>,
}

impl Cleanup {
    fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            action: Some(Box::new(action)),
        }
    }

    fn disarm(mut self) {
        self.action = None;
    }
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }
}

/// Run async cleanup from a synchronous drop
fn spawn_cleanup<F>(cleanup: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(cleanup);
        }
        Err(_) => tracing::warn!("No runtime left for BLE cleanup"),
    }
}

async fn stop_scan(adapter: &Adapter) {
    if let Err(e) = adapter.stop_scan().await {
        tracing::warn!("Failed to stop scan: {}", e);
    }
}

/// Identifier used in advertisements: the MAC where the platform exposes it
fn peripheral_key(peripheral: &Peripheral) -> String {
    let address = peripheral.address();
    if address == BDAddr::default() {
        format!("{:?}", peripheral.id())
    } else {
        address.to_string()
    }
}

async fn advertisement_of(peripheral: &Peripheral) -> Advertisement {
    let mut advertisement = Advertisement::new(peripheral_key(peripheral));
    if let Ok(Some(properties)) = peripheral.properties().await {
        advertisement.name = properties.local_name;
        advertisement.rssi = properties.rssi;
    }
    advertisement
}

fn connection_error(e: btleplug::Error) -> ConnectionError {
    match e {
        btleplug::Error::PermissionDenied => ConnectionError::PermissionDenied,
        btleplug::Error::TimedOut(_) => ConnectionError::Timeout,
        btleplug::Error::NotSupported(reason) => ConnectionError::UnsupportedDevice(reason),
        other => ConnectionError::Unreachable(other.to_string()),
    }
}

fn write_error(e: btleplug::Error) -> WriteError {
    match e {
        btleplug::Error::NotConnected | btleplug::Error::DeviceNotFound => {
            WriteError::ConnectionLost
        }
        other => WriteError::Retryable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn flag() -> (Arc<AtomicBool>, impl FnOnce() + Send + 'static) {
        let ran = Arc::new(AtomicBool::new(false));
        let set = Arc::clone(&ran);
        (ran, move || set.store(true, Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_cleanup_runs_when_operation_times_out() {
        let (ran, action) = flag();
        let operation = async move {
            let _pending = Cleanup::new(action);
            std::future::pending::<()>().await
        };

        let result = tokio::time::timeout(Duration::from_millis(10), operation).await;
        assert!(result.is_err());
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cleanup_runs_on_early_error() {
        let (ran, action) = flag();
        let operation = async move {
            let pending = Cleanup::new(action);
            let characteristics: Result<(), ConnectionError> =
                Err(ConnectionError::UnsupportedDevice("no geotag".to_string()));
            characteristics?;
            pending.disarm();
            Ok::<(), ConnectionError>(())
        };

        assert!(operation.await.is_err());
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_disarmed_cleanup_does_not_run() {
        let (ran, action) = flag();
        Cleanup::new(action).disarm();
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_spawned_cleanup_runs_on_runtime() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        spawn_cleanup(async move {
            let _ = tx.send(());
        });
        assert!(rx.await.is_ok());
    }

    #[test]
    fn test_connection_error_mapping() {
        assert_eq!(
            connection_error(btleplug::Error::PermissionDenied),
            ConnectionError::PermissionDenied
        );
        assert_eq!(
            connection_error(btleplug::Error::TimedOut(Duration::from_secs(1))),
            ConnectionError::Timeout
        );
        assert!(matches!(
            connection_error(btleplug::Error::DeviceNotFound),
            ConnectionError::Unreachable(_)
        ));
        assert!(!connection_error(btleplug::Error::NotSupported("le".into())).is_retryable());
    }

    #[test]
    fn test_write_error_mapping() {
        assert_eq!(
            write_error(btleplug::Error::NotConnected),
            WriteError::ConnectionLost
        );
        assert!(matches!(
            write_error(btleplug::Error::TimedOut(Duration::from_secs(1))),
            WriteError::Retryable(_)
        ));
    }
}
