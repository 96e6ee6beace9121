// Integration test: session manager keeps one session per device

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone};
use ricohsync_core::transport::{
    Advertisement, BleCentral, CharacteristicRef, ConnectionError, DisconnectReason,
    GattPeripheral, PeripheralInfo, WriteError,
};
use ricohsync_core::{
    Clock, LocationFeed, ManagerError, RetryPolicy, SessionManager, SyncConfig, SyncState,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Connects to anything whose id does not start with "gone"
struct FleetCentral {
    released: Arc<AtomicUsize>,
}

struct FleetPeripheral {
    info: PeripheralInfo,
    released: Arc<AtomicUsize>,
}

#[async_trait]
impl GattPeripheral for FleetPeripheral {
    fn info(&self) -> PeripheralInfo {
        self.info.clone()
    }

    async fn write_characteristic(
        &self,
        _target: &CharacteristicRef,
        _data: &[u8],
        _with_response: bool,
    ) -> Result<(), WriteError> {
        Ok(())
    }

    async fn wait_for_disconnect(&self) -> DisconnectReason {
        std::future::pending().await
    }

    async fn disconnect(&self) -> Result<(), ConnectionError> {
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl BleCentral for FleetCentral {
    async fn connect(
        &self,
        advertisement: &Advertisement,
    ) -> Result<Arc<dyn GattPeripheral>, ConnectionError> {
        if advertisement.id.starts_with("gone") {
            return Err(ConnectionError::Unreachable(advertisement.id.clone()));
        }
        Ok(Arc::new(FleetPeripheral {
            info: PeripheralInfo::from(advertisement),
            released: Arc::clone(&self.released),
        }))
    }
}

struct FrozenClock;

impl Clock for FrozenClock {
    fn now(&self) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2024, 8, 1, 12, 0, 0)
            .unwrap()
    }
}

fn manager() -> (SessionManager, Arc<AtomicUsize>) {
    let released = Arc::new(AtomicUsize::new(0));
    let central = Arc::new(FleetCentral {
        released: Arc::clone(&released),
    });
    let config = SyncConfig {
        max_connect_attempts: 2,
        reconnect_backoff: RetryPolicy::fixed(Duration::from_secs(1)),
        ..Default::default()
    };
    let manager = SessionManager::new(
        config,
        central,
        Arc::new(LocationFeed::new()),
        Arc::new(FrozenClock),
    )
    .unwrap();
    (manager, released)
}

async fn wait_for_syncing(subscription: &mut ricohsync_core::StateSubscription) {
    while let Some(state) = subscription.next().await {
        if state.last_sync_time().is_some() {
            return;
        }
        assert!(!state.is_stopped(), "session stopped early: {}", state);
    }
    panic!("subscription ended before syncing");
}

#[tokio::test(start_paused = true)]
async fn test_second_start_for_same_device_is_rejected() {
    let (manager, _) = manager();
    let camera = Advertisement::new("cam-1");

    let mut sub = manager.start(camera.clone()).unwrap();
    wait_for_syncing(&mut sub).await;

    let result = manager.start(camera);
    assert_eq!(
        result.err(),
        Some(ManagerError::AlreadySyncing("cam-1".to_string()))
    );
    assert_eq!(manager.active_devices(), vec!["cam-1".to_string()]);

    manager.stop_all().await;
}

#[tokio::test(start_paused = true)]
async fn test_stopped_session_is_replaced() {
    let (manager, _) = manager();
    let camera = Advertisement::new("gone-1");

    let mut sub = manager.start(camera.clone()).unwrap();
    let mut last = None;
    while let Some(state) = sub.next().await {
        last = Some(state);
    }
    assert!(matches!(
        last,
        Some(SyncState::Stopped {
            error: Some(ricohsync_core::SyncFailure::ConnectFailed { attempts: 2, .. })
        })
    ));
    assert!(manager.active_devices().is_empty());

    // The failed session no longer blocks a fresh one
    let mut retry = manager.start(camera).unwrap();
    assert_eq!(retry.next().await, Some(SyncState::Starting));
    manager.stop_all().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_releases_and_forgets_device() {
    let (manager, released) = manager();

    let mut sub = manager.start(Advertisement::new("cam-1")).unwrap();
    wait_for_syncing(&mut sub).await;

    assert!(manager.stop("cam-1").await);
    assert!(!manager.stop("cam-1").await);
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert!(manager.state("cam-1").is_none());
    assert!(manager.subscribe("cam-1").is_none());

    let mut rest = Vec::new();
    while let Some(state) = sub.next().await {
        rest.push(state);
    }
    assert_eq!(rest.last(), Some(&SyncState::Stopped { error: None }));
}

#[tokio::test(start_paused = true)]
async fn test_sessions_are_independent_per_device() {
    let (manager, released) = manager();

    let mut first = manager.start(Advertisement::new("cam-b")).unwrap();
    let mut second = manager.start(Advertisement::new("cam-a")).unwrap();
    wait_for_syncing(&mut first).await;
    wait_for_syncing(&mut second).await;

    assert_eq!(
        manager.active_devices(),
        vec!["cam-a".to_string(), "cam-b".to_string()]
    );

    manager.stop("cam-a").await;
    assert_eq!(manager.active_devices(), vec!["cam-b".to_string()]);
    assert_eq!(
        manager.state("cam-b").map(|state| state.label()),
        Some("Syncing")
    );
    assert!(manager.subscribe("cam-a").is_none());

    manager.stop_all().await;
    assert!(manager.active_devices().is_empty());
    assert_eq!(released.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let config = SyncConfig {
        sync_interval: Duration::ZERO,
        ..Default::default()
    };
    let result = SessionManager::new(
        config,
        Arc::new(FleetCentral {
            released: Arc::new(AtomicUsize::new(0)),
        }),
        Arc::new(LocationFeed::new()),
        Arc::new(FrozenClock),
    );
    assert!(matches!(result, Err(ManagerError::Session(_))));
}
