//! Sync session: one BLE connection lifecycle pushing time and location
//!
//! A session runs as a single tokio task:
//!
//! ```text
//! Starting -> Connecting(1..=max) -> Syncing -> (disconnect) -> Connecting -> ...
//!                    |                                               |
//!                    +------------- Stopped(error) <-----------------+
//! ```
//!
//! `stop()` seals the state store with `Stopped { error: None }` before it
//! cancels the task, so nothing the task does afterwards becomes visible.

use super::state::{SessionStateStore, StateSubscription, SyncFailure, SyncState};
use crate::config::{ConfigError, SyncConfig};
use crate::location::{Clock, LocationSource};
use crate::payload::{EncodingError, LocationSample, PayloadEncoder};
use crate::transport::ble::{
    Advertisement, BleCentral, GattPeripheral, GattWrite, PeripheralInfo, PeripheralLocator,
    WriteError,
};
use chrono::{DateTime, FixedOffset, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Errors from the session control surface
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session already started")]
    AlreadyStarted,
    #[error("Session is stopped")]
    Stopped,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// What one successful tick sent
#[derive(Debug, Clone)]
struct TickReport {
    time: DateTime<FixedOffset>,
    location: Option<LocationSample>,
}

#[derive(Debug)]
enum TickError {
    ConnectionLost(String),
    Encoding(EncodingError),
}

/// How a Syncing phase ended
enum LinkOutcome {
    Lost(String),
    Failed(SyncFailure),
}

/// Last values reported to observers, carried across reconnects
#[derive(Debug, Default)]
struct SyncProgress {
    last_sync_time: Option<DateTime<FixedOffset>>,
    last_location: Option<LocationSample>,
}

impl SyncProgress {
    fn record(&mut self, report: TickReport) {
        match self.last_sync_time {
            Some(previous) if report.time < previous => {
                warn!(
                    "Clock stepped back ({} < {}), keeping last sync time",
                    report.time, previous
                );
            }
            _ => self.last_sync_time = Some(report.time),
        }
        if let Some(location) = report.location {
            self.last_location = Some(location);
        }
    }

    fn syncing(&self, peripheral: &PeripheralInfo) -> SyncState {
        SyncState::Syncing {
            peripheral: peripheral.clone(),
            last_sync_time: self.last_sync_time,
            last_location: self.last_location.clone(),
        }
    }
}

struct SessionInner {
    config: SyncConfig,
    locator: PeripheralLocator,
    location: Arc<dyn LocationSource>,
    clock: Arc<dyn Clock>,
    store: Arc<SessionStateStore>,
    // The one live connection; only the session task writes through it
    peripheral: Mutex<Option<Arc<dyn GattPeripheral>>>,
}

/// Owns one BLE connection lifecycle and its state sequence
pub struct SyncSession {
    inner: Arc<SessionInner>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl SyncSession {
    /// Create a session in `Starting`
    pub fn new(
        config: SyncConfig,
        central: Arc<dyn BleCentral>,
        location: Arc<dyn LocationSource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SessionError> {
        config.validate()?;

        let locator = PeripheralLocator::with_timeout(central, config.connect_timeout);
        let store = Arc::new(SessionStateStore::with_buffer(config.state_buffer));
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(SessionInner {
                config,
                locator,
                location,
                clock,
                store,
                peripheral: Mutex::new(None),
            }),
            shutdown,
            task: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }

    /// Begin connecting to `advertisement` and syncing once connected
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, advertisement: Advertisement) -> Result<(), SessionError> {
        if self.inner.store.is_sealed() {
            return Err(SessionError::Stopped);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SessionError::AlreadyStarted);
        }

        info!("Starting sync session for {}", advertisement);

        let inner = Arc::clone(&self.inner);
        let shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let failure = tokio::select! {
                biased;
                _ = shutdown_requested(shutdown) => None,
                failure = inner.run(advertisement) => Some(failure),
            };

            match failure {
                Some(failure) => {
                    warn!("Sync session stopped: {}", failure);
                    inner.store.publish(SyncState::Stopped {
                        error: Some(failure),
                    });
                }
                None => {
                    inner.store.publish(SyncState::Stopped { error: None });
                }
            }
            inner.release_peripheral().await;
        });
        *self.task.lock() = Some(handle);
        Ok(())
    }

    /// Cancel the session and release its connection; idempotent
    pub async fn stop(&self) {
        if self.inner.store.publish(SyncState::Stopped { error: None }) {
            info!("Stopping sync session");
        }
        self.shutdown.send_replace(true);

        let task = self.task.lock().take();
        match task {
            Some(handle) => {
                if let Err(e) = handle.await {
                    warn!("Sync session task ended abnormally: {}", e);
                }
            }
            None => self.inner.release_peripheral().await,
        }
    }

    /// Current state
    pub fn state(&self) -> SyncState {
        self.inner.store.current()
    }

    /// Replay-latest subscription to the state sequence
    pub fn subscribe(&self) -> StateSubscription {
        self.inner.store.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.store.is_sealed()
    }
}

async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    loop {
        let requested = *shutdown.borrow_and_update();
        if requested {
            return;
        }
        // Sender dropped: the owning SyncSession is gone
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

impl SessionInner {
    fn publish(&self, state: SyncState) {
        if !self.store.publish(state) {
            debug!("State store sealed, update discarded");
        }
    }

    /// Drive the session until a terminal failure
    async fn run(&self, advertisement: Advertisement) -> SyncFailure {
        let mut progress = SyncProgress::default();

        loop {
            let peripheral = match self.connect(&advertisement).await {
                Ok(peripheral) => peripheral,
                Err(failure) => return failure,
            };
            let info = peripheral.info();
            *self.peripheral.lock() = Some(Arc::clone(&peripheral));

            info!("Syncing with {}", info.name.as_deref().unwrap_or(&info.id));
            self.publish(progress.syncing(&info));

            let outcome = self.sync_loop(peripheral.as_ref(), &info, &mut progress).await;
            drop(peripheral);
            self.release_peripheral().await;

            match outcome {
                LinkOutcome::Lost(reason) => {
                    warn!("Lost connection to {}: {}, reconnecting", info.id, reason);
                }
                LinkOutcome::Failed(failure) => return failure,
            }
        }
    }

    /// Connect with bounded retries, publishing `Connecting` for every attempt
    async fn connect(
        &self,
        advertisement: &Advertisement,
    ) -> Result<Arc<dyn GattPeripheral>, SyncFailure> {
        let max_attempts = self.config.max_connect_attempts;
        let mut attempt = 1;

        loop {
            self.publish(SyncState::Connecting {
                advertisement: advertisement.clone(),
                attempt,
            });

            match self.locator.resolve(advertisement).await {
                Ok(peripheral) => return Ok(peripheral),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.config.reconnect_backoff.backoff_duration(attempt - 1);
                    debug!(
                        "Connect attempt {}/{} failed ({}), retrying in {:?}",
                        attempt, max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(SyncFailure::ConnectFailed {
                        attempts: attempt,
                        last: e,
                    })
                }
            }
        }
    }

    /// Periodic ticks until the link goes away
    async fn sync_loop(
        &self,
        peripheral: &dyn GattPeripheral,
        info: &PeripheralInfo,
        progress: &mut SyncProgress,
    ) -> LinkOutcome {
        let mut ticker = tokio::time::interval(self.config.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let disconnected = peripheral.wait_for_disconnect();
        tokio::pin!(disconnected);

        loop {
            tokio::select! {
                biased;
                reason = &mut disconnected => return LinkOutcome::Lost(reason.to_string()),
                _ = ticker.tick() => {}
            }

            let tick = tokio::select! {
                biased;
                reason = &mut disconnected => return LinkOutcome::Lost(reason.to_string()),
                tick = self.sync_tick(peripheral) => tick,
            };

            match tick {
                Ok(report) => {
                    debug!(
                        "Synced {} (location: {})",
                        report.time,
                        report.location.is_some()
                    );
                    progress.record(report);
                    self.publish(progress.syncing(info));
                }
                Err(TickError::ConnectionLost(reason)) => return LinkOutcome::Lost(reason),
                Err(TickError::Encoding(e)) => {
                    return LinkOutcome::Failed(SyncFailure::Encoding(e));
                }
            }
        }
    }

    /// Sample time and location, encode, write every block
    async fn sync_tick(&self, peripheral: &dyn GattPeripheral) -> Result<TickReport, TickError> {
        let now = self.clock.now();
        let location = self.usable_location(&now);

        let payload =
            PayloadEncoder::encode(&now, location.as_ref()).map_err(TickError::Encoding)?;

        for write in payload.writes(&self.config.profile) {
            self.write_with_retry(peripheral, &write).await?;
        }

        Ok(TickReport {
            time: now,
            location,
        })
    }

    /// The latest fix if it is fresh and valid; otherwise the tick syncs time only
    fn usable_location(&self, now: &DateTime<FixedOffset>) -> Option<LocationSample> {
        let sample = match self.location.latest() {
            Some(sample) => sample,
            None => {
                debug!("No location fix, syncing time only");
                return None;
            }
        };

        if let Some(max_age) = self.config.max_location_age {
            let age = sample.age_at(now.with_timezone(&Utc));
            if age > max_age {
                debug!("Location fix is {:?} old, syncing time only", age);
                return None;
            }
        }

        if let Err(e) = sample.validate() {
            warn!("Discarding invalid location fix: {}", e);
            return None;
        }

        Some(sample)
    }

    async fn write_with_retry(
        &self,
        peripheral: &dyn GattPeripheral,
        write: &GattWrite,
    ) -> Result<(), TickError> {
        let limit = self.config.write_retry_limit;
        let with_response = self.config.profile.write_with_response;
        let mut retries = 0;

        loop {
            let result = match tokio::time::timeout(
                self.config.write_timeout,
                peripheral.write_characteristic(&write.target, &write.data, with_response),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(WriteError::Retryable(
                    "acknowledgment timed out".to_string(),
                )),
            };

            match result {
                Ok(()) => return Ok(()),
                Err(WriteError::ConnectionLost) => {
                    return Err(TickError::ConnectionLost(format!(
                        "connection lost writing {}",
                        write.target
                    )));
                }
                Err(WriteError::Retryable(reason)) if retries < limit => {
                    retries += 1;
                    warn!(
                        "Write to {} failed ({}), retry {}/{}",
                        write.target, reason, retries, limit
                    );
                    tokio::time::sleep(self.config.write_retry_delay).await;
                }
                Err(WriteError::Retryable(reason)) => {
                    return Err(TickError::ConnectionLost(format!(
                        "write retries exhausted: {}",
                        reason
                    )));
                }
            }
        }
    }

    async fn release_peripheral(&self) {
        let peripheral = self.peripheral.lock().take();
        if let Some(peripheral) = peripheral {
            self.locator.release(peripheral).await;
        }
    }
}
