//! Session Manager: at most one sync session per physical device
//!
//! The process host (CLI, mobile service) owns one manager and drives it with
//! start/stop calls; there is no global instance.

use super::session::{SessionError, SyncSession};
use super::state::{StateSubscription, SyncState};
use crate::config::SyncConfig;
use crate::location::{Clock, LocationSource};
use crate::transport::ble::{Advertisement, BleCentral};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ManagerError {
    #[error("Device {0} already has an active sync session")]
    AlreadySyncing(String),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Owns the sync sessions of this process, keyed by device id
pub struct SessionManager {
    config: SyncConfig,
    central: Arc<dyn BleCentral>,
    location: Arc<dyn LocationSource>,
    clock: Arc<dyn Clock>,
    sessions: RwLock<HashMap<String, Arc<SyncSession>>>,
}

impl SessionManager {
    /// Create a manager; every session it starts uses `config`
    pub fn new(
        config: SyncConfig,
        central: Arc<dyn BleCentral>,
        location: Arc<dyn LocationSource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ManagerError> {
        config.validate().map_err(SessionError::from)?;

        Ok(Self {
            config,
            central,
            location,
            clock,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Start syncing with a device, returning a subscription to its states
    ///
    /// A session that already stopped on its own is replaced.
    pub fn start(&self, advertisement: Advertisement) -> Result<StateSubscription, ManagerError> {
        let mut sessions = self.sessions.write();

        if let Some(existing) = sessions.get(&advertisement.id) {
            if !existing.is_stopped() {
                return Err(ManagerError::AlreadySyncing(advertisement.id.clone()));
            }
            debug!("Replacing stopped session for {}", advertisement.id);
        }

        let session = Arc::new(SyncSession::new(
            self.config.clone(),
            Arc::clone(&self.central),
            Arc::clone(&self.location),
            Arc::clone(&self.clock),
        )?);
        let subscription = session.subscribe();
        session.start(advertisement.clone())?;

        info!("Session started for {}", advertisement.display_name());
        sessions.insert(advertisement.id, session);
        Ok(subscription)
    }

    /// Stop and forget the session for `device_id`; returns whether one existed
    pub async fn stop(&self, device_id: &str) -> bool {
        let session = self.sessions.write().remove(device_id);
        match session {
            Some(session) => {
                session.stop().await;
                info!("Session stopped for {}", device_id);
                true
            }
            None => false,
        }
    }

    /// Stop every session
    pub async fn stop_all(&self) {
        let sessions: Vec<(String, Arc<SyncSession>)> = self.sessions.write().drain().collect();
        for (device_id, session) in sessions {
            session.stop().await;
            debug!("Session stopped for {}", device_id);
        }
    }

    /// Current state of the session for `device_id`
    pub fn state(&self, device_id: &str) -> Option<SyncState> {
        self.sessions.read().get(device_id).map(|session| session.state())
    }

    pub fn subscribe(&self, device_id: &str) -> Option<StateSubscription> {
        self.sessions
            .read()
            .get(device_id)
            .map(|session| session.subscribe())
    }

    /// Devices whose session has not stopped, sorted
    pub fn active_devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, session)| !session.is_stopped())
            .map(|(id, _)| id.clone())
            .collect();
        devices.sort();
        devices
    }
}
