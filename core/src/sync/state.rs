//! Session state and its replay-latest store
//!
//! Every state a session enters is published here. Subscribers first receive
//! the state that was current when they subscribed, then every later state in
//! publish order. Publishing never waits on subscribers: each one has a
//! bounded buffer, and a subscriber that falls behind loses its oldest
//! undelivered states (drop-oldest) and carries on with the newest.
//!
//! Publishing `Stopped` seals the store. Nothing is accepted afterwards and
//! live subscriptions end once they have delivered the `Stopped` state.

use crate::payload::{EncodingError, LocationSample};
use crate::transport::ble::{Advertisement, ConnectionError, PeripheralInfo};
use chrono::{DateTime, FixedOffset};
use futures::Stream;
use parking_lot::Mutex;
use std::fmt;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

/// Default per-subscriber buffer
pub const DEFAULT_STATE_BUFFER: usize = 64;

/// Why a session ended on its own
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncFailure {
    #[error("Connection failed after {attempts} attempt(s): {last}")]
    ConnectFailed {
        attempts: u32,
        last: ConnectionError,
    },
    #[error("Payload encoding failed: {0}")]
    Encoding(#[from] EncodingError),
}

/// State of one sync session
#[derive(Debug, Clone, PartialEq)]
pub enum SyncState {
    /// Created, not yet connecting
    Starting,
    /// Connection attempt `attempt` (1-based) to the advertised device
    Connecting {
        advertisement: Advertisement,
        attempt: u32,
    },
    /// Connected and pushing time/location on every tick
    Syncing {
        peripheral: PeripheralInfo,
        last_sync_time: Option<DateTime<FixedOffset>>,
        last_location: Option<LocationSample>,
    },
    /// Terminal; `error` is `None` when stopped on request
    Stopped { error: Option<SyncFailure> },
}

impl SyncState {
    pub fn is_stopped(&self) -> bool {
        matches!(self, SyncState::Stopped { .. })
    }

    /// Short label for logs and status lines
    pub fn label(&self) -> &'static str {
        match self {
            SyncState::Starting => "Starting",
            SyncState::Connecting { .. } => "Connecting",
            SyncState::Syncing { .. } => "Syncing",
            SyncState::Stopped { .. } => "Stopped",
        }
    }

    pub fn last_sync_time(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            SyncState::Syncing { last_sync_time, .. } => *last_sync_time,
            _ => None,
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Starting => write!(f, "Starting"),
            SyncState::Connecting {
                advertisement,
                attempt,
            } => write!(
                f,
                "Connecting to {} (attempt {})",
                advertisement.display_name(),
                attempt
            ),
            SyncState::Syncing {
                peripheral,
                last_sync_time,
                ..
            } => {
                let name = peripheral.name.as_deref().unwrap_or(&peripheral.id);
                match last_sync_time {
                    Some(time) => write!(f, "Syncing with {} (last sync {})", name, time),
                    None => write!(f, "Syncing with {}", name),
                }
            }
            SyncState::Stopped { error: None } => write!(f, "Stopped"),
            SyncState::Stopped { error: Some(e) } => write!(f, "Stopped: {}", e),
        }
    }
}

struct StoreInner {
    current: SyncState,
    // None once sealed
    sender: Option<broadcast::Sender<SyncState>>,
}

/// Holds the current [`SyncState`] and fans it out to subscribers
pub struct SessionStateStore {
    inner: Mutex<StoreInner>,
}

impl SessionStateStore {
    /// Create a store in `Starting` with the default buffer
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_STATE_BUFFER)
    }

    pub fn with_buffer(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(1));
        Self {
            inner: Mutex::new(StoreInner {
                current: SyncState::Starting,
                sender: Some(sender),
            }),
        }
    }

    /// Latest published state
    pub fn current(&self) -> SyncState {
        self.inner.lock().current.clone()
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.lock().sender.is_none()
    }

    /// Publish a new state; returns `false` if the store is already sealed
    ///
    /// Publishing a `Stopped` state seals the store.
    pub fn publish(&self, state: SyncState) -> bool {
        let mut inner = self.inner.lock();
        let sender = match inner.sender.as_ref() {
            Some(sender) => sender.clone(),
            None => return false,
        };

        let seal = state.is_stopped();
        inner.current = state.clone();
        // No receivers is fine; the state is still current for later subscribers
        let _ = sender.send(state);
        if seal {
            inner.sender = None;
        }
        true
    }

    /// Subscribe: the current state first, then every later state in order
    pub fn subscribe(&self) -> StateSubscription {
        let inner = self.inner.lock();
        let receiver = match inner.sender.as_ref() {
            Some(sender) => sender.subscribe(),
            None => {
                // Sealed: a closed channel so the subscription ends after the replay
                let (sender, receiver) = broadcast::channel(1);
                drop(sender);
                receiver
            }
        };
        StateSubscription {
            pending: Some(inner.current.clone()),
            receiver,
            dropped: 0,
        }
    }
}

impl Default for SessionStateStore {
    fn default() -> Self {
        Self::new()
    }
}

/// An ordered view of a store's states
pub struct StateSubscription {
    pending: Option<SyncState>,
    receiver: broadcast::Receiver<SyncState>,
    dropped: u64,
}

impl StateSubscription {
    /// Next state, or `None` once the session has stopped and all states were delivered
    pub async fn next(&mut self) -> Option<SyncState> {
        if let Some(state) = self.pending.take() {
            return Some(state);
        }
        loop {
            match self.receiver.recv().await {
                Ok(state) => return Some(state),
                Err(RecvError::Lagged(skipped)) => {
                    self.dropped += skipped;
                    warn!("State subscriber lagged, dropped {} oldest state(s)", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Number of states this subscriber lost to lag
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Adapt into a [`Stream`]
    pub fn into_stream(self) -> impl Stream<Item = SyncState> + Send + 'static {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription.next().await.map(|state| (state, subscription))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn connecting(attempt: u32) -> SyncState {
        SyncState::Connecting {
            advertisement: Advertisement::new("cam"),
            attempt,
        }
    }

    #[tokio::test]
    async fn test_subscribe_replays_current() {
        let store = SessionStateStore::new();
        store.publish(connecting(1));

        let mut sub = store.subscribe();
        assert_eq!(sub.next().await, Some(connecting(1)));
    }

    #[tokio::test]
    async fn test_subscribe_then_live_in_order() {
        let store = SessionStateStore::new();
        let mut sub = store.subscribe();

        store.publish(connecting(1));
        store.publish(connecting(2));

        assert_eq!(sub.next().await, Some(SyncState::Starting));
        assert_eq!(sub.next().await, Some(connecting(1)));
        assert_eq!(sub.next().await, Some(connecting(2)));
    }

    #[test]
    fn test_next_is_pending_until_publish() {
        let store = SessionStateStore::new();
        let mut sub = store.subscribe();
        {
            let mut next = tokio_test::task::spawn(sub.next());
            tokio_test::assert_ready_eq!(next.poll(), Some(SyncState::Starting));
        }

        let mut next = tokio_test::task::spawn(sub.next());
        tokio_test::assert_pending!(next.poll());

        store.publish(connecting(1));
        assert!(next.is_woken());
        tokio_test::assert_ready_eq!(next.poll(), Some(connecting(1)));
    }

    #[tokio::test]
    async fn test_two_subscribers_same_order() {
        let store = SessionStateStore::new();
        let mut first = store.subscribe();
        let mut second = store.subscribe();

        for attempt in 1..=5 {
            store.publish(connecting(attempt));
        }
        store.publish(SyncState::Stopped { error: None });

        let mut a = Vec::new();
        while let Some(state) = first.next().await {
            a.push(state);
        }
        let mut b = Vec::new();
        while let Some(state) = second.next().await {
            b.push(state);
        }
        assert_eq!(a, b);
        assert_eq!(a.len(), 7);
    }

    #[tokio::test]
    async fn test_stopped_seals_store() {
        let store = SessionStateStore::new();
        let mut sub = store.subscribe();

        assert!(store.publish(SyncState::Stopped { error: None }));
        assert!(store.is_sealed());
        assert!(!store.publish(connecting(1)));
        assert_eq!(store.current(), SyncState::Stopped { error: None });

        assert_eq!(sub.next().await, Some(SyncState::Starting));
        assert_eq!(sub.next().await, Some(SyncState::Stopped { error: None }));
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn test_subscribe_after_seal_gets_final_state() {
        let store = SessionStateStore::new();
        store.publish(SyncState::Stopped { error: None });

        let mut sub = store.subscribe();
        assert_eq!(sub.next().await, Some(SyncState::Stopped { error: None }));
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_drops_oldest() {
        let store = SessionStateStore::with_buffer(2);
        let mut sub = store.subscribe();

        for attempt in 1..=5 {
            store.publish(connecting(attempt));
        }

        assert_eq!(sub.next().await, Some(SyncState::Starting));
        assert_eq!(sub.next().await, Some(connecting(4)));
        assert_eq!(sub.next().await, Some(connecting(5)));
        assert_eq!(sub.dropped(), 3);
    }

    #[tokio::test]
    async fn test_into_stream() {
        let store = SessionStateStore::new();
        let stream = store.subscribe().into_stream();

        store.publish(connecting(1));
        store.publish(SyncState::Stopped { error: None });

        let states: Vec<SyncState> = stream.collect().await;
        assert_eq!(
            states,
            vec![
                SyncState::Starting,
                connecting(1),
                SyncState::Stopped { error: None }
            ]
        );
    }

    #[test]
    fn test_state_display() {
        assert_eq!(connecting(2).to_string(), "Connecting to cam (attempt 2)");

        let failed = SyncState::Stopped {
            error: Some(SyncFailure::ConnectFailed {
                attempts: 3,
                last: ConnectionError::Timeout,
            }),
        };
        assert_eq!(
            failed.to_string(),
            "Stopped: Connection failed after 3 attempt(s): Connection attempt timed out"
        );
    }
}
