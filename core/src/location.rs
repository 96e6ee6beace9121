//! Location and time capabilities consumed by a sync tick
//!
//! The location provider is external (platform GPS, a fixed position from the
//! CLI, a replayed track); the session only ever asks for the latest sample.

use crate::payload::LocationSample;
use chrono::{DateTime, FixedOffset, Local};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Source of the most recent location fix
#[cfg_attr(test, mockall::automock)]
pub trait LocationSource: Send + Sync {
    fn latest(&self) -> Option<LocationSample>;
}

/// Wall clock read at every sync tick
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;
}

/// Local time zone clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }
}

/// Latest-value cell fed by an external location provider
pub struct LocationFeed {
    tx: watch::Sender<Option<LocationSample>>,
}

impl LocationFeed {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Replace the latest sample
    pub fn push(&self, sample: LocationSample) {
        self.tx.send_replace(Some(sample));
    }

    /// Forget the latest sample (provider lost its fix)
    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    /// Watch for changes to the latest sample
    pub fn watch(&self) -> watch::Receiver<Option<LocationSample>> {
        self.tx.subscribe()
    }

    /// Push every sample of `samples` until the stream ends
    pub fn follow<S>(self: &Arc<Self>, samples: S) -> JoinHandle<()>
    where
        S: Stream<Item = LocationSample> + Send + 'static,
    {
        let feed = Arc::clone(self);
        tokio::spawn(async move {
            futures::pin_mut!(samples);
            while let Some(sample) = samples.next().await {
                tracing::trace!(
                    "Location update: {:.5}, {:.5}",
                    sample.latitude,
                    sample.longitude
                );
                feed.push(sample);
            }
            tracing::debug!("Location stream ended");
        })
    }
}

impl Default for LocationFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationSource for LocationFeed {
    fn latest(&self) -> Option<LocationSample> {
        self.tx.borrow().clone()
    }
}
