//! In-process geolocation source.
//!
//! [`ChannelSource`] is the bridge a platform shell (or a test) uses to push
//! raw fixes into the crate. The shell keeps the [`FixFeed`] half and calls
//! [`FixFeed::push`] from its location callback; every active watch receives
//! the fix after its own [`FixFilter`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{FixFilter, GeolocationError, GeolocationSource, Watch, WatchId, WatchOptions};
use crate::constants::WATCH_CHANNEL_CAPACITY;
use crate::location::LocationFix;

#[derive(Debug)]
struct Subscriber {
    tx: mpsc::Sender<Result<LocationFix, GeolocationError>>,
    filter: FixFilter,
}

#[derive(Debug, Default)]
struct Inner {
    authorized: bool,
    authorization_requests: u32,
    watches: HashMap<WatchId, Subscriber>,
    next_id: u64,
}

/// Geolocation source fed through a [`FixFeed`].
#[derive(Debug, Clone)]
pub struct ChannelSource {
    inner: Arc<Mutex<Inner>>,
}

/// Producer half of a [`ChannelSource`].
#[derive(Debug, Clone)]
pub struct FixFeed {
    inner: Arc<Mutex<Inner>>,
}

impl ChannelSource {
    /// Create a source and its feed. `authorized` is the initial permission.
    #[must_use]
    pub fn new(authorized: bool) -> (Self, FixFeed) {
        let inner = Arc::new(Mutex::new(Inner {
            authorized,
            ..Inner::default()
        }));
        (
            Self {
                inner: Arc::clone(&inner),
            },
            FixFeed { inner },
        )
    }
}

#[async_trait]
impl GeolocationSource for ChannelSource {
    async fn request_authorization(&self) -> Result<(), GeolocationError> {
        let mut inner = self.inner.lock().expect("ChannelSource mutex poisoned");
        inner.authorization_requests += 1;
        if inner.authorized {
            Ok(())
        } else {
            Err(GeolocationError::Denied)
        }
    }

    fn watch(&self, options: WatchOptions) -> Result<Watch, GeolocationError> {
        let mut inner = self.inner.lock().expect("ChannelSource mutex poisoned");
        if !inner.authorized {
            return Err(GeolocationError::Denied);
        }
        let id = WatchId(inner.next_id);
        inner.next_id += 1;

        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        inner.watches.insert(
            id,
            Subscriber {
                tx,
                filter: FixFilter::new(options),
            },
        );
        log::debug!("[Geolocation] Watch {} started", id.0);
        Ok(Watch { id, fixes: rx })
    }

    fn clear_watch(&self, id: WatchId) {
        let mut inner = self.inner.lock().expect("ChannelSource mutex poisoned");
        if inner.watches.remove(&id).is_some() {
            log::debug!("[Geolocation] Watch {} cleared", id.0);
        }
    }
}

impl FixFeed {
    /// Deliver a raw fix to every watch whose filter accepts it.
    ///
    /// Returns the number of watches the fix was delivered to. Never blocks:
    /// a watch whose buffer is full misses the fix, and its filter keeps
    /// measuring from the last fix it actually delivered.
    pub fn push(&self, fix: LocationFix) -> usize {
        let mut inner = self.inner.lock().expect("ChannelSource mutex poisoned");
        let mut delivered = 0;
        inner.watches.retain(|id, sub| {
            if !sub.filter.passes(&fix) {
                return true;
            }
            match sub.tx.try_send(Ok(fix.clone())) {
                Ok(()) => {
                    sub.filter.commit(&fix);
                    delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::warn!("[Geolocation] Watch {} buffer full, fix skipped", id.0);
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
        delivered
    }

    /// Report a provider error to every watch.
    pub fn push_error(&self, error: GeolocationError) {
        let mut inner = self.inner.lock().expect("ChannelSource mutex poisoned");
        inner.watches.retain(|_, sub| {
            !matches!(
                sub.tx.try_send(Err(error.clone())),
                Err(mpsc::error::TrySendError::Closed(_))
            )
        });
    }

    /// Change the permission answered to future requests.
    pub fn set_authorized(&self, authorized: bool) {
        self.inner
            .lock()
            .expect("ChannelSource mutex poisoned")
            .authorized = authorized;
    }

    /// Number of watches currently registered.
    #[must_use]
    pub fn active_watches(&self) -> usize {
        self.inner
            .lock()
            .expect("ChannelSource mutex poisoned")
            .watches
            .len()
    }

    /// How many times authorization has been requested.
    #[must_use]
    pub fn authorization_requests(&self) -> u32 {
        self.inner
            .lock()
            .expect("ChannelSource mutex poisoned")
            .authorization_requests
    }
}
