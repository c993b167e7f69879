//! Inbound OAuth callback handling.
//!
//! The provider returns the user to the redirect URI with `code` and `state`
//! (or `error`) in the query string. [`CallbackParams::from_url`] extracts
//! them. Hosts that receive the callback somewhere else (a popup window, a
//! local redirect listener) forward it through a [`CallbackHub`]; each
//! waiting wizard holds a [`CallbackSubscription`] and is unsubscribed when
//! it drops the guard.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

/// Parameters of a provider callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    /// Authorization code.
    pub code: Option<String>,
    /// Returned state.
    pub state: Option<String>,
    /// OAuth error code (e.g. `access_denied`).
    pub error: Option<String>,
    /// Human-readable error description.
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Creates a successful callback.
    #[must_use]
    pub fn new(code: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            state: Some(state.into()),
            ..Self::default()
        }
    }

    /// Parses a full URL or a path with a query string.
    ///
    /// The fragment is ignored (Facebook appends `#_=_`). Unknown parameters
    /// are ignored, and the first occurrence of a repeated parameter wins.
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        let without_fragment = url.split('#').next().unwrap_or_default();
        let query = without_fragment
            .split_once('?')
            .map_or("", |(_, query)| query);

        let mut params = Self::default();
        for pair in query.split('&') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let slot = match key {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            if slot.is_none() {
                *slot = decode_component(value);
            }
        }
        params
    }

    /// Returns true if the provider reported an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Returns the most descriptive error text available.
    #[must_use]
    pub fn error_reason(&self) -> Option<&str> {
        self.error_description.as_deref().or(self.error.as_deref())
    }
}

/// Decodes one `application/x-www-form-urlencoded` value.
fn decode_component(value: &str) -> Option<String> {
    let spaced = value.replace('+', " ");
    urlencoding::decode(&spaced).ok().map(|v| v.into_owned())
}

type Subscribers = HashMap<u64, mpsc::UnboundedSender<CallbackParams>>;

#[derive(Debug, Default)]
struct HubInner {
    next_id: u64,
    subscribers: Subscribers,
}

/// Fan-out point for callbacks delivered outside the redirect URL.
#[derive(Debug, Clone, Default)]
pub struct CallbackHub {
    inner: Arc<Mutex<HubInner>>,
}

impl CallbackHub {
    /// Creates a hub with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a listener. Dropping the returned guard unregisters it.
    #[must_use]
    pub fn subscribe(&self) -> CallbackSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.insert(id, tx);
        debug!(subscription = id, "Callback listener subscribed");

        CallbackSubscription {
            id,
            hub: Arc::downgrade(&self.inner),
            rx,
        }
    }

    /// Delivers a callback to every current listener.
    ///
    /// Returns the number of listeners reached.
    pub fn publish(&self, params: CallbackParams) -> usize {
        let mut inner = self.lock();
        inner
            .subscribers
            .retain(|_, tx| tx.send(params.clone()).is_ok());
        inner.subscribers.len()
    }

    /// Parses `url` and publishes the result.
    pub fn publish_url(&self, url: &str) -> usize {
        self.publish(CallbackParams::from_url(url))
    }

    /// Returns the number of registered listeners.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

/// A registered callback listener.
#[derive(Debug)]
pub struct CallbackSubscription {
    id: u64,
    hub: Weak<Mutex<HubInner>>,
    rx: mpsc::UnboundedReceiver<CallbackParams>,
}

impl CallbackSubscription {
    /// Waits for the next callback. Returns `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<CallbackParams> {
        self.rx.recv().await
    }

    /// Waits for the next callback for at most `limit`.
    pub async fn recv_timeout(&mut self, limit: Duration) -> Option<CallbackParams> {
        tokio::time::timeout(limit, self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Returns a callback if one is already queued.
    pub fn try_recv(&mut self) -> Option<CallbackParams> {
        self.rx.try_recv().ok()
    }
}

impl Drop for CallbackSubscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .subscribers
                .remove(&self.id);
            debug!(subscription = self.id, "Callback listener unsubscribed");
        }
    }
}
