//! Background expiry sweeper.
//!
//! Reads already discard stale records, and each write arms its own cleanup
//! timer. A record whose timer was lost (written by a previous process into a
//! [`FileStorage`](super::storage::FileStorage), or written while no runtime
//! was running) is only removed when something reads it. The sweeper closes
//! that gap by calling [`ParameterStore::purge_expired`] on an interval.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use inbox_pkce::auth::storage::MemoryStorage;
//! use inbox_pkce::auth::store::ParameterStore;
//! use inbox_pkce::auth::sweeper::ExpirySweeper;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(ParameterStore::new(Arc::new(MemoryStorage::new())));
//!     let sweeper = ExpirySweeper::new(Arc::clone(&store))
//!         .with_interval(Duration::from_secs(30));
//!
//!     let handle = sweeper.start();
//!     // ... wizard runs ...
//!     sweeper.stop();
//!     handle.await.ok();
//! }
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, warn};

use super::store::ParameterStore;
use crate::config::{PkceConfig, DEFAULT_SWEEP_INTERVAL};

/// Shortest accepted time between sweeps.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Callback invoked with the number of records removed by a sweep.
pub type SweepCallback = Arc<dyn Fn(usize) + Send + Sync>;

/// Periodically purges stale records from a [`ParameterStore`].
pub struct ExpirySweeper {
    store: Arc<ParameterStore>,

    /// Time between sweeps.
    interval: Duration,

    /// Invoked after a sweep that removed something.
    callback: Option<SweepCallback>,

    /// Signal to stop the background task.
    shutdown: Arc<AtomicBool>,

    /// Records removed since start.
    purged_total: Arc<AtomicUsize>,
}

impl std::fmt::Debug for ExpirySweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpirySweeper")
            .field("interval", &self.interval)
            .field("stopping", &self.is_stopping())
            .field("purged_total", &self.purged_total())
            .finish_non_exhaustive()
    }
}

impl ExpirySweeper {
    /// Creates a sweeper with the default 60 second interval.
    ///
    /// The sweeper is not started. Call [`start`](Self::start).
    #[must_use]
    pub fn new(store: Arc<ParameterStore>) -> Self {
        Self {
            store,
            interval: DEFAULT_SWEEP_INTERVAL,
            callback: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            purged_total: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Creates a sweeper using `config.sweep_interval`.
    #[must_use]
    pub fn from_config(store: Arc<ParameterStore>, config: &PkceConfig) -> Self {
        Self::new(store).with_interval(config.sweep_interval)
    }

    /// Sets the time between sweeps, raised to [`MIN_SWEEP_INTERVAL`] if shorter.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if interval < MIN_SWEEP_INTERVAL {
            warn!(?interval, "Sweep interval too short, using minimum");
        }
        self.interval = interval.max(MIN_SWEEP_INTERVAL);
        self
    }

    /// Sets a callback run after each sweep that removed records.
    #[must_use]
    pub fn with_callback(mut self, callback: SweepCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Starts the background task.
    ///
    /// Must be called from within a tokio runtime. The first sweep runs
    /// immediately.
    pub fn start(&self) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let callback = self.callback.clone();
        let shutdown = Arc::clone(&self.shutdown);
        let purged_total = Arc::clone(&self.purged_total);
        let period = self.interval;

        tokio::spawn(async move {
            let mut ticker = interval(period);

            loop {
                ticker.tick().await;

                if shutdown.load(Ordering::Relaxed) {
                    debug!("ExpirySweeper received shutdown signal");
                    break;
                }

                let removed = store.purge_expired();
                if removed > 0 {
                    purged_total.fetch_add(removed, Ordering::Relaxed);
                    if let Some(ref cb) = callback {
                        cb(removed);
                    }
                }
            }

            debug!("ExpirySweeper background task terminated");
        })
    }

    /// Signals the background task to stop after its current tick.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Returns true if the sweeper has been signaled to stop.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Returns the number of records removed since start.
    #[must_use]
    pub fn purged_total(&self) -> usize {
        self.purged_total.load(Ordering::Relaxed)
    }
}
