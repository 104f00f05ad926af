//! Backend reachability monitoring.
//!
//! The request executor flips the monitor to unavailable when it sees a
//! hard connectivity failure. From then on the monitor probes the
//! backend health endpoint on a fixed cadence and flips back on the
//! first success, at which point the probe task stops itself. UI layers
//! subscribe to the transitions to drive offline banners.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use crate::config::ApiConfig;
use crate::error::NetworkError;

struct MonitorInner {
    config: Arc<ApiConfig>,
    http: reqwest::Client,
    available_tx: watch::Sender<bool>,
    probe: Mutex<Option<JoinHandle<()>>>,
}

/// Tracks whether the backend is reachable.
pub struct ConnectivityMonitor {
    inner: Arc<MonitorInner>,
}

impl ConnectivityMonitor {
    /// Create a monitor. Starts out available; nothing is probed until
    /// [`start`](Self::start) is called.
    pub fn new(config: Arc<ApiConfig>) -> Result<Self, NetworkError> {
        let probe_timeout = config.probe_interval().max(Duration::from_secs(1));
        let http = reqwest::Client::builder()
            .timeout(probe_timeout)
            .build()
            .map_err(|e| NetworkError::InvalidRequest(format!("probe client: {e}")))?;
        let (available_tx, _) = watch::channel(true);
        Ok(Self {
            inner: Arc::new(MonitorInner {
                config,
                http,
                available_tx,
                probe: Mutex::new(None),
            }),
        })
    }

    /// Whether the backend was reachable at the last observation.
    pub fn is_available(&self) -> bool {
        *self.inner.available_tx.borrow()
    }

    /// Record that the backend could not be reached.
    pub fn mark_unreachable(&self) {
        let was_available = self.inner.available_tx.send_replace(false);
        if was_available {
            warn!("backend unreachable");
        }
    }

    /// Start the recovery probe. A probe that is already running is
    /// left alone, so calling this on every failure is safe.
    pub fn start(&self) {
        let mut probe = self.inner.probe.lock();
        if let Some(handle) = probe.as_ref() {
            if !handle.is_finished() {
                debug!("connectivity probe already running");
                return;
            }
        }
        debug!("starting connectivity probe");
        let inner = Arc::clone(&self.inner);
        *probe = Some(tokio::spawn(async move {
            inner.probe_loop().await;
        }));
    }

    /// Stop the recovery probe if one is running.
    pub fn stop(&self) {
        if let Some(handle) = self.inner.probe.lock().take() {
            handle.abort();
            debug!("connectivity probe stopped");
        }
    }

    /// Subscribe to availability transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.available_tx.subscribe()
    }

    /// Stream adapter over [`subscribe`](Self::subscribe), yielding the
    /// current value first and every transition after it.
    pub fn watch_stream(&self) -> WatchStream<bool> {
        WatchStream::new(self.subscribe())
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("available", &self.is_available())
            .finish()
    }
}

impl MonitorInner {
    async fn probe_loop(&self) {
        let url = match self.config.endpoint(&self.config.health_path) {
            Ok(url) => url,
            Err(err) => {
                warn!(error = %err, "cannot resolve health endpoint, probe disabled");
                return;
            }
        };
        let interval = self.config.probe_interval();

        loop {
            tokio::time::sleep(interval).await;
            match self.http.get(url.clone()).send().await {
                Ok(response) if response.status().is_success() => {
                    info!("backend reachable again");
                    self.available_tx.send_replace(true);
                    return;
                }
                Ok(response) => {
                    debug!(status = response.status().as_u16(), "health probe not healthy yet");
                }
                Err(err) => {
                    debug!(error = %err, "health probe failed");
                }
            }
        }
    }
}
