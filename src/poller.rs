use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::classify::{media_type, MIME_JSON};
use crate::models::*;
use crate::store::Store;
use crate::transport::Transport;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Shorter intervals are raised to this; a zero period would make the
/// ticker panic.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

const STATUS_ERROR_MESSAGE: &str = "Unable to fetch status";

/// Keeps the store's view of the service (engines, images, queue) current.
#[derive(Clone)]
pub struct StatusPoller {
    store: Store,
    transport: Arc<dyn Transport>,
}

impl StatusPoller {
    pub fn new(store: Store, transport: Arc<dyn Transport>) -> Self {
        Self { store, transport }
    }

    /// One poll. A failure is recorded in the store's status error slot and
    /// leaves the last known service status untouched.
    pub async fn fetch_status(&self) -> Result<ServiceStatus, ErrorInfo> {
        let response = match self.transport.status().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Status poll failed: {}", e);
                return Err(self.fail(ErrorInfo::new(STATUS_ERROR_MESSAGE)).await);
            }
        };

        let media = media_type(response.content_type.as_deref());
        if response.status != 200 {
            warn!("Status poll failed: HTTP {} ({})", response.status, media);
            return Err(self
                .fail(ErrorInfo::with_response(STATUS_ERROR_MESSAGE, response.status, &media))
                .await);
        }
        if media != MIME_JSON {
            debug!("status response has content type {:?}, parsing as JSON anyway", media);
        }

        match serde_json::from_slice::<StatusDocument>(&response.body) {
            Ok(doc) => Ok(self.store.apply_status(doc).await),
            Err(e) => {
                warn!("Status poll returned malformed JSON: {}", e);
                Err(self
                    .fail(ErrorInfo::with_response(STATUS_ERROR_MESSAGE, response.status, &media))
                    .await)
            }
        }
    }

    async fn fail(&self, error: ErrorInfo) -> ErrorInfo {
        self.store.record_status_error(error.clone()).await;
        error
    }

    /// Polls forever: once right away, then every `every` (at least
    /// [`MIN_POLL_INTERVAL`]). Failed polls are retried on the next tick.
    pub async fn run(self, every: Duration) {
        let mut ticker = tokio::time::interval(every.max(MIN_POLL_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Ok(status) = self.fetch_status().await {
                info!(
                    "📊 texd {} ({}): queue {}/{}",
                    status.version, status.mode, status.queue_length, status.queue_capacity
                );
            }
        }
    }

    /// Starts [`run`](Self::run) as a background task. Abort the handle to
    /// stop polling.
    pub fn spawn(self, every: Duration) -> JoinHandle<()> {
        tokio::spawn(self.run(every))
    }
}
