use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::classify::{classify, transport_failure, ProtocolPolicy};
use crate::error::PreconditionError;
use crate::models::RenderOutcome;
use crate::request::build_request;
use crate::store::Store;
use crate::transport::Transport;

/// Runs render jobs for the document held in a [`Store`].
///
/// One submission at a time: callers check [`Store::is_rendering`] before
/// starting another.
#[derive(Clone)]
pub struct SubmissionController {
    store: Store,
    transport: Arc<dyn Transport>,
    policy: ProtocolPolicy,
}

impl SubmissionController {
    pub fn new(store: Store, transport: Arc<dyn Transport>) -> Self {
        Self {
            store,
            transport,
            policy: ProtocolPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ProtocolPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Submits the current document. The outcome is also stored as the
    /// store's last render result; `Ok(None)` means the service answered
    /// with something that could not be classified and was dropped.
    pub async fn submit(&self) -> Result<Option<RenderOutcome>, PreconditionError> {
        let (document, options) = self.store.job().await;
        let request = build_request(&document, &options)?;

        let _busy = self.store.begin_render().await;
        info!(
            "Rendering {} ({} files, {} bytes)...",
            request.param("input").unwrap_or("<unnamed>"),
            request.parts.len(),
            request.total_bytes()
        );
        let start = Instant::now();

        let outcome = match self.transport.render(&request).await {
            Ok(response) => classify(&response, self.policy),
            Err(e) => {
                warn!("Render request failed: {}", e);
                Some(transport_failure(&e))
            }
        };

        match &outcome {
            Some(outcome) => info!(
                "Render finished in {}ms: {}",
                start.elapsed().as_millis(),
                outcome.kind()
            ),
            None => warn!("Render finished in {}ms without a result", start.elapsed().as_millis()),
        }

        self.store.finish_render(outcome.clone()).await;
        Ok(outcome)
    }

    /// Like [`submit`](Self::submit), but when the service reports unknown
    /// references, switches the affected entries to `Store` and submits once
    /// more. The switch stays in the document, so the contents are stored
    /// again for later renders.
    pub async fn submit_restoring_references(&self) -> Result<Option<RenderOutcome>, PreconditionError> {
        let outcome = self.submit().await?;
        let missing = match &outcome {
            Some(RenderOutcome::Status(failure)) => failure.missing_references(),
            _ => return Ok(outcome),
        };
        if missing.is_empty() {
            return Ok(outcome);
        }

        let restored = self.store.edit_document(|d| d.restore_references(&missing)).await;
        if restored == 0 {
            warn!("Service is missing {} reference(s) no entry provides", missing.len());
            return Ok(outcome);
        }
        info!("Re-uploading {} file(s) the service no longer has", restored);
        self.submit().await
    }
}
