use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::document::Document;
use crate::models::*;

/// Everything presentation observes. Submission results and poll failures
/// live in separate slots so a failed poll never hides a render result.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub document: Document,
    pub options: SubmissionOptions,
    pub last_render: Option<RenderOutcome>,
    pub last_status_error: Option<ErrorInfo>,
    pub service: ServiceStatus,
    /// Engine/image defaults are taken from the first successful poll only.
    pub defaults_seeded: bool,
}

/// Shared session state. Its methods are the only way to change it.
#[derive(Clone, Default)]
pub struct Store {
    state: Arc<RwLock<SessionState>>,
    rendering: Arc<AtomicBool>,
}

/// Clears the busy flag when dropped, whatever way the render ended.
pub struct RenderGuard {
    rendering: Arc<AtomicBool>,
}

impl Drop for RenderGuard {
    fn drop(&mut self) {
        self.rendering.store(false, Ordering::SeqCst);
    }
}

impl Store {
    pub fn new(document: Document) -> Self {
        Self::with_options(document, SubmissionOptions::default())
    }

    pub fn with_options(document: Document, options: SubmissionOptions) -> Self {
        Self {
            state: Arc::new(RwLock::new(SessionState {
                document,
                options,
                ..Default::default()
            })),
            rendering: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn snapshot(&self) -> SessionState {
        self.state.read().await.clone()
    }

    pub fn is_rendering(&self) -> bool {
        self.rendering.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------------
    // Document and options
    // ------------------------------------------------------------------------

    pub async fn document(&self) -> Document {
        self.state.read().await.document.clone()
    }

    /// Applies an edit to the document, e.g. `store.edit_document(|d| d.create_text_entry())`.
    pub async fn edit_document<R>(&self, edit: impl FnOnce(&mut Document) -> R) -> R {
        let mut state = self.state.write().await;
        edit(&mut state.document)
    }

    /// What a submission needs: the document and the options, without the
    /// rest of the session.
    pub async fn job(&self) -> (Document, SubmissionOptions) {
        let state = self.state.read().await;
        (state.document.clone(), state.options.clone())
    }

    pub async fn options(&self) -> SubmissionOptions {
        self.state.read().await.options.clone()
    }

    pub async fn select_engine(&self, engine: Option<String>) {
        self.state.write().await.options.engine = engine;
    }

    pub async fn select_image(&self, image: Option<String>) {
        self.state.write().await.options.image = image;
    }

    pub async fn select_errors(&self, errors: Option<ErrorVerbosity>) {
        self.state.write().await.options.errors = errors;
    }

    // ------------------------------------------------------------------------
    // Render slot
    // ------------------------------------------------------------------------

    pub async fn last_render(&self) -> Option<RenderOutcome> {
        self.state.read().await.last_render.clone()
    }

    /// Marks a render as in flight and clears the previous result. The guard
    /// exists before the flag is set, so dropping this future at the lock
    /// await still clears it.
    pub(crate) async fn begin_render(&self) -> RenderGuard {
        let guard = RenderGuard {
            rendering: self.rendering.clone(),
        };
        self.rendering.store(true, Ordering::SeqCst);
        self.state.write().await.last_render = None;
        guard
    }

    pub(crate) async fn finish_render(&self, outcome: Option<RenderOutcome>) {
        self.state.write().await.last_render = outcome;
    }

    // ------------------------------------------------------------------------
    // Service status
    // ------------------------------------------------------------------------

    pub async fn service_status(&self) -> ServiceStatus {
        self.state.read().await.service.clone()
    }

    pub async fn last_status_error(&self) -> Option<ErrorInfo> {
        self.state.read().await.last_status_error.clone()
    }

    pub(crate) async fn record_status_error(&self, error: ErrorInfo) {
        self.state.write().await.last_status_error = Some(error);
    }

    /// Stores a successful poll. Returns the new status.
    pub(crate) async fn apply_status(&self, doc: StatusDocument) -> ServiceStatus {
        let mut state = self.state.write().await;

        let engines = doc.engines.unwrap_or_else(|| state.service.engines.clone());
        let images = doc.images.unwrap_or_default();
        state.service = ServiceStatus {
            version: doc.version,
            mode: doc.mode,
            engines,
            images,
            default_engine: doc.default_engine,
            timeout_secs: doc.timeout,
            queue_length: doc.queue.length,
            queue_capacity: doc.queue.capacity,
        };
        state.last_status_error = None;

        if !state.defaults_seeded {
            state.defaults_seeded = true;
            if !state.service.default_engine.is_empty() {
                state.options.engine = Some(state.service.default_engine.clone());
            }
            state.options.image = state.service.images.first().cloned();
            info!(
                "Using service defaults: engine {:?}, image {:?}",
                state.options.engine, state.options.image
            );
        }

        state.service.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(default_engine: &str, engines: Option<&[&str]>, images: Option<&[&str]>) -> StatusDocument {
        let list = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        StatusDocument {
            version: "0.6.1".into(),
            mode: "container".into(),
            engines: engines.map(list),
            images: images.map(list),
            default_engine: default_engine.into(),
            timeout: 60.0,
            queue: QueueStatus {
                length: 1,
                capacity: 8,
            },
        }
    }

    #[tokio::test]
    async fn test_render_guard_clears_flag() {
        let store = Store::new(Document::with_sample());
        store.finish_render(Some(RenderOutcome::Log("old".into()))).await;

        let guard = store.begin_render().await;
        assert!(store.is_rendering());
        assert!(store.last_render().await.is_none());
        drop(guard);
        assert!(!store.is_rendering());
    }

    #[tokio::test]
    async fn test_cancelled_begin_render_clears_flag() {
        let store = Store::new(Document::with_sample());
        let reader = store.state.read().await;

        let begin = store.begin_render();
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(20), begin).await;
        assert!(timed_out.is_err());
        drop(reader);

        assert!(!store.is_rendering());
    }

    #[tokio::test]
    async fn test_job_reads_document_and_options() {
        let store = Store::new(Document::with_sample());
        store.select_engine(Some("lualatex".into())).await;
        store.finish_render(Some(RenderOutcome::pdf_from_bytes(b"%PDF"))).await;

        let (document, options) = store.job().await;
        assert_eq!(document.main_entry().unwrap().name, crate::document::SAMPLE_NAME);
        assert_eq!(options.engine.as_deref(), Some("lualatex"));
    }

    #[tokio::test]
    async fn test_edit_document() {
        let store = Store::new(Document::with_sample());
        let id = store.edit_document(|d| d.create_text_entry()).await;
        store.edit_document(|d| d.rename_entry(id, "extra.sty")).await;
        let doc = store.document().await;
        assert_eq!(doc.entry(id).unwrap().name, "extra.sty");
    }

    #[tokio::test]
    async fn test_first_status_seeds_defaults() {
        let store = Store::new(Document::with_sample());
        let applied = store
            .apply_status(status("xelatex", Some(&["pdflatex", "xelatex"][..]), Some(&["texlive:2024", "texlive:2023"][..])))
            .await;
        assert_eq!(applied.queue_capacity, 8);

        let options = store.options().await;
        assert_eq!(options.engine.as_deref(), Some("xelatex"));
        assert_eq!(options.image.as_deref(), Some("texlive:2024"));
    }

    #[tokio::test]
    async fn test_later_status_keeps_user_selection() {
        let store = Store::new(Document::with_sample());
        store.apply_status(status("xelatex", Some(&["pdflatex", "xelatex"][..]), None)).await;
        store.select_engine(Some("pdflatex".into())).await;
        store.apply_status(status("lualatex", Some(&["lualatex"][..]), Some(&["other"][..]))).await;

        let options = store.options().await;
        assert_eq!(options.engine.as_deref(), Some("pdflatex"));
        assert_eq!(options.image, None);
        assert_eq!(store.service_status().await.default_engine, "lualatex");
    }

    #[tokio::test]
    async fn test_missing_lists_fall_back() {
        let store = Store::new(Document::with_sample());
        store.apply_status(status("xelatex", Some(&["xelatex"][..]), Some(&["img"][..]))).await;
        let service = store.apply_status(status("xelatex", None, None)).await;
        assert_eq!(service.engines, vec!["xelatex".to_string()]);
        assert!(service.images.is_empty());
    }

    #[tokio::test]
    async fn test_successful_status_clears_error() {
        let store = Store::new(Document::with_sample());
        store.record_status_error(ErrorInfo::with_response("Unable to fetch status", 502, "")).await;
        assert!(store.last_status_error().await.is_some());
        store.apply_status(status("xelatex", None, None)).await;
        assert!(store.last_status_error().await.is_none());
    }
}
