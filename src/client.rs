use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::controller::SubmissionController;
use crate::document::Document;
use crate::error::{PreconditionError, TransportError};
use crate::models::*;
use crate::poller::StatusPoller;
use crate::store::Store;
use crate::transport::{HttpTransport, Transport};

/// A session against one rendering service: the store plus the submission
/// controller and status poller sharing it.
#[derive(Clone)]
pub struct Client {
    config: ClientConfig,
    store: Store,
    controller: SubmissionController,
    poller: StatusPoller,
}

impl Client {
    pub fn connect(config: ClientConfig, document: Document) -> Result<Self, TransportError> {
        let transport = HttpTransport::new(config.server.clone(), config.timeout)?;
        Ok(Self::with_transport(config, document, Arc::new(transport)))
    }

    pub fn with_transport(config: ClientConfig, document: Document, transport: Arc<dyn Transport>) -> Self {
        let store = Store::new(document);
        Self {
            controller: SubmissionController::new(store.clone(), transport.clone()).with_policy(config.policy),
            poller: StatusPoller::new(store.clone(), transport),
            store,
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub async fn submit(&self) -> Result<Option<RenderOutcome>, PreconditionError> {
        self.controller.submit().await
    }

    /// [`SubmissionController::submit_restoring_references`]
    pub async fn submit_restoring_references(&self) -> Result<Option<RenderOutcome>, PreconditionError> {
        self.controller.submit_restoring_references().await
    }

    pub async fn fetch_status(&self) -> Result<ServiceStatus, ErrorInfo> {
        self.poller.fetch_status().await
    }

    /// Polls the service in the background at the configured interval.
    pub fn spawn_poller(&self) -> JoinHandle<()> {
        self.poller.clone().spawn(self.config.poll_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ReferenceId;
    use axum::{
        extract::{Multipart, State},
        http::{header, StatusCode},
        response::{IntoResponse, Response},
        routing::{get, post},
        Router,
    };
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    const STATUS_JSON: &str = r#"{"version":"0.6.1","mode":"local","engines":["xelatex","pdflatex"],
        "default_engine":"xelatex","timeout":60,"queue":{"length":0,"capacity":2}}"#;

    async fn mock_service(render_status: StatusCode, render_type: &'static str, render_body: &'static [u8]) -> String {
        let app = Router::new()
            .route(
                "/render",
                post(move || async move { (render_status, [(header::CONTENT_TYPE, render_type)], render_body) }),
            )
            .route(
                "/status",
                get(|| async { ([(header::CONTENT_TYPE, "application/json")], STATUS_JSON) }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_render_pdf_end_to_end() {
        let server = mock_service(StatusCode::OK, "application/pdf", b"%PDF-1.5\n%%EOF").await;
        let client = Client::connect(ClientConfig::new(&server).unwrap(), Document::with_sample()).unwrap();

        let status = client.fetch_status().await.unwrap();
        assert_eq!(status.engines, vec!["xelatex", "pdflatex"]);
        assert_eq!(client.store().options().await.engine.as_deref(), Some("xelatex"));

        let outcome = client.submit().await.unwrap().unwrap();
        assert_eq!(outcome.pdf_bytes().unwrap(), b"%PDF-1.5\n%%EOF");
        assert!(!client.store().is_rendering());
    }

    #[tokio::test]
    async fn test_render_log_end_to_end() {
        let server = mock_service(
            StatusCode::UNPROCESSABLE_ENTITY,
            "text/plain; charset=utf-8",
            b"! Undefined control sequence.\nl.3 \\foo\n",
        )
        .await;
        let client = Client::connect(ClientConfig::new(&server).unwrap(), Document::with_sample()).unwrap();

        let outcome = client.submit().await.unwrap();
        assert_eq!(
            outcome,
            Some(RenderOutcome::Log("! Undefined control sequence.\nl.3 \\foo\n".into()))
        );
    }

    #[tokio::test]
    async fn test_unreachable_service() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = ClientConfig::new(&format!("http://{}", addr)).unwrap();
        let client = Client::connect(config, Document::with_sample()).unwrap();

        let outcome = client.submit().await.unwrap().unwrap();
        let RenderOutcome::Error(info) = outcome else {
            panic!("expected an error outcome");
        };
        assert!(info.message.starts_with("request failed"));
        assert_eq!(info.status, None);
        assert!(!client.store().is_rendering());

        assert!(client.fetch_status().await.is_err());
        assert!(client.store().last_status_error().await.is_some());
    }

    type KnownRefs = Arc<Mutex<HashSet<String>>>;

    // Keeps `ref=store` parts and rejects unknown `ref=use` ids, like the
    // service's reference store.
    async fn render_with_refs(State(known): State<KnownRefs>, mut multipart: Multipart) -> Response {
        let mut missing = Vec::new();
        while let Some(field) = multipart.next_field().await.unwrap() {
            let content_type = field.content_type().unwrap_or_default().to_string();
            let data = field.bytes().await.unwrap();
            match content_type.as_str() {
                "application/x.texd; ref=store" => {
                    known.lock().unwrap().insert(ReferenceId::of(&data).to_string());
                }
                "application/x.texd; ref=use" => {
                    let id = String::from_utf8_lossy(&data).trim().to_string();
                    if !known.lock().unwrap().contains(&id) {
                        missing.push(id);
                    }
                }
                _ => {}
            }
        }
        if missing.is_empty() {
            return ([(header::CONTENT_TYPE, "application/pdf")], "%PDF-1.5").into_response();
        }
        let body = serde_json::json!({
            "error": "unknown file references",
            "category": "reference",
            "references": missing,
        });
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            [(header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }

    #[tokio::test]
    async fn test_reference_store_round_trip() {
        let known = KnownRefs::default();
        let app = Router::new()
            .route("/render", post(render_with_refs))
            .with_state(known.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut document = Document::with_sample();
        let logo = document.create_file_entry();
        document.attach_local_file(
            logo,
            Some(LocalFile {
                name: "logo.png".into(),
                data: bytes::Bytes::from_static(b"PNGDATA"),
            }),
        );
        document.set_upload_mode(logo, UploadMode::Reference);
        let config = ClientConfig::new(&format!("http://{}", addr)).unwrap();
        let client = Client::connect(config, document).unwrap();

        // unknown to the service: plain submit reports it
        let Some(RenderOutcome::Status(failure)) = client.submit().await.unwrap() else {
            panic!("expected a reference failure");
        };
        assert_eq!(failure.missing_references(), vec![ReferenceId::of(b"PNGDATA")]);

        // stored on retry, then usable by reference
        let outcome = client.submit_restoring_references().await.unwrap().unwrap();
        assert_eq!(outcome.kind(), "pdf");
        assert!(known.lock().unwrap().contains(&ReferenceId::of(b"PNGDATA").to_string()));

        client
            .store()
            .edit_document(|d| d.set_upload_mode(logo, UploadMode::Reference))
            .await;
        let outcome = client.submit().await.unwrap().unwrap();
        assert_eq!(outcome.kind(), "pdf");
    }
}
