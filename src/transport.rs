use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::TransportError;
use crate::request::WireRequest;

/// A response as received, before any interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    /// Full `Content-Type` header value, parameters included.
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl RawResponse {
    pub fn new(status: u16, content_type: &str, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type: Some(content_type.to_string()),
            body: body.into(),
        }
    }
}

/// The two calls the client makes against the rendering service.
#[async_trait]
pub trait Transport: Send + Sync {
    /// `POST /render` with the job as multipart body.
    async fn render(&self, request: &WireRequest) -> Result<RawResponse, TransportError>;

    /// `GET /status`, asking for JSON.
    async fn status(&self) -> Result<RawResponse, TransportError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base: Url,
}

impl HttpTransport {
    /// `timeout` applies to each whole request; `None` waits indefinitely.
    pub fn new(base: Url, timeout: Option<Duration>) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            base,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    async fn collect(response: reqwest::Response) -> Result<RawResponse, TransportError> {
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;
        debug!("response: HTTP {} {:?} ({} bytes)", status, content_type, body.len());
        Ok(RawResponse {
            status,
            content_type,
            body,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn render(&self, request: &WireRequest) -> Result<RawResponse, TransportError> {
        let url = request.render_url(&self.base)?;
        debug!("POST {} ({} parts, {} bytes)", url, request.parts.len(), request.total_bytes());
        let response = self
            .client
            .post(url)
            .multipart(request.to_form()?)
            .send()
            .await?;
        Self::collect(response).await
    }

    async fn status(&self) -> Result<RawResponse, TransportError> {
        let url = self
            .base
            .join("status")
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        Self::collect(response).await
    }
}
