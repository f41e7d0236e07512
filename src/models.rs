use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::reference::ReferenceId;

pub const PDF_DATA_URI_PREFIX: &str = "data:application/pdf;base64,";

// ============================================================================
// Document entries
// ============================================================================

/// Session-unique identity of a [`FileEntry`]. Never reused, even after the
/// entry is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Inline, editable text (.tex, .sty, .bib, ...)
    Text,
    /// Opaque payload picked from local disk (images, fonts, ...)
    File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryContent {
    Text(String),
    Binary(Bytes),
}

impl EntryContent {
    pub fn empty_for(kind: EntryKind) -> Self {
        match kind {
            EntryKind::Text => EntryContent::Text(String::new()),
            EntryKind::File => EntryContent::Binary(Bytes::new()),
        }
    }

    /// Wire representation. Text is sent as its UTF-8 bytes.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            EntryContent::Text(text) => Bytes::from(text.clone().into_bytes()),
            EntryContent::Binary(data) => data.clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            EntryContent::Text(text) => text.len(),
            EntryContent::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub id: EntryId,
    pub kind: EntryKind,
    /// Multipart field name, part filename, and `input` parameter when main.
    pub name: String,
    pub content: EntryContent,
    pub upload: UploadMode,
}

/// How an entry travels to the service. `Store` and `Reference` go through
/// the service's content-addressed reference store, so large assets only
/// need to be uploaded once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    /// Contents sent as a plain part.
    #[default]
    Inline,
    /// Contents sent and kept by the service under their [`ReferenceId`].
    Store,
    /// Only the [`ReferenceId`] is sent; the service supplies the contents.
    Reference,
}

/// A file picked from local disk: its original file name and its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub name: String,
    pub data: Bytes,
}

// ============================================================================
// Submission options
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorVerbosity {
    /// Complete compile log as text/plain
    Full,
    /// Only the `!` error lines of the compile log
    Condensed,
}

impl ErrorVerbosity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorVerbosity::Full => "full",
            ErrorVerbosity::Condensed => "condensed",
        }
    }
}

/// Job parameters sent alongside the document. `None` or empty values are
/// left out of the request so the service applies its own defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionOptions {
    pub engine: Option<String>,
    pub errors: Option<ErrorVerbosity>,
    pub image: Option<String>,
}

impl Default for SubmissionOptions {
    fn default() -> Self {
        Self {
            engine: None,
            errors: Some(ErrorVerbosity::Full),
            image: None,
        }
    }
}

// ============================================================================
// Render outcomes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorInfo {
    pub message: String,
    pub status: Option<u16>,
    pub content_type: Option<String>,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            content_type: None,
        }
    }

    pub fn with_response(message: impl Into<String>, status: u16, content_type: &str) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
            content_type: Some(content_type.to_string()),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(status) = self.status {
            write!(f, " (HTTP {}", status)?;
            match self.content_type.as_deref() {
                Some(ct) if !ct.is_empty() => write!(f, ", {})", ct)?,
                _ => write!(f, ")")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureCategory {
    Input,
    Compilation,
    Queue,
    Reference,
    Internal,
    #[serde(other)]
    Other,
}

/// Structured failure body of a `422 application/json` render response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderFailure {
    pub error: String,
    pub category: FailureCategory,
    /// Remaining keys, e.g. `references` for unknown file references.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Outcome of one submission, consumed by presentation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum RenderOutcome {
    /// `data:application/pdf;base64,...`
    Pdf(String),
    Log(String),
    Status(RenderFailure),
    Error(ErrorInfo),
}

impl RenderFailure {
    /// References the service did not know, for a `reference` failure.
    /// Entries uploaded by reference under these ids must be stored again.
    pub fn missing_references(&self) -> Vec<ReferenceId> {
        if self.category != FailureCategory::Reference {
            return Vec::new();
        }
        self.extra
            .get("references")
            .and_then(|v| v.as_array())
            .map(|refs| {
                refs.iter()
                    .filter_map(|r| r.as_str())
                    .filter_map(|r| r.parse().ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl RenderOutcome {
    pub fn pdf_from_bytes(pdf: &[u8]) -> Self {
        RenderOutcome::Pdf(format!(
            "{}{}",
            PDF_DATA_URI_PREFIX,
            general_purpose::STANDARD.encode(pdf)
        ))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RenderOutcome::Pdf(_) => "pdf",
            RenderOutcome::Log(_) => "log",
            RenderOutcome::Status(_) => "status",
            RenderOutcome::Error(_) => "error",
        }
    }

    /// Decodes the PDF data URI back into the document bytes.
    pub fn pdf_bytes(&self) -> Option<Vec<u8>> {
        match self {
            RenderOutcome::Pdf(uri) => uri
                .strip_prefix(PDF_DATA_URI_PREFIX)
                .and_then(|b64| general_purpose::STANDARD.decode(b64).ok()),
            _ => None,
        }
    }
}

// ============================================================================
// Service status
// ============================================================================

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct QueueStatus {
    #[serde(default)]
    pub length: usize,
    #[serde(default)]
    pub capacity: usize,
}

/// `GET /status` response body as the service sends it.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct StatusDocument {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub mode: String,
    pub engines: Option<Vec<String>>,
    pub images: Option<Vec<String>>,
    #[serde(default)]
    pub default_engine: String,
    /// Job timeout in seconds
    #[serde(default)]
    pub timeout: f64,
    #[serde(default)]
    pub queue: QueueStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub version: String,
    pub mode: String,
    pub engines: Vec<String>,
    pub images: Vec<String>,
    pub default_engine: String,
    pub timeout_secs: f64,
    pub queue_length: usize,
    pub queue_capacity: usize,
}
