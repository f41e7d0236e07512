use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::multipart::{Form, Part};
use url::Url;

use crate::document::Document;
use crate::error::{PreconditionError, TransportError};
use crate::models::*;

pub const MIME_OCTET_STREAM: &str = "application/octet-stream";
pub const MIME_TEXD_STORE: &str = "application/x.texd; ref=store";
pub const MIME_TEXD_USE: &str = "application/x.texd; ref=use";

// Everything but `A-Z a-z 0-9 - _ . ! ~ * ' ( )` is escaped; a space becomes %20.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// One multipart part. The entry name is used both as the form field name and
/// as the part's file name, which is how the service routes files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WirePart {
    pub name: String,
    /// Part `Content-Type`; the `application/x.texd` ones address the
    /// reference store.
    pub content_type: &'static str,
    /// File contents, or the `sha256:` id for a part sent by reference.
    pub data: Bytes,
}

impl WirePart {
    fn from_entry(entry: &FileEntry) -> Self {
        let (content_type, data) = match entry.upload {
            UploadMode::Inline => (MIME_OCTET_STREAM, entry.content.to_bytes()),
            UploadMode::Store => (MIME_TEXD_STORE, entry.content.to_bytes()),
            UploadMode::Reference => (MIME_TEXD_USE, Bytes::from(entry.reference_id().to_string())),
        };
        Self {
            name: entry.name.clone(),
            content_type,
            data,
        }
    }
}

/// A fully built `POST /render` job, independent of any HTTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRequest {
    pub parts: Vec<WirePart>,
    /// Only parameters with a non-empty value, in `errors, engine, image,
    /// input` order.
    pub params: Vec<(&'static str, String)>,
}

impl WireRequest {
    /// Percent-encoded query string, without the leading `?`.
    pub fn query_string(&self) -> String {
        self.params
            .iter()
            .map(|(key, value)| format!("{}={}", key, utf8_percent_encode(value, QUERY_VALUE)))
            .collect::<Vec<_>>()
            .join("&")
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// `<base>/render?<query>`
    pub fn render_url(&self, base: &Url) -> Result<Url, TransportError> {
        let mut url = base
            .join("render")
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        let query = self.query_string();
        url.set_query(if query.is_empty() { None } else { Some(&query) });
        Ok(url)
    }

    pub fn to_form(&self) -> Result<Form, TransportError> {
        let mut form = Form::new();
        for part in &self.parts {
            let body = Part::bytes(part.data.to_vec())
                .file_name(part.name.clone())
                .mime_str(part.content_type)
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
            form = form.part(part.name.clone(), body);
        }
        Ok(form)
    }

    pub fn total_bytes(&self) -> usize {
        self.parts.iter().map(|p| p.data.len()).sum()
    }
}

fn push_param(params: &mut Vec<(&'static str, String)>, key: &'static str, value: Option<&str>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        params.push((key, value.to_string()));
    }
}

/// Serializes the document and options into a render job. Fails without
/// side effects when the main entry no longer exists.
pub fn build_request(
    document: &Document,
    options: &SubmissionOptions,
) -> Result<WireRequest, PreconditionError> {
    let main = document
        .main_entry()
        .ok_or(PreconditionError::DanglingMain(document.main_id()))?;

    let parts = document
        .entries()
        .iter()
        .map(WirePart::from_entry)
        .collect();

    let mut params = Vec::with_capacity(4);
    push_param(&mut params, "errors", options.errors.as_ref().map(ErrorVerbosity::as_str));
    push_param(&mut params, "engine", options.engine.as_deref());
    push_param(&mut params, "image", options.image.as_deref());
    push_param(&mut params, "input", Some(main.name.as_str()));

    Ok(WireRequest { parts, params })
}
