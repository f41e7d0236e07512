//! Maps a render response onto a [`RenderOutcome`].
//!
//! Only the media type counts: `text/plain; charset=utf-8` is `text/plain`.

use tracing::warn;

use crate::error::TransportError;
use crate::models::*;
use crate::transport::RawResponse;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_JSON: &str = "application/json";

const STATUS_OK: u16 = 200;
const STATUS_UNPROCESSABLE: u16 = 422;

/// What to do with a `422` whose content type is neither text nor JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolPolicy {
    /// Drop the response: no outcome is produced.
    #[default]
    Lenient,
    /// Report it as an error outcome.
    Strict,
}

/// Decision made from status and media type alone, before the body is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Pdf,
    Log,
    Status,
    /// 200 with something other than a PDF
    UnexpectedSuccess,
    /// 422 with an unknown media type
    UnrecognizedFailure,
    /// Any status besides 200 and 422
    UnexpectedStatus,
}

/// `type/subtype` of a Content-Type header, lowercased, parameters dropped.
pub fn media_type(content_type: Option<&str>) -> String {
    content_type
        .unwrap_or_default()
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

pub fn disposition(status: u16, media_type: &str) -> Disposition {
    match (status, media_type) {
        (STATUS_OK, MIME_PDF) => Disposition::Pdf,
        (STATUS_OK, _) => Disposition::UnexpectedSuccess,
        (STATUS_UNPROCESSABLE, MIME_TEXT) => Disposition::Log,
        (STATUS_UNPROCESSABLE, MIME_JSON) => Disposition::Status,
        (STATUS_UNPROCESSABLE, _) => Disposition::UnrecognizedFailure,
        _ => Disposition::UnexpectedStatus,
    }
}

/// Classifies a received response. `None` means the response is dropped,
/// which only happens for an unrecognized 422 under the lenient policy.
pub fn classify(response: &RawResponse, policy: ProtocolPolicy) -> Option<RenderOutcome> {
    let media = media_type(response.content_type.as_deref());
    let status = response.status;

    let outcome = match disposition(status, &media) {
        Disposition::Pdf => RenderOutcome::pdf_from_bytes(&response.body),
        Disposition::Log => RenderOutcome::Log(String::from_utf8_lossy(&response.body).into_owned()),
        Disposition::Status => match serde_json::from_slice::<RenderFailure>(&response.body) {
            Ok(failure) => RenderOutcome::Status(failure),
            Err(e) => {
                warn!("invalid status payload: {}", e);
                RenderOutcome::Error(ErrorInfo::with_response("invalid status payload", status, &media))
            }
        },
        Disposition::UnexpectedSuccess | Disposition::UnexpectedStatus => {
            warn!("unexpected response: HTTP {} ({})", status, media);
            RenderOutcome::Error(ErrorInfo::with_response("unexpected response", status, &media))
        }
        Disposition::UnrecognizedFailure => match policy {
            ProtocolPolicy::Lenient => {
                warn!("dropping HTTP 422 response with content type {:?}", media);
                return None;
            }
            ProtocolPolicy::Strict => {
                RenderOutcome::Error(ErrorInfo::with_response("unrecognized response", status, &media))
            }
        },
    };
    Some(outcome)
}

pub fn transport_failure(err: &TransportError) -> RenderOutcome {
    RenderOutcome::Error(ErrorInfo::new(err.to_string()))
}
