use thiserror::Error;

use crate::models::EntryId;

/// Local state that keeps a request from being built. Raised before any
/// network traffic happens.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("main entry {0} does not exist")]
    DanglingMain(EntryId),
}

/// The request never produced a response.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// A reference id that is not `sha256:<base64 digest>`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("invalid reference: unexpected length {0}")]
    Length(usize),

    #[error("invalid reference: missing hash prefix")]
    MissingPrefix,

    #[error("invalid reference: unexpected non-padding character at the end")]
    Padding,

    #[error("invalid reference: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("invalid reference: digest has {0} bytes")]
    DigestLength(usize),
}
