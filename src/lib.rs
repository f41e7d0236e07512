//! Client for a texd-style TeX rendering service.
//!
//! A [`Document`] of named entries is submitted as one multipart render job;
//! the response is classified into a [`RenderOutcome`]. A [`StatusPoller`]
//! keeps the service's engines, images and queue occupancy current in the
//! shared [`Store`]. Large files can go through the service's reference
//! store, addressed by [`ReferenceId`].

pub mod classify;
pub mod client;
pub mod config;
pub mod controller;
pub mod diagnostics;
pub mod document;
pub mod error;
pub mod models;
pub mod poller;
pub mod reference;
pub mod request;
pub mod store;
pub mod transport;

pub use classify::ProtocolPolicy;
pub use client::Client;
pub use config::ClientConfig;
pub use controller::SubmissionController;
pub use document::Document;
pub use error::{PreconditionError, ReferenceError, TransportError};
pub use models::*;
pub use poller::StatusPoller;
pub use reference::ReferenceId;
pub use request::{build_request, WireRequest};
pub use store::Store;
pub use transport::{HttpTransport, RawResponse, Transport};
