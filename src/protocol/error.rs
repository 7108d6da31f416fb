//! Error types for request ingestion
//!
//! Two failure classes are kept apart, because they demand different
//! handling at the connection boundary:
//!
//! - [`InvalidRequest`]: the peer sent something malformed. Carries the
//!   HTTP status the enclosing server should answer with, a short message
//!   safe to show the client, and an operator-facing detail for logs.
//! - [`ConduitError`]: a failure inside the body pipe (byte budget
//!   exhausted, read timeout, listener misuse, producer gone). Not tied to
//!   an HTTP status; the server decides how to react.
//!
//! [`IngestError`] unifies both at the API boundary.

use http::StatusCode;
use std::io;
use thiserror::Error;

/// The top-level error type for request ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The request violated HTTP framing and must be rejected.
    #[error("invalid request: {0}")]
    Invalid(#[from] InvalidRequest),

    /// The peer spoke a protocol version this server does not handle.
    #[error("unsupported protocol {protocol:?}")]
    Protocol { protocol: String },

    /// The body conduit failed while transferring body bytes.
    #[error("body conduit error: {0}")]
    Conduit(#[from] ConduitError),

    /// I/O failure on the underlying transport.
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

/// A request the server must reject, with the status code to answer with.
#[derive(Debug, Clone, Error)]
#[error("{status} {message} ({detail})")]
pub struct InvalidRequest {
    pub status: StatusCode,
    /// Short message suitable for the response body.
    pub message: &'static str,
    /// Operator-facing detail; never sent to the client.
    pub detail: String,
}

impl InvalidRequest {
    pub fn new(status: StatusCode, message: &'static str, detail: impl Into<String>) -> Self {
        Self { status, message, detail: detail.into() }
    }

    /// A 400 rejection, the common case for framing violations.
    pub fn bad_request(message: &'static str, detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, detail)
    }

    /// A 414 rejection for an overlong request line.
    pub fn uri_too_long(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::URI_TOO_LONG, "URI too long", detail)
    }

    /// A 431 rejection for an overlong header block.
    pub fn headers_too_large(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE, "HTTP headers too large", detail)
    }
}

/// Failures of the body conduit.
///
/// Producer-side failures (`CapExceeded`, `Closed`) surface from
/// [`hand_off`](crate::conduit::BodySender::hand_off); consumer-side
/// failures (`ReadTimeout`, `Disconnected`) surface from the pull
/// interface as I/O errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConduitError {
    /// The running byte count passed the conduit's budget.
    #[error("request body exceeds the {cap} byte budget after {handed} bytes")]
    CapExceeded { cap: u64, handed: u64 },

    /// No body bytes arrived within the configured read timeout.
    #[error("timed out waiting for request body data")]
    ReadTimeout,

    /// A buffer was offered after end-of-body was signalled.
    #[error("body conduit is closed")]
    Closed,

    /// A second listener was offered; the conduit switches modes once.
    #[error("a body listener is already installed")]
    ListenerInstalled,

    /// The pull interface was used after a listener took over.
    #[error("body conduit is in listener mode")]
    ListenerMode,

    /// The producer went away without signalling end-of-body.
    #[error("body producer disconnected: {reason}")]
    Disconnected { reason: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_request_keeps_detail_out_of_the_client_message() {
        let err = InvalidRequest::bad_request("Request body too long", "declared 3 but saw 4");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Request body too long");
        assert!(err.to_string().contains("declared 3 but saw 4"));
    }

    #[test]
    fn ingest_error_wraps_both_classes() {
        let invalid: IngestError = InvalidRequest::uri_too_long("9000 bytes").into();
        assert!(matches!(invalid, IngestError::Invalid(ref e) if e.status == StatusCode::URI_TOO_LONG));

        let conduit: IngestError = ConduitError::CapExceeded { cap: 10, handed: 11 }.into();
        assert!(matches!(conduit, IngestError::Conduit(_)));
    }
}
