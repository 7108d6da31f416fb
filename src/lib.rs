//! Request ingestion core for a small embeddable HTTP/1.x server.
//!
//! The crate bridges a non-blocking network reader and a handler that may
//! consume the request body either synchronously or via push callbacks:
//!
//! - [`codec::RequestParser`]: an incremental parser fed arbitrary byte
//!   slices, yielding one [`protocol::IncomingRequest`] per request and
//!   streaming body bytes onward
//! - [`conduit`]: the thread-safe body pipe between the network thread
//!   and the handler thread, with blocking pull and push-listener modes
//! - [`protocol`]: header store, request head, and error vocabulary
//! - [`connection`] and [`handler`]: a minimal blocking driver tying the
//!   pieces to a transport
//!
//! HTTP/1.0 and HTTP/1.1 request framing per RFC 7230 is supported; there
//! is no pipelining and no HTTP/2.

pub mod codec;
pub mod conduit;
pub mod connection;
pub mod handler;
pub mod protocol;

pub(crate) use help::ensure;

mod help {

    macro_rules! ensure {
        ($predicate:expr, $error:expr) => {
            if !$predicate {
                return Err($error);
            }
        };
    }
    pub(crate) use ensure;
}
