//! Incremental decoding of HTTP/1.x requests.
//!
//! The entry point is [`RequestParser`], a state machine the network loop
//! feeds with whatever byte slices arrive. Header parsing runs byte by
//! byte so input may be split anywhere; body payloads are bulk-copied into
//! the conduit through the body decoders.
//!
//! # Example
//!
//! ```no_run
//! use inlet_http::codec::RequestParser;
//! use bytes::BytesMut;
//!
//! let mut parser = RequestParser::new();
//! let mut buffer = BytesMut::new();
//! // ... read network bytes into buffer ...
//! let headers_ready = parser.offer(&mut buffer);
//! ```

pub(crate) mod body;
mod request_parser;

pub use request_parser::ParserConfig;
pub use request_parser::RequestParser;

/// Drains the scratch buffer into a `String`, mapping each byte to the
/// char with the same code point, the way the wire bytes were written.
pub(crate) fn take_latin1(scratch: &mut Vec<u8>) -> String {
    let token = scratch.iter().map(|&b| char::from(b)).collect();
    scratch.clear();
    token
}
