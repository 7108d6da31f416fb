//! Incremental HTTP/1.x request parser.
//!
//! [`RequestParser`] is a single-owner state machine fed arbitrary byte
//! slices by the network loop. Header-block states consume one byte at a
//! time, keeping partial tokens in a scratch buffer so input may be sliced
//! at any boundary; body states copy in bulk. The parser yields exactly one
//! [`IncomingRequest`] per request when the header block terminates, then
//! streams body bytes into the conduit until the framing says the request
//! is complete.
//!
//! # Line endings
//!
//! LF alone terminates every line; CR is tolerated and ignored wherever it
//! appears in the request line, the header block, and the chunked framing.
//!
//! # Body framing
//!
//! At the header-block terminator the parser inspects `Content-Length` and
//! `Transfer-Encoding` and picks exactly one body shape: fixed-length,
//! chunked, or none. Conflicting declarations are rejected with a 400.

use crate::codec::body::{BodyDecoder, ChunkedDecoder, FixedDecoder};
use crate::codec::take_latin1;
use crate::conduit::{self, BodyReceiver};
use crate::ensure;
use crate::protocol::{Headers, IncomingRequest, IngestError, InvalidRequest, RequestHead};
use bytes::{Buf, BytesMut};
use http::{Method, Uri, Version};
use std::time::Duration;
use tracing::debug;

/// Tunables for one connection's ingestion.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// How long a blocked body pull waits before erroring out.
    pub read_timeout: Duration,
    /// Total body bytes the conduit accepts before failing the request.
    pub max_body_bytes: u64,
    /// Request line budget; exceeding it is a 414.
    pub max_request_line_bytes: usize,
    /// Header block budget; exceeding it is a 431.
    pub max_header_block_bytes: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(30),
            max_body_bytes: 24 * 1024 * 1024,
            max_request_line_bytes: 4 * 1024,
            max_header_block_bytes: 8 * 1024,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum State {
    /// Reading the method token of the request line.
    Method,
    /// Reading the request target.
    Target,
    /// Reading the protocol version.
    Proto,
    /// Reading a header field name; an empty name line ends the block.
    HeaderName,
    /// Reading a header field value.
    HeaderValue,
    /// Streaming a `Content-Length` body.
    FixedBody,
    /// Streaming a chunked body.
    ChunkedBody,
    /// The request, body and trailers included, is fully consumed.
    Complete,
}

/// Body length as declared by the header block so far.
///
/// Moves away from `Unknown` at most once: to `Length` on the first
/// `Content-Length`, or to `Chunked` when the final transfer coding is
/// chunked.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Declared {
    Unknown,
    Length(u64),
    Chunked,
}

pub struct RequestParser {
    config: ParserConfig,
    state: State,
    /// Partial token carried across offers.
    scratch: Vec<u8>,
    line_bytes: usize,
    header_bytes: usize,
    method: Option<Method>,
    target: Option<Uri>,
    version: Option<Version>,
    headers: Headers,
    /// Wire-case name of the header whose value is accumulating.
    current_header: Option<String>,
    declared: Declared,
    body: Option<BodyDecoder>,
}

impl RequestParser {
    pub fn new() -> Self {
        Self::with_config(ParserConfig::default())
    }

    pub fn with_config(config: ParserConfig) -> Self {
        Self {
            config,
            state: State::Method,
            scratch: Vec::new(),
            line_bytes: 0,
            header_bytes: 0,
            method: None,
            target: None,
            version: None,
            headers: Headers::new(),
            current_header: None,
            declared: Declared::Unknown,
            body: None,
        }
    }

    /// True once the request, including body and trailers, is fully consumed.
    pub fn is_complete(&self) -> bool {
        self.state == State::Complete
    }

    /// Feeds a slice of input.
    ///
    /// Returns `Ok(Some(..))` exactly once per request, at the header-block
    /// terminator; the unconsumed remainder stays in `src` and drives body
    /// parsing on subsequent calls. Once the request is complete, leftover
    /// or further input is rejected: this parser handles one request, and
    /// pipelining is not supported.
    pub fn offer(&mut self, src: &mut BytesMut) -> Result<Option<IncomingRequest>, IngestError> {
        while !src.is_empty() {
            match self.state {
                State::Complete => {
                    return Err(InvalidRequest::bad_request(
                        "Request body too long",
                        "bytes arrived after the request was fully read",
                    )
                    .into());
                }

                State::FixedBody | State::ChunkedBody => {
                    let done = match self.body.as_mut() {
                        Some(decoder) => decoder.decode(src)?,
                        None => true,
                    };
                    if done {
                        self.body = None;
                        self.state = State::Complete;
                        debug!("request body complete");
                        return Ok(None);
                    }
                }

                _ => {
                    if let Some(incoming) = self.parse_head(src)? {
                        return Ok(Some(incoming));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Tells the parser the peer has gone away, closing any active body
    /// conduit so a blocked consumer observes end-of-body.
    pub fn peer_closed(&mut self) {
        if let Some(decoder) = self.body.take() {
            decoder.close_conduit();
        }
    }

    fn parse_head(&mut self, src: &mut BytesMut) -> Result<Option<IncomingRequest>, IngestError> {
        while !src.is_empty() {
            let c = src.get_u8();
            self.charge_budget()?;

            match c {
                b' ' => match self.state {
                    State::Method => {
                        let token = take_latin1(&mut self.scratch);
                        self.method = Some(parse_method(&token)?);
                        self.state = State::Target;
                    }
                    State::Target => {
                        let token = take_latin1(&mut self.scratch);
                        let uri = token.parse::<Uri>().map_err(|e| {
                            InvalidRequest::bad_request("Invalid request target", format!("{token:?}: {e}"))
                        })?;
                        self.target = Some(uri);
                        self.state = State::Proto;
                    }
                    State::HeaderValue => {
                        // leading whitespace of a value is skipped
                        if !self.scratch.is_empty() {
                            self.scratch.push(c);
                        }
                    }
                    State::HeaderName => {
                        return Err(InvalidRequest::bad_request("Malformed header", "a header name contained a space").into());
                    }
                    _ => {
                        return Err(InvalidRequest::bad_request(
                            "Malformed request line",
                            "unexpected space after the protocol version",
                        )
                        .into());
                    }
                },

                // CR is tolerated anywhere; LF is the line terminator
                b'\r' => {}

                b'\n' => match self.state {
                    State::Proto => {
                        let token = take_latin1(&mut self.scratch);
                        self.version = Some(parse_version(&token)?);
                        self.state = State::HeaderName;
                    }
                    State::HeaderName => {
                        if !self.scratch.is_empty() {
                            let token = take_latin1(&mut self.scratch);
                            return Err(InvalidRequest::bad_request(
                                "Malformed header",
                                format!("header name {token:?} was ended by a line feed with no ':'"),
                            )
                            .into());
                        }
                        return self.finish_head().map(Some);
                    }
                    State::HeaderValue => {
                        self.finish_header_value()?;
                        self.state = State::HeaderName;
                    }
                    _ => {
                        return Err(InvalidRequest::bad_request(
                            "Malformed request line",
                            "the request line ended before all three parts were present",
                        )
                        .into());
                    }
                },

                b':' => match self.state {
                    State::HeaderName => {
                        self.current_header = Some(take_latin1(&mut self.scratch));
                        self.state = State::HeaderValue;
                    }
                    _ => self.scratch.push(c),
                },

                _ => self.scratch.push(c),
            }
        }
        Ok(None)
    }

    fn charge_budget(&mut self) -> Result<(), IngestError> {
        match self.state {
            State::Method | State::Target | State::Proto => {
                self.line_bytes += 1;
                ensure!(
                    self.line_bytes <= self.config.max_request_line_bytes,
                    InvalidRequest::uri_too_long(format!(
                        "request line exceeded the {} byte budget",
                        self.config.max_request_line_bytes
                    ))
                    .into()
                );
            }
            _ => {
                self.header_bytes += 1;
                ensure!(
                    self.header_bytes <= self.config.max_header_block_bytes,
                    InvalidRequest::headers_too_large(format!(
                        "header block exceeded the {} byte budget",
                        self.config.max_header_block_bytes
                    ))
                    .into()
                );
            }
        }
        Ok(())
    }

    /// A header value line is done: record it, tracking the framing headers.
    fn finish_header_value(&mut self) -> Result<(), IngestError> {
        let value = take_latin1(&mut self.scratch).trim().to_string();
        let Some(name) = self.current_header.take() else {
            return Ok(());
        };

        if name.eq_ignore_ascii_case("content-length") {
            ensure!(
                self.declared != Declared::Chunked,
                InvalidRequest::bad_request(
                    "Content-Length after chunked encoding",
                    format!("headers so far: {}", self.headers)
                )
                .into()
            );
            let length = value.parse::<u64>().map_err(|_| {
                InvalidRequest::bad_request("Invalid content-length header", format!("value was {value:?}"))
            })?;
            if let Declared::Length(previous) = self.declared {
                ensure!(
                    previous == length,
                    InvalidRequest::bad_request(
                        "Multiple content-length headers",
                        format!("first was {previous} and then {length}")
                    )
                    .into()
                );
            }
            self.declared = Declared::Length(length);
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            ensure!(
                !matches!(self.declared, Declared::Length(_)),
                InvalidRequest::bad_request(
                    "Transfer-Encoding with Content-Length",
                    format!("headers so far: {}", self.headers)
                )
                .into()
            );
            // only a final coding of "chunked" is decoded; everything else
            // is surfaced verbatim through the header store
            if value.to_ascii_lowercase().ends_with("chunked") {
                self.declared = Declared::Chunked;
            }
        }

        self.headers.add(name, value);
        Ok(())
    }

    /// The header block terminator: settle the body shape and yield the head.
    fn finish_head(&mut self) -> Result<IncomingRequest, IngestError> {
        let has_length = matches!(self.declared, Declared::Length(_));
        let has_transfer_encoding = self.headers.contains("transfer-encoding");
        ensure!(
            !(has_length && has_transfer_encoding),
            InvalidRequest::bad_request(
                "Transfer-Encoding with Content-Length",
                format!("headers were: {}", self.headers)
            )
            .into()
        );

        let body = match self.declared {
            Declared::Length(0) => {
                self.state = State::Complete;
                Some(BodyReceiver::empty())
            }
            Declared::Length(length) => {
                let (sender, receiver) = conduit::channel(self.config.read_timeout, self.config.max_body_bytes);
                self.body = Some(BodyDecoder::Fixed(FixedDecoder::new(length, sender)));
                self.state = State::FixedBody;
                Some(receiver)
            }
            Declared::Chunked => {
                let (sender, receiver) = conduit::channel(self.config.read_timeout, self.config.max_body_bytes);
                self.body = Some(BodyDecoder::Chunked(ChunkedDecoder::new(sender)));
                self.state = State::ChunkedBody;
                Some(receiver)
            }
            Declared::Unknown => {
                self.state = State::Complete;
                None
            }
        };

        let method = self
            .method
            .take()
            .ok_or_else(|| InvalidRequest::bad_request("Malformed request line", "no method was read"))?;
        let target = self
            .target
            .take()
            .ok_or_else(|| InvalidRequest::bad_request("Malformed request line", "no request target was read"))?;
        let version = self
            .version
            .take()
            .ok_or_else(|| InvalidRequest::bad_request("Malformed request line", "no protocol version was read"))?;
        let headers = std::mem::take(&mut self.headers);

        debug!(method = %method, target = %target, state = ?self.state, "request head parsed");

        let head = RequestHead::new(method, target, version, headers);
        Ok(IncomingRequest { head, body })
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_method(token: &str) -> Result<Method, IngestError> {
    let method = match token {
        "GET" => Method::GET,
        "HEAD" => Method::HEAD,
        "POST" => Method::POST,
        "PUT" => Method::PUT,
        "DELETE" => Method::DELETE,
        "CONNECT" => Method::CONNECT,
        "OPTIONS" => Method::OPTIONS,
        "TRACE" => Method::TRACE,
        "PATCH" => Method::PATCH,
        _ => {
            return Err(InvalidRequest::bad_request("Unknown HTTP method", format!("method token was {token:?}")).into())
        }
    };
    Ok(method)
}

fn parse_version(token: &str) -> Result<Version, IngestError> {
    match token {
        "HTTP/1.1" => Ok(Version::HTTP_11),
        "HTTP/1.0" => Ok(Version::HTTP_10),
        _ => Err(IngestError::Protocol { protocol: token.to_string() }),
    }
}
