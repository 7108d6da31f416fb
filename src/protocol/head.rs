//! Request head handling.
//!
//! [`RequestHead`] carries everything known about a request once its header
//! block has been parsed: method, target, protocol version, and the header
//! store. [`IncomingRequest`] pairs the head with the body conduit's read
//! side and is what the parser yields and a handler receives.

use crate::conduit::BodyReceiver;
use crate::protocol::Headers;
use http::{Method, Uri, Version};

/// The parsed request line plus header block.
#[derive(Debug)]
pub struct RequestHead {
    method: Method,
    uri: Uri,
    version: Version,
    headers: Headers,
}

impl RequestHead {
    pub(crate) fn new(method: Method, uri: Uri, version: Version, headers: Headers) -> Self {
        Self { method, uri, version, headers }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// What to do about an `Expect: 100-continue` header, if one is present.
    ///
    /// A declared `Content-Length` beyond `i32::MAX` is refused up front;
    /// anything else (including a chunked or absent length) is invited to
    /// proceed.
    pub fn expect_disposition(&self) -> Option<ExpectAction> {
        let expect = self.headers.get("expect")?;
        if !expect.eq_ignore_ascii_case("100-continue") {
            return None;
        }

        let fits = match self.headers.get("content-length") {
            Some(value) => value.trim().parse::<u64>().map(|n| n <= i32::MAX as u64).unwrap_or(false),
            None => true,
        };

        Some(if fits { ExpectAction::Continue } else { ExpectAction::ExpectationFailed })
    }
}

/// Disposition of an `Expect: 100-continue` request header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectAction {
    /// Send `100 Continue` before the body arrives.
    Continue,
    /// Send `417 Expectation Failed` and close the connection.
    ExpectationFailed,
}

/// A request whose header block is complete.
///
/// `body` is `None` when the request declares no body at all; a declared
/// empty body (`Content-Length: 0`) yields an already-finished receiver.
#[derive(Debug)]
pub struct IncomingRequest {
    pub head: RequestHead,
    pub body: Option<BodyReceiver>,
}
