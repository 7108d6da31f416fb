//! Decoder for bodies with a declared `Content-Length`, as defined in
//! [RFC 7230 Section 3.3.2](https://tools.ietf.org/html/rfc7230#section-3.3.2).

use crate::codec::body::note_delivery;
use crate::conduit::BodySender;
use crate::protocol::IngestError;
use bytes::BytesMut;
use tracing::trace;

/// Streams a fixed-length body into the conduit.
///
/// Slices are taken up to the declared length, so bytes past the body's end
/// stay in the input buffer; anything a peer sends beyond its declaration is
/// rejected by the parser as input after completion.
pub(crate) struct FixedDecoder {
    declared: u64,
    received: u64,
    sink: BodySender,
}

impl FixedDecoder {
    pub(crate) fn new(declared: u64, sink: BodySender) -> Self {
        Self { declared, received: 0, sink }
    }

    /// Consumes up to the declared length; returns true once the body is
    /// complete.
    pub(crate) fn decode(&mut self, src: &mut BytesMut) -> Result<bool, IngestError> {
        if src.is_empty() {
            return Ok(false);
        }

        let n = (self.declared - self.received).min(src.len() as u64) as usize;
        let data = src.split_to(n).freeze();
        self.received += n as u64;
        trace!(len = n, received = self.received, declared = self.declared, "read fixed-length body bytes");
        self.sink.hand_off(data, note_delivery)?;

        if self.received == self.declared {
            self.sink.close();
            return Ok(true);
        }
        Ok(false)
    }

    pub(crate) fn close_conduit(&self) {
        self.sink.close();
    }
}
