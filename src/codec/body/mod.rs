//! Decoders for the two request body framings.
//!
//! Once the header block has settled the body shape, the parser installs
//! one of these and routes every subsequent input slice through it. Both
//! decoders hand owned buffers to the body conduit as they go and report
//! completion so the parser can move to its terminal state.

mod chunked;
mod fixed;

pub(crate) use chunked::ChunkedDecoder;
pub(crate) use fixed::FixedDecoder;

use crate::protocol::{ConduitError, IngestError};
use bytes::BytesMut;
use tracing::debug;

/// The active body decoding strategy.
pub(crate) enum BodyDecoder {
    /// Body length declared by `Content-Length`.
    Fixed(FixedDecoder),
    /// Body framed with the chunked transfer coding.
    Chunked(ChunkedDecoder),
}

impl BodyDecoder {
    /// Feeds body bytes through; returns true once the body is complete.
    pub(crate) fn decode(&mut self, src: &mut BytesMut) -> Result<bool, IngestError> {
        match self {
            BodyDecoder::Fixed(decoder) => decoder.decode(src),
            BodyDecoder::Chunked(decoder) => decoder.decode(src),
        }
    }

    /// Signals end-of-body to the conduit, for a peer that went away.
    pub(crate) fn close_conduit(&self) {
        match self {
            BodyDecoder::Fixed(decoder) => decoder.close_conduit(),
            BodyDecoder::Chunked(decoder) => decoder.close_conduit(),
        }
    }
}

/// Delivery acknowledgement the parser attaches to each hand-off. The
/// network loop paces itself on reads, so the parser only records a
/// consumer that abandoned the body.
pub(crate) fn note_delivery(result: Result<(), ConduitError>) {
    if let Err(cause) = result {
        debug!(%cause, "body buffer abandoned by consumer");
    }
}
