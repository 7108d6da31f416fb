//! Decoder for the HTTP chunked transfer coding, as specified in
//! [RFC 7230 Section 4.1](https://tools.ietf.org/html/rfc7230#section-4.1).
//!
//! The body arrives as a sequence of size-prefixed chunks, a zero-size
//! chunk, and an optional trailer block. Chunk extensions are ignored, and
//! CR is tolerated anywhere in the framing; LF alone terminates lines. The
//! trailer block accumulates into a [`Headers`] that travels to the
//! consumer through the conduit when the body closes.

use crate::codec::body::note_delivery;
use crate::codec::take_latin1;
use crate::conduit::BodySender;
use crate::protocol::{Headers, IngestError, InvalidRequest};
use bytes::{Buf, BytesMut};
use tracing::trace;

/// Streams a chunked body into the conduit.
pub(crate) struct ChunkedDecoder {
    state: ChunkState,
    /// Partial token (chunk size digits or trailer text) across input slices.
    scratch: Vec<u8>,
    /// Bytes left in the chunk currently being copied out.
    remaining: u64,
    trailers: Option<Headers>,
    trailer_name: Option<String>,
    sink: BodySender,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ChunkState {
    /// Reading the chunk size in hex.
    Size,
    /// Skipping a chunk extension up to its LF.
    Extension,
    /// Copying chunk data out in bulk.
    Data,
    /// Expecting the LF that closes a chunk.
    DataDone,
    /// Reading a trailer field name; an empty name line ends the body.
    TrailerName,
    /// Reading a trailer field value.
    TrailerValue,
}

impl ChunkedDecoder {
    pub(crate) fn new(sink: BodySender) -> Self {
        Self {
            state: ChunkState::Size,
            scratch: Vec::new(),
            remaining: 0,
            trailers: None,
            trailer_name: None,
            sink,
        }
    }

    /// Feeds body bytes through; returns true once the terminal chunk and
    /// any trailers have been consumed.
    pub(crate) fn decode(&mut self, src: &mut BytesMut) -> Result<bool, IngestError> {
        loop {
            if src.is_empty() {
                return Ok(false);
            }

            if self.state == ChunkState::Data {
                let n = self.remaining.min(src.len() as u64) as usize;
                let data = src.split_to(n).freeze();
                self.remaining -= n as u64;
                trace!(len = n, "read chunk bytes");
                self.sink.hand_off(data, note_delivery)?;
                if self.remaining == 0 {
                    self.state = ChunkState::DataDone;
                }
                continue;
            }

            let c = src.get_u8();
            if c == b'\r' {
                continue;
            }
            if self.step(c)? {
                return Ok(true);
            }
        }
    }

    /// Advances the framing machine by one byte. `Data` never reaches here;
    /// the bulk path above owns it.
    fn step(&mut self, c: u8) -> Result<bool, IngestError> {
        match self.state {
            ChunkState::Size => match c {
                b'0'..=b'9' | b'a'..=b'f' | b'A'..=b'F' => self.scratch.push(c),
                b';' => {
                    self.commit_size()?;
                    self.state = ChunkState::Extension;
                }
                b'\n' => {
                    self.commit_size()?;
                    self.enter_chunk();
                }
                _ => {
                    return Err(InvalidRequest::bad_request(
                        "Invalid chunk size",
                        format!("invalid character 0x{c:02x} in a chunk size declaration"),
                    )
                    .into())
                }
            },

            ChunkState::Extension => {
                // chunk extensions are ignored wholesale
                if c == b'\n' {
                    self.enter_chunk();
                }
            }

            ChunkState::DataDone => {
                if c == b'\n' {
                    self.state = ChunkState::Size;
                } else {
                    return Err(InvalidRequest::bad_request(
                        "Invalid chunk terminator",
                        format!("extra byte 0x{c:02x} after a chunk was supposed to end"),
                    )
                    .into());
                }
            }

            ChunkState::TrailerName => match c {
                b'\n' => {
                    if !self.scratch.is_empty() {
                        let token = take_latin1(&mut self.scratch);
                        return Err(InvalidRequest::bad_request(
                            "Malformed trailer",
                            format!("trailer line {token:?} ended before any ':'"),
                        )
                        .into());
                    }
                    match self.trailers.take() {
                        Some(trailers) => self.sink.close_with_trailers(trailers),
                        None => self.sink.close(),
                    }
                    return Ok(true);
                }
                b':' => {
                    self.trailer_name = Some(take_latin1(&mut self.scratch));
                    self.state = ChunkState::TrailerValue;
                }
                _ => self.scratch.push(c),
            },

            ChunkState::TrailerValue => {
                if c == b'\n' {
                    let value = take_latin1(&mut self.scratch).trim().to_string();
                    if let Some(name) = self.trailer_name.take() {
                        self.trailers.get_or_insert_with(Headers::new).add(name, value);
                    }
                    self.state = ChunkState::TrailerName;
                } else {
                    self.scratch.push(c);
                }
            }

            ChunkState::Data => {}
        }

        Ok(false)
    }

    /// A size line is done; a zero-size chunk means the trailer block is next.
    fn enter_chunk(&mut self) {
        if self.remaining == 0 {
            self.state = ChunkState::TrailerName;
        } else {
            self.state = ChunkState::Data;
        }
    }

    fn commit_size(&mut self) -> Result<(), IngestError> {
        if self.scratch.is_empty() {
            return Err(InvalidRequest::bad_request("Invalid chunk size", "chunk size line had no hex digits").into());
        }

        let mut size: u64 = 0;
        for &b in &self.scratch {
            let digit = match b {
                b'0'..=b'9' => b - b'0',
                b'a'..=b'f' => b - b'a' + 10,
                _ => b - b'A' + 10,
            };
            size = size
                .checked_mul(16)
                .and_then(|s| s.checked_add(u64::from(digit)))
                .ok_or_else(|| InvalidRequest::bad_request("Invalid chunk size", "chunk size overflows 64 bits"))?;
        }
        self.scratch.clear();
        self.remaining = size;
        Ok(())
    }

    pub(crate) fn close_conduit(&self) {
        self.sink.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conduit::{self, BodyReceiver};
    use std::io::Read;
    use std::time::Duration;

    fn decoder() -> (ChunkedDecoder, BodyReceiver) {
        let (sender, receiver) = conduit::channel(Duration::from_secs(1), u64::MAX);
        (ChunkedDecoder::new(sender), receiver)
    }

    fn drain(receiver: &mut BodyReceiver) -> Vec<u8> {
        let mut body = Vec::new();
        receiver.read_to_end(&mut body).unwrap();
        body
    }

    #[test]
    fn single_chunk() {
        let (mut chunked, mut receiver) = decoder();
        let mut buffer = BytesMut::from(&b"10\r\n1234567890abcdef\r\n0\r\n\r\n"[..]);

        assert!(chunked.decode(&mut buffer).unwrap());
        assert_eq!(drain(&mut receiver), b"1234567890abcdef");
    }

    #[test]
    fn multiple_chunks_concatenate_in_order() {
        let (mut chunked, mut receiver) = decoder();
        let mut buffer = BytesMut::from(&b"5\r\nhello\r\n7\r\n, world\r\n0\r\n\r\n"[..]);

        assert!(chunked.decode(&mut buffer).unwrap());
        assert_eq!(drain(&mut receiver), b"hello, world");
    }

    #[test]
    fn chunk_extensions_are_ignored() {
        let (mut chunked, mut receiver) = decoder();
        let mut buffer = BytesMut::from(&b"5;chunk-ext=value\r\nhello\r\n0\r\n\r\n"[..]);

        assert!(chunked.decode(&mut buffer).unwrap());
        assert_eq!(drain(&mut receiver), b"hello");
    }

    #[test]
    fn trailers_reach_the_receiver_after_end_of_body() {
        let (mut chunked, mut receiver) = decoder();
        let mut buffer = BytesMut::from(&b"5\r\nhello\r\n0\r\nExpires: never\r\nTrailer-X: z\r\n\r\n"[..]);

        assert!(chunked.decode(&mut buffer).unwrap());
        assert_eq!(drain(&mut receiver), b"hello");

        let trailers = receiver.trailers().expect("trailers after end");
        assert_eq!(trailers.get("expires"), Some("never"));
        assert_eq!(trailers.get("TRAILER-X"), Some("z"));
    }

    #[test]
    fn zero_size_chunk_with_extension_still_enters_trailers() {
        let (mut chunked, mut receiver) = decoder();
        let mut buffer = BytesMut::from(&b"3\r\nabc\r\n0;foo=bar\r\nTrailer-X: z\r\n\r\n"[..]);

        assert!(chunked.decode(&mut buffer).unwrap());
        assert_eq!(drain(&mut receiver), b"abc");
        assert_eq!(receiver.trailers().expect("trailers").get("trailer-x"), Some("z"));
    }

    #[test]
    fn resumes_across_arbitrary_slice_boundaries() {
        let (mut chunked, mut receiver) = decoder();

        let mut buffer = BytesMut::from(&b"5\r\nhel"[..]);
        assert!(!chunked.decode(&mut buffer).unwrap());

        let mut buffer = BytesMut::from(&b"lo\r\n0\r\n\r\n"[..]);
        assert!(chunked.decode(&mut buffer).unwrap());
        assert_eq!(drain(&mut receiver), b"hello");
    }

    #[test]
    fn rejects_a_non_hex_chunk_size() {
        let (mut chunked, _receiver) = decoder();
        let mut buffer = BytesMut::from(&b"xyz\r\n"[..]);

        let err = chunked.decode(&mut buffer).unwrap_err();
        assert!(matches!(err, IngestError::Invalid(ref e) if e.message == "Invalid chunk size"));
    }

    #[test]
    fn rejects_a_chunk_size_line_with_no_digits() {
        let (mut chunked, _receiver) = decoder();
        let mut buffer = BytesMut::from(&b"\r\n"[..]);

        assert!(chunked.decode(&mut buffer).is_err());
    }

    #[test]
    fn rejects_an_overflowing_chunk_size() {
        let (mut chunked, _receiver) = decoder();
        let mut buffer = BytesMut::from(&b"fffffffffffffffff\r\n"[..]);

        let err = chunked.decode(&mut buffer).unwrap_err();
        assert!(matches!(err, IngestError::Invalid(ref e) if e.detail.contains("overflows")));
    }

    #[test]
    fn rejects_garbage_between_chunk_data_and_its_terminator() {
        let (mut chunked, mut receiver) = decoder();
        let mut buffer = BytesMut::from(&b"5\r\nhelloBad"[..]);

        let err = chunked.decode(&mut buffer).unwrap_err();
        assert!(matches!(err, IngestError::Invalid(ref e) if e.message == "Invalid chunk terminator"));

        // the chunk data handed over before the fault is still readable
        let mut body = [0u8; 5];
        receiver.read_exact(&mut body).unwrap();
        assert_eq!(&body, b"hello");
    }

    #[test]
    fn rejects_a_trailer_line_without_a_colon() {
        let (mut chunked, _receiver) = decoder();
        let mut buffer = BytesMut::from(&b"0\r\nbroken trailer\r\n\r\n"[..]);

        let err = chunked.decode(&mut buffer).unwrap_err();
        assert!(matches!(err, IngestError::Invalid(ref e) if e.message == "Malformed trailer"));
    }

    #[test]
    fn large_chunk_passes_through_in_bulk() {
        let size = 1024 * 1024;
        let mut data = Vec::with_capacity(size + 16);
        data.extend(format!("{size:x}\r\n").into_bytes());
        data.extend(vec![b'A'; size]);
        data.extend(b"\r\n0\r\n\r\n");

        let (mut chunked, mut receiver) = decoder();
        let mut buffer = BytesMut::from(&data[..]);

        assert!(chunked.decode(&mut buffer).unwrap());
        let body = drain(&mut receiver);
        assert_eq!(body.len(), size);
        assert!(body.iter().all(|&b| b == b'A'));
    }

    #[test]
    fn bare_terminal_chunk_is_a_complete_empty_body() {
        let (mut chunked, mut receiver) = decoder();
        let mut buffer = BytesMut::from(&b"0\r\n\r\n"[..]);

        assert!(chunked.decode(&mut buffer).unwrap());
        assert_eq!(drain(&mut receiver), b"");
        assert_eq!(receiver.trailers(), None);
    }

    #[test]
    fn lf_only_framing_is_accepted() {
        let (mut chunked, mut receiver) = decoder();
        let mut buffer = BytesMut::from(&b"5\nhello\n0\n\n"[..]);

        assert!(chunked.decode(&mut buffer).unwrap());
        assert_eq!(drain(&mut receiver), b"hello");
    }
}
