//! Blocking connection driver.
//!
//! [`Connection`] owns one transport and runs the ingestion loop over it:
//! the calling (network) thread feeds the parser and the body conduit and
//! never blocks on the consumer, while each request's handler runs on a
//! scoped second thread with the conduit's read side. The driver also
//! implements the pieces of connection-level protocol that sit right at
//! the framing boundary:
//!
//! - `Expect: 100-continue` is answered before body parsing begins, or
//!   refused with 417 when the declared length cannot be honoured
//! - framing rejections are answered with their status (400/414/431) and
//!   anything else with 500, then the connection closes
//! - HTTP/1.1 keep-alive, ended by `Connection: close` or peer EOF
//!
//! One request is in flight at a time; pipelined bytes that arrive early
//! simply wait in the read buffer for the next parser.

use crate::codec::{ParserConfig, RequestParser};
use crate::handler::Handler;
use crate::protocol::{ExpectAction, IngestError, RequestHead};
use bytes::{Bytes, BytesMut};
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE};
use http::{Response, StatusCode, Version};
use std::io::{Read, Write};
use std::thread;
use tracing::{debug, error, info};

const READ_CHUNK_BYTES: usize = 8 * 1024;

enum Served {
    KeepAlive,
    Close,
}

/// Drives request ingestion over one blocking transport.
pub struct Connection<H> {
    handler: H,
    config: ParserConfig,
}

impl<H: Handler> Connection<H> {
    pub fn new(handler: H) -> Self {
        Self::with_config(handler, ParserConfig::default())
    }

    pub fn with_config(handler: H, config: ParserConfig) -> Self {
        Self { handler, config }
    }

    /// Serves requests until the peer disconnects or a fault closes the
    /// connection. A framing fault is answered before this returns it.
    pub fn serve<S: Read + Write>(&self, mut stream: S) -> Result<(), IngestError> {
        let mut buffer = BytesMut::with_capacity(READ_CHUNK_BYTES);
        loop {
            match self.serve_one(&mut stream, &mut buffer) {
                Ok(Served::KeepAlive) => {}
                Ok(Served::Close) => {
                    info!("closing connection");
                    return Ok(());
                }
                Err(err) => {
                    error!(%err, "request ingestion failed");
                    let _ = write_response(&mut stream, error_response(&err), false);
                    return Err(err);
                }
            }
        }
    }

    fn serve_one<S: Read + Write>(&self, stream: &mut S, buffer: &mut BytesMut) -> Result<Served, IngestError> {
        let mut parser = RequestParser::with_config(self.config.clone());

        // request line and header block
        let incoming = loop {
            if let Some(incoming) = parser.offer(buffer)? {
                break incoming;
            }
            if read_more(stream, buffer)? == 0 {
                info!("no more requests on this connection");
                return Ok(Served::Close);
            }
        };

        match incoming.head.expect_disposition() {
            Some(ExpectAction::Continue) => {
                stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").map_err(IngestError::from)?;
                stream.flush().map_err(IngestError::from)?;
                info!("answered 100-continue before the body");
            }
            Some(ExpectAction::ExpectationFailed) => {
                write_response(stream, plain_response(StatusCode::EXPECTATION_FAILED, "Expectation Failed"), false)?;
                return Ok(Served::Close);
            }
            None => {}
        }

        let keep_alive = wants_keep_alive(&incoming.head);

        // the handler consumes the conduit on its own thread while this
        // thread keeps feeding the parser; neither waits on the other
        let (fed, response) = thread::scope(|scope| {
            let worker = scope.spawn(|| self.handler.handle(incoming));

            let fed = feed_body(&mut parser, stream, buffer);
            // wakes a consumer still blocked on the conduit before joining
            drop(parser);

            let response = match worker.join() {
                Ok(Ok(response)) => response,
                Ok(Err(cause)) => {
                    error!("handler failed, cause: {cause}");
                    plain_response(StatusCode::INTERNAL_SERVER_ERROR, "Server error")
                }
                Err(_) => {
                    error!("handler panicked");
                    plain_response(StatusCode::INTERNAL_SERVER_ERROR, "Server error")
                }
            };
            (fed, response)
        });

        match fed? {
            BodyOutcome::Complete => {
                write_response(stream, response, keep_alive)?;
                Ok(if keep_alive { Served::KeepAlive } else { Served::Close })
            }
            BodyOutcome::Disconnected => {
                debug!("peer disconnected before the body completed");
                Ok(Served::Close)
            }
        }
    }
}

enum BodyOutcome {
    Complete,
    Disconnected,
}

fn feed_body<S: Read>(
    parser: &mut RequestParser,
    stream: &mut S,
    buffer: &mut BytesMut,
) -> Result<BodyOutcome, IngestError> {
    while !parser.is_complete() {
        if buffer.is_empty() && read_more(stream, buffer)? == 0 {
            parser.peer_closed();
            return Ok(BodyOutcome::Disconnected);
        }
        parser.offer(buffer)?;
    }
    Ok(BodyOutcome::Complete)
}

fn read_more<S: Read>(stream: &mut S, buffer: &mut BytesMut) -> Result<usize, IngestError> {
    let mut chunk = [0u8; READ_CHUNK_BYTES];
    let n = stream.read(&mut chunk).map_err(IngestError::from)?;
    buffer.extend_from_slice(&chunk[..n]);
    Ok(n)
}

fn wants_keep_alive(head: &RequestHead) -> bool {
    if head.version() != Version::HTTP_11 {
        return false;
    }
    !head
        .headers()
        .get("connection")
        .map(|value| value.eq_ignore_ascii_case("close"))
        .unwrap_or(false)
}

fn write_response<W: Write>(stream: &mut W, response: Response<Bytes>, keep_alive: bool) -> Result<(), IngestError> {
    let (parts, body) = response.into_parts();

    let mut head = BytesMut::with_capacity(256);
    let reason = parts.status.canonical_reason().unwrap_or("Unknown");
    head.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", parts.status.as_u16(), reason).as_bytes());

    for (name, value) in parts.headers.iter() {
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    if !parts.headers.contains_key(CONTENT_LENGTH) {
        head.extend_from_slice(format!("content-length: {}\r\n", body.len()).as_bytes());
    }
    if !keep_alive && !parts.headers.contains_key(CONNECTION) {
        head.extend_from_slice(b"connection: close\r\n");
    }
    head.extend_from_slice(b"\r\n");

    stream.write_all(&head).map_err(IngestError::from)?;
    stream.write_all(&body).map_err(IngestError::from)?;
    stream.flush().map_err(IngestError::from)?;
    Ok(())
}

fn error_response(err: &IngestError) -> Response<Bytes> {
    let (status, message) = match err {
        IngestError::Invalid(invalid) => (invalid.status, invalid.message),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "Server error"),
    };
    plain_response(status, message)
}

fn plain_response(status: StatusCode, message: &'static str) -> Response<Bytes> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain;charset=utf-8")
        .body(Bytes::from_static(message.as_bytes()))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{make_handler, BoxError};
    use crate::protocol::IncomingRequest;
    use std::io::{self, Cursor};

    /// One-directional transport: a scripted inbound stream and a captured
    /// outbound one.
    struct MockStream {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl MockStream {
        fn new(input: &[u8]) -> Self {
            Self { input: Cursor::new(input.to_vec()), output: Vec::new() }
        }

        fn written(&self) -> String {
            String::from_utf8_lossy(&self.output).into_owned()
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn echo_handler(request: IncomingRequest) -> Result<Response<Bytes>, BoxError> {
        let mut body = Vec::new();
        if let Some(mut receiver) = request.body {
            receiver.read_to_end(&mut body)?;
            if let Some(trailers) = receiver.trailers() {
                for (name, values) in trailers.iter() {
                    body.extend_from_slice(format!("|{}={}", name, values.join(",")).as_bytes());
                }
            }
        }
        Ok(Response::builder().status(StatusCode::OK).body(Bytes::from(body)).unwrap())
    }

    #[test]
    fn serves_a_fixed_length_request_and_echoes_the_body() {
        let connection = Connection::new(make_handler(echo_handler));
        let mut stream = MockStream::new(b"POST /echo HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello");

        connection.serve(&mut stream).unwrap();

        let written = stream.written();
        assert!(written.starts_with("HTTP/1.1 200 OK\r\n"), "got: {written}");
        assert!(written.contains("content-length: 5"));
        assert!(written.ends_with("hello"));
    }

    #[test]
    fn serves_two_requests_on_one_keep_alive_connection() {
        let connection = Connection::new(make_handler(echo_handler));
        let mut stream = MockStream::new(
            b"POST /a HTTP/1.1\r\nContent-Length: 3\r\n\r\nonePOST /b HTTP/1.1\r\nContent-Length: 3\r\n\r\ntwo",
        );

        connection.serve(&mut stream).unwrap();

        let written = stream.written();
        assert_eq!(written.matches("HTTP/1.1 200 OK").count(), 2);
        assert!(written.contains("one"));
        assert!(written.ends_with("two"));
    }

    #[test]
    fn chunked_request_with_trailers_reaches_the_handler() {
        let connection = Connection::new(make_handler(echo_handler));
        let mut stream = MockStream::new(
            b"POST /u HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\nTrailer-X: z\r\n\r\n",
        );

        connection.serve(&mut stream).unwrap();

        let written = stream.written();
        assert!(written.contains("hello world|Trailer-X=z"), "got: {written}");
    }

    #[test]
    fn hundred_continue_is_written_before_the_response() {
        let connection = Connection::new(make_handler(echo_handler));
        let mut stream = MockStream::new(b"PUT /u HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 2\r\n\r\nhi");

        connection.serve(&mut stream).unwrap();

        let written = stream.written();
        assert!(written.starts_with("HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK"), "got: {written}");
    }

    #[test]
    fn unhonourable_expectation_is_refused_with_417() {
        let connection = Connection::new(make_handler(echo_handler));
        let mut stream =
            MockStream::new(b"PUT /u HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 2147483648\r\n\r\n");

        connection.serve(&mut stream).unwrap();

        let written = stream.written();
        assert!(written.starts_with("HTTP/1.1 417 Expectation Failed"), "got: {written}");
        assert!(!written.contains("100 Continue"));
    }

    #[test]
    fn framing_conflict_is_answered_with_400_and_the_connection_closes() {
        let connection = Connection::new(make_handler(echo_handler));
        let mut stream =
            MockStream::new(b"POST /u HTTP/1.1\r\nContent-Length: 3\r\nTransfer-Encoding: chunked\r\n\r\n");

        assert!(connection.serve(&mut stream).is_err());

        let written = stream.written();
        assert!(written.starts_with("HTTP/1.1 400 Bad Request"), "got: {written}");
    }

    #[test]
    fn handler_failure_becomes_a_500() {
        let connection = Connection::new(make_handler(|_request| Err("boom".into())));
        let mut stream = MockStream::new(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");

        connection.serve(&mut stream).unwrap();

        let written = stream.written();
        assert!(written.starts_with("HTTP/1.1 500 Internal Server Error"), "got: {written}");
    }

    #[test]
    fn connection_close_request_header_ends_keep_alive() {
        let connection = Connection::new(make_handler(echo_handler));
        let mut stream = MockStream::new(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n");

        connection.serve(&mut stream).unwrap();

        let written = stream.written();
        assert_eq!(written.matches("HTTP/1.1 200 OK").count(), 1);
        assert!(written.contains("connection: close"));
    }
}
