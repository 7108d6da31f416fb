//! Streaming body conduit.
//!
//! This module carries request body bytes from the connection's network
//! thread to the handler that consumes them. The two sides are decoupled by
//! [`channel`], which returns a producer half ([`BodySender`]) and a
//! consumer half ([`BodyReceiver`]) sharing one lock-guarded state.
//!
//! # Consumption modes
//!
//! A conduit starts in *pull* mode: the consumer blocks on the
//! [`std::io::Read`] implementation (bounded by the read timeout) while the
//! producer enqueues buffers without ever blocking. Calling
//! [`BodyReceiver::switch_to_listener`] moves the conduit to *push* mode:
//! queued buffers are drained to the listener in arrival order and every
//! later hand-off goes straight to it. The switch is one-way and happens at
//! most once.
//!
//! # Ordering
//!
//! Consumers observe bytes in exactly the order the producer handed them
//! off, end-of-body strictly after the last byte, and trailers (when the
//! request has them) are in place before end-of-body becomes observable.
//!
//! # Backpressure
//!
//! The acknowledgement passed to [`BodySender::hand_off`] tells the
//! network side when it may offer the next buffer. In pull mode the queue
//! is unbounded in buffer count (only the total-byte budget bounds it), so
//! the acknowledgement fires immediately; in push mode it fires when the
//! listener acknowledges the delivery.

use crate::protocol::{ConduitError, Headers};
use bytes::{Buf, Bytes};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::trace;

/// Creates a conduit bounded by `max_bytes` in total and `read_timeout` per
/// blocking pull.
pub fn channel(read_timeout: Duration, max_bytes: u64) -> (BodySender, BodyReceiver) {
    let shared = Arc::new(Shared {
        inner: Mutex::new(Inner {
            queue: VecDeque::new(),
            listener: None,
            handed: 0,
            closed: false,
            failed: None,
            trailers: None,
        }),
        ready: Condvar::new(),
        read_timeout,
        max_bytes,
    });

    (BodySender { shared: Arc::clone(&shared) }, BodyReceiver { shared, current: Bytes::new(), end_seen: false })
}

/// Push-mode consumer of body bytes.
///
/// Callbacks run on the producer's thread while the conduit lock is held;
/// they must not call back into the conduit's pull interface. An
/// implementation that cannot process a buffer inline should move it (and
/// the acknowledgement) elsewhere and return.
pub trait BodyListener: Send {
    /// One buffer of body bytes. Call [`DeliveryAck::ok`] once the buffer
    /// has been consumed so the producer may continue, or
    /// [`DeliveryAck::err`] to abandon the body.
    fn on_data(&mut self, data: Bytes, ack: DeliveryAck);

    /// The body is complete; no further `on_data` will follow.
    fn on_complete(&mut self);

    /// The producer failed; no further callbacks will follow.
    fn on_error(&mut self, cause: ConduitError);
}

/// Acknowledgement token for one delivered buffer.
pub struct DeliveryAck {
    delivered: Option<Box<dyn FnOnce(Result<(), ConduitError>) + Send>>,
}

impl DeliveryAck {
    fn new(delivered: impl FnOnce(Result<(), ConduitError>) + Send + 'static) -> Self {
        Self { delivered: Some(Box::new(delivered)) }
    }

    /// Used for buffers whose producer was already acknowledged at
    /// enqueue time.
    fn pre_acknowledged() -> Self {
        Self { delivered: None }
    }

    /// The buffer was consumed; lets the producer offer the next one.
    pub fn ok(mut self) {
        if let Some(delivered) = self.delivered.take() {
            delivered(Ok(()));
        }
    }

    /// The consumer failed; tells the producer to abandon the input.
    pub fn err(mut self, cause: ConduitError) {
        if let Some(delivered) = self.delivered.take() {
            delivered(Err(cause));
        }
    }
}

struct Shared {
    inner: Mutex<Inner>,
    ready: Condvar,
    read_timeout: Duration,
    max_bytes: u64,
}

struct Inner {
    queue: VecDeque<Bytes>,
    listener: Option<Box<dyn BodyListener>>,
    /// Running total of bytes accepted; monotone, checked against `max_bytes`.
    handed: u64,
    /// End-of-body mark; set strictly after the last buffer is queued.
    closed: bool,
    failed: Option<ConduitError>,
    trailers: Option<Headers>,
}

impl Shared {
    fn locked(&self) -> MutexGuard<'_, Inner> {
        // no mutation of Inner straddles a panic point, so a poisoned lock
        // still guards consistent state
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Producer half of the conduit. Never blocks.
pub struct BodySender {
    shared: Arc<Shared>,
}

impl BodySender {
    /// Transfers one owned buffer to the consumer side.
    ///
    /// `on_delivered` fires when the buffer has been taken over: right away
    /// in pull mode, or once the listener acknowledges in push mode. Fails
    /// when the running byte count would pass the conduit's budget, or when
    /// the conduit is already closed or failed.
    pub fn hand_off<F>(&self, data: Bytes, on_delivered: F) -> Result<(), ConduitError>
    where
        F: FnOnce(Result<(), ConduitError>) + Send + 'static,
    {
        let mut inner = self.shared.locked();

        if inner.closed {
            return Err(ConduitError::Closed);
        }
        if let Some(cause) = &inner.failed {
            return Err(cause.clone());
        }

        let attempted = inner.handed + data.len() as u64;
        if attempted > self.shared.max_bytes {
            let cause = ConduitError::CapExceeded { cap: self.shared.max_bytes, handed: attempted };
            inner.failed = Some(cause.clone());
            if let Some(listener) = inner.listener.as_mut() {
                listener.on_error(cause.clone());
            }
            drop(inner);
            self.shared.ready.notify_all();
            return Err(cause);
        }
        inner.handed = attempted;

        match inner.listener.as_mut() {
            Some(listener) => {
                trace!(len = data.len(), "pushing body buffer to listener");
                listener.on_data(data, DeliveryAck::new(on_delivered));
            }
            None => {
                trace!(len = data.len(), "queueing body buffer");
                inner.queue.push_back(data);
                drop(inner);
                self.shared.ready.notify_one();
                on_delivered(Ok(()));
            }
        }

        Ok(())
    }

    /// Signals end-of-body. Idempotent; a no-op after a failure.
    pub fn close(&self) {
        self.finish(None);
    }

    /// Signals end-of-body with the request's trailer block.
    pub fn close_with_trailers(&self, trailers: Headers) {
        self.finish(Some(trailers));
    }

    /// Fails the conduit. Pending and future pull reads error out, and an
    /// installed listener is told the cause. End-of-body is never signalled
    /// after this.
    pub fn abort(&self, cause: ConduitError) {
        let mut inner = self.shared.locked();
        if inner.closed || inner.failed.is_some() {
            return;
        }
        inner.failed = Some(cause.clone());
        if let Some(listener) = inner.listener.as_mut() {
            listener.on_error(cause);
        }
        drop(inner);
        self.shared.ready.notify_all();
    }

    fn finish(&self, trailers: Option<Headers>) {
        let mut inner = self.shared.locked();
        if inner.closed || inner.failed.is_some() {
            return;
        }
        // trailers land before the closed flag so no consumer observes
        // end-of-body with the trailer block still missing
        inner.trailers = trailers;
        inner.closed = true;
        trace!("body conduit closed");
        if let Some(listener) = inner.listener.as_mut() {
            listener.on_complete();
        }
        drop(inner);
        self.shared.ready.notify_all();
    }
}

impl Drop for BodySender {
    fn drop(&mut self) {
        self.abort(ConduitError::Disconnected { reason: "body producer dropped before close" });
    }
}

/// Consumer half of the conduit.
///
/// Starts in pull mode; see [`switch_to_listener`](Self::switch_to_listener)
/// for push mode. Not clonable: the conduit is strictly single-consumer.
pub struct BodyReceiver {
    shared: Arc<Shared>,
    /// Buffer currently being drained by the pull side.
    current: Bytes,
    end_seen: bool,
}

impl BodyReceiver {
    /// The canonical empty body: already at end-of-body, no trailers.
    pub fn empty() -> Self {
        let (sender, receiver) = channel(Duration::ZERO, 0);
        sender.close();
        receiver
    }

    /// Reads a single byte, blocking up to the read timeout.
    ///
    /// Returns `Ok(None)` once end-of-body has been observed.
    pub fn read_byte(&mut self) -> io::Result<Option<u8>> {
        if !self.cycle()? {
            return Ok(None);
        }
        Ok(Some(self.current.get_u8()))
    }

    /// Number of bytes currently buffered, without waiting.
    pub fn available(&self) -> usize {
        self.current.remaining() + self.shared.locked().queue.iter().map(Bytes::len).sum::<usize>()
    }

    /// Switches the conduit to push mode.
    ///
    /// Buffers received before the switch are drained to `listener` in
    /// arrival order; everything the producer hands off afterwards goes
    /// straight to it. If the body already ended (or failed), the listener
    /// hears about that during the switch. Fails if a listener is already
    /// installed; the pull interface must not be used once this succeeds.
    pub fn switch_to_listener(&mut self, mut listener: Box<dyn BodyListener>) -> Result<(), ConduitError> {
        let mut inner = self.shared.locked();
        if inner.listener.is_some() {
            return Err(ConduitError::ListenerInstalled);
        }

        // unconsumed remainder of the pull cursor goes first to keep order
        if self.current.has_remaining() {
            let pending = std::mem::take(&mut self.current);
            listener.on_data(pending, DeliveryAck::pre_acknowledged());
        }
        while let Some(data) = inner.queue.pop_front() {
            if data.is_empty() {
                continue;
            }
            listener.on_data(data, DeliveryAck::pre_acknowledged());
        }

        if let Some(cause) = inner.failed.clone() {
            listener.on_error(cause);
        } else if inner.closed && !self.end_seen {
            listener.on_complete();
        }

        inner.listener = Some(listener);
        Ok(())
    }

    /// The request's trailer block, once end-of-body has been signalled.
    pub fn trailers(&self) -> Option<Headers> {
        let inner = self.shared.locked();
        if inner.closed {
            inner.trailers.clone()
        } else {
            None
        }
    }

    /// Ensures `current` has unread bytes, blocking up to the read timeout.
    ///
    /// Returns `Ok(false)` at end-of-body.
    fn cycle(&mut self) -> io::Result<bool> {
        if self.end_seen {
            return Ok(false);
        }
        if self.current.has_remaining() {
            return Ok(true);
        }

        let deadline = Instant::now() + self.shared.read_timeout;
        let mut inner = self.shared.locked();
        loop {
            if let Some(data) = inner.queue.pop_front() {
                if data.is_empty() {
                    continue;
                }
                self.current = data;
                return Ok(true);
            }
            if let Some(cause) = inner.failed.clone() {
                return Err(conduit_io_error(cause));
            }
            if inner.closed {
                self.end_seen = true;
                return Ok(false);
            }
            if inner.listener.is_some() {
                return Err(conduit_io_error(ConduitError::ListenerMode));
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(conduit_io_error(ConduitError::ReadTimeout));
            }
            let (guard, _timeout) = self
                .shared
                .ready
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            inner = guard;
        }
    }
}

impl io::Read for BodyReceiver {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if !self.cycle()? {
            return Ok(0);
        }
        let n = buf.len().min(self.current.remaining());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current.advance(n);
        Ok(n)
    }
}

impl std::fmt::Debug for BodyReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyReceiver")
            .field("available", &self.available())
            .field("end_seen", &self.end_seen)
            .finish()
    }
}

fn conduit_io_error(cause: ConduitError) -> io::Error {
    let kind = match &cause {
        ConduitError::ReadTimeout => io::ErrorKind::TimedOut,
        ConduitError::Disconnected { .. } => io::ErrorKind::BrokenPipe,
        ConduitError::ListenerMode | ConduitError::ListenerInstalled => io::ErrorKind::Unsupported,
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, cause)
}
