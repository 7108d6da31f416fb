use crate::protocol::IncomingRequest;
use bytes::Bytes;
use http::Response;
use std::error::Error;

pub type BoxError = Box<dyn Error + Send + Sync>;

/// A request handler running on its own thread.
///
/// The handler owns the request's body receiver and may pull from it
/// (blocking up to the read timeout) or switch it to a push listener. A
/// returned error becomes a 500 at the connection layer.
pub trait Handler: Send + Sync {
    fn handle(&self, request: IncomingRequest) -> Result<Response<Bytes>, BoxError>;
}

#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

impl<F> Handler for HandlerFn<F>
where
    F: Fn(IncomingRequest) -> Result<Response<Bytes>, BoxError> + Send + Sync,
{
    fn handle(&self, request: IncomingRequest) -> Result<Response<Bytes>, BoxError> {
        (self.f)(request)
    }
}

pub fn make_handler<F>(f: F) -> HandlerFn<F>
where
    F: Fn(IncomingRequest) -> Result<Response<Bytes>, BoxError> + Send + Sync,
{
    HandlerFn { f }
}
