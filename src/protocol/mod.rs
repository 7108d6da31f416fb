mod headers;
pub use headers::Headers;

mod head;
pub use head::ExpectAction;
pub use head::IncomingRequest;
pub use head::RequestHead;

mod error;
pub use error::ConduitError;
pub use error::IngestError;
pub use error::InvalidRequest;
