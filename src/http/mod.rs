//! The fetch primitive: request descriptors, the transport seam and its reqwest backend.

mod fetcher;
mod request;
mod transport;

pub use fetcher::Fetcher;
pub use request::{Method, Request, RequestKind};
pub use transport::{HttpTransport, Transport};
