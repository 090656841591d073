//! Server API access: the authenticated transport seam and typed endpoints.

pub mod client;
pub mod transport;

pub use client::ApiClient;
pub use transport::{ApiRequest, HttpTransport, Method, RawResponse, Transport};
