pub mod http;

pub use http::{DavRequest, DavResponse, DavTransport, HyperClient, HyperTransport};
