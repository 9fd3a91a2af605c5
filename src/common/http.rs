use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{HeaderMap, Method, Request, StatusCode, Uri};
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::TokioExecutor;
use tokio::time::timeout;

use crate::error::TransportError;

/// Type alias for the Hyper client backing the production transport.
pub type HyperClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>;

/// One WebDAV round trip, ready to execute.
#[derive(Debug, Clone)]
pub struct DavRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// The fully buffered response to a [`DavRequest`].
#[derive(Debug, Clone)]
pub struct DavResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Executes one HTTP exchange at a time on behalf of the protocol client.
///
/// The client never retries and never pipelines; a second request is only
/// issued after the previous response has been fully consumed.
pub trait DavTransport {
    fn execute(
        &self,
        request: DavRequest,
    ) -> impl Future<Output = Result<DavResponse, TransportError>> + Send;
}

/// Production transport: Hyper over rustls with a per-request deadline.
pub struct HyperTransport {
    client: HyperClient,
    request_timeout: Duration,
}

impl HyperTransport {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            client: build_hyper_client(),
            request_timeout,
        }
    }
}

impl DavTransport for HyperTransport {
    async fn execute(&self, request: DavRequest) -> Result<DavResponse, TransportError> {
        let mut builder = Request::builder()
            .method(request.method)
            .uri(request.uri);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        let request = builder.body(Full::new(request.body))?;

        let response = timeout(self.request_timeout, self.client.request(request))
            .await
            .map_err(|_| TransportError::Timeout)??;

        let (parts, body) = response.into_parts();
        let body = body.collect().await?.to_bytes();
        Ok(DavResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}

/// Build a Hyper client configured with HTTP/2, connection pooling, and a TLS connector
/// that prefers native roots but falls back to the bundled WebPKI store.
pub fn build_hyper_client() -> HyperClient {
    let https_builder = HttpsConnectorBuilder::new()
        .with_native_roots()
        .unwrap_or_else(|err| {
            #[cfg(debug_assertions)]
            eprintln!(
                "simple-caldav: falling back to webpki roots (native roots unavailable: {err})"
            );
            HttpsConnectorBuilder::new().with_webpki_roots()
        });

    let https = https_builder
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .build();

    Client::builder(TokioExecutor::new())
        .http2_adaptive_window(true)
        .pool_max_idle_per_host(128)
        .build::<_, Full<Bytes>>(https)
}
