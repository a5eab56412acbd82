use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::Request;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio::time::timeout;
use tracing::debug;

use crate::RestlineResult;
use crate::context::RequestContext;
use crate::error::Error;
use crate::middleware::{Middleware, Next};
use crate::response::Response;
use crate::util::{classify_transport_error, redact_uri_for_logs};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RESPONSE_BODY_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 8;

type TransportClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Terminal stage: performs the network exchange over HTTP/1.1 or HTTP/2 with
/// rustls, and never delegates further.
///
/// Redirects are never followed here regardless of the context's redirect mode.
#[derive(Clone)]
pub struct HttpTransport {
    client: TransportClient,
    request_timeout: Duration,
    max_response_body_bytes: usize,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpTransport")
            .field("request_timeout", &self.request_timeout)
            .field("max_response_body_bytes", &self.max_response_body_bytes)
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    pub fn new() -> RestlineResult<Self> {
        Self::with_limits(DEFAULT_REQUEST_TIMEOUT, DEFAULT_MAX_RESPONSE_BODY_BYTES)
    }

    pub fn with_limits(
        request_timeout: Duration,
        max_response_body_bytes: usize,
    ) -> RestlineResult<Self> {
        let https = HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())
            .map_err(|source| Error::TlsBackendInit {
                message: source.to_string(),
            })?
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(DEFAULT_POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(DEFAULT_POOL_MAX_IDLE_PER_HOST)
            .build(https);
        Ok(Self {
            client,
            request_timeout,
            max_response_body_bytes: max_response_body_bytes.max(1),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn max_response_body_bytes(&self) -> usize {
        self.max_response_body_bytes
    }

    async fn exchange(&self, context: &mut RequestContext) -> RestlineResult<()> {
        let method = context.method().clone();
        let uri = context.uri().clone();
        let redacted_uri = redact_uri_for_logs(&uri.to_string());

        let mut request_builder = Request::builder().method(method.clone()).uri(uri);
        for (name, value) in context.headers() {
            request_builder = request_builder.header(name, value);
        }
        let body = context.body().cloned().unwrap_or_default();
        let request = request_builder
            .body(Full::new(body))
            .map_err(|source| Error::RequestBuild { source })?;

        debug!(method = %method, uri = %redacted_uri, "sending request");
        let response = match timeout(self.request_timeout, self.client.request(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(source)) => {
                return Err(Error::Transport {
                    kind: classify_transport_error(&source),
                    method,
                    uri: redacted_uri,
                    source: Box::new(source),
                });
            }
            Err(_) => {
                return Err(Error::Timeout {
                    timeout_ms: self.request_timeout.as_millis(),
                    method,
                    uri: redacted_uri,
                });
            }
        };

        let (parts, body) = response.into_parts();
        let body = match timeout(
            self.request_timeout,
            read_all_body_limited(body, self.max_response_body_bytes),
        )
        .await
        {
            Ok(Ok(body)) => body,
            Ok(Err(ReadBodyError::Read(source))) => {
                return Err(Error::ReadBody {
                    source: Box::new(source),
                });
            }
            Ok(Err(ReadBodyError::TooLarge { actual_bytes })) => {
                return Err(Error::ResponseBodyTooLarge {
                    limit_bytes: self.max_response_body_bytes,
                    actual_bytes,
                    method,
                    uri: redacted_uri,
                });
            }
            Err(_) => {
                return Err(Error::Timeout {
                    timeout_ms: self.request_timeout.as_millis(),
                    method,
                    uri: redacted_uri,
                });
            }
        };
        debug!(
            status = parts.status.as_u16(),
            body_bytes = body.len(),
            uri = %redacted_uri,
            "received response"
        );
        context.set_response(Response::new(parts.status, parts.headers, body));
        Ok(())
    }
}

impl Middleware for HttpTransport {
    fn execute<'a>(
        &'a self,
        context: &'a mut RequestContext,
        _next: Next<'a>,
    ) -> BoxFuture<'a, RestlineResult<()>> {
        Box::pin(self.exchange(context))
    }
}

enum ReadBodyError {
    Read(hyper::Error),
    TooLarge { actual_bytes: usize },
}

async fn read_all_body_limited(
    mut body: Incoming,
    max_bytes: usize,
) -> Result<Bytes, ReadBodyError> {
    let mut collected = Vec::new();
    let mut total_len = 0_usize;

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(ReadBodyError::Read)?;
        if let Some(data) = frame.data_ref() {
            total_len = total_len.saturating_add(data.len());
            if total_len > max_bytes {
                return Err(ReadBodyError::TooLarge {
                    actual_bytes: total_len,
                });
            }
            collected.extend_from_slice(data);
        }
    }

    Ok(Bytes::from(collected))
}
