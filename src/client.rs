use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue, USER_AGENT};
use http::{HeaderMap, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{Instrument, debug, info_span};

use crate::RestlineResult;
use crate::auth::{AuthenticationHandler, AuthenticationProvider};
use crate::chaos::ChaosHandler;
use crate::config::ClientProfile;
use crate::context::{MiddlewareControl, MiddlewareOption, RequestContext};
use crate::error::Error;
use crate::middleware::{Middleware, MiddlewareChain};
use crate::redirect::{RedirectHandler, RedirectHandlerOptions};
use crate::response::Response;
use crate::retry::{RetryHandler, RetryHandlerOptions};
use crate::transport::HttpTransport;
use crate::util::{
    merge_headers, parse_header_name, parse_header_value, redact_uri_for_logs, resolve_uri,
    validate_base_url,
};

const DEFAULT_CLIENT_NAME: &str = "restline";

/// Anything that can turn one logical request into one final response.
///
/// Upload tasks and page iterators only depend on this capability.
pub trait RequestExecutor: Send + Sync {
    fn execute(&self, request: ApiRequest) -> BoxFuture<'_, RestlineResult<Response>>;
}

impl<T> RequestExecutor for &T
where
    T: RequestExecutor + ?Sized,
{
    fn execute(&self, request: ApiRequest) -> BoxFuture<'_, RestlineResult<Response>> {
        (**self).execute(request)
    }
}

impl<T> RequestExecutor for Arc<T>
where
    T: RequestExecutor + ?Sized,
{
    fn execute(&self, request: ApiRequest) -> BoxFuture<'_, RestlineResult<Response>> {
        (**self).execute(request)
    }
}

/// A logical request before it is bound to a chain.
#[derive(Clone, Debug)]
pub struct ApiRequest {
    method: Method,
    target: String,
    headers: HeaderMap,
    body: Option<Bytes>,
    control: MiddlewareControl,
}

impl ApiRequest {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: HeaderMap::new(),
            body: None,
            control: MiddlewareControl::default(),
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn post(target: impl Into<String>) -> Self {
        Self::new(Method::POST, target)
    }

    pub fn put(target: impl Into<String>) -> Self {
        Self::new(Method::PUT, target)
    }

    pub fn patch(target: impl Into<String>) -> Self {
        Self::new(Method::PATCH, target)
    }

    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(Method::DELETE, target)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> RestlineResult<Self> {
        let header_name = parse_header_name(name)?;
        let header_value = parse_header_value(name, value)?;
        Ok(self.header(header_name, header_value))
    }

    /// Merges `headers` over the ones already set.
    pub fn with_headers(mut self, headers: &HeaderMap) -> Self {
        self.headers = merge_headers(&self.headers, headers);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn json<T>(mut self, payload: &T) -> RestlineResult<Self>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(payload).map_err(|source| Error::Serialize { source })?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(body));
        Ok(self)
    }

    pub fn middleware_option(mut self, option: impl Into<MiddlewareOption>) -> Self {
        self.control.insert(option);
        self
    }

    pub fn control(mut self, control: MiddlewareControl) -> Self {
        self.control = control;
        self
    }

    pub(crate) fn into_context(
        self,
        base_url: Option<&str>,
        default_headers: Option<&HeaderMap>,
    ) -> RestlineResult<RequestContext> {
        let uri = resolve_uri(base_url, &self.target)?;
        let headers = match default_headers {
            Some(default_headers) => merge_headers(default_headers, &self.headers),
            None => self.headers,
        };
        let mut context = RequestContext::new(self.method, uri)
            .with_headers(headers)
            .with_control(self.control);
        if let Some(body) = self.body {
            context = context.with_body(body);
        }
        Ok(context)
    }
}

/// Entry point binding a base URL, default headers and a middleware chain.
#[derive(Clone)]
pub struct Client {
    client_name: String,
    base_url: Option<String>,
    default_headers: HeaderMap,
    custom_hosts: BTreeSet<String>,
    chain: MiddlewareChain,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Client")
            .field("client_name", &self.client_name)
            .field("base_url", &self.base_url)
            .field("custom_hosts", &self.custom_hosts)
            .field("chain", &self.chain)
            .finish()
    }
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn chain(&self) -> &MiddlewareChain {
        &self.chain
    }

    pub async fn send(&self, request: ApiRequest) -> RestlineResult<Response> {
        let mut context =
            request.into_context(self.base_url.as_deref(), Some(&self.default_headers))?;
        if !self.custom_hosts.is_empty() {
            let hosts = self
                .custom_hosts
                .iter()
                .chain(context.custom_hosts().iter())
                .cloned()
                .collect::<Vec<_>>();
            context = context.with_custom_hosts(hosts);
        }

        let span = info_span!(
            "restline.request",
            client = %self.client_name,
            method = %context.method(),
            uri = %redact_uri_for_logs(&context.uri().to_string()),
        );
        async {
            debug!("dispatching request through middleware chain");
            let response = self.chain.send(&mut context).await?;
            debug!(status = response.status().as_u16(), "request completed");
            Ok(response)
        }
        .instrument(span)
        .await
    }

    /// Sends `request`, fails on non-2xx and decodes the JSON body.
    pub async fn send_json<T>(&self, request: ApiRequest) -> RestlineResult<T>
    where
        T: DeserializeOwned,
    {
        let method = request.method().clone();
        let uri = resolve_uri(self.base_url.as_deref(), request.target())?;
        let response = self.send(request).await?;
        response.error_for_status(&method, &uri)?.json()
    }
}

impl RequestExecutor for Client {
    fn execute(&self, request: ApiRequest) -> BoxFuture<'_, RestlineResult<Response>> {
        Box::pin(self.send(request))
    }
}

pub struct ClientBuilder {
    client_name: String,
    base_url: Option<String>,
    profile: ClientProfile,
    request_timeout: Option<Duration>,
    max_response_body_bytes: Option<usize>,
    retry_options: Option<RetryHandlerOptions>,
    redirect_options: Option<RedirectHandlerOptions>,
    auth_provider: Option<Arc<dyn AuthenticationProvider>>,
    trusted_hosts: Vec<String>,
    custom_hosts: Vec<String>,
    default_headers: HeaderMap,
    chaos_handler: Option<ChaosHandler>,
    middleware: Option<Vec<Arc<dyn Middleware>>>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            client_name: DEFAULT_CLIENT_NAME.to_owned(),
            base_url: None,
            profile: ClientProfile::default(),
            request_timeout: None,
            max_response_body_bytes: None,
            retry_options: None,
            redirect_options: None,
            auth_provider: None,
            trusted_hosts: Vec::new(),
            custom_hosts: Vec::new(),
            default_headers: HeaderMap::new(),
            chaos_handler: None,
            middleware: None,
        }
    }

    pub fn client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn profile(mut self, profile: ClientProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = Some(request_timeout);
        self
    }

    pub fn max_response_body_bytes(mut self, max_response_body_bytes: usize) -> Self {
        self.max_response_body_bytes = Some(max_response_body_bytes);
        self
    }

    pub fn retry_options(mut self, retry_options: RetryHandlerOptions) -> Self {
        self.retry_options = Some(retry_options);
        self
    }

    pub fn redirect_options(mut self, redirect_options: RedirectHandlerOptions) -> Self {
        self.redirect_options = Some(redirect_options);
        self
    }

    pub fn authentication_provider(mut self, provider: Arc<dyn AuthenticationProvider>) -> Self {
        self.auth_provider = Some(provider);
        self
    }

    /// Hosts besides the base URL host that receive bearer tokens.
    pub fn trusted_host(mut self, host: impl Into<String>) -> Self {
        self.trusted_hosts.push(host.into());
        self
    }

    /// Hosts attached to every request context as custom allowed hosts.
    pub fn custom_host(mut self, host: impl Into<String>) -> Self {
        self.custom_hosts.push(host.into());
        self
    }

    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn try_default_header(self, name: &str, value: &str) -> RestlineResult<Self> {
        let header_name = parse_header_name(name)?;
        let header_value = parse_header_value(name, value)?;
        Ok(self.default_header(header_name, header_value))
    }

    /// Inserts a fault injector in front of the transport stage.
    pub fn chaos_handler(mut self, chaos_handler: ChaosHandler) -> Self {
        self.chaos_handler = Some(chaos_handler);
        self
    }

    /// Replaces the default stage list entirely.
    pub fn middleware(mut self, stages: Vec<Arc<dyn Middleware>>) -> Self {
        self.middleware = Some(stages);
        self
    }

    pub fn try_build(self) -> RestlineResult<Client> {
        if let Some(base_url) = &self.base_url {
            validate_base_url(base_url)?;
        }
        let mut default_headers = self.default_headers;
        if !default_headers.contains_key(USER_AGENT) {
            let user_agent = format!("{}/{}", self.client_name, env!("CARGO_PKG_VERSION"));
            default_headers.insert(USER_AGENT, parse_header_value(USER_AGENT.as_str(), &user_agent)?);
        }

        let chain = match self.middleware {
            Some(stages) => MiddlewareChain::new(stages)?,
            None => {
                let defaults = self.profile.defaults();
                let mut stages: Vec<Arc<dyn Middleware>> = Vec::new();
                if let Some(provider) = self.auth_provider {
                    let base_host = self
                        .base_url
                        .as_deref()
                        .and_then(|base_url| url::Url::parse(base_url).ok())
                        .and_then(|parsed| parsed.host_str().map(ToOwned::to_owned));
                    let handler = AuthenticationHandler::new(provider)
                        .trusted_hosts(base_host.into_iter().chain(self.trusted_hosts));
                    stages.push(Arc::new(handler));
                }
                stages.push(Arc::new(RetryHandler::new(
                    self.retry_options.unwrap_or(defaults.retry_options),
                )));
                stages.push(Arc::new(RedirectHandler::new(
                    self.redirect_options.unwrap_or(defaults.redirect_options),
                )));
                if let Some(chaos_handler) = self.chaos_handler {
                    stages.push(Arc::new(chaos_handler));
                }
                stages.push(Arc::new(HttpTransport::with_limits(
                    self.request_timeout.unwrap_or(defaults.request_timeout),
                    self.max_response_body_bytes
                        .unwrap_or(defaults.max_response_body_bytes),
                )?));
                MiddlewareChain::new(stages)?
            }
        };

        Ok(Client {
            client_name: self.client_name,
            base_url: self.base_url,
            default_headers,
            custom_hosts: self
                .custom_hosts
                .into_iter()
                .map(|host| host.to_ascii_lowercase())
                .collect(),
            chain,
        })
    }
}
