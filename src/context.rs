use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};

use crate::auth::AuthenticationHandlerOptions;
use crate::chaos::ChaosHandlerOptions;
use crate::redirect::RedirectHandlerOptions;
use crate::response::Response;
use crate::retry::RetryHandlerOptions;

/// Whether the terminal stage may follow redirects itself.
///
/// The transport in this crate never follows redirects; the mode is recorded so
/// custom terminal stages can honour it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RedirectMode {
    #[default]
    Follow,
    Manual,
}

/// Key for per-call stage overrides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MiddlewareKind {
    Authentication,
    Retry,
    Redirect,
    Chaos,
}

#[derive(Clone, Debug)]
pub enum MiddlewareOption {
    Authentication(AuthenticationHandlerOptions),
    Retry(RetryHandlerOptions),
    Redirect(RedirectHandlerOptions),
    Chaos(ChaosHandlerOptions),
}

impl MiddlewareOption {
    pub fn kind(&self) -> MiddlewareKind {
        match self {
            Self::Authentication(_) => MiddlewareKind::Authentication,
            Self::Retry(_) => MiddlewareKind::Retry,
            Self::Redirect(_) => MiddlewareKind::Redirect,
            Self::Chaos(_) => MiddlewareKind::Chaos,
        }
    }
}

impl From<AuthenticationHandlerOptions> for MiddlewareOption {
    fn from(options: AuthenticationHandlerOptions) -> Self {
        Self::Authentication(options)
    }
}

impl From<RetryHandlerOptions> for MiddlewareOption {
    fn from(options: RetryHandlerOptions) -> Self {
        Self::Retry(options)
    }
}

impl From<RedirectHandlerOptions> for MiddlewareOption {
    fn from(options: RedirectHandlerOptions) -> Self {
        Self::Redirect(options)
    }
}

impl From<ChaosHandlerOptions> for MiddlewareOption {
    fn from(options: ChaosHandlerOptions) -> Self {
        Self::Chaos(options)
    }
}

/// Per-call overrides, at most one per [`MiddlewareKind`].
#[derive(Clone, Debug, Default)]
pub struct MiddlewareControl {
    options: BTreeMap<MiddlewareKind, MiddlewareOption>,
}

impl MiddlewareControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, option: impl Into<MiddlewareOption>) -> Self {
        self.insert(option);
        self
    }

    /// Stores an override, returning the one it replaced.
    pub fn insert(&mut self, option: impl Into<MiddlewareOption>) -> Option<MiddlewareOption> {
        let option = option.into();
        self.options.insert(option.kind(), option)
    }

    pub fn get(&self, kind: MiddlewareKind) -> Option<&MiddlewareOption> {
        self.options.get(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn authentication(&self) -> Option<&AuthenticationHandlerOptions> {
        match self.get(MiddlewareKind::Authentication) {
            Some(MiddlewareOption::Authentication(options)) => Some(options),
            _ => None,
        }
    }

    pub fn retry(&self) -> Option<&RetryHandlerOptions> {
        match self.get(MiddlewareKind::Retry) {
            Some(MiddlewareOption::Retry(options)) => Some(options),
            _ => None,
        }
    }

    pub fn redirect(&self) -> Option<&RedirectHandlerOptions> {
        match self.get(MiddlewareKind::Redirect) {
            Some(MiddlewareOption::Redirect(options)) => Some(options),
            _ => None,
        }
    }

    pub fn chaos(&self) -> Option<&ChaosHandlerOptions> {
        match self.get(MiddlewareKind::Chaos) {
            Some(MiddlewareOption::Chaos(options)) => Some(options),
            _ => None,
        }
    }
}

/// Unit of work threaded through a [`MiddlewareChain`](crate::MiddlewareChain).
///
/// Created fresh for each logical call and mutated in place by the stages,
/// including across retry and redirect iterations.
#[derive(Clone, Debug)]
pub struct RequestContext {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Option<Bytes>,
    redirect_mode: RedirectMode,
    control: MiddlewareControl,
    custom_hosts: BTreeSet<String>,
    response: Option<Response>,
}

impl RequestContext {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: None,
            redirect_mode: RedirectMode::Follow,
            control: MiddlewareControl::default(),
            custom_hosts: BTreeSet::new(),
            response: None,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_control(mut self, control: MiddlewareControl) -> Self {
        self.control = control;
        self
    }

    /// Hosts, in addition to a stage's own list, that may receive credentials.
    pub fn with_custom_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.custom_hosts = hosts
            .into_iter()
            .map(|host| host.into().to_ascii_lowercase())
            .collect();
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn set_uri(&mut self, uri: Uri) {
        self.uri = uri;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn take_body(&mut self) -> Option<Bytes> {
        self.body.take()
    }

    pub fn redirect_mode(&self) -> RedirectMode {
        self.redirect_mode
    }

    pub fn set_redirect_mode(&mut self, redirect_mode: RedirectMode) {
        self.redirect_mode = redirect_mode;
    }

    pub fn control(&self) -> &MiddlewareControl {
        &self.control
    }

    pub fn custom_hosts(&self) -> &BTreeSet<String> {
        &self.custom_hosts
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn set_response(&mut self, response: Response) {
        self.response = Some(response);
    }

    pub fn take_response(&mut self) -> Option<Response> {
        self.response.take()
    }
}
