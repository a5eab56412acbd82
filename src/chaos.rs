//! Fault injection stage for exercising retry and redirect handling without a
//! misbehaving server.

use std::time::SystemTime;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::header::{CACHE_CONTROL, CONTENT_TYPE, DATE, HeaderName, HeaderValue, RETRY_AFTER};
use http::{HeaderMap, Method, StatusCode, Uri};
use rand::RngExt;
use regex::Regex;
use serde_json::{Value, json};
use tracing::debug;

use crate::RestlineResult;
use crate::context::RequestContext;
use crate::error::Error;
use crate::middleware::{Middleware, Next};
use crate::response::Response;

pub const DEFAULT_CHAOS_PERCENTAGE: u8 = 10;
pub const DEFAULT_STATUS_MESSAGE: &str = "Some error Happened";

const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("request-id");
const CLIENT_REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("client-request-id");

const GET_FAULTS: &[u16] = &[429, 500, 502, 503, 504];
const WRITE_FAULTS: &[u16] = &[429, 500, 502, 503, 504, 507];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChaosStrategy {
    /// Pick a plausible fault status for the method.
    #[default]
    Random,
    /// Use the configured status, or the manual rule matching the request path.
    Manual,
}

#[derive(Clone, Debug)]
pub struct ChaosHandlerOptions {
    strategy: ChaosStrategy,
    status_code: Option<StatusCode>,
    status_message: String,
    chaos_percentage: u8,
    response_body: Option<Value>,
    headers: HeaderMap,
}

impl Default for ChaosHandlerOptions {
    fn default() -> Self {
        Self {
            strategy: ChaosStrategy::Random,
            status_code: None,
            status_message: DEFAULT_STATUS_MESSAGE.to_owned(),
            chaos_percentage: DEFAULT_CHAOS_PERCENTAGE,
            response_body: None,
            headers: HeaderMap::new(),
        }
    }
}

impl ChaosHandlerOptions {
    pub fn new(strategy: ChaosStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    pub fn with_status_code(mut self, status_code: StatusCode) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_status_message(mut self, status_message: impl Into<String>) -> Self {
        self.status_message = status_message.into();
        self
    }

    /// Share of requests, out of 100, that receive a fabricated response.
    pub fn with_chaos_percentage(mut self, chaos_percentage: u8) -> RestlineResult<Self> {
        if chaos_percentage > 100 {
            return Err(Error::MaxLimitExceeded {
                setting: "chaos percentage",
                limit: 100,
                value: u64::from(chaos_percentage),
            });
        }
        self.chaos_percentage = chaos_percentage;
        Ok(self)
    }

    pub fn with_response_body(mut self, response_body: Value) -> Self {
        self.response_body = Some(response_body);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn strategy(&self) -> ChaosStrategy {
        self.strategy
    }

    pub fn status_code(&self) -> Option<StatusCode> {
        self.status_code
    }

    pub fn chaos_percentage(&self) -> u8 {
        self.chaos_percentage
    }
}

#[derive(Clone, Debug)]
struct ManualRule {
    pattern: String,
    matcher: Regex,
    statuses: Vec<(Method, StatusCode)>,
}

impl ManualRule {
    fn status_for(&self, method: &Method) -> Option<StatusCode> {
        self.statuses
            .iter()
            .find(|(candidate, _)| candidate == method)
            .map(|(_, status)| *status)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ChaosHandler {
    options: ChaosHandlerOptions,
    manual_rules: Vec<ManualRule>,
}

impl ChaosHandler {
    pub fn new(options: ChaosHandlerOptions) -> Self {
        Self {
            options,
            manual_rules: Vec::new(),
        }
    }

    /// Adds a manual rule for an API-relative path such as `/me/messages/.*`.
    ///
    /// Paths are compared exactly first; otherwise the pattern must match the
    /// whole relative path.
    pub fn with_manual_rule<I>(mut self, path_pattern: &str, statuses: I) -> RestlineResult<Self>
    where
        I: IntoIterator<Item = (Method, StatusCode)>,
    {
        let matcher = Regex::new(&format!("^(?:{path_pattern})$")).map_err(|source| {
            Error::InvalidChaosPattern {
                pattern: path_pattern.to_owned(),
                source,
            }
        })?;
        self.manual_rules.push(ManualRule {
            pattern: path_pattern.to_owned(),
            matcher,
            statuses: statuses.into_iter().collect(),
        });
        Ok(self)
    }

    fn manual_status(&self, uri: &Uri, method: &Method) -> Option<StatusCode> {
        let relative = relative_path(uri);
        if let Some(rule) = self.manual_rules.iter().find(|rule| rule.pattern == relative) {
            return rule.status_for(method);
        }
        self.manual_rules
            .iter()
            .filter(|rule| rule.matcher.is_match(&relative))
            .filter_map(|rule| rule.status_for(method))
            .last()
    }

    fn resolve_status(
        &self,
        options: &ChaosHandlerOptions,
        uri: &Uri,
        method: &Method,
    ) -> Option<StatusCode> {
        match options.strategy {
            ChaosStrategy::Manual => options
                .status_code
                .or_else(|| self.manual_status(uri, method)),
            ChaosStrategy::Random => Some(random_fault_status(method)),
        }
    }
}

impl Middleware for ChaosHandler {
    fn execute<'a>(
        &'a self,
        context: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, RestlineResult<()>> {
        Box::pin(async move {
            let options = context
                .control()
                .chaos()
                .cloned()
                .unwrap_or_else(|| self.options.clone());
            let status = self.resolve_status(&options, context.uri(), context.method());
            let roll: u8 = rand::rng().random_range(0..100);
            let inject = next.is_end() || (status.is_some() && roll < options.chaos_percentage);
            if !inject {
                return next.run(context).await;
            }

            let status = status.unwrap_or(StatusCode::OK);
            debug!(
                status = status.as_u16(),
                strategy = ?options.strategy,
                "injecting fabricated response"
            );
            let response = fabricate_response(&options, status, SystemTime::now());
            context.set_response(response);
            Ok(())
        })
    }
}

/// Path with scheme, host, version segment and query removed.
pub(crate) fn relative_path(uri: &Uri) -> String {
    let path = uri.path();
    let without_leading = path.trim_start_matches('/');
    match without_leading.split_once('/') {
        Some((_, rest)) => format!("/{rest}"),
        None => "/".to_owned(),
    }
}

fn random_fault_status(method: &Method) -> StatusCode {
    let candidates = match *method {
        Method::POST | Method::PUT | Method::DELETE => WRITE_FAULTS,
        _ => GET_FAULTS,
    };
    let index = rand::rng().random_range(0..candidates.len());
    StatusCode::from_u16(candidates[index]).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn fabricate_response(options: &ChaosHandlerOptions, status: StatusCode, now: SystemTime) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let date = httpdate::fmt_http_date(now);

    let mut headers = options.headers.clone();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(REQUEST_ID_HEADER, value.clone());
        headers.insert(CLIENT_REQUEST_ID_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&date) {
        headers.insert(DATE, value);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
    }

    let body = match &options.response_body {
        Some(body) => body.clone(),
        None if status.as_u16() >= 400 => json!({
            "error": {
                "code": options.status_message,
                "message": options.status_message,
                "innerError": {
                    "request-id": request_id,
                    "date": date,
                }
            }
        }),
        None => json!({}),
    };
    Response::new(status, headers, Bytes::from(body.to_string()))
}
