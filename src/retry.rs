use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures_util::future::BoxFuture;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode, Uri};
use rand::RngExt;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::RestlineResult;
use crate::context::RequestContext;
use crate::error::Error;
use crate::middleware::{Middleware, Next};
use crate::response::Response;
use crate::util::{parse_retry_after_seconds, redact_uri_for_logs};

pub const DEFAULT_RETRY_DELAY_SECONDS: u64 = 3;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const MAX_RETRY_DELAY_SECONDS: u64 = 180;
pub const MAX_MAX_RETRIES: u32 = 10;

pub const RETRY_ATTEMPT_HEADER: HeaderName = HeaderName::from_static("retry-attempt");

/// What a [`RetryClassifier`] sees before a retry is scheduled.
#[derive(Clone, Copy, Debug)]
pub struct RetryDecision<'a> {
    /// Number of retries already performed.
    pub attempt: u32,
    pub delay_seconds: u64,
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub request_headers: &'a HeaderMap,
    pub response: &'a Response,
}

/// Final say on whether a retryable response is retried.
pub trait RetryClassifier: Send + Sync {
    fn should_retry(&self, decision: &RetryDecision<'_>) -> bool;
}

impl<F> RetryClassifier for F
where
    F: Fn(&RetryDecision<'_>) -> bool + Send + Sync,
{
    fn should_retry(&self, decision: &RetryDecision<'_>) -> bool {
        self(decision)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysRetry;

impl RetryClassifier for AlwaysRetry {
    fn should_retry(&self, _decision: &RetryDecision<'_>) -> bool {
        true
    }
}

#[derive(Clone)]
pub struct RetryHandlerOptions {
    delay_seconds: u64,
    max_retries: u32,
    classifier: Arc<dyn RetryClassifier>,
}

impl std::fmt::Debug for RetryHandlerOptions {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RetryHandlerOptions")
            .field("delay_seconds", &self.delay_seconds)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl Default for RetryHandlerOptions {
    fn default() -> Self {
        Self {
            delay_seconds: DEFAULT_RETRY_DELAY_SECONDS,
            max_retries: DEFAULT_MAX_RETRIES,
            classifier: Arc::new(AlwaysRetry),
        }
    }
}

impl RetryHandlerOptions {
    /// Fails with `MaxLimitExceeded` when either value is above its ceiling.
    pub fn new(delay_seconds: u64, max_retries: u32) -> RestlineResult<Self> {
        if delay_seconds > MAX_RETRY_DELAY_SECONDS {
            return Err(Error::MaxLimitExceeded {
                setting: "retry delay seconds",
                limit: MAX_RETRY_DELAY_SECONDS,
                value: delay_seconds,
            });
        }
        if max_retries > MAX_MAX_RETRIES {
            return Err(Error::MaxLimitExceeded {
                setting: "max retries",
                limit: u64::from(MAX_MAX_RETRIES),
                value: u64::from(max_retries),
            });
        }
        Ok(Self {
            delay_seconds,
            max_retries,
            ..Self::default()
        })
    }

    pub fn with_classifier(mut self, classifier: impl RetryClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn delay_seconds(&self) -> u64 {
        self.delay_seconds
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub const fn max_delay_seconds(&self) -> u64 {
        MAX_RETRY_DELAY_SECONDS
    }

    fn should_retry(&self, decision: &RetryDecision<'_>) -> bool {
        self.classifier.should_retry(decision)
    }
}

/// Retries 429/503/504 responses with backoff.
///
/// Exhausting the retry budget is not an error: the last response is left on
/// the context for the caller to inspect.
#[derive(Clone, Debug, Default)]
pub struct RetryHandler {
    options: RetryHandlerOptions,
}

impl RetryHandler {
    pub fn new(options: RetryHandlerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RetryHandlerOptions {
        &self.options
    }
}

impl Middleware for RetryHandler {
    fn execute<'a>(
        &'a self,
        context: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, RestlineResult<()>> {
        Box::pin(async move {
            let options = context
                .control()
                .retry()
                .cloned()
                .unwrap_or_else(|| self.options.clone());
            let mut attempt = 0_u32;

            loop {
                next.run(context).await?;

                let Some(response) = context.response() else {
                    return Ok(());
                };
                let status = response.status();
                if attempt >= options.max_retries
                    || !is_retry_status(status)
                    || !is_buffered(context.method(), context.headers())
                {
                    return Ok(());
                }
                let decision = RetryDecision {
                    attempt,
                    delay_seconds: options.delay_seconds,
                    method: context.method(),
                    uri: context.uri(),
                    request_headers: context.headers(),
                    response,
                };
                if !options.should_retry(&decision) {
                    debug!(status = status.as_u16(), "retry declined by classifier");
                    return Ok(());
                }

                attempt += 1;
                let delay = retry_delay_seconds(
                    response.headers(),
                    attempt,
                    options.delay_seconds,
                    SystemTime::now(),
                );
                context
                    .headers_mut()
                    .insert(RETRY_ATTEMPT_HEADER, HeaderValue::from(attempt));
                warn!(
                    status = status.as_u16(),
                    attempt = attempt,
                    delay_ms = (delay.max(0.0) * 1000.0) as u64,
                    uri = %redact_uri_for_logs(&context.uri().to_string()),
                    "retrying request after retryable status"
                );
                if delay > 0.0 {
                    sleep(Duration::from_secs_f64(delay)).await;
                }
            }
        })
    }
}

pub(crate) fn is_retry_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Streaming octet-stream bodies sent with PUT, PATCH or POST cannot be replayed.
pub(crate) fn is_buffered(method: &Method, headers: &HeaderMap) -> bool {
    let is_put_patch_or_post =
        *method == Method::PUT || *method == Method::PATCH || *method == Method::POST;
    if !is_put_patch_or_post {
        return true;
    }
    let is_stream = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("application/octet-stream"));
    !is_stream
}

/// `round(0.5 * (2^attempt - 1))` seconds.
pub fn exponential_backoff_seconds(attempt: u32) -> f64 {
    (0.5 * (2_f64.powi(attempt.min(63) as i32) - 1.0)).round()
}

fn jitter() -> f64 {
    let mut rng = rand::rng();
    let sampled: f64 = rng.random_range(0.0..1.0);
    (sampled * 1000.0).round() / 1000.0
}

pub(crate) fn retry_delay_seconds(
    headers: &HeaderMap,
    attempt: u32,
    base_delay_seconds: u64,
    now: SystemTime,
) -> f64 {
    compute_retry_delay(headers, attempt, base_delay_seconds, now, jitter(), jitter())
}

fn compute_retry_delay(
    headers: &HeaderMap,
    attempt: u32,
    base_delay_seconds: u64,
    now: SystemTime,
    jitter: f64,
    cap_jitter: f64,
) -> f64 {
    let base = base_delay_seconds as f64;
    let delay = match parse_retry_after_seconds(headers, now) {
        Some(seconds) => seconds,
        None if attempt >= 2 => exponential_backoff_seconds(attempt) + base + jitter,
        None => base + jitter,
    };
    delay.min(MAX_RETRY_DELAY_SECONDS as f64 + cap_jitter)
}
