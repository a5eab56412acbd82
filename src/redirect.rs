use std::sync::Arc;

use futures_util::future::BoxFuture;
use http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE};
use http::{Method, StatusCode, Uri};
use tracing::debug;

use crate::RestlineResult;
use crate::context::{RedirectMode, RequestContext};
use crate::error::Error;
use crate::middleware::{Middleware, Next};
use crate::response::Response;
use crate::util::{
    is_absolute_location, is_redirect_status, redact_uri_for_logs, redirect_location,
    resolve_redirect_uri, same_origin,
};

pub const DEFAULT_MAX_REDIRECTS: u32 = 5;
pub const MAX_MAX_REDIRECTS: u32 = 20;

#[derive(Clone, Copy, Debug)]
pub struct RedirectDecision<'a> {
    /// Redirects already followed for this call.
    pub redirect_count: u32,
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub location: &'a str,
    pub response: &'a Response,
}

pub trait RedirectClassifier: Send + Sync {
    fn should_redirect(&self, decision: &RedirectDecision<'_>) -> bool;
}

impl<F> RedirectClassifier for F
where
    F: Fn(&RedirectDecision<'_>) -> bool + Send + Sync,
{
    fn should_redirect(&self, decision: &RedirectDecision<'_>) -> bool {
        self(decision)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysRedirect;

impl RedirectClassifier for AlwaysRedirect {
    fn should_redirect(&self, _decision: &RedirectDecision<'_>) -> bool {
        true
    }
}

#[derive(Clone)]
pub struct RedirectHandlerOptions {
    max_redirects: u32,
    classifier: Arc<dyn RedirectClassifier>,
}

impl std::fmt::Debug for RedirectHandlerOptions {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RedirectHandlerOptions")
            .field("max_redirects", &self.max_redirects)
            .finish_non_exhaustive()
    }
}

impl Default for RedirectHandlerOptions {
    fn default() -> Self {
        Self {
            max_redirects: DEFAULT_MAX_REDIRECTS,
            classifier: Arc::new(AlwaysRedirect),
        }
    }
}

impl RedirectHandlerOptions {
    pub fn new(max_redirects: u32) -> RestlineResult<Self> {
        if max_redirects > MAX_MAX_REDIRECTS {
            return Err(Error::MaxLimitExceeded {
                setting: "max redirects",
                limit: u64::from(MAX_MAX_REDIRECTS),
                value: u64::from(max_redirects),
            });
        }
        Ok(Self {
            max_redirects,
            ..Self::default()
        })
    }

    pub fn with_classifier(mut self, classifier: impl RedirectClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn max_redirects(&self) -> u32 {
        self.max_redirects
    }
}

/// Follows 301/302/303/307/308 responses itself instead of letting the
/// transport do it.
///
/// A 303 turns the next hop into a bodiless GET. Credentials are stripped when
/// an absolute `Location` points at a different scheme, host or port.
#[derive(Clone, Debug, Default)]
pub struct RedirectHandler {
    options: RedirectHandlerOptions,
}

impl RedirectHandler {
    pub fn new(options: RedirectHandlerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RedirectHandlerOptions {
        &self.options
    }
}

impl Middleware for RedirectHandler {
    fn execute<'a>(
        &'a self,
        context: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, RestlineResult<()>> {
        Box::pin(async move {
            let options = context
                .control()
                .redirect()
                .cloned()
                .unwrap_or_else(|| self.options.clone());
            context.set_redirect_mode(RedirectMode::Manual);
            let mut redirect_count = 0_u32;

            loop {
                next.run(context).await?;

                let Some(response) = context.response() else {
                    return Ok(());
                };
                let status = response.status();
                if redirect_count >= options.max_redirects || !is_redirect_status(status) {
                    return Ok(());
                }
                let Some(location) = redirect_location(response.headers()) else {
                    return Ok(());
                };
                let decision = RedirectDecision {
                    redirect_count,
                    method: context.method(),
                    uri: context.uri(),
                    location: &location,
                    response,
                };
                if !options.classifier.should_redirect(&decision) {
                    return Ok(());
                }
                let Some(target) = resolve_redirect_uri(context.uri(), &location) else {
                    return Err(Error::MalformedResponse {
                        message: format!("invalid redirect location {location}"),
                    });
                };

                redirect_count += 1;
                if status == StatusCode::SEE_OTHER {
                    context.set_method(Method::GET);
                    context.take_body();
                    let headers = context.headers_mut();
                    headers.remove(CONTENT_LENGTH);
                    headers.remove(CONTENT_TYPE);
                }
                if is_absolute_location(&location) && !same_origin(context.uri(), &target) {
                    let headers = context.headers_mut();
                    headers.remove(AUTHORIZATION);
                    headers.remove(COOKIE);
                }
                debug!(
                    status = status.as_u16(),
                    redirect_count = redirect_count,
                    target = %redact_uri_for_logs(&target.to_string()),
                    "following redirect"
                );
                context.set_uri(target);
            }
        })
    }
}
