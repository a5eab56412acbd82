use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::RestlineResult;
use crate::client::{ApiRequest, RequestExecutor};
use crate::context::RequestContext;
use crate::error::Error;
use crate::response::Response;
use crate::util::redact_uri_for_logs;

/// One stage of a [`MiddlewareChain`].
///
/// Stages are shared across calls and must not keep per-call state; anything
/// adjustable per call travels in the context's
/// [`MiddlewareControl`](crate::MiddlewareControl). A stage either sets
/// `context.response` itself (terminal stages, fault injectors) or delegates
/// through `next`, as many times as its policy requires.
pub trait Middleware: Send + Sync {
    fn execute<'a>(
        &'a self,
        context: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, RestlineResult<()>>;

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// The stages after the current one.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    /// `true` when the current stage is the last one and must not delegate.
    pub fn is_end(&self) -> bool {
        self.stages.is_empty()
    }

    pub async fn run(self, context: &mut RequestContext) -> RestlineResult<()> {
        let Some((stage, rest)) = self.stages.split_first() else {
            return Err(Error::InvalidMiddlewareChain {
                message: "stage delegated past the terminal stage".to_owned(),
            });
        };
        stage.execute(context, Next { stages: rest }).await
    }
}

/// Ordered stages ending in a transport stage.
#[derive(Clone)]
pub struct MiddlewareChain {
    stages: Arc<[Arc<dyn Middleware>]>,
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_list()
            .entries(self.stages.iter().map(|stage| stage.name()))
            .finish()
    }
}

impl MiddlewareChain {
    pub fn new(stages: Vec<Arc<dyn Middleware>>) -> RestlineResult<Self> {
        if stages.is_empty() {
            return Err(Error::InvalidMiddlewareChain {
                message: "a middleware chain needs at least one stage".to_owned(),
            });
        }
        Ok(Self {
            stages: stages.into(),
        })
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Runs every stage against `context` and returns the final response.
    ///
    /// The response also stays on the context.
    pub async fn send(&self, context: &mut RequestContext) -> RestlineResult<Response> {
        Next {
            stages: &self.stages,
        }
        .run(context)
        .await?;
        context
            .response()
            .cloned()
            .ok_or_else(|| Error::MissingResponse {
                method: context.method().clone(),
                uri: redact_uri_for_logs(&context.uri().to_string()),
            })
    }
}

impl RequestExecutor for MiddlewareChain {
    fn execute(&self, request: ApiRequest) -> BoxFuture<'_, RestlineResult<Response>> {
        Box::pin(async move {
            let mut context = request.into_context(None, None)?;
            self.send(&mut context).await
        })
    }
}
