use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use tokio::io::{AsyncRead, ReadBuf};

use crate::RestlineResult;
use crate::context::{RedirectMode, RequestContext};
use crate::error::Error;
use crate::middleware::{Middleware, Next};
use crate::response::Response;

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn response(status: StatusCode, headers: &[(&'static str, &str)], body: &str) -> Response {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.append(
            *name,
            HeaderValue::from_str(value).expect("test header value should be valid"),
        );
    }
    Response::new(status, map, Bytes::from(body.to_owned()))
}

#[derive(Clone, Debug)]
pub(crate) struct RecordedRequest {
    pub(crate) method: Method,
    pub(crate) uri: String,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Option<Bytes>,
    pub(crate) redirect_mode: RedirectMode,
}

impl RecordedRequest {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

#[derive(Default)]
struct Script {
    replies: VecDeque<RestlineResult<Response>>,
    requests: Vec<RecordedRequest>,
}

/// Terminal stage that records each request and replays queued replies.
#[derive(Clone, Default)]
pub(crate) struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub(crate) fn new(responses: impl IntoIterator<Item = Response>) -> Self {
        Self::from_results(responses.into_iter().map(Ok).collect())
    }

    pub(crate) fn from_results(replies: Vec<RestlineResult<Response>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                replies: replies.into(),
                requests: Vec::new(),
            })),
        }
    }

    pub(crate) fn stage(&self) -> Arc<dyn Middleware> {
        Arc::new(self.clone())
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        lock_unpoisoned(&self.script).requests.clone()
    }
}

impl Middleware for ScriptedTransport {
    fn execute<'a>(
        &'a self,
        context: &'a mut RequestContext,
        _next: Next<'a>,
    ) -> BoxFuture<'a, RestlineResult<()>> {
        Box::pin(async move {
            let reply = {
                let mut script = lock_unpoisoned(&self.script);
                script.requests.push(RecordedRequest {
                    method: context.method().clone(),
                    uri: context.uri().to_string(),
                    headers: context.headers().clone(),
                    body: context.body().cloned(),
                    redirect_mode: context.redirect_mode(),
                });
                script.replies.pop_front()
            };
            let response = reply.unwrap_or_else(|| {
                Err(Error::MalformedResponse {
                    message: "scripted transport has no reply left".to_owned(),
                })
            })?;
            context.set_response(response);
            Ok(())
        })
    }
}

/// Reader over `data` whose read at offset `fail_at` errors once.
pub(crate) struct FlakyReader {
    data: Vec<u8>,
    offset: usize,
    fail_at: Option<usize>,
}

impl FlakyReader {
    pub(crate) fn new(data: Vec<u8>, fail_at: usize) -> Self {
        Self {
            data,
            offset: 0,
            fail_at: Some(fail_at),
        }
    }
}

impl AsyncRead for FlakyReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = &mut *self;
        if this.fail_at == Some(this.offset) {
            this.fail_at = None;
            return Poll::Ready(Err(std::io::Error::other("source device went away")));
        }
        let stop = this
            .fail_at
            .filter(|fail_at| *fail_at > this.offset)
            .unwrap_or(this.data.len())
            .min(this.data.len());
        let count = (stop - this.offset).min(buf.remaining());
        buf.put_slice(&this.data[this.offset..this.offset + count]);
        this.offset += count;
        Poll::Ready(Ok(()))
    }
}
