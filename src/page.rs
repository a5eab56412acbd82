use http::HeaderMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::RestlineResult;
use crate::client::{ApiRequest, RequestExecutor};
use crate::context::MiddlewareControl;
use crate::util::{redact_uri_for_logs, resolve_uri};

/// One page of a server-side collection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageCollection<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(
        rename = "@odata.nextLink",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub next_link: Option<String>,
    #[serde(
        rename = "@odata.deltaLink",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub delta_link: Option<String>,
    /// Any other top-level members, kept untouched.
    #[serde(flatten)]
    pub additional: Map<String, Value>,
}

impl<T> PageCollection<T> {
    pub fn new(value: Vec<T>) -> Self {
        Self {
            value,
            next_link: None,
            delta_link: None,
            additional: Map::new(),
        }
    }

    pub fn with_next_link(mut self, next_link: impl Into<String>) -> Self {
        self.next_link = Some(next_link.into());
        self
    }

    pub fn with_delta_link(mut self, delta_link: impl Into<String>) -> Self {
        self.delta_link = Some(delta_link.into());
        self
    }
}

/// Applied to every continuation request.
#[derive(Clone, Debug, Default)]
pub struct PageIteratorRequestOptions {
    pub headers: HeaderMap,
    pub control: MiddlewareControl,
}

/// Walks a collection page by page, calling `callback` per item.
///
/// The callback returns `false` to pause; [`resume`](Self::resume) continues
/// with the next item. Continuation pages are fetched with GET and replace the
/// local buffer.
pub struct PageIterator<E, T, F> {
    executor: E,
    buffer: Vec<T>,
    cursor: usize,
    next_link: Option<String>,
    delta_link: Option<String>,
    complete: bool,
    callback: F,
    request_options: PageIteratorRequestOptions,
}

impl<E, T, F> std::fmt::Debug for PageIterator<E, T, F> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PageIterator")
            .field("buffered", &self.buffer.len())
            .field("cursor", &self.cursor)
            .field("next_link", &self.next_link.as_deref().map(redact_uri_for_logs))
            .field("has_delta_link", &self.delta_link.is_some())
            .field("complete", &self.complete)
            .finish_non_exhaustive()
    }
}

impl<E, T, F> PageIterator<E, T, F>
where
    E: RequestExecutor,
    T: DeserializeOwned,
    F: FnMut(&T) -> bool,
{
    pub fn new(executor: E, page: PageCollection<T>, callback: F) -> Self {
        Self {
            executor,
            buffer: page.value,
            cursor: 0,
            next_link: page.next_link,
            delta_link: page.delta_link,
            complete: false,
            callback,
            request_options: PageIteratorRequestOptions::default(),
        }
    }

    pub fn with_request_options(mut self, request_options: PageIteratorRequestOptions) -> Self {
        self.request_options = request_options;
        self
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn delta_link(&self) -> Option<&str> {
        self.delta_link.as_deref()
    }

    pub fn next_link(&self) -> Option<&str> {
        self.next_link.as_deref()
    }

    /// Feeds buffered items to the callback; `false` means it asked to pause.
    ///
    /// The cursor moves past an item even when the callback pauses on it.
    fn drain_buffer(&mut self) -> bool {
        let mut advance = true;
        while advance && self.cursor < self.buffer.len() {
            advance = (self.callback)(&self.buffer[self.cursor]);
            self.cursor += 1;
        }
        advance
    }

    async fn fetch_next_page(&mut self, next_link: &str) -> RestlineResult<()> {
        let uri = resolve_uri(None, next_link)?;
        let request = ApiRequest::get(next_link)
            .with_headers(&self.request_options.headers)
            .control(self.request_options.control.clone());
        let response = self.executor.execute(request).await?;
        let page: PageCollection<T> = response
            .error_for_status(&http::Method::GET, &uri)?
            .json()?;
        debug!(
            items = page.value.len(),
            has_next_link = page.next_link.is_some(),
            "fetched continuation page"
        );
        self.buffer = page.value;
        self.cursor = 0;
        self.next_link = page.next_link;
        self.delta_link = page.delta_link;
        Ok(())
    }

    pub async fn iterate(&mut self) -> RestlineResult<()> {
        let mut advance = self.drain_buffer();
        while advance {
            let Some(next_link) = self.next_link.clone() else {
                break;
            };
            self.fetch_next_page(&next_link).await?;
            advance = self.drain_buffer();
        }
        self.complete = self.next_link.is_none() && self.cursor >= self.buffer.len();
        Ok(())
    }

    pub async fn resume(&mut self) -> RestlineResult<()> {
        self.iterate().await
    }
}
