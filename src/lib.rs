//! `restline` is an HTTP client SDK core for REST APIs: a composable
//! middleware pipeline with retry, redirect and fault-injection stages, a
//! resumable chunked uploader and a cursor-based page iterator.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use restline::prelude::{ApiRequest, Client, PageCollection, PageIterator, StaticTokenProvider};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Message {
//!     subject: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .client_name("mail-sync")
//!         .base_url("https://graph.microsoft.com/v1.0")
//!         .authentication_provider(Arc::new(StaticTokenProvider::new("token")))
//!         .try_build()?;
//!
//!     let first_page: PageCollection<Message> =
//!         client.send_json(ApiRequest::get("/me/messages")).await?;
//!     let mut iterator = PageIterator::new(&client, first_page, |message: &Message| {
//!         println!("{}", message.subject);
//!         true
//!     });
//!     iterator.iterate().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Default Pipeline
//!
//! `ClientBuilder::try_build` assembles, in order: authentication (when a
//! provider is configured), retry, redirect, chaos (when configured) and the
//! HTTP transport. Supplying `ClientBuilder::middleware` replaces the whole
//! pipeline.

mod auth;
mod chaos;
mod client;
mod config;
mod context;
mod error;
mod middleware;
mod page;
mod range;
mod redirect;
mod response;
mod retry;
mod transport;
pub mod upload;
mod util;

#[cfg(test)]
mod test_support;

pub use crate::auth::{
    AuthenticationHandler, AuthenticationHandlerOptions, AuthenticationProvider,
    AuthenticationProviderOptions, StaticTokenProvider,
};
pub use crate::chaos::{
    ChaosHandler, ChaosHandlerOptions, ChaosStrategy, DEFAULT_CHAOS_PERCENTAGE,
    DEFAULT_STATUS_MESSAGE,
};
pub use crate::client::{ApiRequest, Client, ClientBuilder, RequestExecutor};
pub use crate::config::{ClientProfile, ProfileDefaults};
pub use crate::context::{
    MiddlewareControl, MiddlewareKind, MiddlewareOption, RedirectMode, RequestContext,
};
pub use crate::error::{BoxError, Error, ErrorCode, ErrorKind, TransportErrorKind};
pub use crate::middleware::{Middleware, MiddlewareChain, Next};
pub use crate::page::{PageCollection, PageIterator, PageIteratorRequestOptions};
pub use crate::range::Range;
pub use crate::redirect::{
    AlwaysRedirect, DEFAULT_MAX_REDIRECTS, MAX_MAX_REDIRECTS, RedirectClassifier,
    RedirectDecision, RedirectHandler, RedirectHandlerOptions,
};
pub use crate::response::Response;
pub use crate::retry::{
    AlwaysRetry, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_SECONDS, MAX_MAX_RETRIES,
    MAX_RETRY_DELAY_SECONDS, RETRY_ATTEMPT_HEADER, RetryClassifier, RetryDecision, RetryHandler,
    RetryHandlerOptions, exponential_backoff_seconds,
};
pub use crate::transport::{DEFAULT_MAX_RESPONSE_BODY_BYTES, DEFAULT_REQUEST_TIMEOUT, HttpTransport};
pub use crate::upload::{
    FileSource, FileUpload, LargeFileUploadSession, LargeFileUploadTask,
    LargeFileUploadTaskOptions, StreamUpload, UploadProgress, UploadResult, UploadStatusResponse,
    create_upload_session,
};

pub type RestlineResult<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::upload::onedrive::{
        OneDriveLargeFileUploadOptions, OneDriveLargeFileUploadTask,
    };
    pub use crate::{
        ApiRequest, AuthenticationProvider, ChaosHandler, ChaosHandlerOptions, ChaosStrategy,
        Client, ClientBuilder, ClientProfile, Error, ErrorCode, ErrorKind, FileUpload,
        LargeFileUploadSession, LargeFileUploadTask, LargeFileUploadTaskOptions, Middleware,
        MiddlewareChain, MiddlewareControl, Next, PageCollection, PageIterator, Range,
        RedirectHandlerOptions, RequestContext, RequestExecutor, Response, RestlineResult,
        RetryHandlerOptions, StaticTokenProvider, StreamUpload, UploadResult,
    };
}
