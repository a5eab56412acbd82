//! Resumable chunked uploads against an upload-session endpoint.

mod file;
pub mod onedrive;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, HeaderValue, LOCATION};
use http::{HeaderMap, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::RestlineResult;
use crate::client::{ApiRequest, RequestExecutor};
use crate::error::Error;
use crate::range::Range;
use crate::response::Response;
use crate::util::{parse_header_value, redact_uri_for_logs, resolve_uri, truncate_body};

pub use self::file::{FileSource, FileUpload, StreamUpload};

pub const DEFAULT_RANGE_SIZE: u64 = 5 * 1024 * 1024;
const OCTET_STREAM: &str = "application/octet-stream";

/// Server-assigned upload endpoint.
///
/// Clones share the cancellation flag, so a session handed to another task
/// observes a cancel issued through any of them.
#[derive(Clone, Debug)]
pub struct LargeFileUploadSession {
    url: String,
    expiry: Option<DateTime<Utc>>,
    cancelled: Arc<AtomicBool>,
}

impl LargeFileUploadSession {
    pub fn new(url: impl Into<String>, expiry: Option<DateTime<Utc>>) -> Self {
        Self {
            url: url.into(),
            expiry,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expiry
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Deletes the session on the server; it is marked cancelled only on 204.
    ///
    /// Takes `&self`, so a clone of the session can stop an upload that is
    /// still running. The upload loop checks the flag before every chunk.
    pub async fn cancel<E>(&self, executor: &E) -> RestlineResult<Response>
    where
        E: RequestExecutor + ?Sized,
    {
        let response = executor
            .execute(ApiRequest::delete(self.url.clone()))
            .await?;
        if response.status() == StatusCode::NO_CONTENT {
            self.cancelled.store(true, Ordering::Release);
            debug!(url = %redact_uri_for_logs(&self.url), "upload session cancelled");
        } else {
            warn!(
                status = response.status().as_u16(),
                url = %redact_uri_for_logs(&self.url),
                "upload session was not cancelled"
            );
        }
        Ok(response)
    }
}

/// Body of an intermediate chunk response or a status query.
///
/// Both camelCase and PascalCase member names are accepted, and `null` reads
/// as absent. When both spellings are present the camelCase expiry and the
/// PascalCase ranges win.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "UploadStatusBody")]
pub struct UploadStatusResponse {
    pub expiration_date_time: Option<String>,
    pub next_expected_ranges: Vec<String>,
}

#[derive(Deserialize)]
struct UploadStatusBody {
    #[serde(rename = "expirationDateTime", default)]
    expiration_date_time: Option<String>,
    #[serde(rename = "ExpirationDateTime", default)]
    pascal_expiration_date_time: Option<String>,
    #[serde(rename = "nextExpectedRanges", default)]
    next_expected_ranges: Option<Vec<String>>,
    #[serde(rename = "NextExpectedRanges", default)]
    pascal_next_expected_ranges: Option<Vec<String>>,
}

impl From<UploadStatusBody> for UploadStatusResponse {
    fn from(body: UploadStatusBody) -> Self {
        Self {
            expiration_date_time: body
                .expiration_date_time
                .or(body.pascal_expiration_date_time),
            next_expected_ranges: body
                .pascal_next_expected_ranges
                .or(body.next_expected_ranges)
                .unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
struct CreatedUploadSession {
    #[serde(rename = "uploadUrl", alias = "UploadUrl", default)]
    upload_url: Option<String>,
    #[serde(
        rename = "expirationDateTime",
        alias = "ExpirationDateTime",
        default
    )]
    expiration_date_time: Option<String>,
}

/// Outcome of a completed upload.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UploadResult {
    pub response_body: Option<Value>,
    pub location: Option<String>,
}

impl UploadResult {
    fn from_response(response: &Response) -> Self {
        Self {
            response_body: serde_json::from_slice(response.body()).ok(),
            location: response.header_str(LOCATION.as_str()).map(str::to_owned),
        }
    }
}

pub trait UploadProgress: Send + Sync {
    fn report(&self, range: Range);
}

impl<F> UploadProgress for F
where
    F: Fn(Range) + Send + Sync,
{
    fn report(&self, range: Range) {
        self(range)
    }
}

#[derive(Clone)]
pub struct LargeFileUploadTaskOptions {
    range_size: u64,
    progress: Option<Arc<dyn UploadProgress>>,
}

impl std::fmt::Debug for LargeFileUploadTaskOptions {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("LargeFileUploadTaskOptions")
            .field("range_size", &self.range_size)
            .field("has_progress", &self.progress.is_some())
            .finish()
    }
}

impl Default for LargeFileUploadTaskOptions {
    fn default() -> Self {
        Self {
            range_size: DEFAULT_RANGE_SIZE,
            progress: None,
        }
    }
}

impl LargeFileUploadTaskOptions {
    pub fn with_range_size(mut self, range_size: u64) -> Self {
        self.range_size = range_size;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn UploadProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn range_size(&self) -> u64 {
        self.range_size
    }
}

/// Uploads `source` to `session` one range at a time.
///
/// To stop a running upload, cancel through a clone of [`Self::session`].
pub struct LargeFileUploadTask<E, S> {
    executor: E,
    source: S,
    session: LargeFileUploadSession,
    options: LargeFileUploadTaskOptions,
    next_range: Range,
}

impl<E, S> std::fmt::Debug for LargeFileUploadTask<E, S>
where
    S: FileSource,
{
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("LargeFileUploadTask")
            .field("session_url", &redact_uri_for_logs(&self.session.url))
            .field("total_size", &self.source.size())
            .field("next_range", &self.next_range)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<E, S> LargeFileUploadTask<E, S>
where
    E: RequestExecutor,
    S: FileSource,
{
    pub fn new(
        executor: E,
        source: S,
        session: LargeFileUploadSession,
        options: LargeFileUploadTaskOptions,
    ) -> RestlineResult<Self> {
        if source.size() == 0 {
            return Err(Error::MinExpectationNotMet {
                setting: "file size",
                minimum: 1,
                value: 0,
            });
        }
        if options.range_size == 0 {
            return Err(Error::MinExpectationNotMet {
                setting: "range_size",
                minimum: 1,
                value: 0,
            });
        }
        let first_max = options.range_size.min(i64::MAX as u64) as i64 - 1;
        Ok(Self {
            executor,
            source,
            session,
            options,
            next_range: Range::new(0, first_max),
        })
    }

    pub fn session(&self) -> &LargeFileUploadSession {
        &self.session
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn options(&self) -> &LargeFileUploadTaskOptions {
        &self.options
    }

    pub fn total_size(&self) -> u64 {
        self.source.size()
    }

    /// Range the next chunk will cover; the unset sentinel once the server
    /// expects nothing more.
    pub fn get_next_range(&self) -> Range {
        if self.next_range.min == -1 {
            return self.next_range;
        }
        let total_size = self.total_size() as i64;
        let range_size = self.options.range_size.min(i64::MAX as u64) as i64;
        let min = self.next_range.min;
        let max = min.saturating_add(range_size - 1).min(total_size - 1);
        Range::new(min, max)
    }

    pub fn update_task_status(&mut self, status: &UploadStatusResponse) {
        self.next_range = Range::from_expected_ranges(&status.next_expected_ranges, self.total_size());
        if let Some(expiry) = status
            .expiration_date_time
            .as_deref()
            .and_then(parse_expiry)
        {
            self.session.expiry = Some(expiry);
        }
    }

    pub async fn upload(&mut self) -> RestlineResult<UploadResult> {
        let uri = resolve_uri(None, &self.session.url)?;
        while !self.session.is_cancelled() {
            let next_range = self.get_next_range();
            if next_range.max == -1 {
                return Err(Error::InvalidSession {
                    message: "Task with which you are trying to upload is already completed, Please check for your uploaded file".to_owned(),
                });
            }

            let chunk = self.source.slice_file(next_range).await?;
            let response = self.upload_slice(chunk, next_range).await?;
            if is_upload_complete(&response) {
                debug!(
                    status = response.status().as_u16(),
                    total_size = self.total_size(),
                    "upload session completed"
                );
                self.report_progress(next_range);
                return Ok(UploadResult::from_response(&response));
            }
            if self.session.is_cancelled() {
                break;
            }

            let status: UploadStatusResponse =
                response.error_for_status(&Method::PUT, &uri)?.json()?;
            self.update_task_status(&status);
            debug!(
                uploaded = %next_range,
                next_range = %self.next_range,
                "uploaded chunk"
            );
            self.report_progress(next_range);
        }
        Err(Error::UploadCancelled {
            url: redact_uri_for_logs(&self.session.url),
        })
    }

    /// Sends one chunk without touching task state.
    pub async fn upload_slice(&self, chunk: Bytes, range: Range) -> RestlineResult<Response> {
        let content_range = format!("bytes {}-{}/{}", range.min, range.max, self.total_size());
        let request = ApiRequest::put(self.session.url.clone())
            .header(CONTENT_LENGTH, HeaderValue::from(chunk.len() as u64))
            .header(
                CONTENT_RANGE,
                parse_header_value(CONTENT_RANGE.as_str(), &content_range)?,
            )
            .header(CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM))
            .body(chunk);
        self.executor.execute(request).await
    }

    /// Deletes the session; see [`LargeFileUploadSession::cancel`].
    pub async fn cancel(&self) -> RestlineResult<Response> {
        self.session.cancel(&self.executor).await
    }

    pub async fn get_status(&mut self) -> RestlineResult<UploadStatusResponse> {
        let uri = resolve_uri(None, &self.session.url)?;
        let status: UploadStatusResponse = self
            .executor
            .execute(ApiRequest::get(self.session.url.clone()))
            .await?
            .error_for_status(&Method::GET, &uri)?
            .json()?;
        self.update_task_status(&status);
        Ok(status)
    }

    pub async fn resume(&mut self) -> RestlineResult<UploadResult> {
        self.get_status().await?;
        self.upload().await
    }

    fn report_progress(&self, range: Range) {
        if let Some(progress) = &self.options.progress {
            progress.report(range);
        }
    }
}

/// Creates an upload session by POSTing `payload` to `request_url`.
pub async fn create_upload_session<E, P>(
    executor: &E,
    request_url: &str,
    payload: &P,
    headers: &HeaderMap,
) -> RestlineResult<LargeFileUploadSession>
where
    E: RequestExecutor + ?Sized,
    P: Serialize + ?Sized,
{
    let request = ApiRequest::post(request_url)
        .with_headers(headers)
        .json(payload)?;
    let response = executor.execute(request).await?;
    if !response.status().is_success() {
        return Err(Error::HttpStatus {
            status: response.status().as_u16(),
            method: Method::POST,
            uri: redact_uri_for_logs(request_url),
            body: truncate_body(response.body()),
        });
    }
    let created: CreatedUploadSession = response.json()?;
    let Some(url) = created.upload_url else {
        return Err(Error::MalformedResponse {
            message: "upload session response has no uploadUrl".to_owned(),
        });
    };
    let expiry = created.expiration_date_time.as_deref().and_then(parse_expiry);
    Ok(LargeFileUploadSession::new(url, expiry))
}

fn parse_expiry(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|expiry| expiry.with_timezone(&Utc))
}

fn is_upload_complete(response: &Response) -> bool {
    match response.status() {
        StatusCode::CREATED => true,
        StatusCode::OK => serde_json::from_slice::<Value>(response.body())
            .ok()
            .and_then(|body| body.get("id").map(is_truthy))
            .unwrap_or(false),
        _ => false,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|number| number != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
