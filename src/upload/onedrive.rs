//! OneDrive flavour of the chunked upload: session creation from a drive
//! path, chunk-size normalisation and the commit call.

use std::sync::Arc;

use http::{HeaderMap, Method};
use serde::Serialize;

use super::{
    DEFAULT_RANGE_SIZE, FileSource, LargeFileUploadSession, LargeFileUploadTask,
    LargeFileUploadTaskOptions, UploadProgress, UploadResult, UploadStatusResponse,
    create_upload_session,
};
use crate::RestlineResult;
use crate::client::{ApiRequest, RequestExecutor};
use crate::error::Error;
use crate::range::Range;
use crate::response::Response;
use crate::util::{redact_uri_for_logs, truncate_body};

/// Chunks above this size must be a multiple of it.
pub const RANGE_SIZE_MULTIPLE: u64 = 320 * 1024;
pub const MAX_RANGE_SIZE: u64 = 60 * 1024 * 1024;
pub const DEFAULT_CONFLICT_BEHAVIOR: &str = "rename";

#[derive(Clone, Default)]
pub struct OneDriveLargeFileUploadOptions {
    pub file_name: String,
    pub path: Option<String>,
    pub range_size: Option<u64>,
    pub conflict_behavior: Option<String>,
    pub file_description: Option<String>,
    /// Reuse an existing session instead of creating one.
    pub upload_session_url: Option<String>,
    pub progress: Option<Arc<dyn UploadProgress>>,
}

impl std::fmt::Debug for OneDriveLargeFileUploadOptions {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("OneDriveLargeFileUploadOptions")
            .field("file_name", &self.file_name)
            .field("path", &self.path)
            .field("range_size", &self.range_size)
            .field("conflict_behavior", &self.conflict_behavior)
            .field("has_upload_session_url", &self.upload_session_url.is_some())
            .field("has_progress", &self.progress.is_some())
            .finish_non_exhaustive()
    }
}

impl OneDriveLargeFileUploadOptions {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            ..Self::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_range_size(mut self, range_size: u64) -> Self {
        self.range_size = Some(range_size);
        self
    }

    pub fn with_conflict_behavior(mut self, conflict_behavior: impl Into<String>) -> Self {
        self.conflict_behavior = Some(conflict_behavior.into());
        self
    }

    pub fn with_file_description(mut self, file_description: impl Into<String>) -> Self {
        self.file_description = Some(file_description.into());
        self
    }

    pub fn with_upload_session_url(mut self, upload_session_url: impl Into<String>) -> Self {
        self.upload_session_url = Some(upload_session_url.into());
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn UploadProgress>) -> Self {
        self.progress = Some(progress);
        self
    }
}

#[derive(Serialize)]
struct SessionPayload<'a> {
    item: SessionItem<'a>,
}

#[derive(Serialize)]
struct SessionItem<'a> {
    #[serde(rename = "@microsoft.graph.conflictBehavior")]
    conflict_behavior: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

#[derive(Serialize)]
struct CommitPayload<'a> {
    name: &'a str,
    #[serde(rename = "@microsoft.graph.conflictBehavior")]
    conflict_behavior: &'a str,
    #[serde(rename = "@microsoft.graph.sourceUrl")]
    source_url: &'a str,
}

/// Relative URL that opens an upload session for `file_name` under `path`.
pub fn create_session_url(file_name: &str, path: Option<&str>) -> String {
    let file_name = file_name.trim();
    let mut path = path.map(str::trim).unwrap_or_default().to_owned();
    if path.is_empty() {
        path.push('/');
    }
    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    if !path.ends_with('/') {
        path.push('/');
    }
    let encoded_path = path
        .split('/')
        .map(urlencoding::encode)
        .collect::<Vec<_>>()
        .join("/");
    format!(
        "/me/drive/root:{encoded_path}{}:/createUploadSession",
        urlencoding::encode(file_name)
    )
}

/// Caps `range_size` at 60 MiB and rounds anything above 320 KiB down to a
/// multiple of 320 KiB.
pub fn valid_range_size(range_size: u64) -> u64 {
    let range_size = range_size.min(MAX_RANGE_SIZE);
    if range_size > RANGE_SIZE_MULTIPLE {
        range_size / RANGE_SIZE_MULTIPLE * RANGE_SIZE_MULTIPLE
    } else {
        range_size
    }
}

pub struct OneDriveLargeFileUploadTask<E, S> {
    task: LargeFileUploadTask<E, S>,
    file_name: String,
}

impl<E, S> std::fmt::Debug for OneDriveLargeFileUploadTask<E, S>
where
    S: FileSource,
{
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("OneDriveLargeFileUploadTask")
            .field("file_name", &self.file_name)
            .field("task", &self.task)
            .finish()
    }
}

impl<E, S> OneDriveLargeFileUploadTask<E, S>
where
    E: RequestExecutor,
    S: FileSource,
{
    /// Opens (or reuses) a session for `options.file_name` and prepares the task.
    pub async fn create(
        executor: E,
        source: S,
        options: OneDriveLargeFileUploadOptions,
    ) -> RestlineResult<Self> {
        if options.file_name.trim().is_empty() {
            return Err(Error::MinExpectationNotMet {
                setting: "file_name length",
                minimum: 1,
                value: 0,
            });
        }
        let session = match options.upload_session_url.as_deref() {
            Some(url) => LargeFileUploadSession::new(url, None),
            None => {
                let request_url = create_session_url(&options.file_name, options.path.as_deref());
                let payload = SessionPayload {
                    item: SessionItem {
                        conflict_behavior: options
                            .conflict_behavior
                            .as_deref()
                            .unwrap_or(DEFAULT_CONFLICT_BEHAVIOR),
                        name: &options.file_name,
                        description: options.file_description.as_deref(),
                    },
                };
                create_upload_session(&executor, &request_url, &payload, &HeaderMap::new()).await?
            }
        };

        let range_size = valid_range_size(options.range_size.unwrap_or(DEFAULT_RANGE_SIZE));
        let mut task_options = LargeFileUploadTaskOptions::default().with_range_size(range_size);
        if let Some(progress) = options.progress {
            task_options = task_options.with_progress(progress);
        }
        let task = LargeFileUploadTask::new(executor, source, session, task_options)?;
        Ok(Self {
            task,
            file_name: options.file_name,
        })
    }

    pub fn task(&self) -> &LargeFileUploadTask<E, S> {
        &self.task
    }

    pub fn session(&self) -> &LargeFileUploadSession {
        self.task.session()
    }

    pub fn get_next_range(&self) -> Range {
        self.task.get_next_range()
    }

    pub async fn upload(&mut self) -> RestlineResult<UploadResult> {
        self.task.upload().await
    }

    pub async fn resume(&mut self) -> RestlineResult<UploadResult> {
        self.task.resume().await
    }

    pub async fn cancel(&self) -> RestlineResult<Response> {
        self.task.cancel().await
    }

    pub async fn get_status(&mut self) -> RestlineResult<UploadStatusResponse> {
        self.task.get_status().await
    }

    /// Finalises a session created with deferred commit by PUTting its source
    /// URL to `request_url`.
    pub async fn commit(
        &self,
        request_url: &str,
        conflict_behavior: Option<&str>,
    ) -> RestlineResult<Response> {
        let payload = CommitPayload {
            name: &self.file_name,
            conflict_behavior: conflict_behavior.unwrap_or(DEFAULT_CONFLICT_BEHAVIOR),
            source_url: self.task.session().url(),
        };
        let request = ApiRequest::put(request_url).json(&payload)?;
        let response = self.task.executor().execute(request).await?;
        if !response.status().is_success() {
            return Err(Error::HttpStatus {
                status: response.status().as_u16(),
                method: Method::PUT,
                uri: redact_uri_for_logs(request_url),
                body: truncate_body(response.body()),
            });
        }
        Ok(response)
    }
}
