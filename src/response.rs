use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri};
use serde::de::DeserializeOwned;

use crate::RestlineResult;
use crate::error::Error;
use crate::util::{redact_uri_for_logs, truncate_body};

/// Fully buffered response produced by the terminal stage (or a fault injector).
#[derive(Clone, Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T>(&self) -> RestlineResult<T>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(&self.body).map_err(|source| Error::Deserialize {
            source,
            body: truncate_body(&self.body),
        })
    }

    /// Turns a non-2xx response into [`Error::HttpStatus`].
    pub fn error_for_status(self, method: &Method, uri: &Uri) -> RestlineResult<Self> {
        if self.status.is_success() {
            return Ok(self);
        }
        Err(Error::HttpStatus {
            status: self.status.as_u16(),
            method: method.clone(),
            uri: redact_uri_for_logs(&uri.to_string()),
            body: truncate_body(&self.body),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    #[test]
    fn json_failure_keeps_truncated_body() {
        let response = Response::new(StatusCode::OK, HeaderMap::new(), Bytes::from_static(b"nope"));
        let error = response.json::<Value>().expect_err("invalid json");
        match error {
            Error::Deserialize { body, .. } => assert_eq!(body, "nope"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn error_for_status_redacts_query() {
        let response = Response::new(
            StatusCode::NOT_FOUND,
            HeaderMap::new(),
            Bytes::from_static(b"missing"),
        );
        let uri: Uri = "https://api.example.com/items?token=abc".parse().expect("uri");
        let error = response
            .error_for_status(&Method::GET, &uri)
            .expect_err("404 should fail");
        match error {
            Error::HttpStatus { status, uri, body, .. } => {
                assert_eq!(status, 404);
                assert_eq!(uri, "https://api.example.com/items");
                assert_eq!(body, "missing");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
