use http::Method;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

/// Coarse classification callers branch on.
///
/// Retry and redirect exhaustion never produce an error: the last response is
/// returned and its status must be inspected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid construction input; never retried.
    Configuration,
    /// The request could not be assembled (bad uri, header, payload).
    Request,
    /// The terminal stage failed to complete the exchange.
    Transport,
    /// The server answered with something the caller cannot use.
    Protocol,
    /// The operation is not valid for the current state, e.g. an upload that already finished.
    State,
    /// A forward-only file source ran out of bytes or was asked to rewind.
    StreamExhausted,
    /// The authentication provider failed to supply a token.
    Authentication,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidUri,
    RequestBuild,
    InvalidHeaderName,
    InvalidHeaderValue,
    SerializeJson,
    Deserialize,
    InvalidMiddlewareChain,
    MaxLimitExceeded,
    MinExpectationNotMet,
    InvalidChaosPattern,
    TlsBackendInit,
    Transport,
    Timeout,
    ReadBody,
    ResponseBodyTooLarge,
    MissingResponse,
    HttpStatus,
    MalformedResponse,
    Authentication,
    InvalidSession,
    UploadCancelled,
    StreamExhausted,
    StreamRewind,
    SourceRead,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidUri => "invalid_uri",
            Self::RequestBuild => "request_build",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::SerializeJson => "serialize_json",
            Self::Deserialize => "deserialize",
            Self::InvalidMiddlewareChain => "invalid_middleware_chain",
            Self::MaxLimitExceeded => "max_limit_exceeded",
            Self::MinExpectationNotMet => "min_expectation_not_met",
            Self::InvalidChaosPattern => "invalid_chaos_pattern",
            Self::TlsBackendInit => "tls_backend_init",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::ReadBody => "read_body",
            Self::ResponseBodyTooLarge => "response_body_too_large",
            Self::MissingResponse => "missing_response",
            Self::HttpStatus => "http_status",
            Self::MalformedResponse => "malformed_response",
            Self::Authentication => "authentication",
            Self::InvalidSession => "invalid_session",
            Self::UploadCancelled => "upload_cancelled",
            Self::StreamExhausted => "stream_exhausted",
            Self::StreamRewind => "stream_rewind",
            Self::SourceRead => "source_read",
        }
    }

    pub const fn kind(self) -> ErrorKind {
        match self {
            Self::InvalidMiddlewareChain
            | Self::MaxLimitExceeded
            | Self::MinExpectationNotMet
            | Self::InvalidChaosPattern
            | Self::TlsBackendInit => ErrorKind::Configuration,
            Self::InvalidUri
            | Self::RequestBuild
            | Self::InvalidHeaderName
            | Self::InvalidHeaderValue
            | Self::SerializeJson => ErrorKind::Request,
            Self::Transport | Self::Timeout | Self::ReadBody | Self::ResponseBodyTooLarge => {
                ErrorKind::Transport
            }
            Self::MissingResponse | Self::HttpStatus | Self::MalformedResponse | Self::Deserialize => {
                ErrorKind::Protocol
            }
            Self::InvalidSession | Self::UploadCancelled => ErrorKind::State,
            Self::StreamExhausted | Self::StreamRewind | Self::SourceRead => {
                ErrorKind::StreamExhausted
            }
            Self::Authentication => ErrorKind::Authentication,
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("failed to build http request: {source}")]
    RequestBuild {
        #[source]
        source: http::Error,
    },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("failed to serialize request json: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode response json: {source}; body={body}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
        body: String,
    },
    #[error("invalid middleware chain: {message}")]
    InvalidMiddlewareChain { message: String },
    #[error("MaxLimitExceeded: {setting} must not exceed {limit}, got {value}")]
    MaxLimitExceeded {
        setting: &'static str,
        limit: u64,
        value: u64,
    },
    #[error("MinExpectationNotMet: {setting} must be at least {minimum}, got {value}")]
    MinExpectationNotMet {
        setting: &'static str,
        minimum: u64,
        value: u64,
    },
    #[error("invalid chaos path pattern {pattern}: {source}")]
    InvalidChaosPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("failed to initialize tls backend: {message}")]
    TlsBackendInit { message: String },
    #[error("http transport error ({kind}) for {method} {uri}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("http request timed out after {timeout_ms}ms for {method} {uri}")]
    Timeout {
        timeout_ms: u128,
        method: Method,
        uri: String,
    },
    #[error("failed to read response body: {source}")]
    ReadBody {
        #[source]
        source: BoxError,
    },
    #[error(
        "response body too large ({actual_bytes} bytes > {limit_bytes} bytes) for {method} {uri}"
    )]
    ResponseBodyTooLarge {
        limit_bytes: usize,
        actual_bytes: usize,
        method: Method,
        uri: String,
    },
    #[error("middleware chain produced no response for {method} {uri}")]
    MissingResponse { method: Method, uri: String },
    #[error("http status error {status} for {method} {uri}: {body}")]
    HttpStatus {
        status: u16,
        method: Method,
        uri: String,
        body: String,
    },
    #[error("malformed response: {message}")]
    MalformedResponse { message: String },
    #[error("authentication provider failed: {source}")]
    Authentication {
        #[source]
        source: BoxError,
    },
    #[error("Invalid Session: {message}")]
    InvalidSession { message: String },
    #[error("upload session {url} was cancelled")]
    UploadCancelled { url: String },
    #[error("Stream ended before reading required range size ({actual} of {expected} bytes)")]
    StreamExhausted { expected: u64, actual: u64 },
    #[error(
        "stream source cannot rewind to offset {requested_min}; earliest buffered offset is {buffered_min}"
    )]
    StreamRewind { requested_min: u64, buffered_min: u64 },
    #[error("failed to read upload source: {source}")]
    SourceRead {
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::Serialize { .. } => ErrorCode::SerializeJson,
            Self::Deserialize { .. } => ErrorCode::Deserialize,
            Self::InvalidMiddlewareChain { .. } => ErrorCode::InvalidMiddlewareChain,
            Self::MaxLimitExceeded { .. } => ErrorCode::MaxLimitExceeded,
            Self::MinExpectationNotMet { .. } => ErrorCode::MinExpectationNotMet,
            Self::InvalidChaosPattern { .. } => ErrorCode::InvalidChaosPattern,
            Self::TlsBackendInit { .. } => ErrorCode::TlsBackendInit,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::ReadBody { .. } => ErrorCode::ReadBody,
            Self::ResponseBodyTooLarge { .. } => ErrorCode::ResponseBodyTooLarge,
            Self::MissingResponse { .. } => ErrorCode::MissingResponse,
            Self::HttpStatus { .. } => ErrorCode::HttpStatus,
            Self::MalformedResponse { .. } => ErrorCode::MalformedResponse,
            Self::Authentication { .. } => ErrorCode::Authentication,
            Self::InvalidSession { .. } => ErrorCode::InvalidSession,
            Self::UploadCancelled { .. } => ErrorCode::UploadCancelled,
            Self::StreamExhausted { .. } => ErrorCode::StreamExhausted,
            Self::StreamRewind { .. } => ErrorCode::StreamRewind,
            Self::SourceRead { .. } => ErrorCode::SourceRead,
        }
    }

    pub const fn kind(&self) -> ErrorKind {
        self.code().kind()
    }

    /// Stable display name callers can branch on.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::InvalidSession { .. } => "Invalid Session",
            Self::InvalidMiddlewareChain { .. } => "InvalidMiddlewareChain",
            Self::MaxLimitExceeded { .. } => "MaxLimitExceeded",
            Self::MinExpectationNotMet { .. } => "MinExpectationNotMet",
            other => other.code().as_str(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn error_codes_are_unique_snake_case() {
        let codes = [
            ErrorCode::InvalidUri,
            ErrorCode::RequestBuild,
            ErrorCode::InvalidHeaderName,
            ErrorCode::InvalidHeaderValue,
            ErrorCode::SerializeJson,
            ErrorCode::Deserialize,
            ErrorCode::InvalidMiddlewareChain,
            ErrorCode::MaxLimitExceeded,
            ErrorCode::MinExpectationNotMet,
            ErrorCode::InvalidChaosPattern,
            ErrorCode::TlsBackendInit,
            ErrorCode::Transport,
            ErrorCode::Timeout,
            ErrorCode::ReadBody,
            ErrorCode::ResponseBodyTooLarge,
            ErrorCode::MissingResponse,
            ErrorCode::HttpStatus,
            ErrorCode::MalformedResponse,
            ErrorCode::Authentication,
            ErrorCode::InvalidSession,
            ErrorCode::UploadCancelled,
            ErrorCode::StreamExhausted,
            ErrorCode::StreamRewind,
            ErrorCode::SourceRead,
        ];
        let names: Vec<&str> = codes.iter().map(|code| code.as_str()).collect();
        for name in &names {
            assert!(
                name.chars().all(|ch| ch.is_ascii_lowercase() || ch == '_'),
                "code {name} should be snake_case"
            );
        }
        let unique: BTreeSet<&str> = names.iter().copied().collect();
        assert_eq!(unique.len(), names.len());
    }

    #[test]
    fn invalid_session_is_a_state_error_with_stable_name() {
        let error = Error::InvalidSession {
            message: "already completed".to_owned(),
        };
        assert_eq!(error.kind(), ErrorKind::State);
        assert_eq!(error.name(), "Invalid Session");
        assert!(error.to_string().starts_with("Invalid Session"));
    }

    #[test]
    fn limit_errors_are_configuration_errors() {
        let error = Error::MaxLimitExceeded {
            setting: "max_retries",
            limit: 10,
            value: 11,
        };
        assert_eq!(error.kind(), ErrorKind::Configuration);
        assert_eq!(error.name(), "MaxLimitExceeded");
    }
}
