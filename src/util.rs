use std::io::ErrorKind;
use std::time::SystemTime;

use http::header::{HeaderName, HeaderValue, LOCATION, RETRY_AFTER};
use http::{HeaderMap, StatusCode, Uri};

use crate::error::{Error, TransportErrorKind};

const MAX_ERROR_BODY_LEN: usize = 2048;

pub(crate) fn merge_headers(default_headers: &HeaderMap, request_headers: &HeaderMap) -> HeaderMap {
    let mut merged = default_headers.clone();
    for (name, value) in request_headers {
        merged.insert(name.clone(), value.clone());
    }
    merged
}

fn invalid_base_url_error(base_url: &str) -> Error {
    Error::InvalidUri {
        uri: base_url.to_owned(),
    }
}

pub(crate) fn redact_uri_for_logs(uri_text: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(uri_text) else {
        return uri_text.split('?').next().unwrap_or(uri_text).to_owned();
    };

    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.set_query(None);
    parsed.set_fragment(None);
    parsed.to_string()
}

/// Parses an absolute http(s) target.
pub(crate) fn parse_absolute_uri(text: &str) -> Result<Uri, Error> {
    let uri = text.parse::<Uri>().map_err(|_| Error::InvalidUri {
        uri: text.to_owned(),
    })?;
    match uri.scheme_str() {
        Some(scheme)
            if uri.host().is_some()
                && (scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https")) =>
        {
            Ok(uri)
        }
        _ => Err(Error::InvalidUri {
            uri: text.to_owned(),
        }),
    }
}

/// Resolves `path` against `base_url` unless it is already absolute.
pub(crate) fn resolve_uri(base_url: Option<&str>, path: &str) -> Result<Uri, Error> {
    if let Ok(uri) = path.parse::<Uri>()
        && uri.host().is_some()
    {
        return parse_absolute_uri(path);
    }
    let Some(base_url) = base_url else {
        return Err(Error::InvalidUri {
            uri: path.to_owned(),
        });
    };
    parse_absolute_uri(&join_base_path(base_url, path))
}

pub(crate) fn validate_base_url(base_url: &str) -> Result<(), Error> {
    let normalized = base_url.trim();
    if normalized.len() != base_url.len() || normalized.is_empty() {
        return Err(invalid_base_url_error(base_url));
    }

    let parsed = url::Url::parse(normalized).map_err(|_| invalid_base_url_error(base_url))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid_base_url_error(base_url));
    }
    if parsed.host_str().is_none() {
        return Err(invalid_base_url_error(base_url));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(invalid_base_url_error(base_url));
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(invalid_base_url_error(base_url));
    }
    Ok(())
}

pub(crate) fn join_base_path(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let relative = path.trim_start_matches('/');
    match (base.is_empty(), relative.is_empty()) {
        (true, true) => String::new(),
        (true, false) => relative.to_owned(),
        (false, true) => base.to_owned(),
        (false, false) => format!("{base}/{relative}"),
    }
}

pub(crate) fn classify_transport_error(
    error: &hyper_util::client::legacy::Error,
) -> TransportErrorKind {
    classify_error_chain(error, error.is_connect())
}

/// Walks the cause chain; io and rustls causes decide before the connect flag.
fn classify_error_chain(
    error: &(dyn std::error::Error + 'static),
    is_connect: bool,
) -> TransportErrorKind {
    let mut cause = Some(error);
    while let Some(current) = cause {
        if current.is::<rustls::Error>() {
            return TransportErrorKind::Tls;
        }
        if let Some(io) = current.downcast_ref::<std::io::Error>() {
            // io::Error::source skips the wrapped error itself.
            if io.get_ref().is_some_and(|inner| inner.is::<rustls::Error>()) {
                return TransportErrorKind::Tls;
            }
            match io.kind() {
                ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionAborted
                | ErrorKind::AddrNotAvailable
                | ErrorKind::HostUnreachable
                | ErrorKind::NetworkUnreachable => return TransportErrorKind::Connect,
                ErrorKind::ConnectionReset | ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof => {
                    return if is_connect {
                        TransportErrorKind::Connect
                    } else {
                        TransportErrorKind::Read
                    };
                }
                _ => {}
            }
        }
        if is_connect {
            let text = current.to_string();
            if text.contains("dns error") || text.contains("failed to lookup address") {
                return TransportErrorKind::Dns;
            }
        }
        cause = current.source();
    }

    if is_connect {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Other
    }
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, Error> {
    name.parse().map_err(|source| Error::InvalidHeaderName {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, Error> {
    value.parse().map_err(|source| Error::InvalidHeaderValue {
        name: name.to_owned(),
        source,
    })
}

/// Seconds requested by a `Retry-After` header.
///
/// Numeric values are used verbatim; HTTP dates become the signed distance
/// from `now`, rounded to whole seconds.
pub(crate) fn parse_retry_after_seconds(headers: &HeaderMap, now: SystemTime) -> Option<f64> {
    let value = headers.get(RETRY_AFTER)?;
    let raw_value = value.to_str().ok()?.trim();
    if let Ok(seconds) = raw_value.parse::<f64>()
        && seconds.is_finite()
    {
        return Some(seconds);
    }

    let date = httpdate::parse_http_date(raw_value).ok()?;
    let seconds = match date.duration_since(now) {
        Ok(ahead) => ahead.as_secs_f64(),
        Err(behind) => -behind.duration().as_secs_f64(),
    };
    Some(seconds.round())
}

pub(crate) fn is_redirect_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

pub(crate) fn redirect_location(headers: &HeaderMap) -> Option<String> {
    headers
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
}

pub(crate) fn default_port(uri: &Uri) -> Option<u16> {
    uri.port_u16().or_else(|| match uri.scheme_str() {
        Some("https") => Some(443),
        Some("http") => Some(80),
        _ => None,
    })
}

/// Scheme, host and port comparison; paths are irrelevant.
pub(crate) fn same_origin(left: &Uri, right: &Uri) -> bool {
    let left_scheme = left.scheme_str().unwrap_or_default();
    let right_scheme = right.scheme_str().unwrap_or_default();
    if !left_scheme.eq_ignore_ascii_case(right_scheme) {
        return false;
    }

    let left_host = left.host().unwrap_or_default();
    let right_host = right.host().unwrap_or_default();
    if !left_host.eq_ignore_ascii_case(right_host) {
        return false;
    }

    default_port(left) == default_port(right)
}

pub(crate) fn is_absolute_location(location: &str) -> bool {
    location.contains("://")
}

pub(crate) fn resolve_redirect_uri(current_uri: &Uri, location: &str) -> Option<Uri> {
    let base = url::Url::parse(&current_uri.to_string()).ok()?;
    let joined = base.join(location).ok()?;
    joined.as_str().parse().ok()
}

pub(crate) fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() <= MAX_ERROR_BODY_LEN {
        return text.into_owned();
    }

    let truncated: String = text.chars().take(MAX_ERROR_BODY_LEN).collect();
    format!("{truncated}...(truncated)")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[derive(Debug)]
    struct Wrapped(std::io::Error);

    impl std::fmt::Display for Wrapped {
        fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            formatter.write_str("client error (Connect)")
        }
    }

    impl std::error::Error for Wrapped {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn transport_errors_are_classified_from_their_causes() {
        let refused = Wrapped(std::io::Error::from(ErrorKind::ConnectionRefused));
        assert_eq!(classify_error_chain(&refused, true), TransportErrorKind::Connect);

        let reset = Wrapped(std::io::Error::from(ErrorKind::ConnectionReset));
        assert_eq!(classify_error_chain(&reset, false), TransportErrorKind::Read);
        assert_eq!(classify_error_chain(&reset, true), TransportErrorKind::Connect);

        let tls = Wrapped(std::io::Error::other(rustls::Error::General(
            "handshake failed".to_owned(),
        )));
        assert_eq!(classify_error_chain(&tls, true), TransportErrorKind::Tls);

        let dns = Wrapped(std::io::Error::other("dns error: no record found"));
        assert_eq!(classify_error_chain(&dns, true), TransportErrorKind::Dns);

        let unknown = Wrapped(std::io::Error::other("something else"));
        assert_eq!(classify_error_chain(&unknown, false), TransportErrorKind::Other);
        assert_eq!(classify_error_chain(&unknown, true), TransportErrorKind::Connect);
    }

    #[test]
    fn same_origin_compares_scheme_host_and_port() {
        let left: Uri = "https://graph.example.com/v1.0/me".parse().expect("uri");
        let same: Uri = "https://GRAPH.example.com:443/other/path".parse().expect("uri");
        let other_scheme: Uri = "http://graph.example.com/v1.0/me".parse().expect("uri");
        let other_port: Uri = "https://graph.example.com:8443/v1.0/me".parse().expect("uri");
        assert!(same_origin(&left, &same));
        assert!(!same_origin(&left, &other_scheme));
        assert!(!same_origin(&left, &other_port));
    }

    #[test]
    fn retry_after_accepts_numbers_and_dates() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("10"));
        assert_eq!(parse_retry_after_seconds(&headers, now), Some(10.0));

        let later = httpdate::fmt_http_date(now + Duration::from_secs(30));
        headers.insert(RETRY_AFTER, later.parse().expect("header value"));
        assert_eq!(parse_retry_after_seconds(&headers, now), Some(30.0));

        let earlier = httpdate::fmt_http_date(now - Duration::from_secs(5));
        headers.insert(RETRY_AFTER, earlier.parse().expect("header value"));
        assert_eq!(parse_retry_after_seconds(&headers, now), Some(-5.0));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after_seconds(&headers, now), None);
    }

    #[test]
    fn resolve_uri_joins_relative_paths() {
        let uri = resolve_uri(Some("https://api.example.com/v1.0/"), "/me/drive").expect("uri");
        assert_eq!(uri.to_string(), "https://api.example.com/v1.0/me/drive");

        let absolute =
            resolve_uri(Some("https://api.example.com"), "http://other.example.com/x").expect("uri");
        assert_eq!(absolute.host(), Some("other.example.com"));

        assert!(resolve_uri(None, "/relative").is_err());
    }

    #[test]
    fn redirect_locations_resolve_against_current_uri() {
        let current: Uri = "https://api.example.com/a/b".parse().expect("uri");
        let resolved = resolve_redirect_uri(&current, "/c?d=1").expect("resolved");
        assert_eq!(resolved.to_string(), "https://api.example.com/c?d=1");
        assert!(is_absolute_location("https://x.example.com/"));
        assert!(!is_absolute_location("/relative"));
    }

    #[test]
    fn redacts_credentials_and_query() {
        let redacted = redact_uri_for_logs("https://user:pw@api.example.com/upload?sig=secret#x");
        assert_eq!(redacted, "https://api.example.com/upload");
    }
}
