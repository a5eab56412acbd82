use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use restline::prelude::{
    ApiRequest, Client, ErrorCode, ErrorKind, FileUpload, LargeFileUploadSession,
    LargeFileUploadTask, LargeFileUploadTaskOptions, PageCollection, PageIterator,
    RetryHandlerOptions, StaticTokenProvider,
};
use restline::{Range, TransportErrorKind};
use serde_json::{Value, json};

#[derive(Clone)]
struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl MockResponse {
    fn new(status: u16, headers: Vec<(&str, &str)>, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.to_owned(), value.to_owned()))
                .collect(),
            body: body.into().into_bytes(),
        }
    }
}

#[derive(Clone, Debug)]
struct CapturedRequest {
    method: String,
    path: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

struct MockServer {
    base_url: String,
    served: Arc<AtomicUsize>,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
    join: Option<JoinHandle<()>>,
}

impl MockServer {
    fn start(responses: Vec<MockResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let address = listener.local_addr().expect("read local address");
        listener
            .set_nonblocking(true)
            .expect("set listener nonblocking");

        let served = Arc::new(AtomicUsize::new(0));
        let captured = Arc::new(Mutex::new(Vec::new()));
        let served_clone = Arc::clone(&served);
        let captured_clone = Arc::clone(&captured);

        let join = thread::spawn(move || {
            let deadline = std::time::Instant::now() + Duration::from_secs(3);
            let mut response_index = 0;

            while response_index < responses.len() && std::time::Instant::now() < deadline {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        let _ = stream.set_nonblocking(false);
                        if let Ok(request) = read_request(&mut stream) {
                            captured_clone
                                .lock()
                                .expect("lock captured requests")
                                .push(request);
                        }

                        served_clone.fetch_add(1, Ordering::SeqCst);
                        let response = &responses[response_index];
                        response_index += 1;
                        let _ = write_response(&mut stream, response);
                    }
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            base_url: format!("http://{address}"),
            served,
            captured,
            join: Some(join),
        }
    }

    fn requests(&self) -> Vec<CapturedRequest> {
        self.captured
            .lock()
            .expect("lock captured requests")
            .clone()
    }

    fn served_count(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn read_request(stream: &mut TcpStream) -> std::io::Result<CapturedRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(1)))?;

    let mut raw = Vec::new();
    loop {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..read]);
        if find_header_end(&raw).is_some() {
            break;
        }
    }

    let header_end = find_header_end(&raw).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "malformed request without header terminator",
        )
    })?;

    let header_text = String::from_utf8_lossy(&raw[..header_end]);
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "missing request line")
    })?;
    let mut request_line_parts = request_line.split_whitespace();
    let method = request_line_parts.next().unwrap_or_default().to_owned();
    let path = request_line_parts.next().unwrap_or_default().to_owned();

    let mut headers = BTreeMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_owned());
        }
    }

    let content_length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = raw[header_end + 4..].to_vec();
    while body.len() < content_length {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok(CapturedRequest {
        method,
        path,
        headers,
        body,
    })
}

fn write_response(stream: &mut TcpStream, response: &MockResponse) -> std::io::Result<()> {
    let body = &response.body;
    let mut raw = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        status_text(response.status),
        body.len()
    );
    for (name, value) in &response.headers {
        raw.push_str(name);
        raw.push_str(": ");
        raw.push_str(value);
        raw.push_str("\r\n");
    }
    raw.push_str("\r\n");

    stream.write_all(raw.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|window| window == b"\r\n\r\n")
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        303 => "See Other",
        307 => "Temporary Redirect",
        404 => "Not Found",
        429 => "Too Many Requests",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

fn client_for(base_url: &str) -> Client {
    Client::builder()
        .client_name("restline-it")
        .base_url(base_url)
        .request_timeout(Duration::from_secs(1))
        .try_build()
        .expect("client should build")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retries_throttled_request_then_succeeds() {
    let server = MockServer::start(vec![
        MockResponse::new(503, vec![("Retry-After", "0")], "busy"),
        MockResponse::new(
            200,
            vec![("Content-Type", "application/json")],
            r#"{"ok":true}"#,
        ),
    ]);
    let client = client_for(&server.base_url);

    let body: Value = client
        .send_json(ApiRequest::get("/v1/items"))
        .await
        .expect("request should succeed after retry");
    assert_eq!(body, json!({"ok": true}));
    assert_eq!(server.served_count(), 2);

    let requests = server.requests();
    assert!(!requests[0].headers.contains_key("retry-attempt"));
    assert_eq!(
        requests[1].headers.get("retry-attempt").map(String::as_str),
        Some("1")
    );
    assert!(
        requests[0]
            .headers
            .get("user-agent")
            .is_some_and(|value| value.starts_with("restline-it/"))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exhausted_retries_return_last_response() {
    let server = MockServer::start(vec![
        MockResponse::new(429, vec![("Retry-After", "0")], "slow down"),
        MockResponse::new(429, vec![("Retry-After", "0")], "slow down"),
        MockResponse::new(429, vec![("Retry-After", "0")], "still slow"),
    ]);
    let client = client_for(&server.base_url);

    let response = client
        .send(
            ApiRequest::get("/v1/items")
                .middleware_option(RetryHandlerOptions::new(0, 2).expect("options")),
        )
        .await
        .expect("exhaustion is not an error");
    assert_eq!(response.status().as_u16(), 429);
    assert_eq!(response.text_lossy(), "still slow");
    assert_eq!(server.served_count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn see_other_redirect_switches_to_get_without_body() {
    let server = MockServer::start(vec![
        MockResponse::new(303, vec![("Location", "/v1/result")], ""),
        MockResponse::new(200, vec![], r#"{"done":true}"#),
    ]);
    let client = client_for(&server.base_url);

    let response = client
        .send(
            ApiRequest::post("/v1/jobs")
                .json(&json!({"name": "export"}))
                .expect("serialize payload"),
        )
        .await
        .expect("redirect should be followed");
    assert_eq!(response.status().as_u16(), 200);

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, "POST");
    assert!(!requests[0].body.is_empty());
    assert_eq!(requests[1].method, "GET");
    assert_eq!(requests[1].path, "/v1/result");
    assert!(requests[1].body.is_empty());
    assert!(!requests[1].headers.contains_key("content-type"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cross_origin_redirect_drops_authorization() {
    let landing = MockServer::start(vec![MockResponse::new(200, vec![], "landed")]);
    let location = format!("{}/landing", landing.base_url);
    let origin = MockServer::start(vec![MockResponse::new(
        307,
        vec![("Location", location.as_str())],
        "",
    )]);
    let client = Client::builder()
        .base_url(origin.base_url.clone())
        .request_timeout(Duration::from_secs(1))
        .authentication_provider(Arc::new(StaticTokenProvider::new("secret-token")))
        .try_build()
        .expect("client should build");

    let response = client
        .send(ApiRequest::get("/v1/start"))
        .await
        .expect("redirect should be followed");
    assert_eq!(response.text_lossy(), "landed");

    let origin_requests = origin.requests();
    assert_eq!(
        origin_requests[0]
            .headers
            .get("authorization")
            .map(String::as_str),
        Some("Bearer secret-token")
    );
    let landing_requests = landing.requests();
    assert_eq!(landing_requests[0].path, "/landing");
    assert!(!landing_requests[0].headers.contains_key("authorization"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chunked_upload_sends_content_ranges() {
    let server = MockServer::start(vec![
        MockResponse::new(
            202,
            vec![("Content-Type", "application/json")],
            r#"{"expirationDateTime":"2030-01-01T00:00:00Z","nextExpectedRanges":["4-"]}"#,
        ),
        MockResponse::new(
            201,
            vec![("Content-Type", "application/json")],
            r#"{"id":"item-7"}"#,
        ),
    ]);
    let client = client_for(&server.base_url);
    let session_url = format!("{}/upload/session-1", server.base_url);
    let progress = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&progress);

    let mut task = LargeFileUploadTask::new(
        &client,
        FileUpload::new(b"abcdefgh".to_vec(), "letters.txt"),
        LargeFileUploadSession::new(session_url, None),
        LargeFileUploadTaskOptions::default()
            .with_range_size(4)
            .with_progress(Arc::new(move |range: Range| {
                sink.lock().expect("lock progress").push(range);
            })),
    )
    .expect("task should build");

    let result = task.upload().await.expect("upload should complete");
    assert_eq!(result.response_body, Some(json!({"id": "item-7"})));
    assert!(task.session().expiry().is_some());
    assert_eq!(
        *progress.lock().expect("lock progress"),
        vec![Range::new(0, 3), Range::new(4, 7)]
    );

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, "PUT");
    assert_eq!(requests[0].path, "/upload/session-1");
    assert_eq!(
        requests[0].headers.get("content-range").map(String::as_str),
        Some("bytes 0-3/8")
    );
    assert_eq!(requests[0].body, b"abcd");
    assert_eq!(
        requests[1].headers.get("content-range").map(String::as_str),
        Some("bytes 4-7/8")
    );
    assert_eq!(requests[1].body, b"efgh");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn page_iterator_follows_next_link_over_http() {
    let server = MockServer::start(vec![MockResponse::new(
        200,
        vec![("Content-Type", "application/json")],
        r#"{"value":[3,4],"@odata.deltaLink":"https://api.example.com/delta?token=1"}"#,
    )]);
    let client = client_for(&server.base_url);
    let first_page =
        PageCollection::new(vec![1_u32, 2]).with_next_link(format!("{}/items?page=2", server.base_url));

    let mut seen = Vec::new();
    let mut iterator = PageIterator::new(&client, first_page, |item: &u32| {
        seen.push(*item);
        true
    });
    iterator.iterate().await.expect("iteration should succeed");
    assert!(iterator.is_complete());
    assert_eq!(
        iterator.delta_link(),
        Some("https://api.example.com/delta?token=1")
    );
    drop(iterator);
    assert_eq!(seen, vec![1, 2, 3, 4]);
    assert_eq!(server.requests()[0].path, "/items?page=2");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn non_success_status_maps_to_protocol_error() {
    let server = MockServer::start(vec![MockResponse::new(404, vec![], "missing")]);
    let client = client_for(&server.base_url);

    let error = client
        .send_json::<Value>(ApiRequest::get("/v1/items/unknown?token=secret"))
        .await
        .expect_err("404 should fail");
    assert_eq!(error.code(), ErrorCode::HttpStatus);
    assert_eq!(error.kind(), ErrorKind::Protocol);
    assert!(!error.to_string().contains("secret"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_connection_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind probe listener");
    let address = listener.local_addr().expect("read probe address");
    drop(listener);

    let client = client_for(&format!("http://{address}"));
    let error = client
        .send(ApiRequest::get("/v1/items"))
        .await
        .expect_err("nothing listens on the port");
    assert_eq!(error.kind(), ErrorKind::Transport);
    match error {
        restline::Error::Transport { kind, .. } => assert_eq!(kind, TransportErrorKind::Connect),
        other => panic!("unexpected error: {other}"),
    }
}
