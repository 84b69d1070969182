// mock_couch: a hand-rolled CouchDB stand-in for integration tests.
//
// Binds to 127.0.0.1:0, accepts one connection at a time on a background
// thread, and answers each request against a scripted FIFO expectation
// queue. Tests push expectations, drive an `Uploader` against `url()`, then
// assert on the recorded requests.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use serde_json::Value;

/// Initializes a tracing subscriber for test output, the same stdout +
/// `EnvFilter` setup `services/forwarder/src/main.rs` wires into `main()`.
///
/// Safe to call from every test: `try_init` ignores the "already set" error
/// from a previous call in the same test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

pub struct Expectation {
    pub method: &'static str,
    /// Matched against the request path (including query string).
    pub path_contains: String,
    pub status: u16,
    pub body: Value,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: Option<Value>,
}

struct Shared {
    expectations: Mutex<VecDeque<Expectation>>,
    recorded: Mutex<Vec<RecordedRequest>>,
}

pub struct MockCouch {
    addr: std::net::SocketAddr,
    shared: Arc<Shared>,
    _accept_thread: JoinHandle<()>,
}

impl MockCouch {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock couch listener");
        let addr = listener.local_addr().expect("local_addr");
        let shared = Arc::new(Shared {
            expectations: Mutex::new(VecDeque::new()),
            recorded: Mutex::new(Vec::new()),
        });

        let accept_shared = shared.clone();
        let accept_thread = std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                handle_connection(stream, &accept_shared);
            }
        });

        MockCouch {
            addr,
            shared,
            _accept_thread: accept_thread,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn expect(&self, expectation: Expectation) {
        self.shared.expectations.lock().unwrap().push_back(expectation);
    }

    pub fn expect_uuids(&self, count: usize, ids: Vec<String>) {
        self.expect(Expectation {
            method: "GET",
            path_contains: format!("/_uuids?count={count}"),
            status: 200,
            body: serde_json::json!({ "uuids": ids }),
        });
    }

    pub fn expect_put(&self, path_contains: impl Into<String>, status: u16) {
        self.expect(Expectation {
            method: "PUT",
            path_contains: path_contains.into(),
            status,
            body: serde_json::json!({ "ok": status == 201 }),
        });
    }

    pub fn recorded(&self) -> Vec<RecordedRequest> {
        self.shared.recorded.lock().unwrap().clone()
    }
}

fn handle_connection(mut stream: TcpStream, shared: &Arc<Shared>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    // Read until we have the full header block.
    let header_end = loop {
        let n = match stream.read(&mut chunk) {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        if buf.len() > 1 << 20 {
            return;
        }
    };

    let header_text = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = header_text.lines();
    let Some(request_line) = lines.next() else { return };
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_owned();
    let path = parts.next().unwrap_or("").to_owned();

    let content_length: usize = lines
        .find_map(|l| {
            let (k, v) = l.split_once(':')?;
            (k.trim().eq_ignore_ascii_case("content-length"))
                .then(|| v.trim().parse().ok())
                .flatten()
        })
        .unwrap_or(0);

    let body_start = header_end + 4;
    while buf.len() < body_start + content_length {
        let n = match stream.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
    }
    let body_bytes = buf.get(body_start..body_start + content_length).unwrap_or(&[]);
    let body: Option<Value> = serde_json::from_slice(body_bytes).ok();

    shared.recorded.lock().unwrap().push(RecordedRequest {
        method: method.clone(),
        path: path.clone(),
        body: body.clone(),
    });

    let expectation = shared
        .expectations
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Expectation {
            method: "GET",
            path_contains: String::new(),
            status: 500,
            body: serde_json::json!({"error": "unexpected request", "path": path}),
        });

    assert!(
        path.contains(&expectation.path_contains),
        "unexpected request: {method} {path} (expected path containing '{}')",
        expectation.path_contains
    );
    assert_eq!(method, expectation.method, "unexpected method for {path}");

    let payload = expectation.body.to_string();
    let reason = reason_phrase(expectation.status);
    let response = format!(
        "HTTP/1.1 {} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
        expectation.status,
        payload.len()
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        409 => "Conflict",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}
