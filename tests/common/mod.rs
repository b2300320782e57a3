#![allow(dead_code)]

use reqwest::Url;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use tempfile::TempDir;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use uvtapp::store::LocalStore;

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

impl RecordedRequest {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).expect("request body is not JSON")
    }
}

#[derive(Clone)]
struct Reply {
    status: u16,
    body: String,
    delay: Duration,
    truncated: bool,
}

impl Reply {
    fn new(status: u16, body: &str) -> Self {
        Reply {
            status,
            body: body.to_string(),
            delay: Duration::ZERO,
            truncated: false,
        }
    }
}

type Requests = Arc<Mutex<Vec<RecordedRequest>>>;

/// In-process HTTP server answering each `METHOD path` with a scripted reply.
///
/// Unscripted routes answer 404. Every request is recorded in arrival order.
pub struct MockApiServer {
    base_url: Url,
    requests: Requests,
    handle: JoinHandle<()>,
}

impl MockApiServer {
    pub fn builder() -> MockApiServerBuilder {
        MockApiServerBuilder {
            replies: HashMap::new(),
        }
    }

    pub fn base_url(&self) -> Url {
        self.base_url.clone()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .map(|r| format!("{} {}", r.method, r.path))
            .collect()
    }
}

impl Drop for MockApiServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct MockApiServerBuilder {
    replies: HashMap<String, Reply>,
}

impl MockApiServerBuilder {
    pub fn reply(self, method: &str, path: &str, status: u16, body: &str) -> Self {
        self.script(method, path, Reply::new(status, body))
    }

    /// Answer only after `delay`.
    pub fn reply_after(
        self,
        method: &str,
        path: &str,
        delay: Duration,
        status: u16,
        body: &str,
    ) -> Self {
        let reply = Reply {
            delay,
            ..Reply::new(status, body)
        };
        self.script(method, path, reply)
    }

    /// Announce a longer body than is sent, then close the connection.
    pub fn reply_truncated(self, method: &str, path: &str, status: u16, body: &str) -> Self {
        let reply = Reply {
            truncated: true,
            ..Reply::new(status, body)
        };
        self.script(method, path, reply)
    }

    fn script(mut self, method: &str, path: &str, reply: Reply) -> Self {
        self.replies.insert(format!("{method} {path}"), reply);
        self
    }

    pub async fn start(self) -> MockApiServer {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock server");
        let addr = listener.local_addr().expect("failed to get mock server address");
        let requests: Requests = Arc::default();
        let replies = Arc::new(self.replies);

        let recorded = requests.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                // one connection at a time keeps the recorded order exact
                handle_connection(stream, &replies, &recorded).await;
            }
        });

        MockApiServer {
            base_url: Url::parse(&format!("http://{addr}/")).expect("invalid mock server url"),
            requests,
            handle,
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    replies: &HashMap<String, Reply>,
    requests: &Requests,
) {
    let mut reader = BufReader::new(&mut stream);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await.is_err() {
        return;
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    // Read HTTP headers
    let mut content_length = 0;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.is_err() {
            return;
        }
        if line.trim().is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':')
            && name.eq_ignore_ascii_case("content-length")
        {
            content_length = value.trim().parse().unwrap_or(0);
        }
    }

    let mut body = vec![0; content_length];
    if reader.read_exact(&mut body).await.is_err() {
        return;
    }

    let key = format!("{method} {path}");
    requests.lock().unwrap().push(RecordedRequest {
        method,
        path,
        body: String::from_utf8_lossy(&body).into_owned(),
    });

    let reply = replies
        .get(&key)
        .cloned()
        .unwrap_or_else(|| Reply::new(404, "not found"));
    tokio::time::sleep(reply.delay).await;

    let content_length = if reply.truncated {
        reply.body.len() + 64
    } else {
        reply.body.len()
    };
    let response = format!(
        "HTTP/1.1 {} Mock\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        reply.status, content_length, reply.body
    );

    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

pub fn temp_store() -> (TempDir, LocalStore) {
    let dir = TempDir::new().expect("failed to create temp directory");
    let store = LocalStore::new(dir.path().join("local_store.json"));
    (dir, store)
}

/// An address nothing listens on.
pub async fn closed_url() -> Url {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind");
    let addr = listener.local_addr().expect("failed to get address");
    drop(listener);
    Url::parse(&format!("http://{addr}/")).expect("invalid url")
}
