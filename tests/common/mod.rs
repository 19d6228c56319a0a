//! Shared utilities for integration and load testing.
#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use forward_proxy::config::{ProxyConfig, RouteConfig, RoutingMode};
use forward_proxy::lifecycle::Shutdown;
use forward_proxy::net::Listener;
use forward_proxy::observability::{ForwardEvent, LogSink};
use forward_proxy::resilience::Timeouts;
use forward_proxy::upstream::{ConnectionPool, UpstreamPool};
use forward_proxy::{routing, ForwardingEngine, HttpServer};

/// A request as the mock upstream saw it on the wire.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub head: String,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }

    /// Every value of header `name` (case-insensitive), in order.
    pub fn header_values(&self, name: &str) -> Vec<String> {
        self.head
            .lines()
            .skip(1)
            .filter_map(|line| line.split_once(':'))
            .filter(|(key, _)| key.trim().eq_ignore_ascii_case(name))
            .map(|(_, value)| value.trim().to_string())
            .collect()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.header_values(name).into_iter().next()
    }
}

/// A running mock upstream.
pub struct MockUpstream {
    pub addr: SocketAddr,
    /// TCP connections accepted so far.
    pub connections: Arc<AtomicUsize>,
    /// Connections the proxy has closed from its side.
    pub closed_by_peer: Arc<AtomicUsize>,
    pub requests: mpsc::UnboundedReceiver<CapturedRequest>,
}

impl MockUpstream {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn next_request(&mut self) -> CapturedRequest {
        tokio::time::timeout(Duration::from_secs(5), self.requests.recv())
            .await
            .expect("upstream saw no request")
            .expect("upstream stopped")
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Read bytes until a full request or response head is buffered.
/// Returns the head; bytes after it stay in `buf`.
pub async fn read_head(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Option<String> {
    loop {
        if let Some(end) = find(buf, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_string();
            buf.drain(..end + 4);
            return Some(head);
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Read the body that `head` announces: Content-Length, chunked, or none.
pub async fn read_body(stream: &mut TcpStream, buf: &mut Vec<u8>, head: &str) -> Option<Vec<u8>> {
    let lower = head.to_ascii_lowercase();
    if lower.contains("transfer-encoding: chunked") {
        let mut body = Vec::new();
        loop {
            let line = read_line(stream, buf).await?;
            let size = usize::from_str_radix(line.split(';').next()?.trim(), 16).ok()?;
            if size == 0 {
                // Trailer section ends with an empty line.
                while !read_line(stream, buf).await?.is_empty() {}
                return Some(body);
            }
            fill(stream, buf, size + 2).await?;
            body.extend_from_slice(&buf[..size]);
            buf.drain(..size + 2);
        }
    }

    let length = lower
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    fill(stream, buf, length).await?;
    Some(buf.drain(..length).collect())
}

async fn read_line(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Option<String> {
    loop {
        if let Some(end) = find(buf, b"\r\n") {
            let line = String::from_utf8_lossy(&buf[..end]).to_string();
            buf.drain(..end + 2);
            return Some(line);
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn fill(stream: &mut TcpStream, buf: &mut Vec<u8>, len: usize) -> Option<()> {
    while buf.len() < len {
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Some(())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// A `200 OK` with a fixed body and extra headers.
pub fn ok_response(body: &str, extra_headers: &[(&str, &str)]) -> Vec<u8> {
    let mut response = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n", body.len());
    for (name, value) in extra_headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str("\r\n");
    response.push_str(body);
    response.into_bytes()
}

/// Start a keep-alive mock upstream; `reply` builds the raw response bytes
/// for each captured request.
pub async fn start_upstream<F>(reply: F) -> MockUpstream
where
    F: Fn(&CapturedRequest) -> Vec<u8> + Send + Sync + 'static,
{
    start_scripted_upstream(move |mut socket, buf, request| {
        let bytes = reply(&request);
        async move {
            socket.write_all(&bytes).await.ok()?;
            Some((socket, buf))
        }
    })
    .await
}

/// Start a mock upstream whose per-request behaviour is an async script.
///
/// The script gets the socket, any bytes read past the request, and the
/// request itself; returning `None` ends the connection.
pub async fn start_scripted_upstream<F, Fut>(script: F) -> MockUpstream
where
    F: Fn(TcpStream, Vec<u8>, CapturedRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<(TcpStream, Vec<u8>)>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let closed_by_peer = Arc::new(AtomicUsize::new(0));
    let (tx, requests) = mpsc::unbounded_channel();
    let script = Arc::new(script);

    let accepted = connections.clone();
    let closed = closed_by_peer.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            accepted.fetch_add(1, Ordering::SeqCst);
            let tx = tx.clone();
            let script = script.clone();
            let closed = closed.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                loop {
                    let Some(head) = read_head(&mut socket, &mut buf).await else {
                        closed.fetch_add(1, Ordering::SeqCst);
                        return;
                    };
                    let Some(body) = read_body(&mut socket, &mut buf, &head).await else {
                        closed.fetch_add(1, Ordering::SeqCst);
                        return;
                    };
                    let request = CapturedRequest { head, body };
                    let _ = tx.send(request.clone());
                    match script(socket, buf, request).await {
                        Some((next_socket, next_buf)) => {
                            socket = next_socket;
                            buf = next_buf;
                        }
                        None => return,
                    }
                }
            });
        }
    });

    MockUpstream {
        addr,
        connections,
        closed_by_peer,
        requests,
    }
}

/// Upstream that reads the request and never answers, holding the socket
/// until the proxy closes it.
pub async fn start_silent_upstream() -> MockUpstream {
    start_scripted_upstream(|mut socket, _buf, _request| async move {
        let mut sink = [0u8; 1024];
        while let Ok(n) = socket.read(&mut sink).await {
            if n == 0 {
                break;
            }
        }
        // The next read sees EOF and counts the close.
        Some((socket, Vec::new()))
    })
    .await
}

/// Sink that keeps every event for assertions.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ForwardEvent>>,
}

impl LogSink for CollectingSink {
    fn emit(&self, event: &ForwardEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

impl CollectingSink {
    pub fn events(&self) -> Vec<ForwardEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Wait until at least `count` events arrived, then return them all.
    pub async fn wait_for(&self, count: usize) -> Vec<ForwardEvent> {
        for _ in 0..500 {
            let events = self.events();
            if events.len() >= count {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {count} forwarding events, got {:?}",
            self.events()
        );
    }
}

/// A proxy running on an ephemeral port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub engine: ForwardingEngine,
    pub sink: Arc<CollectingSink>,
    pub shutdown: Shutdown,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Config routing every path to `upstream`.
pub fn routed_config(upstream: SocketAddr) -> ProxyConfig {
    routed_config_with_prefix(upstream, "/")
}

pub fn routed_config_with_prefix(upstream: SocketAddr, prefix: &str) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.routing.mode = RoutingMode::Routes;
    config.routing.routes.push(RouteConfig {
        name: "upstream".into(),
        host: None,
        path_prefix: Some(prefix.into()),
        upstream: format!("http://{upstream}"),
        rewrite_prefix: None,
        priority: 0,
    });
    config
}

pub async fn start_proxy(config: ProxyConfig) -> TestProxy {
    let pool: Arc<dyn ConnectionPool> = Arc::new(UpstreamPool::from_config(&config.pool));
    start_proxy_with_pool(config, pool).await
}

pub async fn start_proxy_with_pool(config: ProxyConfig, pool: Arc<dyn ConnectionPool>) -> TestProxy {
    let sink = Arc::new(CollectingSink::default());
    let engine = ForwardingEngine::new(
        routing::from_config(&config.routing),
        pool,
        Timeouts::from_config(&config.timeouts),
        sink.clone(),
    );

    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = HttpServer::with_engine(config, engine.clone());
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    TestProxy {
        addr,
        engine,
        sink,
        shutdown,
    }
}

/// reqwest client that talks to the proxy directly.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Write raw bytes to `addr` and read until the server closes or goes quiet.
pub async fn raw_exchange(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    read_until_quiet(&mut stream, Duration::from_secs(5)).await
}

/// Read until EOF, an error, or `limit` without data.
pub async fn read_until_quiet(stream: &mut TcpStream, limit: Duration) -> Vec<u8> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match tokio::time::timeout(limit, stream.read(&mut chunk)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => return out,
            Ok(Ok(n)) => out.extend_from_slice(&chunk[..n]),
        }
    }
}
