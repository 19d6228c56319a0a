//! Streaming and pipelining behaviour.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Notify};

use forward_proxy::ForwardingOutcome;

mod common;

fn request_path(request: &common::CapturedRequest) -> String {
    request
        .request_line()
        .split_whitespace()
        .nth(1)
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn test_pipelined_requests_answered_in_order() {
    let upstream = common::start_upstream(|req| {
        let path = request_path(req);
        common::ok_response(&format!("body-for-{path}"), &[])
    })
    .await;
    let proxy = common::start_proxy(common::routed_config(upstream.addr)).await;

    let response = common::raw_exchange(
        proxy.addr,
        b"GET /one HTTP/1.1\r\nHost: a\r\n\r\n\
          GET /two HTTP/1.1\r\nHost: a\r\nConnection: close\r\n\r\n",
    )
    .await;
    let text = String::from_utf8_lossy(&response);

    let first = text.find("body-for-/one").expect("first response missing");
    let second = text.find("body-for-/two").expect("second response missing");
    assert!(first < second, "{text}");
    assert_eq!(text.matches("HTTP/1.1 200 OK").count(), 2);

    let events = proxy.sink.wait_for(2).await;
    assert!(events.iter().all(|e| e.outcome.is_success()));
}

#[tokio::test]
async fn test_download_streams_before_upstream_finishes() {
    let gate = Arc::new(Notify::new());
    let release = gate.clone();
    let upstream = common::start_scripted_upstream(move |mut socket, buf, _req| {
        let gate = gate.clone();
        async move {
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nfirst\r\n")
                .await
                .ok()?;
            gate.notified().await;
            socket.write_all(b"4\r\nlast\r\n0\r\n\r\n").await.ok()?;
            Some((socket, buf))
        }
    })
    .await;
    let proxy = common::start_proxy(common::routed_config(upstream.addr)).await;

    let mut res = common::client()
        .get(proxy.url("/stream"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let first = tokio::time::timeout(Duration::from_secs(2), res.chunk())
        .await
        .expect("first chunk was held back")
        .unwrap()
        .unwrap();
    assert_eq!(&first[..], b"first");

    release.notify_one();
    let mut rest = Vec::new();
    while let Some(chunk) = res.chunk().await.unwrap() {
        rest.extend_from_slice(&chunk);
    }
    assert_eq!(rest, b"last");

    let events = proxy.sink.wait_for(1).await;
    assert_eq!(
        events[0].outcome,
        ForwardingOutcome::Success {
            status: axum::http::StatusCode::OK,
            bytes_relayed: 9
        }
    );
}

#[tokio::test]
async fn test_upload_streams_before_client_finishes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = listener.local_addr().unwrap();
    let (saw_first, first_seen) = oneshot::channel::<String>();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let head = common::read_head(&mut socket, &mut buf).await.unwrap();

        let mut chunk = [0u8; 1024];
        while !contains(&buf, b"first-chunk") {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "proxy closed before forwarding the first chunk");
            buf.extend_from_slice(&chunk[..n]);
        }
        let _ = saw_first.send(head);

        while !contains(&buf, b"0\r\n\r\n") {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0);
            buf.extend_from_slice(&chunk[..n]);
        }
        assert!(contains(&buf, b"last-chunk"));
        socket
            .write_all(&common::ok_response("done", &[]))
            .await
            .unwrap();
    });

    let proxy = common::start_proxy(common::routed_config(upstream_addr)).await;
    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client
        .write_all(
            b"POST /upload HTTP/1.1\r\n\
              Host: a\r\n\
              Transfer-Encoding: chunked\r\n\
              Connection: close\r\n\
              \r\n\
              b\r\nfirst-chunk\r\n",
        )
        .await
        .unwrap();

    let head = tokio::time::timeout(Duration::from_secs(2), first_seen)
        .await
        .expect("upstream did not see the first chunk while the upload was open")
        .unwrap();
    assert!(head
        .to_ascii_lowercase()
        .contains("transfer-encoding: chunked"));

    client
        .write_all(b"a\r\nlast-chunk\r\n0\r\n\r\n")
        .await
        .unwrap();
    let response = common::read_until_quiet(&mut client, Duration::from_secs(5)).await;
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 200 OK"), "{text}");
    assert!(text.ends_with("done"));

    let events = proxy.sink.wait_for(1).await;
    assert!(events[0].outcome.is_success());
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[tokio::test]
async fn test_stalled_upstream_bounds_buffered_upload() {
    const OFFERED: usize = 256 * 1024 * 1024;
    const CHUNK: usize = 64 * 1024;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = listener.local_addr().unwrap();
    let (release, released) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        common::read_head(&mut socket, &mut buf).await.unwrap();
        // Stop reading; hold the socket until the test is done.
        let _ = released.await;
        drop(socket);
    });

    let mut config = common::routed_config(upstream_addr);
    config.timeouts.idle_ms = 60_000;
    config.timeouts.exchange_ms = 120_000;
    let proxy = common::start_proxy(config).await;

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client
        .write_all(b"POST /sink HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: chunked\r\n\r\n")
        .await
        .unwrap();

    let mut frame = format!("{CHUNK:x}\r\n").into_bytes();
    frame.extend(std::iter::repeat(b'x').take(CHUNK));
    frame.extend_from_slice(b"\r\n");

    let mut accepted = 0usize;
    while accepted < OFFERED {
        match tokio::time::timeout(Duration::from_secs(1), client.write_all(&frame)).await {
            Ok(Ok(())) => accepted += CHUNK,
            Ok(Err(e)) => panic!("proxy dropped the upload: {e}"),
            Err(_) => break,
        }
    }

    // Only socket buffers along the path hold data; nothing grows with the
    // amount the client offers.
    assert!(
        accepted < OFFERED / 4,
        "proxy accepted {accepted} bytes from a stalled exchange"
    );
    assert!(proxy.sink.events().is_empty());
    let _ = release.send(());
}
