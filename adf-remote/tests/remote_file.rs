//! Remote reads against an in-process HTTP server: region redirect on the
//! first HEAD, ranged GETs afterwards, cache hits on re-reads.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;

use adf_core::RemoteOptions;
use adf_remote::RemoteFile;

struct Request {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
}

impl Request {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn read_request(stream: &mut impl Read) -> Request {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    while !buf.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).unwrap();
        if n == 0 {
            break;
        }
        buf.push(byte[0]);
    }
    let text = String::from_utf8_lossy(&buf);
    let mut lines = text.lines();
    let mut first = lines.next().unwrap_or_default().split_whitespace();
    let method = first.next().unwrap_or_default().to_string();
    let path = first.next().unwrap_or_default().to_string();
    let headers = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    Request {
        method,
        path,
        headers,
    }
}

/// Serve a scripted sequence of responses, reporting each request seen.
fn mock_server(
    responses: Vec<String>,
) -> (String, mpsc::Receiver<Request>, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        for response in responses {
            let (mut stream, _) = listener.accept().unwrap();
            let req = read_request(&mut stream);
            tx.send(req).unwrap();
            stream.write_all(response.as_bytes()).unwrap();
        }
    });
    (format!("127.0.0.1:{}", addr.port()), rx, handle)
}

fn response(status: &str, headers: &[(&str, &str)], body: &[u8]) -> String {
    let mut out = format!("HTTP/1.1 {status}\r\n");
    for (k, v) in headers {
        out.push_str(&format!("{k}: {v}\r\n"));
    }
    out.push_str(&format!("content-length: {}\r\nconnection: close\r\n\r\n", body.len()));
    out.push_str(std::str::from_utf8(body).unwrap());
    out
}

#[test]
fn region_redirect_then_ranged_reads() {
    let body: Vec<u8> = (0u8..64).collect();

    let responses = vec![
        // Wrong region: redirect with the region hint, no body.
        response(
            "301 Moved Permanently",
            &[("x-amz-bucket-region", "us-west-2")],
            b"",
        ),
        // Corrected HEAD.
        response(
            "200 OK",
            &[("accept-ranges", "bytes"), ("x-amz-bucket-region", "us-west-2")],
            b"",
        )
        // HEAD answers carry the size in content-length but no body; patch
        // the auto-generated zero length.
        .replace("content-length: 0", "content-length: 64"),
        // Prefetch GET for the whole (tiny) object.
        response("206 Partial Content", &[("content-range", "bytes 0-63/64")], &body),
    ];

    let (addr, rx, handle) = mock_server(responses);

    let opts = RemoteOptions::default()
        .with_credentials("test-key", "test-secret")
        .with_endpoint(format!("http://{addr}"))
        .with_use_ssl(false)
        .with_region("us-east-1");

    let mut file = RemoteFile::open("s3://bucket/f.h5ad", &opts).unwrap();
    assert_eq!(file.len(), 64);
    assert!(file.accept_ranges());

    // First HEAD was signed for the configured region, the retry for the
    // redirected one.
    let first = rx.recv().unwrap();
    assert_eq!(first.method, "HEAD");
    assert_eq!(first.path, "/bucket/f.h5ad");
    assert!(first.header("authorization").unwrap().contains("us-east-1"));
    let second = rx.recv().unwrap();
    assert_eq!(second.method, "HEAD");
    assert!(second.header("authorization").unwrap().contains("us-west-2"));
    let third = rx.recv().unwrap();
    assert_eq!(third.method, "GET");
    assert_eq!(third.header("range"), Some("bytes=0-63"));

    // Everything is resident after the prefetch: reads are cache hits and
    // never touch the wire again.
    let mut out = [0u8; 16];
    file.read_at(8, &mut out).unwrap();
    assert_eq!(out, body[8..24]);
    file.read_at(8, &mut out).unwrap();
    let (hits, misses, resident) = file.cache_stats();
    assert!(hits >= 2);
    assert_eq!(misses, 0);
    assert_eq!(resident, 1);

    handle.join().unwrap();

    // Writes are rejected outright.
    assert!(file.write_at(0, &[1, 2, 3]).is_err());
}

#[test]
fn missing_object_surfaces_not_found() {
    let responses = vec![response("404 Not Found", &[], b"")];
    let (addr, _rx, handle) = mock_server(responses);

    let opts = RemoteOptions::default()
        .with_credentials("k", "s")
        .with_endpoint(format!("http://{addr}"))
        .with_use_ssl(false);

    let err = RemoteFile::open("s3://bucket/missing.h5ad", &opts).unwrap_err();
    assert!(matches!(err, adf_core::Error::RemoteNotFound(_)));
    handle.join().unwrap();
}

#[test]
fn forbidden_surfaces_auth_error() {
    let responses = vec![response("403 Forbidden", &[], b"")];
    let (addr, _rx, handle) = mock_server(responses);

    let opts = RemoteOptions::default()
        .with_credentials("k", "s")
        .with_endpoint(format!("http://{addr}"))
        .with_use_ssl(false);

    let err = RemoteFile::open("s3://bucket/secret.h5ad", &opts).unwrap_err();
    match err {
        adf_core::Error::RemoteAuth { status, .. } => assert_eq!(status, 403),
        other => panic!("expected RemoteAuth, got {other}"),
    }
    handle.join().unwrap();
}
