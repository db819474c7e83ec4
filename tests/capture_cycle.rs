//! End-to-end capture scenarios: save-only, upload accepted, upload failing.
//!
//! These drive the session loop against the stub live feed, with a minimal
//! in-test HTTP endpoint standing in for the upload service.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::thread::JoinHandle;

use framegrab::config::{StillSettings, UploadSettings};
use framegrab::pipeline::Pipeline;
use framegrab::session;
use framegrab::source::{FrameSource, LiveFeedEngine, StillCameraSource};
use framegrab::upload::Uploader;

fn saved_captures(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("read save dir")
        .map(|entry| entry.expect("dir entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn upload_settings(addr: SocketAddr) -> UploadSettings {
    UploadSettings {
        url: format!("http://{}/captures", addr),
        image_field: "image_file".to_string(),
        metadata: BTreeMap::from([("product_name".to_string(), "widget-a".to_string())]),
        headers: BTreeMap::from([("x-api-key".to_string(), "secret".to_string())]),
    }
}

/// Accept one connection, read the full request, answer with a canned
/// response, and hand the raw request bytes back for assertions.
fn spawn_one_shot_endpoint(status_line: &'static str, body: &'static str) -> (SocketAddr, JoinHandle<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind endpoint");
    let addr = listener.local_addr().expect("local addr");
    let handle = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let request = read_http_request(&mut stream);
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status_line,
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).expect("write response");
        stream.flush().ok();
        request
    });
    (addr, handle)
}

fn read_http_request(stream: &mut TcpStream) -> Vec<u8> {
    let mut request = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = find(&request, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).expect("read request");
        assert!(n > 0, "connection closed before headers completed");
        request.extend_from_slice(&chunk[..n]);
    };

    let headers = String::from_utf8_lossy(&request[..header_end]).to_lowercase();
    let content_length = headers.lines().find_map(|line| {
        let rest = line.strip_prefix("content-length:")?;
        rest.trim().parse::<usize>().ok()
    });

    match content_length {
        Some(len) => {
            while request.len() < header_end + len {
                let n = stream.read(&mut chunk).expect("read body");
                assert!(n > 0, "connection closed before body completed");
                request.extend_from_slice(&chunk[..n]);
            }
        }
        None => {
            // Chunked body: read until the terminating zero-size chunk.
            while find(&request, b"\r\n0\r\n\r\n").is_none() {
                let n = stream.read(&mut chunk).expect("read chunked body");
                assert!(n > 0, "connection closed before chunked body completed");
                request.extend_from_slice(&chunk[..n]);
            }
        }
    }
    request
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[test]
fn capture_saves_locally_and_skips_upload_without_endpoint() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pipeline = Pipeline::new(dir.path().to_path_buf(), None);
    let mut source = LiveFeedEngine::new("stub://bench-a");
    source.connect().expect("connect");

    let mut out = Vec::new();
    session::run(&mut source, &pipeline, Cursor::new("c\nx\n"), &mut out).expect("session");
    source.disconnect();

    let names = saved_captures(dir.path());
    assert_eq!(names.len(), 1, "expected exactly one capture, got {:?}", names);
    assert!(names[0].starts_with("capture_"));
    assert!(names[0].ends_with(".webp"));

    let text = String::from_utf8(out).expect("utf8");
    assert!(text.contains("Saved "));
    assert!(!text.contains("Upload"));
}

#[test]
fn capture_uploads_and_reports_the_accepted_status() {
    let (addr, endpoint) = spawn_one_shot_endpoint("201 Created", r#"{"id":"cap-42"}"#);

    let dir = tempfile::tempdir().expect("tempdir");
    let uploader = Uploader::new(upload_settings(addr)).expect("uploader");
    let pipeline = Pipeline::new(dir.path().to_path_buf(), Some(uploader));
    let mut source = StillCameraSource::new(StillSettings {
        width: 8,
        height: 8,
        ..StillSettings::default()
    });
    source.connect().expect("connect");

    let mut out = Vec::new();
    session::run(&mut source, &pipeline, Cursor::new("c\nx\n"), &mut out).expect("session");
    source.disconnect();

    assert_eq!(saved_captures(dir.path()).len(), 1);
    let text = String::from_utf8(out).expect("utf8");
    assert!(text.contains("Uploaded (status 201)"), "output was: {}", text);

    let request = endpoint.join().expect("endpoint thread");
    let request_text = String::from_utf8_lossy(&request);
    assert!(request_text.starts_with("POST /captures"));
    assert!(request_text.to_lowercase().contains("x-api-key: secret"));
    assert!(request_text.contains(r#"name="image_file""#));
    assert!(request_text.contains("Content-Type: image/webp"));
    assert!(request_text.contains(r#"name="product_name""#));
    assert!(request_text.contains("widget-a"));
}

#[test]
fn upload_failure_still_saves_and_the_session_continues() {
    // Bind and immediately drop a listener so the port refuses connections.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("local addr")
    };

    let dir = tempfile::tempdir().expect("tempdir");
    let uploader = Uploader::new(upload_settings(addr)).expect("uploader");
    let pipeline = Pipeline::new(dir.path().to_path_buf(), Some(uploader));
    let mut source = LiveFeedEngine::new("stub://bench-c");
    source.connect().expect("connect");

    let mut out = Vec::new();
    session::run(&mut source, &pipeline, Cursor::new("c\nc\nx\n"), &mut out).expect("session");
    source.disconnect();

    // Saves happened despite the failing endpoint. Both cycles can land in
    // the same timestamped filename, so only presence is asserted.
    assert!(!saved_captures(dir.path()).is_empty());
    let text = String::from_utf8(out).expect("utf8");
    assert_eq!(text.matches("Upload failed").count(), 2);
    assert_eq!(text.matches("Cycle time").count(), 2);
}
