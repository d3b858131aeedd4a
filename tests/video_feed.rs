use anyhow::Result;
use image::{Rgb, RgbImage};
use serde_json::Value;
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mjpeg_relay::{
    encode_jpeg, ApiConfig, ApiHandle, ApiServer, DetectionState, Frame, LatestFrameStore,
    MjpegExtractor,
};

struct TestApi {
    store: Arc<LatestFrameStore>,
    detection: Arc<DetectionState>,
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new() -> Result<Self> {
        let store = Arc::new(LatestFrameStore::new());
        let detection = Arc::new(DetectionState::new());
        let api_config = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            target_fps: 50,
            empty_retry: Duration::from_millis(5),
            write_timeout: Duration::from_secs(2),
        };
        let api_handle = ApiServer::new(api_config, store.clone(), detection.clone()).spawn()?;
        Ok(Self {
            store,
            detection,
            api_handle: Some(api_handle),
        })
    }

    fn handle(&self) -> &ApiHandle {
        self.api_handle
            .as_ref()
            .expect("test API handle should be initialized")
    }

    fn connect(&self, path: &str) -> Result<TcpStream> {
        let mut stream = TcpStream::connect(self.handle().addr)?;
        stream.set_read_timeout(Some(Duration::from_secs(2)))?;
        let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path);
        stream.write_all(request.as_bytes())?;
        Ok(stream)
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            handle.stop().expect("failed to stop API server");
        }
    }
}

fn jpeg(value: u8) -> Vec<u8> {
    encode_jpeg(&RgbImage::from_pixel(8, 8, Rgb([value, 0, 255 - value])), 90).unwrap()
}

fn read_response(stream: &mut TcpStream) -> Result<(String, Vec<u8>)> {
    let mut response = Vec::new();
    stream.read_to_end(&mut response)?;
    let split = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
        .unwrap_or(response.len());
    let headers = String::from_utf8_lossy(&response[..split]).to_string();
    Ok((headers, response[split..].to_vec()))
}

/// Read the status line and headers of a streaming response.
fn read_stream_headers(stream: &mut TcpStream) -> Result<String> {
    let mut data = Vec::new();
    let mut byte = [0u8; 1];
    while !data.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte)?;
        data.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&data).to_string())
}

fn read_frames(stream: &mut TcpStream, extractor: &mut MjpegExtractor, n: usize) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        while let Some(frame) = extractor.next_frame() {
            frames.push(frame);
            if frames.len() == n {
                return frames;
            }
        }
        let read = stream.read(&mut buf).expect("read video feed");
        assert!(read > 0, "video feed closed");
        if let Some(frame) = extractor.push(&buf[..read]) {
            frames.push(frame);
            if frames.len() == n {
                return frames;
            }
        }
    }
}

#[test]
fn video_feed_waits_for_first_frame_then_streams_it() -> Result<()> {
    let api = TestApi::new()?;
    let mut stream = api.connect("/video_feed")?;

    let headers = read_stream_headers(&mut stream)?;
    assert!(headers.starts_with("HTTP/1.1 200 OK"));
    assert!(headers.contains("Content-Type: multipart/x-mixed-replace; boundary=frame"));

    // Nothing is emitted while the store is empty.
    stream.set_read_timeout(Some(Duration::from_millis(200)))?;
    let mut early = [0u8; 64];
    match stream.read(&mut early) {
        Err(err) => assert!(matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)),
        Ok(n) => panic!("unexpected {} bytes before the first frame", n),
    }

    let frame = jpeg(10);
    api.store.write(Frame::new(frame.clone(), 1));

    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut part_header = vec![0u8; "--frame\r\nContent-Type: image/jpeg\r\n\r\n".len()];
    stream.read_exact(&mut part_header)?;
    assert_eq!(part_header, b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
    let mut body = vec![0u8; frame.len() + 2];
    stream.read_exact(&mut body)?;
    assert_eq!(&body[..frame.len()], frame.as_slice());
    assert_eq!(&body[frame.len()..], b"\r\n");

    Ok(())
}

#[test]
fn video_feed_follows_store_updates() -> Result<()> {
    let api = TestApi::new()?;
    let first = jpeg(20);
    let second = jpeg(200);
    api.store.write(Frame::new(first.clone(), 1));

    let mut stream = api.connect("/video_feed")?;
    let mut extractor = MjpegExtractor::new();
    let frames = read_frames(&mut stream, &mut extractor, 2);
    assert!(frames.iter().all(|f| *f == first), "stale frame is re-served");

    api.store.write(Frame::new(second.clone(), 2));
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let frame = read_frames(&mut stream, &mut extractor, 1).remove(0);
        if frame == second {
            break;
        }
        assert!(Instant::now() < deadline, "new frame never served");
    }
    Ok(())
}

#[test]
fn disconnecting_one_client_does_not_affect_another() -> Result<()> {
    let api = TestApi::new()?;
    let frame = jpeg(99);
    api.store.write(Frame::new(frame.clone(), 1));

    let mut first = api.connect("/video_feed")?;
    let mut second = api.connect("/video_feed")?;
    let mut first_extractor = MjpegExtractor::new();
    let mut second_extractor = MjpegExtractor::new();

    assert_eq!(read_frames(&mut first, &mut first_extractor, 2).len(), 2);
    assert_eq!(read_frames(&mut second, &mut second_extractor, 2).len(), 2);

    drop(first);

    let started = Instant::now();
    let frames = read_frames(&mut second, &mut second_extractor, 10);
    assert!(frames.iter().all(|f| *f == frame));
    // 10 parts at 50 fps take about 200ms.
    assert!(started.elapsed() < Duration::from_secs(2));
    Ok(())
}

#[test]
fn clients_leaving_before_first_frame_release_their_threads() -> Result<()> {
    let api = TestApi::new()?;

    for _ in 0..5 {
        let mut stream = api.connect("/video_feed")?;
        let headers = read_stream_headers(&mut stream)?;
        assert!(headers.starts_with("HTTP/1.1 200 OK"));
    }
    // Every stream above is already dropped; the store is still empty.
    let deadline = Instant::now() + Duration::from_secs(2);
    while api.handle().active_clients() > 0 {
        assert!(
            Instant::now() < deadline,
            "{} client threads still waiting on closed connections",
            api.handle().active_clients()
        );
        std::thread::sleep(Duration::from_millis(10));
    }

    // A client that stays connected is still served once a frame exists.
    let mut stream = api.connect("/video_feed")?;
    read_stream_headers(&mut stream)?;
    let frame = jpeg(42);
    api.store.write(Frame::new(frame.clone(), 1));
    let mut extractor = MjpegExtractor::new();
    assert_eq!(read_frames(&mut stream, &mut extractor, 1), vec![frame]);
    assert_eq!(api.handle().active_clients(), 1);
    Ok(())
}

#[test]
fn detect_human_reports_state() -> Result<()> {
    let api = TestApi::new()?;

    let mut stream = api.connect("/detect_human/")?;
    let (headers, body) = read_response(&mut stream)?;
    assert!(headers.starts_with("HTTP/1.1 200 OK"));
    assert!(headers.contains("Content-Type: application/json"));
    let value: Value = serde_json::from_slice(&body)?;
    assert_eq!(value, serde_json::json!({ "human_detected": false }));

    api.detection.record(true);
    let mut stream = api.connect("/detect_human")?;
    let (_headers, body) = read_response(&mut stream)?;
    let value: Value = serde_json::from_slice(&body)?;
    assert_eq!(value["human_detected"], Value::Bool(true));
    Ok(())
}

#[test]
fn frame_snapshot_and_errors() -> Result<()> {
    let api = TestApi::new()?;

    let mut stream = api.connect("/frame.jpg")?;
    let (headers, body) = read_response(&mut stream)?;
    assert!(headers.starts_with("HTTP/1.1 204 No Content"));
    assert!(body.is_empty());

    let frame = jpeg(5);
    api.store.write(Frame::new(frame.clone(), 1));
    let mut stream = api.connect("/frame.jpg")?;
    let (headers, body) = read_response(&mut stream)?;
    assert!(headers.contains("Content-Type: image/jpeg"));
    assert_eq!(body, frame);

    let mut stream = api.connect("/rover/control")?;
    let (headers, _body) = read_response(&mut stream)?;
    assert!(headers.starts_with("HTTP/1.1 404 Not Found"));

    let mut stream = TcpStream::connect(api.handle().addr)?;
    stream.write_all(b"POST /video_feed HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    let (headers, _body) = read_response(&mut stream)?;
    assert!(headers.starts_with("HTTP/1.1 405 Method Not Allowed"));

    let mut stream = api.connect("/health")?;
    let (headers, body) = read_response(&mut stream)?;
    assert!(headers.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(body, br#"{"status":"ok"}"#);
    Ok(())
}
