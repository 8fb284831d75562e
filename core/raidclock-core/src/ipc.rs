//! Newline-framed JSON over Unix domain sockets.
//!
//! Every process speaks the same framing: one JSON `Request` terminated by
//! `\n`, answered by one JSON `Response` terminated by `\n`, then the
//! connection closes. Payloads larger than [`MAX_REQUEST_BYTES`] are rejected.

use crate::bus::Transport;
use crate::error::{CoreError, Result};
use crate::storage::StorageConfig;
use raidclock_protocol::{ErrorInfo, Method, Request, Response, WindowName, MAX_REQUEST_BYTES};
use serde_json::json;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

const READ_CHUNK_SIZE: usize = 4096;
pub const READ_TIMEOUT: Duration = Duration::from_secs(2);
pub const CLIENT_TIMEOUT: Duration = Duration::from_millis(800);

fn read_frame(stream: &mut UnixStream) -> std::result::Result<Vec<u8>, ErrorInfo> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "payload exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Err(ErrorInfo::new("read_timeout", "timed out waiting for payload"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read payload: {}", err),
                ));
            }
        }
    }

    let frame = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => {
            if buffer[index + 1..].iter().any(|b| !b.is_ascii_whitespace()) {
                warn!("Extra bytes detected after newline; ignoring trailing data");
            }
            buffer.truncate(index);
            buffer
        }
        None => buffer,
    };

    if frame.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "payload was empty"));
    }
    Ok(frame)
}

pub fn read_request(stream: &mut UnixStream) -> std::result::Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(READ_TIMEOUT));
    let frame = read_frame(stream)?;
    serde_json::from_slice(&frame).map_err(|err| {
        ErrorInfo::new("invalid_json", format!("request is not valid JSON: {}", err))
    })
}

pub fn read_response(stream: &mut UnixStream) -> std::result::Result<Response, ErrorInfo> {
    let frame = read_frame(stream)?;
    serde_json::from_slice(&frame).map_err(|err| {
        ErrorInfo::new("invalid_json", format!("response is not valid JSON: {}", err))
    })
}

pub fn write_response(stream: &mut UnixStream, response: &Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, response)?;
    stream.write_all(b"\n")?;
    stream.flush()
}

/// Reads one request, answers it with `handler`, and writes the response.
pub fn serve_connection<F>(mut stream: UnixStream, handler: F)
where
    F: FnOnce(Request) -> Response,
{
    let response = match read_request(&mut stream) {
        Ok(request) => handler(request),
        Err(err) => Response::error_with_info(None, err),
    };
    if let Err(err) = write_response(&mut stream, &response) {
        warn!(error = %err, "Failed to write response");
    }
}

/// One request/response round trip against the socket at `path`.
pub fn send_request(path: &Path, request: &Request, timeout: Duration) -> Result<Response> {
    let mut stream = UnixStream::connect(path).map_err(|err| {
        CoreError::Ipc(format!("failed to connect to {}: {}", path.display(), err))
    })?;
    let _ = stream.set_read_timeout(Some(timeout));
    let _ = stream.set_write_timeout(Some(timeout));

    serde_json::to_writer(&mut stream, request)
        .map_err(|err| CoreError::Ipc(format!("failed to write request: {}", err)))?;
    stream
        .write_all(b"\n")
        .map_err(|err| CoreError::Ipc(format!("failed to flush request: {}", err)))?;
    stream.flush().ok();

    read_response(&mut stream).map_err(|err| CoreError::Ipc(err.to_string()))
}

/// Bus transport that hands each message to the target window's socket.
pub struct SocketTransport {
    storage: StorageConfig,
    timeout: Duration,
}

impl SocketTransport {
    pub fn new(storage: StorageConfig) -> Self {
        Self {
            storage,
            timeout: CLIENT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn socket_for(&self, target: WindowName) -> PathBuf {
        self.storage.window_socket(target)
    }
}

impl Transport for SocketTransport {
    fn deliver(&self, target: WindowName, payload: &str) -> std::result::Result<(), String> {
        let path = self.socket_for(target);
        let request = Request::new(Method::Deliver, None, Some(json!({ "message": payload })));
        let response = send_request(&path, &request, self.timeout).map_err(String::from)?;
        response
            .into_result()
            .map(|_| ())
            .map_err(|err| err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use std::thread;

    #[test]
    fn round_trips_request_and_response() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("echo.sock");
        let listener = UnixListener::bind(&path).expect("bind");

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            serve_connection(stream, |request| {
                Response::ok(request.id, json!({ "method": format!("{:?}", request.method) }))
            });
        });

        let request = Request::new(Method::GetHealth, Some("1".to_string()), None);
        let response = send_request(&path, &request, Duration::from_secs(2)).expect("response");
        server.join().expect("server");

        assert!(response.ok);
        assert_eq!(response.id.as_deref(), Some("1"));
        assert_eq!(response.data, Some(json!({ "method": "GetHealth" })));
    }

    #[test]
    fn rejects_invalid_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.sock");
        let listener = UnixListener::bind(&path).expect("bind");

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            serve_connection(stream, |request| Response::ok(request.id, json!(null)));
        });

        let mut client = UnixStream::connect(&path).expect("connect");
        client.write_all(b"{not json\n").expect("write");
        let response = read_response(&mut client).expect("response");
        server.join().expect("server");

        assert!(!response.ok);
        assert_eq!(response.error.map(|err| err.code), Some("invalid_json".to_string()));
    }

    #[test]
    fn socket_transport_reports_missing_window() {
        let dir = tempfile::tempdir().expect("tempdir");
        let transport = SocketTransport::new(StorageConfig::with_root(dir.path().to_path_buf()));
        assert!(transport.deliver(WindowName::Desktop, "{}").is_err());
    }
}
