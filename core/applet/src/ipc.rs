//! Socket transport: decodes requests and forwards them to the event loop.
//!
//! Each connection carries one newline-terminated JSON request and gets one
//! JSON response. Listener threads never touch triage state; they only send
//! typed messages over the channel and wake the loop.

use fs_err as fs;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::mpsc::Sender;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crashwatch_protocol::{
    parse_connectivity, parse_crash_event, parse_notification_action, parse_notification_closed,
    ErrorInfo, Method, Request, Response, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};
use serde_json::Value;
use triage_core::{Message, TriageError};

use crate::event_loop::Waker;

const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

/// Binds the applet socket, replacing a stale one.
pub fn bind(socket_path: &Path) -> Result<UnixListener, TriageError> {
    let transport_err = |err: std::io::Error| TriageError::Transport(err.to_string());

    if let Some(parent) = socket_path.parent() {
        fs::create_dir_all(parent).map_err(transport_err)?;
    }
    if socket_path.exists() {
        fs::remove_file(socket_path).map_err(transport_err)?;
    }
    UnixListener::bind(socket_path).map_err(transport_err)
}

/// Accept loop; runs on its own thread for the life of the process.
pub fn serve(listener: UnixListener, tx: Sender<Message>, waker: Waker) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let tx = tx.clone();
                let waker = waker.clone();
                thread::spawn(move || handle_connection(stream, tx, waker));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept applet connection");
            }
        }
    }
}

fn handle_connection(mut stream: UnixStream, tx: Sender<Message>, waker: Waker) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    debug!(method = ?request.method, id = ?request.id, "Applet request received");
    let response = match handle_request(request) {
        Ok((id, Some(message))) => {
            if tx.send(message).is_err() {
                Response::error(id, "shutting_down", "applet is shutting down")
            } else {
                waker.wake();
                Response::ok(id, serde_json::json!({ "accepted": true }))
            }
        }
        Ok((id, None)) => Response::ok(id, health()),
        Err(response) => response,
    };
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

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
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

/// Validates a request and turns it into a loop message.
///
/// `Ok((id, None))` is a health check, answered without involving the loop.
fn handle_request(request: Request) -> Result<(Option<String>, Option<Message>), Response> {
    let id = request.id;
    if request.protocol_version != PROTOCOL_VERSION {
        return Err(Response::error(
            id,
            "protocol_mismatch",
            "unsupported protocol version",
        ));
    }

    let message = match request.method {
        Method::GetHealth => return Ok((id, None)),
        Method::Crash => {
            let event = require_params(&id, request.params, "crash event")
                .and_then(|params| parse_crash_event(params).map_err(|err| error(&id, err)))?;
            info!(
                dir = %event.directory_path,
                component = %event.component_name,
                uid = %event.uid,
                "Received crash event"
            );
            Message::CrashEvent(event)
        }
        Method::Connectivity => {
            let change = require_params(&id, request.params, "connectivity state")
                .and_then(|params| parse_connectivity(params).map_err(|err| error(&id, err)))?;
            Message::ConnectivityChanged(change)
        }
        Method::NotificationAction => {
            let action = require_params(&id, request.params, "notification action")
                .and_then(|params| {
                    parse_notification_action(params).map_err(|err| error(&id, err))
                })?;
            Message::UserAction(action)
        }
        Method::NotificationClosed => {
            let closed = require_params(&id, request.params, "notification id")
                .and_then(|params| {
                    parse_notification_closed(params).map_err(|err| error(&id, err))
                })?;
            Message::NotificationClosed(closed)
        }
    };

    Ok((id, Some(message)))
}

fn require_params(id: &Option<String>, params: Option<Value>, what: &str) -> Result<Value, Response> {
    params.ok_or_else(|| Response::error(id.clone(), "invalid_params", format!("{} is required", what)))
}

fn error(id: &Option<String>, err: ErrorInfo) -> Response {
    Response::error_with_info(id.clone(), err)
}

fn health() -> Value {
    serde_json::json!({
        "status": "ok",
        "pid": std::process::id(),
        "version": env!("CARGO_PKG_VERSION"),
        "protocol_version": PROTOCOL_VERSION,
    })
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crashwatch_protocol::NotificationActionKind;

    fn request(method: Method, params: Option<Value>) -> Request {
        Request {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: Some("req-1".to_string()),
            params,
        }
    }

    #[test]
    fn health_is_answered_locally() {
        let result = handle_request(request(Method::GetHealth, None));
        assert!(matches!(result, Ok((Some(_), None))));
    }

    #[test]
    fn protocol_mismatch_is_rejected() {
        let mut req = request(Method::GetHealth, None);
        req.protocol_version = PROTOCOL_VERSION + 1;
        let response = handle_request(req).expect_err("mismatch");
        assert_eq!(
            response.error.map(|err| err.code),
            Some("protocol_mismatch".to_string())
        );
    }

    #[test]
    fn crash_requires_params() {
        let response = handle_request(request(Method::Crash, None)).expect_err("missing params");
        assert_eq!(response.id.as_deref(), Some("req-1"));
        assert_eq!(
            response.error.map(|err| err.code),
            Some("invalid_params".to_string())
        );
    }

    #[test]
    fn crash_becomes_message() {
        let params = serde_json::json!({
            "component_name": "gedit",
            "directory_path": "/var/spool/abrt/ccpp-1",
            "uid": "1000",
        });
        let (_, message) = handle_request(request(Method::Crash, Some(params))).expect("crash");
        match message {
            Some(Message::CrashEvent(event)) => {
                assert_eq!(event.directory_path, "/var/spool/abrt/ccpp-1");
                assert_eq!(event.dedup_hash, "");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn relative_crash_dir_is_rejected() {
        let params = serde_json::json!({ "directory_path": "spool/ccpp-1" });
        assert!(handle_request(request(Method::Crash, Some(params))).is_err());
    }

    #[test]
    fn notification_action_becomes_message() {
        let params = serde_json::json!({ "notification_id": 3, "action": "restart" });
        let (_, message) =
            handle_request(request(Method::NotificationAction, Some(params))).expect("action");
        match message {
            Some(Message::UserAction(action)) => {
                assert_eq!(action.notification_id, 3);
                assert_eq!(action.action, NotificationActionKind::Restart);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
