//! Window endpoint: accepts bus deliveries on `windows/<name>.sock`.

use crate::daemon_client::DaemonClient;
use crate::view::WindowView;
use fs_err as fs;
use raidclock_core::bus::{CrossWindowBus, DispatchOutcome};
use raidclock_core::clock::SystemClock;
use raidclock_core::ipc::{self, SocketTransport};
use raidclock_core::storage::StorageConfig;
use raidclock_protocol::{
    MessageType, Method, Request, Response, StatsRange, WindowName, PROTOCOL_VERSION,
};
use serde_json::{json, Value};
use std::os::unix::net::UnixListener;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

pub fn run(storage: &StorageConfig, window: WindowName) -> Result<(), String> {
    let socket_path = storage.window_socket(window);
    prepare_socket(&socket_path)?;
    let listener = UnixListener::bind(&socket_path)
        .map_err(|err| format!("Failed to bind {}: {}", socket_path.display(), err))?;

    let bus = Arc::new(CrossWindowBus::new(
        window,
        Arc::new(SocketTransport::new(storage.clone())),
        Arc::new(SystemClock),
    ));
    let daemon = DaemonClient::new(storage);
    let view = WindowView::new(window, Box::new(move || daemon.game_time()));
    view.attach(&bus);

    info!(window = window.as_str(), path = %socket_path.display(), "Tracker window listening");

    // The background answers by delivering back to this socket, so the
    // request must not block the accept loop.
    let opener = Arc::clone(&bus);
    thread::spawn(move || {
        let sent = opener.send(
            WindowName::Background,
            MessageType::OverviewRequest,
            Some(json!({ "range": StatsRange::All })),
        );
        if !sent {
            warn!("Background did not accept the initial overview request");
        }
    });

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let bus = Arc::clone(&bus);
                thread::spawn(move || {
                    ipc::serve_connection(stream, |request| handle_request(request, window, &bus))
                });
            }
            Err(err) => warn!(error = %err, "Failed to accept window connection"),
        }
    }
    Ok(())
}

fn prepare_socket(path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| format!("Failed to create socket directory: {}", err))?;
    }
    if path.exists() {
        fs::remove_file(path).map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

pub fn handle_request(request: Request, window: WindowName, bus: &CrossWindowBus) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    match request.method {
        Method::GetHealth => Response::ok(
            request.id,
            json!({ "status": "ok", "window": window.as_str(), "pid": std::process::id() }),
        ),
        Method::Deliver => {
            let Some(message) = request
                .params
                .as_ref()
                .and_then(|params| params.get("message"))
                .and_then(Value::as_str)
            else {
                return Response::error(request.id, "invalid_params", "message is required");
            };
            let outcome = bus.receive(message);
            debug!(window = window.as_str(), outcome = ?outcome, "Delivery handled");
            Response::ok(
                request.id,
                json!({ "delivered": matches!(outcome, DispatchOutcome::Delivered { .. }) }),
            )
        }
        other => Response::error(
            request.id,
            "unsupported_method",
            format!("{:?} is not served by tracker windows", other),
        ),
    }
}
