//! raidclock background daemon.
//!
//! The single writer for session time and per-map statistics. It listens on a
//! Unix socket for host signals and bus deliveries, drives the game lifecycle,
//! and answers tracker windows with broadcasts over the cross-window bus.

use fs_err as fs;
use std::env;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use raidclock_core::config::{load_config, AppConfig};
use raidclock_core::ipc;
use raidclock_core::kv::SqliteKvStore;
use raidclock_core::storage::StorageConfig;
use raidclock_protocol::{parse_host_signal, Method, Request, Response, PROTOCOL_VERSION};
use serde_json::{json, Value};

mod host_client;
mod state;

use state::SharedState;

fn main() {
    init_logging();

    let storage = match StorageConfig::from_home() {
        Ok(storage) => storage,
        Err(err) => {
            error!(error = %err, "Failed to resolve raidclock directory");
            std::process::exit(1);
        }
    };

    let socket_path = storage.daemon_socket();
    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(path = %socket_path.display(), "raidclock daemon started");

    let config = match load_config(&storage.config_file()) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load config; using defaults");
            AppConfig::default()
        }
    };

    let store = match SqliteKvStore::new(storage.database_file()) {
        Ok(store) => store,
        Err(err) => {
            error!(error = %err, "Failed to initialize daemon database");
            std::process::exit(1);
        }
    };

    let shared_state = Arc::new(SharedState::new(config, &storage, Arc::new(store)));
    info!(
        tracked_maps = shared_state.tracked_maps(),
        host_socket = %storage.host_socket().display(),
        "Background ready"
    );

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&shared_state);
                thread::spawn(|| handle_connection(stream, state));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn init_logging() {
    let debug_enabled = env::var("RAIDCLOCK_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(stream: UnixStream, state: Arc<SharedState>) {
    ipc::serve_connection(stream, |request| {
        debug!(method = ?request.method, id = ?request.id, "Daemon request received");
        handle_request(request, &state)
    });
}

fn handle_request(request: Request, state: &SharedState) -> Response {
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
            json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
                "started_at": state.started_at(),
            }),
        ),
        Method::HostSignal => {
            let params = match request.params {
                Some(params) => params,
                None => {
                    return Response::error(request.id, "invalid_params", "signal is required")
                }
            };
            let signal = match parse_host_signal(params) {
                Ok(signal) => signal,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            state.handle_host_signal(signal);
            Response::ok(request.id, json!({ "accepted": true }))
        }
        Method::Deliver => {
            let message = request
                .params
                .as_ref()
                .and_then(|params| params.get("message"))
                .and_then(Value::as_str);
            match message {
                Some(message) => Response::ok(request.id, state.deliver(message)),
                None => Response::error(request.id, "invalid_params", "message is required"),
            }
        }
        Method::GetGameTime => serialize(request.id, "game time", &state.game_time()),
        Method::GetCoordinatorState => {
            serialize(request.id, "coordinator state", &state.coordinator_snapshot())
        }
        Method::HostCommand => Response::error(
            request.id,
            "unsupported_method",
            "host commands are served by the host adapter",
        ),
    }
}

fn serialize<T: serde::Serialize>(id: Option<String>, what: &str, value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(value) => Response::ok(id, value),
        Err(err) => Response::error(
            id,
            "serialization_error",
            format!("Failed to serialize {}: {}", what, err),
        ),
    }
}
