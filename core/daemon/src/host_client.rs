//! Client for the host adapter socket.
//!
//! The host adapter owns windows, telemetry and hotkeys. The daemon reaches
//! it with `host_command` requests; each call is one connection.

use raidclock_core::error::{CoreError, Result};
use raidclock_core::host::{ShowOptions, TelemetryHost, WindowManager};
use raidclock_core::ipc;
use raidclock_protocol::{FeatureReply, HostCommand, Method, Request, WindowName};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

const HOST_TIMEOUT: Duration = Duration::from_secs(2);

pub struct HostClient {
    socket: PathBuf,
    timeout: Duration,
}

impl HostClient {
    pub fn new(socket: PathBuf) -> Self {
        Self {
            socket,
            timeout: HOST_TIMEOUT,
        }
    }

    fn call(&self, command: &HostCommand) -> Result<Option<Value>> {
        let params = serde_json::to_value(command)
            .map_err(|err| CoreError::json("Failed to serialize host command", err))?;
        let request = Request::new(Method::HostCommand, None, Some(params));
        let response = ipc::send_request(&self.socket, &request, self.timeout)?;
        response.into_result().map_err(CoreError::Remote)
    }

    fn window_call(&self, window: WindowName, command: &HostCommand) -> Result<Option<Value>> {
        self.call(command).map_err(|err| match err {
            CoreError::Remote(info) if info.code == "window_not_found" => {
                CoreError::WindowNotFound(window)
            }
            CoreError::Remote(info) if info.code == "monitor_not_found" => {
                CoreError::MonitorNotFound(info.message)
            }
            other => other,
        })
    }
}

impl TelemetryHost for HostClient {
    fn subscribe_features(&self, features: &[String]) -> Result<FeatureReply> {
        let data = self
            .call(&HostCommand::SubscribeFeatures {
                features: features.to_vec(),
            })
            .map_err(|err| CoreError::host_call("subscribe_features", err.to_string()))?
            .ok_or_else(|| CoreError::host_call("subscribe_features", "host returned no reply"))?;
        serde_json::from_value(data)
            .map_err(|err| CoreError::host_call("subscribe_features", err.to_string()))
    }

    fn current_info_snapshot(&self) -> Result<Option<Value>> {
        let data = self
            .call(&HostCommand::GetCurrentInfoSnapshot)
            .map_err(|err| CoreError::host_call("get_current_info_snapshot", err.to_string()))?;
        Ok(data.filter(|value| !value.is_null()))
    }
}

impl WindowManager for HostClient {
    fn show_window(&self, window: WindowName, options: &ShowOptions) -> Result<()> {
        self.window_call(
            window,
            &HostCommand::ShowWindow {
                window,
                center_on: options.center_on.clone(),
                dock: options.dock,
            },
        )
        .map(|_| ())
    }

    fn hide_window(&self, window: WindowName) -> Result<()> {
        self.window_call(window, &HostCommand::HideWindow { window })
            .map(|_| ())
    }

    fn toggle_window(&self, window: WindowName) -> Result<()> {
        self.window_call(window, &HostCommand::ToggleWindow { window })
            .map(|_| ())
    }

    fn close_window(&self, window: WindowName) -> Result<()> {
        self.window_call(window, &HostCommand::CloseWindow { window })
            .map(|_| ())
    }

    fn window_visibility(&self, window: WindowName) -> Result<bool> {
        let data = self.window_call(window, &HostCommand::GetWindowVisibility { window })?;
        Ok(data
            .as_ref()
            .and_then(|value| value.get("visible"))
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raidclock_protocol::{Dock, Response};
    use serde_json::json;
    use std::os::unix::net::UnixListener;
    use std::sync::{Arc, Mutex};
    use std::thread;

    fn fake_host(
        path: PathBuf,
        connections: usize,
        seen: Arc<Mutex<Vec<Value>>>,
    ) -> thread::JoinHandle<()> {
        let listener = UnixListener::bind(&path).expect("bind");
        thread::spawn(move || {
            for stream in listener.incoming().take(connections) {
                let stream = stream.expect("accept");
                let seen = seen.clone();
                ipc::serve_connection(stream, move |request| {
                    let params = request.params.unwrap_or(Value::Null);
                    seen.lock().expect("lock").push(params.clone());
                    match params["command"].as_str() {
                        Some("subscribe_features") => Response::ok(
                            request.id,
                            json!({ "success": true, "supported_features": ["game_info"] }),
                        ),
                        Some("get_current_info_snapshot") => Response::ok(request.id, Value::Null),
                        Some("get_window_visibility") => {
                            Response::ok(request.id, json!({ "visible": true }))
                        }
                        Some("toggle_window") => {
                            Response::error(request.id, "window_not_found", "no such window")
                        }
                        _ => Response::ok(request.id, json!({})),
                    }
                });
            }
        })
    }

    #[test]
    fn speaks_host_commands() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("host.sock");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let server = fake_host(path.clone(), 5, seen.clone());
        let client = HostClient::new(path);

        let reply = client
            .subscribe_features(&["game_info".to_string(), "match_info".to_string()])
            .expect("subscribe");
        assert!(reply.success);
        assert_eq!(reply.supported_features, vec!["game_info".to_string()]);

        assert_eq!(client.current_info_snapshot().expect("snapshot"), None);
        assert!(client.window_visibility(WindowName::Desktop).expect("visibility"));

        client
            .show_window(
                WindowName::InGame,
                &ShowOptions {
                    center_on: None,
                    dock: Some(Dock::TopRight),
                },
            )
            .expect("show");

        assert!(matches!(
            client.toggle_window(WindowName::InGame),
            Err(CoreError::WindowNotFound(WindowName::InGame))
        ));
        server.join().expect("server");

        let seen = seen.lock().expect("lock");
        assert_eq!(
            seen[3],
            json!({ "command": "show_window", "window": "in_game", "dock": "top_right" })
        );
    }

    #[test]
    fn missing_host_is_a_host_call_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let client = HostClient::new(dir.path().join("absent.sock"));
        assert!(matches!(
            client.subscribe_features(&[]),
            Err(CoreError::HostCall { .. })
        ));
    }
}
