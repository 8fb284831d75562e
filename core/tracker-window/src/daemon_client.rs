//! Client helper for talking to the raidclock background daemon.
//!
//! The daemon is the only writer; windows only read snapshots and relay
//! signals. Failures are surfaced to the caller.

use raidclock_core::error::{CoreError, Result};
use raidclock_core::ipc::{self, CLIENT_TIMEOUT};
use raidclock_core::storage::StorageConfig;
use raidclock_protocol::{GameTimeStats, Method, Request};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

pub struct DaemonClient {
    socket: PathBuf,
    timeout: Duration,
}

impl DaemonClient {
    pub fn new(storage: &StorageConfig) -> Self {
        Self {
            socket: storage.daemon_socket(),
            timeout: CLIENT_TIMEOUT,
        }
    }

    pub fn call(&self, method: Method, params: Option<Value>) -> Result<Value> {
        let request = Request::new(method, None, params);
        let response = ipc::send_request(&self.socket, &request, self.timeout)?;
        let data = response.into_result().map_err(CoreError::Remote)?;
        Ok(data.unwrap_or(Value::Null))
    }

    pub fn game_time(&self) -> Result<GameTimeStats> {
        let data = self.call(Method::GetGameTime, None)?;
        serde_json::from_value(data).map_err(|err| CoreError::json("Failed to parse game time", err))
    }
}
