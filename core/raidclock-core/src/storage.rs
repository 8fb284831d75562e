//! Storage configuration and path management for raidclock.
//!
//! Every file and socket location used by the background daemon and the
//! tracker windows is derived from one `StorageConfig`, so tests can point a
//! whole process tree at a temporary directory.

use crate::error::{CoreError, Result};
use raidclock_protocol::WindowName;
use std::env;
use std::path::{Path, PathBuf};

pub const DAEMON_SOCKET_ENV: &str = "RAIDCLOCK_DAEMON_SOCKET";
pub const HOST_SOCKET_ENV: &str = "RAIDCLOCK_HOST_SOCKET";

const ROOT_DIR_NAME: &str = ".raidclock";

/// Central configuration for all raidclock storage paths.
///
/// Production code uses `StorageConfig::from_home()` which points to `~/.raidclock/`.
/// Tests use `StorageConfig::with_root(temp_dir)` for isolation.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    root: PathBuf,
}

impl StorageConfig {
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir().ok_or(CoreError::HomeDirNotFound)?;
        Ok(Self {
            root: home.join(ROOT_DIR_NAME),
        })
    }

    /// Creates a StorageConfig with a custom root directory.
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Files
    // ─────────────────────────────────────────────────────────────────────────────

    /// Path to config.toml (user configuration).
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Path to the daemon's key-value database.
    pub fn database_file(&self) -> PathBuf {
        self.root.join("daemon").join("state.db")
    }

    /// Directory for rolling log files written by the tracker windows.
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Sockets
    // ─────────────────────────────────────────────────────────────────────────────

    /// Socket the background daemon listens on. `RAIDCLOCK_DAEMON_SOCKET` overrides it.
    pub fn daemon_socket(&self) -> PathBuf {
        env::var(DAEMON_SOCKET_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| self.root.join("daemon.sock"))
    }

    /// Socket the host adapter listens on. `RAIDCLOCK_HOST_SOCKET` overrides it.
    pub fn host_socket(&self) -> PathBuf {
        env::var(HOST_SOCKET_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| self.root.join("host.sock"))
    }

    /// Socket a window process listens on for bus deliveries.
    pub fn window_socket(&self, window: WindowName) -> PathBuf {
        match window {
            WindowName::Background => self.daemon_socket(),
            other => self
                .root
                .join("windows")
                .join(format!("{}.sock", other.as_str())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_sockets_live_under_windows_dir() {
        let storage = StorageConfig::with_root(PathBuf::from("/tmp/rc"));
        assert_eq!(
            storage.window_socket(WindowName::InGame),
            PathBuf::from("/tmp/rc/windows/in_game.sock")
        );
        assert_eq!(
            storage.database_file(),
            PathBuf::from("/tmp/rc/daemon/state.db")
        );
    }
}
