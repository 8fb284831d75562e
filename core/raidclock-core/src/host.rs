//! Host platform collaborators.
//!
//! The host owns window management and telemetry delivery; the core only
//! calls into it through these traits. Window handles are one capability set
//! with a profile per window kind, chosen from configuration.

use crate::config::WindowsConfig;
use crate::error::Result;
use raidclock_protocol::{Dock, FeatureReply, WindowName};
use serde_json::Value;
use std::sync::Arc;

pub trait TelemetryHost: Send + Sync {
    /// One round trip to the host's feature-subscription call.
    fn subscribe_features(&self, features: &[String]) -> Result<FeatureReply>;

    /// Current info snapshot, used at startup to detect a scene already in progress.
    fn current_info_snapshot(&self) -> Result<Option<Value>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShowOptions {
    pub center_on: Option<String>,
    pub dock: Option<Dock>,
}

pub trait WindowManager: Send + Sync {
    fn show_window(&self, window: WindowName, options: &ShowOptions) -> Result<()>;
    fn hide_window(&self, window: WindowName) -> Result<()>;
    fn toggle_window(&self, window: WindowName) -> Result<()>;
    fn close_window(&self, window: WindowName) -> Result<()>;
    fn window_visibility(&self, window: WindowName) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowProfile {
    Desktop { centered: bool },
    InGame { dock: Dock },
}

/// A tracker window bound to the host's window manager.
#[derive(Clone)]
pub struct TrackerWindow {
    name: WindowName,
    profile: WindowProfile,
    manager: Arc<dyn WindowManager>,
}

impl TrackerWindow {
    pub fn new(name: WindowName, profile: WindowProfile, manager: Arc<dyn WindowManager>) -> Self {
        Self {
            name,
            profile,
            manager,
        }
    }

    /// Builds the handle for `name` with the profile configured for it.
    pub fn from_config(
        name: WindowName,
        config: &WindowsConfig,
        manager: Arc<dyn WindowManager>,
    ) -> Self {
        let profile = match name {
            WindowName::InGame => WindowProfile::InGame {
                dock: config.in_game_dock,
            },
            WindowName::Desktop | WindowName::Background => WindowProfile::Desktop {
                centered: config.desktop_centered,
            },
        };
        Self::new(name, profile, manager)
    }

    pub fn name(&self) -> WindowName {
        self.name
    }

    pub fn profile(&self) -> WindowProfile {
        self.profile
    }

    pub fn show(&self) -> Result<()> {
        let options = match self.profile {
            WindowProfile::Desktop { centered: true } => ShowOptions {
                center_on: Some(PRIMARY_MONITOR.to_string()),
                dock: None,
            },
            WindowProfile::Desktop { centered: false } => ShowOptions::default(),
            WindowProfile::InGame { dock } => ShowOptions {
                center_on: None,
                dock: Some(dock),
            },
        };
        self.manager.show_window(self.name, &options)
    }

    pub fn hide(&self) -> Result<()> {
        self.manager.hide_window(self.name)
    }

    pub fn toggle(&self) -> Result<()> {
        self.manager.toggle_window(self.name)
    }

    pub fn close(&self) -> Result<()> {
        self.manager.close_window(self.name)
    }

    pub fn center_on(&self, monitor: &str) -> Result<()> {
        let options = ShowOptions {
            center_on: Some(monitor.to_string()),
            dock: None,
        };
        self.manager.show_window(self.name, &options)
    }

    pub fn is_visible(&self) -> Result<bool> {
        self.manager.window_visibility(self.name)
    }
}

pub const PRIMARY_MONITOR: &str = "primary";
