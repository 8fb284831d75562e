//! Process-wide wiring for the daemon.
//!
//! Exactly one of each core component is built here at startup and shared
//! by reference with every connection handler.

use crate::host_client::HostClient;
use chrono::Utc;
use raidclock_core::aggregate::AggregateStore;
use raidclock_core::bus::{CrossWindowBus, DispatchOutcome};
use raidclock_core::clock::{Clock, SystemClock};
use raidclock_core::config::AppConfig;
use raidclock_core::ipc::SocketTransport;
use raidclock_core::kv::KvStore;
use raidclock_core::lifecycle::{
    CoordinatorDeps, CoordinatorSnapshot, GameLifecycleCoordinator,
};
use raidclock_core::responder::StatsResponder;
use raidclock_core::session::SessionTimeTracker;
use raidclock_core::storage::StorageConfig;
use raidclock_protocol::{GameTimeStats, HostSignal, WindowName};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

pub struct SharedState {
    coordinator: Arc<GameLifecycleCoordinator>,
    bus: Arc<CrossWindowBus>,
    aggregates: Arc<AggregateStore>,
    _responder: Arc<StatsResponder>,
    started_at: String,
}

impl SharedState {
    pub fn new(config: AppConfig, storage: &StorageConfig, store: Arc<dyn KvStore>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let transport = Arc::new(SocketTransport::new(storage.clone()));
        let bus = Arc::new(CrossWindowBus::new(
            WindowName::Background,
            transport,
            clock.clone(),
        ));

        let aggregates = Arc::new(AggregateStore::new(store.clone(), clock.clone()));
        match aggregates.init() {
            Ok(report) => info!(
                kept = report.kept,
                repaired = report.repaired,
                discarded = report.discarded,
                "Map statistics ready"
            ),
            Err(err) => warn!(error = %err, "Failed to load map statistics; starting empty"),
        }

        let host = Arc::new(HostClient::new(storage.host_socket()));
        let coordinator = GameLifecycleCoordinator::new(CoordinatorDeps {
            config,
            telemetry: host.clone(),
            windows: host,
            bus: bus.clone(),
            aggregates: aggregates.clone(),
            tracker: SessionTimeTracker::with_store(clock, store),
        });

        let stats_source = Arc::downgrade(&coordinator);
        let responder = StatsResponder::new(
            bus.clone(),
            aggregates.clone(),
            Arc::new(move || {
                stats_source
                    .upgrade()
                    .map(|coordinator| coordinator.game_time_stats())
                    .unwrap_or_default()
            }),
        );
        responder.register();

        Self {
            coordinator,
            bus,
            aggregates,
            _responder: responder,
            started_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn started_at(&self) -> &str {
        &self.started_at
    }

    pub fn handle_host_signal(&self, signal: HostSignal) {
        self.coordinator.handle_host_signal(signal);
    }

    /// Feeds a stringified bus message addressed to the background.
    pub fn deliver(&self, message: &str) -> Value {
        match self.bus.receive(message) {
            DispatchOutcome::Delivered { handlers, failed } => {
                json!({ "delivered": true, "handlers": handlers, "failed": failed })
            }
            DispatchOutcome::Unhandled(message_type) => {
                json!({ "delivered": false, "reason": "no_handler", "type": message_type })
            }
            DispatchOutcome::UnknownType(value) => {
                json!({ "delivered": false, "reason": "unknown_type", "type": value })
            }
            DispatchOutcome::Malformed(details) => {
                json!({ "delivered": false, "reason": "malformed", "details": details })
            }
        }
    }

    pub fn game_time(&self) -> GameTimeStats {
        self.coordinator.game_time_stats()
    }

    pub fn coordinator_snapshot(&self) -> CoordinatorSnapshot {
        self.coordinator.snapshot()
    }

    pub fn tracked_maps(&self) -> usize {
        self.aggregates.library().map(|records| records.len()).unwrap_or(0)
    }
}

impl Drop for SharedState {
    fn drop(&mut self) {
        self.coordinator.shutdown();
    }
}
