//! Raidclock core library.
//!
//! Session-time accounting, scene classification, feature negotiation, game
//! lifecycle coordination, cross-window messaging and per-map statistics for
//! the raidclock overlay. The background daemon owns the mutable state; the
//! tracker windows observe it through [`bus::CrossWindowBus`] broadcasts.
//!
//! Everything here is synchronous and thread-based. Time is read through an
//! injected [`clock::Clock`] so tests can drive it deterministically.

pub mod aggregate;
pub mod bus;
pub mod clock;
pub mod config;
pub mod error;
pub mod host;
pub mod ipc;
pub mod kv;
pub mod lifecycle;
pub mod negotiator;
pub mod responder;
pub mod scene;
pub mod session;
pub mod storage;
pub mod ticker;

pub use aggregate::{AggregateRecord, AggregateStore, RecoveryReport};
pub use bus::{ChannelTransport, CrossWindowBus, DispatchOutcome, Transport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_config, AppConfig};
pub use error::{CoreError, Result};
pub use host::{TelemetryHost, TrackerWindow, WindowManager, WindowProfile};
pub use ipc::SocketTransport;
pub use kv::{KvStore, MemoryKvStore, SqliteKvStore};
pub use lifecycle::{CoordinatorDeps, CoordinatorPhase, GameLifecycleCoordinator};
pub use negotiator::{FeatureNegotiator, FeatureSubscription};
pub use responder::StatsResponder;
pub use scene::{classify, SceneSignal};
pub use session::{SessionSegment, SessionTimeTracker};
pub use storage::StorageConfig;
pub use ticker::GameTimeTicker;
