//! raidclock-window: tracker window endpoint.
//!
//! Renderer processes (desktop and in-game trackers) use this binary to
//! receive background broadcasts and to ask for statistics.
//!
//! ## Subcommands
//!
//! - `listen`: bind the window socket and render every broadcast as a log line
//! - `request`: send a `<X>-request` from a window to the background
//! - `signal`: relay a host signal (JSON) to the daemon, for development
//! - `status`: print daemon health and coordinator state

mod daemon_client;
mod listen;
mod logging;
mod view;

use clap::{Parser, Subcommand, ValueEnum};
use daemon_client::DaemonClient;
use raidclock_core::bus::CrossWindowBus;
use raidclock_core::clock::SystemClock;
use raidclock_core::ipc::SocketTransport;
use raidclock_core::storage::StorageConfig;
use raidclock_protocol::{parse_host_signal, MessageType, Method, StatsRange, WindowName};
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "raidclock-window")]
#[command(about = "raidclock tracker window endpoint")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen for bus deliveries addressed to a tracker window
    Listen {
        #[arg(long, value_enum)]
        window: TrackerArg,
    },

    /// Ask the background for statistics; the answer is broadcast to both windows
    Request {
        #[arg(value_enum)]
        kind: RequestKind,

        #[arg(long, value_enum)]
        range: Option<RangeArg>,

        /// Window the request is sent from
        #[arg(long, value_enum, default_value = "desktop")]
        from: TrackerArg,
    },

    /// Relay a host signal to the daemon (JSON object with a `kind` field)
    Signal {
        #[arg(value_name = "JSON")]
        payload: String,
    },

    /// Print daemon health and coordinator state
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum TrackerArg {
    Desktop,
    InGame,
}

impl From<TrackerArg> for WindowName {
    fn from(value: TrackerArg) -> Self {
        match value {
            TrackerArg::Desktop => WindowName::Desktop,
            TrackerArg::InGame => WindowName::InGame,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum RequestKind {
    TopMaps,
    Dashboard,
    Library,
    Overview,
}

impl From<RequestKind> for MessageType {
    fn from(value: RequestKind) -> Self {
        match value {
            RequestKind::TopMaps => MessageType::TopMapsRequest,
            RequestKind::Dashboard => MessageType::DashboardRequest,
            RequestKind::Library => MessageType::LibraryRequest,
            RequestKind::Overview => MessageType::OverviewRequest,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum RangeArg {
    Today,
    #[value(name = "7d")]
    SevenDays,
    All,
}

impl From<RangeArg> for StatsRange {
    fn from(value: RangeArg) -> Self {
        match value {
            RangeArg::Today => StatsRange::Today,
            RangeArg::SevenDays => StatsRange::SevenDays,
            RangeArg::All => StatsRange::All,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let storage = match StorageConfig::from_home() {
        Ok(storage) => storage,
        Err(err) => {
            eprintln!("raidclock-window: {}", err);
            std::process::exit(1);
        }
    };

    let prefix = match &cli.command {
        Commands::Listen { window } => WindowName::from(*window).as_str(),
        _ => "window-cli",
    };
    let _logging_guard = logging::init(&storage, prefix);

    let result = match cli.command {
        Commands::Listen { window } => listen::run(&storage, window.into()),
        Commands::Request { kind, range, from } => request(&storage, kind, range, from),
        Commands::Signal { payload } => signal(&storage, &payload),
        Commands::Status => status(&storage),
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "raidclock-window failed");
        std::process::exit(1);
    }
}

fn request(
    storage: &StorageConfig,
    kind: RequestKind,
    range: Option<RangeArg>,
    from: TrackerArg,
) -> Result<(), String> {
    let bus = CrossWindowBus::new(
        from.into(),
        Arc::new(SocketTransport::new(storage.clone())),
        Arc::new(SystemClock),
    );
    let data = range.map(|range| json!({ "range": StatsRange::from(range) }));
    let message_type = MessageType::from(kind);
    if bus.send(WindowName::Background, message_type, data) {
        tracing::info!(request = %message_type, "Request delivered to background");
        Ok(())
    } else {
        Err(format!("background did not accept {}", message_type))
    }
}

fn signal(storage: &StorageConfig, payload: &str) -> Result<(), String> {
    let value: Value =
        serde_json::from_str(payload).map_err(|err| format!("signal is not valid JSON: {}", err))?;
    // Validate locally so typos fail before reaching the daemon.
    parse_host_signal(value.clone()).map_err(|err| err.to_string())?;
    let data = DaemonClient::new(storage).call(Method::HostSignal, Some(value))?;
    println!("{}", data);
    Ok(())
}

fn status(storage: &StorageConfig) -> Result<(), String> {
    let client = DaemonClient::new(storage);
    let health = client.call(Method::GetHealth, None)?;
    let coordinator = client.call(Method::GetCoordinatorState, None)?;
    let report = json!({ "health": health, "coordinator": coordinator });
    let rendered = serde_json::to_string_pretty(&report).map_err(|err| err.to_string())?;
    println!("{}", rendered);
    Ok(())
}
