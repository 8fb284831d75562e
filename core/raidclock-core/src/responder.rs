//! Answers statistics requests from tracker windows.
//!
//! A window sends `<X>-request` with an optional range; the background
//! answers with a broadcast `<X>-updated { range, data }` to every tracker
//! window, the requester included. Aggregate mutations re-broadcast the
//! all-time views so open windows stay current without asking.

use crate::aggregate::{AggregateChange, AggregateStore};
use crate::bus::{CrossWindowBus, Subscription};
use crate::error::{CoreError, Result};
use raidclock_protocol::{
    GameTimeStats, Message, MessageType, RangeRequest, RangedPayload, StatsRange, TRACKER_WINDOWS,
};
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

pub type GameTimeSource = Arc<dyn Fn() -> GameTimeStats + Send + Sync>;

const REQUEST_TYPES: [MessageType; 4] = [
    MessageType::TopMapsRequest,
    MessageType::DashboardRequest,
    MessageType::LibraryRequest,
    MessageType::OverviewRequest,
];

const CHANGE_BROADCASTS: [MessageType; 3] = [
    MessageType::TopMapsRequest,
    MessageType::LibraryRequest,
    MessageType::DashboardRequest,
];

pub struct StatsResponder {
    bus: Arc<CrossWindowBus>,
    aggregates: Arc<AggregateStore>,
    game_time: GameTimeSource,
}

impl StatsResponder {
    pub fn new(
        bus: Arc<CrossWindowBus>,
        aggregates: Arc<AggregateStore>,
        game_time: GameTimeSource,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            aggregates,
            game_time,
        })
    }

    /// Installs the request handlers and the aggregate change listener.
    pub fn register(self: &Arc<Self>) -> Vec<Subscription> {
        let subscriptions = REQUEST_TYPES
            .iter()
            .map(|request| {
                let responder = Arc::downgrade(self);
                self.bus.on_message(*request, move |message| {
                    let responder = responder
                        .upgrade()
                        .ok_or_else(|| "stats responder dropped".to_string())?;
                    responder.handle_request(message)
                })
            })
            .collect();

        let responder: Weak<Self> = Arc::downgrade(self);
        self.aggregates.on_change(move |change| {
            if let Some(responder) = responder.upgrade() {
                responder.on_aggregate_change(change);
            }
        });

        subscriptions
    }

    /// Builds and broadcasts the `<X>-updated` answer for `request`.
    pub fn respond(&self, request: MessageType, range: StatsRange) -> Result<Vec<bool>> {
        let Some(response_type) = request.response_type() else {
            return Err(CoreError::Ipc(format!("{} is not a request type", request)));
        };
        let payload = RangedPayload {
            range,
            data: self.build(request, range)?,
        };
        Ok(self
            .bus
            .broadcast_data(&TRACKER_WINDOWS, response_type, &payload))
    }

    fn build(&self, request: MessageType, range: StatsRange) -> Result<Value> {
        let value = match request {
            MessageType::TopMapsRequest => to_value(&self.aggregates.query(range)?)?,
            MessageType::LibraryRequest => to_value(&self.aggregates.library()?)?,
            MessageType::DashboardRequest => to_value(&self.aggregates.dashboard(range)?)?,
            MessageType::OverviewRequest => json!({
                "gameTime": to_value(&(self.game_time)())?,
                "dashboard": to_value(&self.aggregates.dashboard(range)?)?,
                "topMaps": to_value(&self.aggregates.query(range)?)?,
            }),
            other => return Err(CoreError::Ipc(format!("{} is not a request type", other))),
        };
        Ok(value)
    }

    fn handle_request(&self, message: &Message) -> std::result::Result<(), String> {
        let request: RangeRequest = match &message.data {
            Some(data) => serde_json::from_value(data.clone())
                .map_err(|err| format!("invalid range request: {}", err))?,
            None => RangeRequest::default(),
        };
        let range = request.range.unwrap_or_default();
        debug!(request = %message.message_type, range = range.as_str(), "Answering stats request");
        self.respond(message.message_type, range)
            .map(|_| ())
            .map_err(String::from)
    }

    fn on_aggregate_change(&self, change: &AggregateChange) {
        debug!(change = ?change, "Map statistics changed; re-broadcasting");
        for request in CHANGE_BROADCASTS {
            if let Err(err) = self.respond(request, StatsRange::All) {
                warn!(request = %request, error = %err, "Failed to re-broadcast statistics");
            }
        }
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|err| CoreError::json("Failed to serialize statistics", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{ChannelTransport, DispatchOutcome};
    use crate::clock::ManualClock;
    use crate::kv::MemoryKvStore;
    use raidclock_protocol::WindowName;
    use std::sync::mpsc::Receiver;

    struct Fixture {
        bus: Arc<CrossWindowBus>,
        aggregates: Arc<AggregateStore>,
        desktop: Receiver<String>,
        in_game: Receiver<String>,
        responder: Arc<StatsResponder>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(1_000));
        let transport = Arc::new(ChannelTransport::new());
        let desktop = transport.register(WindowName::Desktop);
        let in_game = transport.register(WindowName::InGame);
        let bus = Arc::new(CrossWindowBus::new(
            WindowName::Background,
            transport,
            clock.clone(),
        ));
        let aggregates = Arc::new(AggregateStore::new(Arc::new(MemoryKvStore::new()), clock));
        let responder = StatsResponder::new(
            bus.clone(),
            aggregates.clone(),
            Arc::new(GameTimeStats::default),
        );
        responder.register();
        Fixture {
            bus,
            aggregates,
            desktop,
            in_game,
            responder,
        }
    }

    fn decode_all(rx: &Receiver<String>) -> Vec<Message> {
        rx.try_iter()
            .filter_map(|payload| Message::decode(&payload).ok())
            .collect()
    }

    #[test]
    fn request_is_answered_to_every_tracker_window() {
        let f = fixture();
        f.aggregates.record_session_end("customs", 500).expect("record");
        decode_all(&f.desktop);
        decode_all(&f.in_game);

        let outcome = f.bus.receive(r#"{"type":"top-maps-request","data":{"range":"7d"},"timestamp":5}"#);
        assert_eq!(
            outcome,
            DispatchOutcome::Delivered {
                handlers: 1,
                failed: 0
            }
        );

        for rx in [&f.desktop, &f.in_game] {
            let messages = decode_all(rx);
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].message_type, MessageType::TopMapsUpdated);
            let data = messages[0].data.clone().expect("data");
            assert_eq!(data["range"], json!("7d"));
            assert_eq!(data["data"][0]["mapId"], json!("customs"));
        }
    }

    #[test]
    fn missing_range_defaults_to_all() {
        let f = fixture();
        f.bus.receive(r#"{"type":"overview-request","timestamp":5}"#);
        let messages = decode_all(&f.desktop);
        assert_eq!(messages[0].message_type, MessageType::OverviewUpdated);
        let data = messages[0].data.clone().expect("data");
        assert_eq!(data["range"], json!("all"));
        assert!(data["data"]["gameTime"].is_object());
    }

    #[test]
    fn invalid_range_is_reported_as_handler_failure() {
        let f = fixture();
        let outcome = f
            .bus
            .receive(r#"{"type":"library-request","data":{"range":"forever"},"timestamp":5}"#);
        assert_eq!(
            outcome,
            DispatchOutcome::Delivered {
                handlers: 1,
                failed: 1
            }
        );
        assert!(decode_all(&f.desktop).is_empty());
    }

    #[test]
    fn aggregate_changes_rebroadcast_all_time_views() {
        let f = fixture();
        f.aggregates.record_session_end("woods", 100).expect("record");

        let types: Vec<MessageType> = decode_all(&f.in_game)
            .into_iter()
            .map(|message| message.message_type)
            .collect();
        assert_eq!(
            types,
            vec![
                MessageType::TopMapsUpdated,
                MessageType::LibraryUpdated,
                MessageType::DashboardUpdated
            ]
        );
    }

    #[test]
    fn non_request_types_are_rejected() {
        let f = fixture();
        assert!(f.responder.respond(MessageType::Custom, StatsRange::All).is_err());
    }
}
