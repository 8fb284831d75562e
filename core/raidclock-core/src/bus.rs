//! Cross-window message bus.
//!
//! Each process (background, desktop tracker, in-game tracker) owns one bus.
//! Sending stringifies the message and hands it to a [`Transport`]; delivery
//! is at-most-once and failures come back as `false`, never as errors.
//! Receiving decodes the text and fans the message out to every handler
//! registered for its type. A failing or panicking handler is logged and the
//! remaining handlers still run. Unknown types and malformed payloads are
//! logged and dropped.

use crate::clock::Clock;
use raidclock_protocol::{DecodeError, Message, MessageType, WindowName};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, warn};

pub trait Transport: Send + Sync {
    fn deliver(&self, target: WindowName, payload: &str) -> Result<(), String>;
}

pub type MessageHandler = Arc<dyn Fn(&Message) -> Result<(), String> + Send + Sync>;

#[derive(Default)]
struct HandlerTable {
    next_id: u64,
    handlers: HashMap<MessageType, Vec<(u64, MessageHandler)>>,
}

/// Handle returned by [`CrossWindowBus::on_message`]; dropping it keeps the handler.
pub struct Subscription {
    id: u64,
    message_type: MessageType,
    table: Weak<Mutex<HandlerTable>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        let Some(table) = self.table.upgrade() else {
            return;
        };
        let mut guard = table.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(entries) = guard.handlers.get_mut(&self.message_type) {
            entries.retain(|(id, _)| *id != self.id);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered { handlers: usize, failed: usize },
    Unhandled(MessageType),
    UnknownType(String),
    Malformed(String),
}

pub struct CrossWindowBus {
    origin: WindowName,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    table: Arc<Mutex<HandlerTable>>,
}

impl CrossWindowBus {
    pub fn new(origin: WindowName, transport: Arc<dyn Transport>, clock: Arc<dyn Clock>) -> Self {
        Self {
            origin,
            transport,
            clock,
            table: Arc::new(Mutex::new(HandlerTable::default())),
        }
    }

    pub fn origin(&self) -> WindowName {
        self.origin
    }

    pub fn send(&self, target: WindowName, message_type: MessageType, data: Option<Value>) -> bool {
        let message = Message::new(message_type, data, self.clock.now_ms());
        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, message_type = %message_type, "Failed to encode message");
                return false;
            }
        };

        match self.transport.deliver(target, &payload) {
            Ok(()) => {
                debug!(
                    from = %self.origin,
                    to = %target,
                    message_type = %message_type,
                    "Message sent"
                );
                true
            }
            Err(err) => {
                debug!(
                    to = %target,
                    message_type = %message_type,
                    error = %err,
                    "Message delivery failed"
                );
                false
            }
        }
    }

    /// Sends a serializable payload; a payload that cannot become JSON is reported as `false`.
    pub fn send_data<T: Serialize>(
        &self,
        target: WindowName,
        message_type: MessageType,
        data: &T,
    ) -> bool {
        match serde_json::to_value(data) {
            Ok(value) => self.send(target, message_type, Some(value)),
            Err(err) => {
                warn!(error = %err, message_type = %message_type, "Failed to serialize payload");
                false
            }
        }
    }

    pub fn broadcast(
        &self,
        targets: &[WindowName],
        message_type: MessageType,
        data: Option<Value>,
    ) -> Vec<bool> {
        targets
            .iter()
            .map(|target| self.send(*target, message_type, data.clone()))
            .collect()
    }

    pub fn broadcast_data<T: Serialize>(
        &self,
        targets: &[WindowName],
        message_type: MessageType,
        data: &T,
    ) -> Vec<bool> {
        match serde_json::to_value(data) {
            Ok(value) => self.broadcast(targets, message_type, Some(value)),
            Err(err) => {
                warn!(error = %err, message_type = %message_type, "Failed to serialize payload");
                vec![false; targets.len()]
            }
        }
    }

    pub fn on_message<F>(&self, message_type: MessageType, handler: F) -> Subscription
    where
        F: Fn(&Message) -> Result<(), String> + Send + Sync + 'static,
    {
        let mut id = 0;
        if let Ok(mut table) = self.table.lock() {
            table.next_id += 1;
            id = table.next_id;
            table
                .handlers
                .entry(message_type)
                .or_default()
                .push((id, Arc::new(handler)));
        }
        Subscription {
            id,
            message_type,
            table: Arc::downgrade(&self.table),
        }
    }

    /// Decodes text from the transport and dispatches it.
    pub fn receive(&self, payload: &str) -> DispatchOutcome {
        match Message::decode(payload) {
            Ok(message) => self.dispatch(&message),
            Err(DecodeError::UnknownType(value)) => {
                warn!(message_type = %value, "Dropping message with unknown type");
                DispatchOutcome::UnknownType(value)
            }
            Err(DecodeError::Malformed(details)) => {
                warn!(details = %details, "Dropping malformed message");
                DispatchOutcome::Malformed(details)
            }
        }
    }

    pub fn dispatch(&self, message: &Message) -> DispatchOutcome {
        let handlers: Vec<MessageHandler> = match self.table.lock() {
            Ok(table) => table
                .handlers
                .get(&message.message_type)
                .map(|entries| entries.iter().map(|(_, handler)| handler.clone()).collect())
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        };

        if handlers.is_empty() {
            debug!(message_type = %message.message_type, "No handler registered; dropping message");
            return DispatchOutcome::Unhandled(message.message_type);
        }

        let mut failed = 0;
        for handler in &handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(message))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    failed += 1;
                    warn!(message_type = %message.message_type, error = %err, "Message handler failed");
                }
                Err(_) => {
                    failed += 1;
                    warn!(message_type = %message.message_type, "Message handler panicked");
                }
            }
        }

        DispatchOutcome::Delivered {
            handlers: handlers.len(),
            failed,
        }
    }
}

/// In-process transport backed by std channels, one receiver per window.
#[derive(Default)]
pub struct ChannelTransport {
    senders: Mutex<HashMap<WindowName, Sender<String>>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, window: WindowName) -> Receiver<String> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut senders) = self.senders.lock() {
            senders.insert(window, tx);
        }
        rx
    }
}

impl Transport for ChannelTransport {
    fn deliver(&self, target: WindowName, payload: &str) -> Result<(), String> {
        let senders = self
            .senders
            .lock()
            .map_err(|_| "channel table poisoned".to_string())?;
        let sender = senders
            .get(&target)
            .ok_or_else(|| format!("window {} is not registered", target))?;
        sender
            .send(payload.to_string())
            .map_err(|_| format!("window {} is gone", target))
    }
}
