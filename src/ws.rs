//! WebSocket Fan-out (C10): per-team outbound message routing with
//! monotonically increasing sequence numbers.
//!
//! Grounded on `examples/original_source/.../infrastructure/messaging/
//! websocket_manager.py` (`WebSocketManager`: single connection per team,
//! enforced by closing the prior one; per-team sequence counter;
//! best-effort delivery) and `websocket_messages.py` for the `MessageType`
//! enum. The teacher's own `websocket/handler.rs` models its outbound
//! frames the same tagged-enum way (`ServerMessage`), adapted here to the
//! fixed `{seq, type, timestamp, data}` envelope spec §4.10/§6 require.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    NewOrderAck,
    NewOrderReject,
    ExecutionReport,
    CancelAck,
    CancelReject,
    PositionSnapshot,
    MarketData,
    Signal,
    Event,
    ConnectionStatus,
}

/// The wire envelope every outbound message carries: `{seq, type,
/// timestamp, data}` per spec §6.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OutboundMessage {
    pub seq: u64,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

/// Abstraction over the actual socket write, injected at startup per the
/// REDESIGN FLAGS (no concrete I/O owned by the core). A send failure
/// disconnects the team; it never blocks or panics the fan-out.
pub trait ConnectionSink: Send + Sync {
    fn send(&self, message: &OutboundMessage) -> Result<(), String>;
}

struct Connection {
    sink: Box<dyn ConnectionSink>,
    seq: u64,
}

/// Registry of `team_id -> connection`, enforcing single-connection-per-team
/// and stamping sequence numbers. One mutex guards the whole registry —
/// connect/disconnect/send are all short, non-blocking critical sections.
#[derive(Default)]
pub struct WebSocketFanout {
    connections: Mutex<HashMap<String, Connection>>,
}

impl WebSocketFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection for a team, closing any prior one first.
    /// Sequence numbers reset to zero on (re)connection.
    pub fn connect(&self, team_id: impl Into<String>, sink: Box<dyn ConnectionSink>) {
        let mut connections = self.connections.lock();
        connections.insert(team_id.into(), Connection { sink, seq: 0 });
    }

    pub fn disconnect(&self, team_id: &str) {
        self.connections.lock().remove(team_id);
    }

    pub fn is_connected(&self, team_id: &str) -> bool {
        self.connections.lock().contains_key(team_id)
    }

    /// Best-effort delivery: a failed send disconnects the team and drops
    /// the message for them; it never blocks delivery to other teams.
    pub fn send(&self, team_id: &str, message_type: MessageType, data: Value) -> bool {
        let mut connections = self.connections.lock();
        let Some(connection) = connections.get_mut(team_id) else {
            return false;
        };

        connection.seq += 1;
        let envelope = OutboundMessage {
            seq: connection.seq,
            message_type,
            timestamp: Utc::now(),
            data,
        };

        if connection.sink.send(&envelope).is_err() {
            connections.remove(team_id);
            return false;
        }
        true
    }
}
