//! Wire protocol: a JSON envelope over the persistent connection, decoded
//! into closed message enums so dispatch is exhaustive: an unrecognized
//! `type` becomes `ClientMessage::Unknown`, never a silent fallthrough.

use chrono::{DateTime, Utc};
use marksync_core::{ResourceType, SyncAction, SyncEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON envelope shared by every frame in both directions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Inbound messages from a device
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Ping,
    Pong,
    SyncRequest { last_sync_time: DateTime<Utc> },
    SyncEvent(IncomingEvent),
    Unknown(String),
}

/// Payload of an inbound `sync_event` frame
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IncomingEvent {
    pub event_type: SyncAction,
    pub resource_type: ResourceType,
    pub resource_id: String,
    #[serde(default)]
    pub changes: Value,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct SyncRequestData {
    #[serde(default)]
    last_sync_time: Option<DateTime<Utc>>,
}

impl Envelope {
    /// Parse one inbound text frame. A JSON error here means the frame is
    /// dropped by the session; an unknown `type` is a well-formed message
    /// answered with a protocol error.
    pub fn parse(text: &str) -> Result<ClientMessage, serde_json::Error> {
        let envelope: Envelope = serde_json::from_str(text)?;
        envelope.into_message()
    }

    fn into_message(self) -> Result<ClientMessage, serde_json::Error> {
        let data = self
            .data
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

        match self.kind.as_str() {
            "ping" => Ok(ClientMessage::Ping),
            "pong" => Ok(ClientMessage::Pong),
            "sync_request" => {
                let req: SyncRequestData = serde_json::from_value(data)?;
                Ok(ClientMessage::SyncRequest {
                    // Missing watermark means first contact: full sync
                    last_sync_time: req.last_sync_time.unwrap_or(DateTime::UNIX_EPOCH),
                })
            }
            "sync_event" => {
                let mut event: IncomingEvent = serde_json::from_value(data)?;
                if event.device_id.is_none() {
                    event.device_id = self.device_id;
                }
                if event.timestamp.is_none() {
                    event.timestamp = Some(self.timestamp);
                }
                Ok(ClientMessage::SyncEvent(event))
            }
            other => Ok(ClientMessage::Unknown(other.to_string())),
        }
    }
}

/// Outbound messages to a device
#[derive(Debug, Clone)]
pub enum ServerMessage {
    Ping,
    Pong,
    SyncResponse {
        events: Vec<SyncEvent>,
        last_sync_timestamp: DateTime<Utc>,
    },
    SyncEvent(SyncEvent),
    SyncEventAck {
        status: &'static str,
    },
    Error {
        error: String,
        received_type: Option<String>,
    },
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Ping => "ping",
            ServerMessage::Pong => "pong",
            ServerMessage::SyncResponse { .. } => "sync_response",
            ServerMessage::SyncEvent(_) => "sync_event",
            ServerMessage::SyncEventAck { .. } => "sync_event_ack",
            ServerMessage::Error { .. } => "error",
        }
    }

    fn data(&self) -> Option<Value> {
        match self {
            ServerMessage::Ping | ServerMessage::Pong => None,
            ServerMessage::SyncResponse {
                events,
                last_sync_timestamp,
            } => Some(serde_json::json!({
                "events": events,
                "last_sync_timestamp": last_sync_timestamp,
            })),
            ServerMessage::SyncEvent(event) => serde_json::to_value(event).ok(),
            ServerMessage::SyncEventAck { status } => {
                Some(serde_json::json!({ "status": status }))
            }
            ServerMessage::Error {
                error,
                received_type,
            } => {
                let mut data = serde_json::Map::new();
                data.insert("error".to_string(), Value::String(error.clone()));
                if let Some(t) = received_type {
                    data.insert("received_type".to_string(), Value::String(t.clone()));
                }
                Some(Value::Object(data))
            }
        }
    }

    /// Serialize to a wire frame
    pub fn to_frame(&self) -> String {
        let envelope = Envelope {
            kind: self.kind().to_string(),
            data: self.data(),
            user_id: None,
            device_id: None,
            timestamp: Utc::now(),
        };
        serde_json::to_string(&envelope).unwrap_or_else(|_| {
            // Envelope is plain data; serialization cannot realistically
            // fail, but a broken frame must not take the session down.
            r#"{"type":"error","data":{"error":"encode_failed"}}"#.to_string()
        })
    }
}
