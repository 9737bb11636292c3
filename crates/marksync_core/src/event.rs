use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default cap on a serialized event payload, in bytes.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Kind of resource a sync event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Bookmark,
    Collection,
}

/// Mutation recorded by a sync event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

/// Delivery status of a stored event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Delivered,
}

/// A single recorded change. Immutable once appended to the event log;
/// later events on the same `resource_id` supersede it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    /// Log-assigned monotonic identifier
    pub id: i64,
    pub user_id: String,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub action: SyncAction,
    /// Full state of the resource as of this event (no field-level merging)
    pub payload: serde_json::Value,
    /// Device that produced the change
    pub device_id: String,
    /// Producer-supplied logical time
    pub timestamp: DateTime<Utc>,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
}

impl SyncEvent {
    pub fn is_delete(&self) -> bool {
        self.action == SyncAction::Delete
    }
}

/// An event as submitted to the log, before an id is assigned
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSyncEvent {
    pub user_id: String,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub action: SyncAction,
    pub payload: serde_json::Value,
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
}

impl NewSyncEvent {
    /// Validate shape before the event is appended. Storage never sees
    /// events that fail here.
    pub fn validate(&self, max_payload_bytes: usize) -> Result<(), ValidationError> {
        if self.user_id.trim().is_empty() {
            return Err(ValidationError::MissingUserId);
        }
        if self.device_id.trim().is_empty() {
            return Err(ValidationError::MissingDeviceId);
        }
        if self.resource_id.trim().is_empty() {
            return Err(ValidationError::MissingResourceId);
        }
        let size = serde_json::to_vec(&self.payload).map_or(0, |v| v.len());
        if size > max_payload_bytes {
            return Err(ValidationError::PayloadTooLarge {
                size,
                limit: max_payload_bytes,
            });
        }
        Ok(())
    }
}

/// Validation failures for submitted events
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("user_id must not be empty")]
    MissingUserId,
    #[error("device_id must not be empty")]
    MissingDeviceId,
    #[error("resource_id must not be empty")]
    MissingResourceId,
    #[error("payload is {size} bytes, limit is {limit}")]
    PayloadTooLarge { size: usize, limit: usize },
}

/// Per-(user, device) sync progress watermark
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
    pub user_id: String,
    pub device_id: String,
    /// Non-decreasing across writes for a given device
    pub last_sync_time: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncState {
    /// State for a device that has never synced. The epoch watermark
    /// forces a full delta on first contact.
    pub fn unseen(user_id: &str, device_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            device_id: device_id.to_string(),
            last_sync_time: DateTime::UNIX_EPOCH,
            updated_at: DateTime::UNIX_EPOCH,
        }
    }
}

/// Error for parsing a stored enum column back into its Rust type
#[derive(Debug, Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! str_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(ResourceType, "resource type", {
    Bookmark => "bookmark",
    Collection => "collection",
});

str_enum!(SyncAction, "action", {
    Create => "create",
    Update => "update",
    Delete => "delete",
});

str_enum!(EventStatus, "status", {
    Pending => "pending",
    Delivered => "delivered",
});

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_event() -> NewSyncEvent {
        NewSyncEvent {
            user_id: "u1".to_string(),
            resource_type: ResourceType::Bookmark,
            resource_id: "b1".to_string(),
            action: SyncAction::Create,
            payload: json!({"title": "Rust", "url": "https://rust-lang.org"}),
            device_id: "d1".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_validate_accepts_well_formed_event() {
        assert!(new_event().validate(DEFAULT_MAX_PAYLOAD_BYTES).is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_identifiers() {
        let mut ev = new_event();
        ev.user_id = "  ".to_string();
        assert_eq!(
            ev.validate(DEFAULT_MAX_PAYLOAD_BYTES),
            Err(ValidationError::MissingUserId)
        );

        let mut ev = new_event();
        ev.device_id = String::new();
        assert_eq!(
            ev.validate(DEFAULT_MAX_PAYLOAD_BYTES),
            Err(ValidationError::MissingDeviceId)
        );

        let mut ev = new_event();
        ev.resource_id = String::new();
        assert_eq!(
            ev.validate(DEFAULT_MAX_PAYLOAD_BYTES),
            Err(ValidationError::MissingResourceId)
        );
    }

    #[test]
    fn test_validate_bounds_payload_size() {
        let mut ev = new_event();
        ev.payload = json!({"notes": "x".repeat(512)});
        let err = ev.validate(64).unwrap_err();
        assert!(matches!(err, ValidationError::PayloadTooLarge { .. }));
    }

    #[test]
    fn test_enum_round_trip() {
        for (text, action) in [
            ("create", SyncAction::Create),
            ("update", SyncAction::Update),
            ("delete", SyncAction::Delete),
        ] {
            assert_eq!(action.as_str(), text);
            assert_eq!(text.parse::<SyncAction>().unwrap(), action);
        }
        assert!("rename".parse::<SyncAction>().is_err());
    }

    #[test]
    fn test_unseen_state_starts_at_epoch() {
        let state = SyncState::unseen("u1", "d1");
        assert_eq!(state.last_sync_time, DateTime::UNIX_EPOCH);
    }

    #[test]
    fn test_event_serializes_with_snake_case_tags() {
        let ev = SyncEvent {
            id: 1,
            user_id: "u1".to_string(),
            resource_type: ResourceType::Collection,
            resource_id: "c1".to_string(),
            action: SyncAction::Delete,
            payload: json!({}),
            device_id: "d1".to_string(),
            timestamp: Utc::now(),
            status: EventStatus::Pending,
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&ev).unwrap();
        assert_eq!(value["resource_type"], "collection");
        assert_eq!(value["action"], "delete");
        assert_eq!(value["status"], "pending");
    }
}
