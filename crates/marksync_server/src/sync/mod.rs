mod bridge;
mod delta;
mod hub;
mod protocol;
mod service;
mod session;

pub use bridge::{BridgeError, BridgeMessage, EventBridge, LocalBridge};
pub use delta::{Delta, DeltaEngine};
pub use hub::{Hub, HubHandle, HubStats, SessionHandle};
pub use protocol::{ClientMessage, Envelope, IncomingEvent, ServerMessage};
pub use service::SyncService;
pub use session::{SessionContext, SessionSettings, run_session};
