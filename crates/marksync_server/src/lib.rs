//! Marksync Server
//!
//! Keeps bookmarks and collections consistent across a user's devices in
//! near real time. Devices hold a persistent WebSocket session; every
//! mutation becomes an immutable event in an append-only log, and a device
//! reconnecting after any gap receives the minimal batch of events needed
//! to converge, with conflicting concurrent edits resolved deterministically
//! and redundant chains collapsed per resource.
//!
//! ## Features
//!
//! - **Watermark-based delta sync**: each device tracks only a
//!   `last_sync_time`; no per-device queues
//! - **Deterministic conflict resolution**: last-write-wins per resource,
//!   delete dominating exact-timestamp ties
//! - **Event optimization**: one representative event per resource per batch
//! - **Multi-instance fan-out**: appended events are published on a bridge
//!   so other server instances can push to their own sessions
//!
//! ## Environment Variables
//!
//! - `HOST`: Server host (default: 0.0.0.0)
//! - `PORT`: Server port (default: 4040)
//! - `DATABASE_PATH`: Path to SQLite database (default: ./marksync.db)
//! - `HEARTBEAT_INTERVAL_SECS`: Heartbeat ping interval (default: 20)
//! - `READ_TIMEOUT_SECS`: Read deadline, must exceed the heartbeat
//!   interval (default: 60)
//! - `WRITE_TIMEOUT_SECS`: Deadline for a single socket write (default: 10)
//! - `SESSION_BUFFER`: Per-session outbound queue capacity (default: 64)
//! - `MAX_PAYLOAD_BYTES`: Event payload size limit (default: 65536)
//! - `EVENT_RETENTION_DAYS`: Days to keep delivered events (default: 30)
//! - `CORS_ORIGINS`: Comma-separated list of allowed origins

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod sync;

pub use config::Config;
pub use error::SyncError;
