//! Connection hub: the registry of live sessions. All registry mutation
//! happens inside one control loop consuming a command channel; session
//! tasks never touch the map. Broadcasts are best-effort: a session whose
//! outbound queue is full is force-closed and removed rather than blocking
//! the loop; the client's next `sync_request` recovers anything missed.

use crate::sync::protocol::ServerMessage;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What the hub holds for one live connection. The session itself owns the
/// socket; the handle only carries the outbound queue and a cancellation
/// signal shared with the session's read/write tasks.
#[derive(Clone)]
pub struct SessionHandle {
    pub session_id: String,
    pub user_id: String,
    pub device_id: String,
    outbound: mpsc::Sender<ServerMessage>,
    cancel: Arc<watch::Sender<bool>>,
}

impl SessionHandle {
    pub fn new(
        user_id: String,
        device_id: String,
        outbound: mpsc::Sender<ServerMessage>,
        cancel: Arc<watch::Sender<bool>>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            user_id,
            device_id,
            outbound,
            cancel,
        }
    }

    /// Queue a message without blocking the hub loop
    pub fn try_push(&self, message: ServerMessage) -> Result<(), TrySendError<ServerMessage>> {
        self.outbound.try_send(message)
    }

    /// Signal both session tasks to stop
    pub fn close(&self) {
        let _ = self.cancel.send(true);
    }
}

/// Counters exposed on the stats endpoint
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HubStats {
    pub active_sessions: usize,
    pub active_users: usize,
}

enum HubCommand {
    Register(SessionHandle),
    Unregister {
        user_id: String,
        session_id: String,
    },
    Broadcast {
        user_id: String,
        exclude_device: Option<String>,
        message: ServerMessage,
    },
    Stats(oneshot::Sender<HubStats>),
}

/// The control loop half of the hub. Owns the registry exclusively.
pub struct Hub {
    commands: mpsc::Receiver<HubCommand>,
    sessions: HashMap<String, Vec<SessionHandle>>,
    shutdown: watch::Receiver<bool>,
}

/// Cheap clonable sender used by sessions and the sync service
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl Hub {
    pub fn new(shutdown: watch::Receiver<bool>) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(256);
        (
            Self {
                commands: rx,
                sessions: HashMap::new(),
                shutdown,
            },
            HubHandle { tx },
        )
    }

    /// Consume commands until shutdown, then close every active session.
    pub async fn run(mut self) {
        info!("Connection hub started");
        loop {
            let cmd = tokio::select! {
                cmd = self.commands.recv() => cmd,
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };
            match cmd {
                Some(cmd) => self.handle_command(cmd),
                None => break,
            }
        }

        let closing: usize = self.sessions.values().map(Vec::len).sum();
        if closing > 0 {
            info!("Hub shutting down, closing {} sessions", closing);
        }
        for handle in self.sessions.values().flatten() {
            handle.close();
        }
        self.sessions.clear();
        info!("Connection hub stopped");
    }

    fn handle_command(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register(handle) => {
                debug!(
                    "Session registered: user={}, device={}, session={}",
                    handle.user_id, handle.device_id, handle.session_id
                );
                self.sessions
                    .entry(handle.user_id.clone())
                    .or_default()
                    .push(handle);
            }
            HubCommand::Unregister {
                user_id,
                session_id,
            } => {
                if let Some(handles) = self.sessions.get_mut(&user_id) {
                    handles.retain(|h| h.session_id != session_id);
                    if handles.is_empty() {
                        self.sessions.remove(&user_id);
                    }
                }
                debug!("Session unregistered: user={}, session={}", user_id, session_id);
            }
            HubCommand::Broadcast {
                user_id,
                exclude_device,
                message,
            } => self.broadcast(&user_id, exclude_device.as_deref(), message),
            HubCommand::Stats(reply) => {
                let stats = HubStats {
                    active_sessions: self.sessions.values().map(Vec::len).sum(),
                    active_users: self.sessions.len(),
                };
                let _ = reply.send(stats);
            }
        }
    }

    fn broadcast(&mut self, user_id: &str, exclude_device: Option<&str>, message: ServerMessage) {
        let Some(handles) = self.sessions.get_mut(user_id) else {
            return;
        };

        let mut evicted = Vec::new();
        for handle in handles.iter() {
            if exclude_device.is_some_and(|d| d == handle.device_id) {
                continue;
            }
            match handle.try_push(message.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    // Slow consumer: force-close instead of blocking the
                    // broadcaster. The device recovers via its next
                    // sync_request.
                    warn!(
                        "Outbound buffer full, closing session: user={}, device={}",
                        handle.user_id, handle.device_id
                    );
                    handle.close();
                    evicted.push(handle.session_id.clone());
                }
                Err(TrySendError::Closed(_)) => {
                    evicted.push(handle.session_id.clone());
                }
            }
        }

        if !evicted.is_empty() {
            handles.retain(|h| !evicted.contains(&h.session_id));
            if handles.is_empty() {
                self.sessions.remove(user_id);
            }
        }
    }
}

impl HubHandle {
    pub async fn register(&self, handle: SessionHandle) {
        let _ = self.tx.send(HubCommand::Register(handle)).await;
    }

    pub async fn unregister(&self, user_id: &str, session_id: &str) {
        let _ = self
            .tx
            .send(HubCommand::Unregister {
                user_id: user_id.to_string(),
                session_id: session_id.to_string(),
            })
            .await;
    }

    /// Push a message to every live session of a user, optionally skipping
    /// the origin device.
    pub async fn broadcast_to_user(
        &self,
        user_id: &str,
        exclude_device: Option<&str>,
        message: ServerMessage,
    ) {
        let _ = self
            .tx
            .send(HubCommand::Broadcast {
                user_id: user_id.to_string(),
                exclude_device: exclude_device.map(str::to_string),
                message,
            })
            .await;
    }

    /// Current hub counters; `None` when the hub has shut down
    pub async fn stats(&self) -> Option<HubStats> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(HubCommand::Stats(reply_tx)).await.ok()?;
        reply_rx.await.ok()
    }
}
