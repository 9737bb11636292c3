//! Per-connection session: two cooperating tasks bound to the socket's
//! lifetime. The read task deserializes inbound frames and hands them to
//! the sync service; the write task drains the outbound queue and sends
//! heartbeat pings on an interval shorter than the read deadline. Both
//! share one cancellation signal, so either side failing stops the other.

use crate::sync::hub::{HubHandle, SessionHandle};
use crate::sync::protocol::{ClientMessage, Envelope, ServerMessage};
use crate::sync::service::SyncService;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitStream;
use futures::{Sink, SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, timeout, timeout_at};
use tracing::{debug, info, warn};

/// Identity a session acts under, fixed at handshake
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub user_id: String,
    pub device_id: String,
}

/// Per-session timing and buffering knobs, taken from `Config`
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub heartbeat_interval: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub outbound_buffer: usize,
}

/// Drive one established connection until it closes. Registers with the
/// hub on entry and always unregisters on the way out.
pub async fn run_session(
    socket: WebSocket,
    service: Arc<SyncService>,
    hub: HubHandle,
    user_id: String,
    device_id: String,
    settings: SessionSettings,
) {
    let (out_tx, out_rx) = mpsc::channel(settings.outbound_buffer);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let cancel = Arc::new(cancel_tx);

    let handle = SessionHandle::new(
        user_id.clone(),
        device_id.clone(),
        out_tx.clone(),
        cancel.clone(),
    );
    let ctx = SessionContext {
        session_id: handle.session_id.clone(),
        user_id,
        device_id,
    };

    hub.register(handle).await;
    info!(
        "Session connected: user={}, device={}, session={}",
        ctx.user_id, ctx.device_id, ctx.session_id
    );

    let (ws_tx, ws_rx) = socket.split();

    let write_task = tokio::spawn(write_loop(
        ws_tx,
        out_rx,
        cancel.clone(),
        cancel_rx.clone(),
        settings.heartbeat_interval,
        settings.write_timeout,
    ));

    read_loop(
        ws_rx,
        service,
        &ctx,
        out_tx,
        cancel_rx,
        settings.read_timeout,
    )
    .await;

    // Whatever ended the read loop ends the session
    let _ = cancel.send(true);
    hub.unregister(&ctx.user_id, &ctx.session_id).await;
    let _ = write_task.await;

    info!(
        "Session disconnected: user={}, device={}, session={}",
        ctx.user_id, ctx.device_id, ctx.session_id
    );
}

async fn write_loop<S>(
    mut ws_tx: S,
    mut out_rx: mpsc::Receiver<ServerMessage>,
    cancel: Arc<watch::Sender<bool>>,
    mut cancelled: watch::Receiver<bool>,
    heartbeat_interval: Duration,
    write_timeout: Duration,
) where
    S: Sink<Message> + Unpin,
{
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so the heartbeat starts one
    // interval after connect.
    heartbeat.tick().await;

    loop {
        tokio::select! {
            msg = out_rx.recv() => match msg {
                Some(msg) => {
                    if !send_frame(&mut ws_tx, Message::Text(msg.to_frame().into()), write_timeout).await {
                        break;
                    }
                }
                None => break,
            },
            _ = heartbeat.tick() => {
                if !send_frame(
                    &mut ws_tx,
                    Message::Text(ServerMessage::Ping.to_frame().into()),
                    write_timeout,
                )
                .await
                {
                    break;
                }
            }
            changed = cancelled.changed() => {
                if changed.is_err() || *cancelled.borrow() {
                    let _ = send_frame(&mut ws_tx, Message::Close(None), write_timeout).await;
                    break;
                }
            }
        }
    }

    // A write failure must also stop the read task
    let _ = cancel.send(true);
}

/// Send one frame under the write deadline. A peer with a stalled TCP
/// window must not park the write task inside a select branch where the
/// cancel signal cannot reach it.
async fn send_frame<S>(ws_tx: &mut S, frame: Message, write_timeout: Duration) -> bool
where
    S: Sink<Message> + Unpin,
{
    match timeout(write_timeout, ws_tx.send(frame)).await {
        Ok(Ok(())) => true,
        Ok(Err(_)) => false,
        Err(_) => {
            warn!("Write deadline exceeded, closing session");
            false
        }
    }
}

async fn read_loop(
    mut ws_rx: SplitStream<WebSocket>,
    service: Arc<SyncService>,
    ctx: &SessionContext,
    out_tx: mpsc::Sender<ServerMessage>,
    mut cancelled: watch::Receiver<bool>,
    read_timeout: Duration,
) {
    let mut deadline = Instant::now() + read_timeout;

    loop {
        let frame = tokio::select! {
            frame = timeout_at(deadline, ws_rx.next()) => frame,
            changed = cancelled.changed() => {
                if changed.is_err() || *cancelled.borrow() {
                    break;
                }
                continue;
            }
        };

        let msg = match frame {
            Err(_) => {
                warn!(
                    "Read deadline exceeded (missed heartbeat): user={}, device={}",
                    ctx.user_id, ctx.device_id
                );
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(
                    "Socket error: user={}, device={}: {}",
                    ctx.user_id, ctx.device_id, e
                );
                break;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => {
                let parsed = match Envelope::parse(text.as_str()) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        // Malformed frames are dropped, never fatal
                        warn!(
                            "Dropping malformed frame: user={}, device={}: {}",
                            ctx.user_id, ctx.device_id, e
                        );
                        continue;
                    }
                };

                if parsed == ClientMessage::Pong {
                    deadline = Instant::now() + read_timeout;
                    continue;
                }

                if let Some(reply) = service.handle_sync_message(ctx, parsed).await {
                    if out_tx.send(reply).await.is_err() {
                        break;
                    }
                }
            }
            // Transport-level pong also proves liveness
            Message::Pong(_) => {
                deadline = Instant::now() + read_timeout;
            }
            // axum answers transport pings itself
            Message::Ping(_) => {}
            Message::Close(_) => {
                debug!(
                    "Client requested close: user={}, device={}",
                    ctx.user_id, ctx.device_id
                );
                break;
            }
            Message::Binary(_) => {
                debug!(
                    "Dropping unexpected binary frame: user={}, device={}",
                    ctx.user_id, ctx.device_id
                );
            }
        }
    }
}
