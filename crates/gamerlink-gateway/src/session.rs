//! Chat session coordinator.
//!
//! One task per WebSocket. The session walks
//! `Connecting -> Authenticating -> Authorizing -> Active -> Closed`;
//! failures before `Active` close the socket with a policy-violation
//! code and never touch the registry. Once `Active`, the connection is
//! registered under its match id and inbound payloads are handled one at
//! a time: persist first, then broadcast to the whole room (sender
//! included). Every exit path drops the registry membership and the
//! session's store handle.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use gamerlink_db::models::{ChatMessageRow, UserRow, parse_timestamp};
use gamerlink_db::{Database, DbSession};
use gamerlink_types::api::normalize_content;
use gamerlink_types::events::{ChatCommand, ChatEvent};

use crate::auth::TokenVerifier;
use crate::registry::{ConnectionId, ConnectionRegistry, Payload};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a closing session waits for its close frame to be flushed.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Everything a chat session needs, built once at start-up.
#[derive(Clone)]
pub struct ChatGateway {
    pub db: Arc<Database>,
    pub registry: ConnectionRegistry,
    pub verifier: Arc<dyn TokenVerifier>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Authorizing,
    Active,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Authorizing => "authorizing",
            Self::Active => "active",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Per-session identity, owned by the coordinator rather than the socket.
#[derive(Debug, Clone)]
struct SessionContext {
    conn_id: ConnectionId,
    match_id: i64,
    user_id: i64,
    email: String,
}

/// Why the active phase ended.
enum Exit {
    /// Transport closed or failed; nothing left to tell the client.
    Disconnected,
    /// The server ends the session with this close frame.
    Close { code: u16, reason: &'static str },
}

struct Lifecycle {
    conn_id: ConnectionId,
    match_id: i64,
    state: SessionState,
}

impl Lifecycle {
    fn advance(&mut self, next: SessionState) {
        debug!(
            "Session {} (match {}): {} -> {}",
            self.conn_id, self.match_id, self.state, next
        );
        self.state = next;
    }
}

/// Build the wire event for a persisted message.
pub fn message_event(row: &ChatMessageRow) -> ChatEvent {
    ChatEvent::Message {
        id: row.id,
        match_id: row.match_id,
        sender_id: row.sender_id,
        content: row.content.clone(),
        created_at: parse_timestamp(&row.created_at),
        sender_identity: row.sender_email.clone(),
    }
}

/// Serialize `event` once and fan it out to every connection in its room.
pub fn broadcast_event(registry: &ConnectionRegistry, match_id: i64, event: &ChatEvent) -> anyhow::Result<usize> {
    let payload: Payload = Arc::from(event.to_json()?);
    Ok(registry.broadcast(match_id, payload, None))
}

/// Drive one chat WebSocket from accept to close.
pub async fn handle_chat_socket(
    mut socket: WebSocket,
    gateway: ChatGateway,
    match_id: i64,
    token: Option<String>,
) {
    let mut lifecycle = Lifecycle {
        conn_id: ConnectionId::new(),
        match_id,
        state: SessionState::Connecting,
    };

    lifecycle.advance(SessionState::Authenticating);
    let Some(claims) = token.as_deref().and_then(|t| gateway.verifier.verify(t)) else {
        warn!("Chat socket for match {} failed authentication, closing", match_id);
        close_unsplit(socket, close_code::POLICY, "authentication failed").await;
        lifecycle.advance(SessionState::Closed);
        return;
    };

    lifecycle.advance(SessionState::Authorizing);
    let (db_session, user) = match authorize(gateway.db.clone(), claims.sub, match_id).await {
        Ok(Some(authorized)) => authorized,
        Ok(None) => {
            warn!("User {} is not allowed into match {}, closing", claims.sub, match_id);
            close_unsplit(socket, close_code::POLICY, "not a participant of this match").await;
            lifecycle.advance(SessionState::Closed);
            return;
        }
        Err(e) => {
            error!("Authorizing user {} for match {} failed: {:#}", claims.sub, match_id, e);
            close_unsplit(socket, close_code::ERROR, "internal error").await;
            lifecycle.advance(SessionState::Closed);
            return;
        }
    };

    let (registration, outbound_rx) = gateway.registry.join(match_id);
    lifecycle.conn_id = registration.id();
    lifecycle.advance(SessionState::Active);

    let ctx = SessionContext {
        conn_id: registration.id(),
        match_id,
        user_id: user.id,
        email: user.email,
    };
    info!("{} ({}) joined chat room {} as {}", ctx.email, ctx.user_id, ctx.match_id, ctx.conn_id);

    let ready = ChatEvent::Ready {
        match_id,
        user_id: ctx.user_id,
    };
    let sent = match ready.to_json() {
        Ok(text) => socket.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            error!("Failed to encode ready event: {}", e);
            false
        }
    };
    if !sent {
        drop(registration);
        lifecycle.advance(SessionState::Closed);
        return;
    }

    let (sender, mut receiver) = socket.split();

    let pong_received = Arc::new(AtomicBool::new(true));
    let (close_tx, close_rx) = oneshot::channel();
    let mut send_task = tokio::spawn(write_loop(sender, outbound_rx, close_rx, pong_received.clone()));

    let exit = tokio::select! {
        exit = read_loop(&mut receiver, &ctx, &gateway, db_session, pong_received) => exit,
        _ = &mut send_task => Exit::Disconnected,
    };

    if let Exit::Close { code, reason } = exit {
        let _ = close_tx.send(CloseFrame {
            code,
            reason: Utf8Bytes::from_static(reason),
        });
        if tokio::time::timeout(CLOSE_GRACE, &mut send_task).await.is_err() {
            debug!("Close frame for {} not flushed in time", ctx.conn_id);
        }
    }
    send_task.abort();

    drop(registration);
    lifecycle.advance(SessionState::Closed);
    info!("{} ({}) left chat room {}", ctx.email, ctx.user_id, ctx.match_id);
}

/// Open the session's store handle and confirm the user may join the room.
/// `Ok(None)` means the user is unknown, inactive, or not a participant.
async fn authorize(db: Arc<Database>, user_id: i64, match_id: i64) -> anyhow::Result<Option<(DbSession, UserRow)>> {
    tokio::task::spawn_blocking(move || -> anyhow::Result<Option<(DbSession, UserRow)>> {
        let mut session = db.open_session()?;

        let Some(user) = session.get_user(user_id)?.filter(|u| u.is_active) else {
            return Ok(None);
        };
        if session.find_participant_match(match_id, user_id)?.is_none() {
            return Ok(None);
        }

        session.mark_room_read(match_id, user_id)?;
        Ok(Some((session, user)))
    })
    .await?
}

async fn close_unsplit(mut socket: WebSocket, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: Utf8Bytes::from_static(reason),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        debug!("Failed to send close frame: {}", e);
    }
}

async fn read_loop(
    receiver: &mut SplitStream<WebSocket>,
    ctx: &SessionContext,
    gateway: &ChatGateway,
    mut db: DbSession,
    pong_received: Arc<AtomicBool>,
) -> Exit {
    while let Some(result) = receiver.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Socket error on {}: {}", ctx.conn_id, e);
                return Exit::Disconnected;
            }
        };

        match msg {
            Message::Text(text) => {
                let Some(content) = parse_inbound(text.as_str()) else {
                    warn!(
                        "{} ({}) sent a malformed chat payload, dropping -- raw: {}",
                        ctx.email,
                        ctx.user_id,
                        truncate(text.as_str(), 200)
                    );
                    continue;
                };

                let (returned, saved) = persist(db, ctx, content).await;
                let Some(returned) = returned else {
                    return Exit::Close {
                        code: close_code::ERROR,
                        reason: "internal error",
                    };
                };
                db = returned;

                let row = match saved {
                    Ok(Some(row)) => row,
                    Ok(None) => {
                        warn!("Match {} no longer accepts messages from {}", ctx.match_id, ctx.user_id);
                        return Exit::Close {
                            code: close_code::POLICY,
                            reason: "not a participant of this match",
                        };
                    }
                    Err(e) => {
                        error!("Failed to persist message in match {}: {:#}", ctx.match_id, e);
                        return Exit::Close {
                            code: close_code::ERROR,
                            reason: "internal error",
                        };
                    }
                };

                match broadcast_event(&gateway.registry, ctx.match_id, &message_event(&row)) {
                    Ok(delivered) => debug!(
                        "Message {} in match {} queued for {} connections",
                        row.id, ctx.match_id, delivered
                    ),
                    Err(e) => {
                        error!("Failed to encode message {}: {}", row.id, e);
                        return Exit::Close {
                            code: close_code::ERROR,
                            reason: "internal error",
                        };
                    }
                }
            }
            Message::Pong(_) => {
                pong_received.store(true, Ordering::Release);
            }
            Message::Close(_) => return Exit::Disconnected,
            _ => {}
        }
    }

    Exit::Disconnected
}

/// Run the blocking insert off the runtime, handing the store handle back.
/// A `None` handle means the blocking task died and the handle is gone.
async fn persist(
    mut db: DbSession,
    ctx: &SessionContext,
    content: String,
) -> (Option<DbSession>, anyhow::Result<Option<ChatMessageRow>>) {
    let (match_id, sender_id) = (ctx.match_id, ctx.user_id);
    let joined = tokio::task::spawn_blocking(move || {
        let saved = db.insert_chat_message(match_id, sender_id, &content);
        (db, saved)
    })
    .await;

    match joined {
        Ok((db, saved)) => (Some(db), saved),
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            (None, Err(e.into()))
        }
    }
}

async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::UnboundedReceiver<Payload>,
    mut close_rx: oneshot::Receiver<CloseFrame>,
    pong_received: Arc<AtomicBool>,
) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            payload = outbound.recv() => {
                let Some(payload) = payload else { break };
                if sender.send(Message::Text(payload.to_string().into())).await.is_err() {
                    break;
                }
            }
            frame = &mut close_rx => {
                if let Ok(frame) = frame {
                    let _ = sender.send(Message::Close(Some(frame))).await;
                }
                break;
            }
            _ = heartbeat.tick() => {
                if pong_received.swap(false, Ordering::Acquire) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                        break;
                    }
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Extract normalized content from an inbound frame. Malformed frames yield `None`.
fn parse_inbound(text: &str) -> Option<String> {
    let cmd: ChatCommand = serde_json::from_str(text).ok()?;
    normalize_content(&cmd.content).map(str::to_owned)
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
