//! Per-connection handler: join, then dispatch RPC messages and
//! stream events and agent audio back.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use reef_common::{PeerId, RoomId};
use reef_game::{RoomOutput, RoomRegistry, VoiceActivitySegment};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use crate::protocol::{ClientMessage, ServerMessage};

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Frames queued toward one client.
enum Outgoing {
    Text(String),
    Binary(Vec<u8>),
}

fn text(msg: &ServerMessage) -> Outgoing {
    Outgoing::Text(serde_json::to_string(msg).unwrap())
}

struct ConnCtx {
    registry: Arc<RoomRegistry>,
    room_id: RoomId,
    peer_id: PeerId,
    name: String,
    out_tx: mpsc::Sender<Outgoing>,
    cancel: CancellationToken,
}

/// Handle a single WebSocket client for its whole lifetime.
pub async fn handle_connection(
    ws: WebSocketStream<TcpStream>,
    addr: SocketAddr,
    registry: Arc<RoomRegistry>,
) {
    let (mut sink, mut stream) = ws.split();

    // 1. The first message must join a room.
    let Some((room_id, name)) = read_join(&mut stream, addr).await else {
        return;
    };

    let peer_id = match registry.join(&room_id, name.clone()) {
        Ok(peer_id) => peer_id,
        Err(e) => {
            let _ = send(&mut sink, &ServerMessage::Error { message: e.to_string() }).await;
            return;
        }
    };

    tracing::info!(peer = %addr, room = %room_id, player = %name, "client joined");

    let (out_tx, mut out_rx) = mpsc::channel::<Outgoing>(256);
    let cancel = CancellationToken::new();
    let ctx = ConnCtx {
        registry: Arc::clone(&registry),
        room_id: room_id.clone(),
        peer_id: peer_id.clone(),
        name,
        out_tx,
        cancel: cancel.clone(),
    };

    let _ = send(
        &mut sink,
        &ServerMessage::Joined {
            room_id: room_id.to_string(),
            peer_id: peer_id.to_string(),
        },
    )
    .await;

    // 2. Pump until either side goes away.
    loop {
        tokio::select! {
            Some(out) = out_rx.recv() => {
                let frame = match out {
                    Outgoing::Text(json) => Message::Text(json.into()),
                    Outgoing::Binary(bytes) => Message::Binary(bytes.into()),
                };
                if sink.send(frame).await.is_err() {
                    break;
                }
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(json))) => {
                        match serde_json::from_str::<ClientMessage>(&json) {
                            Ok(msg) => dispatch(&ctx, msg).await,
                            Err(e) => {
                                let _ = ctx.out_tx.send(text(&ServerMessage::Error {
                                    message: format!("bad message: {e}"),
                                })).await;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(peer = %addr, error = %e, "WS error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    // 3. Cleanup: stop forwarders, then detach the player.
    cancel.cancel();
    if let Err(e) = registry.leave(&room_id, &peer_id).await {
        tracing::debug!(room = %room_id, error = %e, "leave after disconnect");
    }
    tracing::info!(peer = %addr, room = %room_id, "client disconnected");
}

async fn dispatch(ctx: &ConnCtx, msg: ClientMessage) {
    let reply = match msg {
        ClientMessage::JoinRoom { .. } => ServerMessage::Error {
            message: "already joined".into(),
        },

        ClientMessage::GetStories => ServerMessage::Stories {
            stories: ctx.registry.catalog().summaries(),
        },

        ClientMessage::SelectStory { story_id } => {
            match ctx.registry.select_story(&ctx.room_id, story_id, &ctx.name) {
                Ok(()) => ServerMessage::Ack {
                    message: "story selected".into(),
                },
                Err(e) => ServerMessage::Error { message: e.to_string() },
            }
        }

        ClientMessage::StartGame => match ctx.registry.start_game(&ctx.room_id).await {
            Ok(()) => ServerMessage::Ack {
                message: "game started".into(),
            },
            Err(e) => ServerMessage::Error { message: e.to_string() },
        },

        ClientMessage::StopGame => match ctx.registry.stop_game(&ctx.room_id).await {
            Ok(()) => ServerMessage::Ack {
                message: "game stopped".into(),
            },
            Err(e) => ServerMessage::Error { message: e.to_string() },
        },

        ClientMessage::MuteAgent { muted } => {
            match ctx.registry.mute_agent(&ctx.room_id, muted).await {
                Ok(effective) => ServerMessage::Ack {
                    message: format!("agent {}", if effective { "muted" } else { "unmuted" }),
                },
                Err(e) => ServerMessage::Error { message: e.to_string() },
            }
        }

        ClientMessage::Subscribe { last_event_id } => {
            subscribe_events(ctx, last_event_id).await;
            return;
        }

        ClientMessage::SubscribeAudio => match subscribe_audio(ctx) {
            Ok(()) => ServerMessage::Ack {
                message: "audio subscribed".into(),
            },
            Err(message) => ServerMessage::Error { message },
        },

        ClientMessage::VoiceActivity {
            is_speech_active,
            audio,
            duration_ms,
        } => {
            match BASE64.decode(audio.as_bytes()) {
                Ok(audio) => {
                    if let Ok(room) = ctx.registry.get(&ctx.room_id) {
                        room.on_voice_activity(VoiceActivitySegment {
                            peer_id: ctx.peer_id.clone(),
                            is_speech_active,
                            audio,
                            duration_ms,
                        });
                    }
                    return;
                }
                Err(_) => ServerMessage::Error {
                    message: "invalid audio encoding".into(),
                },
            }
        }
    };

    let _ = ctx.out_tx.send(text(&reply)).await;
}

/// Replay history past the client's cursor, then forward live events
/// until the connection goes away.
async fn subscribe_events(ctx: &ConnCtx, last_event_id: Option<u64>) {
    let (history, mut rx) =
        ctx.registry
            .event_log()
            .tail(&ctx.room_id, last_event_id, ctx.cancel.clone());

    for entry in history {
        if ctx.out_tx.send(text(&ServerMessage::event(entry))).await.is_err() {
            return;
        }
    }

    let out_tx = ctx.out_tx.clone();
    tokio::spawn(async move {
        while let Some(entry) = rx.recv().await {
            if out_tx.send(text(&ServerMessage::event(entry))).await.is_err() {
                return;
            }
        }
    });
}

/// Forward the running game's paced agent audio as binary frames. The
/// forwarder ends with the game; the client re-subscribes next game.
fn subscribe_audio(ctx: &ConnCtx) -> Result<(), String> {
    let room = ctx.registry.get(&ctx.room_id).map_err(|e| e.to_string())?;
    let mut rx = room.subscribe_audio().map_err(|e| e.to_string())?;

    let out_tx = ctx.out_tx.clone();
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        loop {
            let output = tokio::select! {
                _ = cancel.cancelled() => return,
                output = rx.recv() => output,
            };
            let sent = match output {
                Ok(RoomOutput::Frame(frame)) => out_tx.send(Outgoing::Binary(frame)).await,
                Ok(RoomOutput::Interrupt) => {
                    out_tx.send(text(&ServerMessage::AgentInterrupted)).await
                }
                // Dropped frames are just late; keep going.
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            };
            if sent.is_err() {
                return;
            }
        }
    });
    Ok(())
}

/// Read and parse the first message as a join.
async fn read_join(
    stream: &mut SplitStream<WebSocketStream<TcpStream>>,
    addr: SocketAddr,
) -> Option<(RoomId, String)> {
    let frame = tokio::time::timeout(JOIN_TIMEOUT, stream.next()).await;

    match frame {
        Ok(Some(Ok(Message::Text(json)))) => match serde_json::from_str::<ClientMessage>(&json) {
            Ok(ClientMessage::JoinRoom { room_id, name }) => Some((RoomId::from(room_id), name)),
            Ok(_) => {
                tracing::warn!(peer = %addr, "first message was not joinRoom");
                None
            }
            Err(e) => {
                tracing::warn!(peer = %addr, error = %e, "invalid join message");
                None
            }
        },
        Ok(Some(Ok(_))) => {
            tracing::warn!(peer = %addr, "expected text join, got binary");
            None
        }
        Ok(Some(Err(e))) => {
            tracing::warn!(peer = %addr, error = %e, "WS error during join");
            None
        }
        Ok(None) => {
            tracing::debug!(peer = %addr, "connection closed before join");
            None
        }
        Err(_) => {
            tracing::warn!(peer = %addr, "join timeout");
            None
        }
    }
}

async fn send(
    sink: &mut SplitSink<WebSocketStream<TcpStream>, Message>,
    msg: &ServerMessage,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let json = serde_json::to_string(msg).unwrap();
    sink.send(Message::Text(json.into())).await
}
