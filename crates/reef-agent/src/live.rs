//! WebSocket client for the realtime conversation API.
//!
//! One [`LiveAgentApi::open`] call produces one connection; there is no
//! reconnect here. The session lifecycle manager owns the
//! reconnect-with-resumption policy and simply opens a new connection
//! with the continuation handle when it needs one.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::wire;
use crate::{AgentApi, AgentConnection, AgentError, AgentSessionConfig, ClientCommand, ServerEvent};

const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Close code reported when the stream ends without a close frame.
const ABNORMAL_CLOSE: u16 = 1006;

/// Connection settings for the realtime API.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub endpoint: String,
    pub connect_timeout: Duration,
}

impl LiveConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            voice: voice.into(),
            endpoint: DEFAULT_ENDPOINT.into(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    fn ws_url(&self) -> String {
        format!("{}?key={}", self.endpoint, self.api_key)
    }
}

/// Production [`AgentApi`] backed by the realtime WebSocket endpoint.
pub struct LiveAgentApi {
    config: LiveConfig,
}

impl LiveAgentApi {
    pub fn new(config: LiveConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AgentApi for LiveAgentApi {
    async fn open(&self, config: AgentSessionConfig) -> Result<AgentConnection, AgentError> {
        if self.config.api_key.is_empty() {
            return Err(AgentError::MissingCredential("agent API key".into()));
        }

        let url = self.config.ws_url();
        let connect = tokio_tungstenite::connect_async(&url);
        let (mut ws, _) = tokio::time::timeout(self.config.connect_timeout, connect)
            .await
            .map_err(|_| AgentError::Connect("connect timed out".into()))?
            .map_err(|e| AgentError::Connect(e.to_string()))?;

        let setup = wire::encode_setup(&self.config.model, &self.config.voice, &config);
        ws.send(WsMessage::Text(setup.into()))
            .await
            .map_err(|e| AgentError::Connect(format!("setup send failed: {e}")))?;

        info!(
            model = %self.config.model,
            resumed = config.resumption_token.is_some(),
            "agent session opened"
        );

        let (command_tx, command_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(256);
        tokio::spawn(session_loop(ws, command_rx, event_tx));

        Ok(AgentConnection {
            commands: command_tx,
            events: event_rx,
        })
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Pumps commands out and server messages in until either side closes.
async fn session_loop(
    ws: WsStream,
    mut command_rx: mpsc::Receiver<ClientCommand>,
    event_tx: mpsc::Sender<ServerEvent>,
) {
    let (mut write, mut read) = ws.split();
    let mut commands_open = true;

    loop {
        tokio::select! {
            cmd = command_rx.recv(), if commands_open => {
                let frame = match cmd {
                    Some(ClientCommand::Audio(audio)) => Some(wire::encode_audio(&audio)),
                    Some(ClientCommand::Text(text)) => Some(wire::encode_text_turn(&text)),
                    Some(ClientCommand::EndUserTurn) => Some(wire::encode_activity_end()),
                    Some(ClientCommand::ToolResponse { id, result }) => {
                        Some(wire::encode_tool_response(&id, &result))
                    }
                    Some(ClientCommand::Close) | None => {
                        // Half-close: stop sending, keep draining the
                        // read side until the server's close frame.
                        commands_open = false;
                        let _ = write.send(WsMessage::Close(None)).await;
                        None
                    }
                };
                if let Some(frame) = frame {
                    if let Err(e) = write.send(WsMessage::Text(frame.into())).await {
                        warn!(error = %e, "agent send failed");
                        let _ = event_tx
                            .send(ServerEvent::Closed {
                                code: ABNORMAL_CLOSE,
                                reason: format!("send failed: {e}"),
                            })
                            .await;
                        return;
                    }
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        forward_frame(text.as_str(), &event_tx).await;
                    }
                    Some(Ok(WsMessage::Binary(bytes))) => {
                        // Some deployments deliver JSON frames as binary.
                        match std::str::from_utf8(&bytes) {
                            Ok(text) => forward_frame(text, &event_tx).await,
                            Err(_) => debug!(len = bytes.len(), "ignoring non-UTF8 binary frame"),
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(f) => (u16::from(f.code), f.reason.to_string()),
                            None => (1000, String::new()),
                        };
                        info!(code, reason = %reason, "agent connection closed");
                        let _ = event_tx.send(ServerEvent::Closed { code, reason }).await;
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "agent stream error");
                        let _ = event_tx
                            .send(ServerEvent::Closed {
                                code: ABNORMAL_CLOSE,
                                reason: e.to_string(),
                            })
                            .await;
                        return;
                    }
                    None => {
                        let _ = event_tx
                            .send(ServerEvent::Closed {
                                code: ABNORMAL_CLOSE,
                                reason: "stream ended".into(),
                            })
                            .await;
                        return;
                    }
                }
            }
        }
    }
}

async fn forward_frame(text: &str, event_tx: &mpsc::Sender<ServerEvent>) {
    match wire::decode_server_message(text) {
        Ok(events) => {
            for event in events {
                if event_tx.send(event).await.is_err() {
                    return;
                }
            }
        }
        // Malformed frames are dropped at the boundary; the state
        // machine only ever sees validated events.
        Err(e) => warn!(error = %e, "dropping malformed agent frame"),
    }
}
