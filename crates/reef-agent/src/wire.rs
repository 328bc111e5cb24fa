//! Wire format of the realtime conversation API.
//!
//! Inbound frames are decoded through typed serde structs and rejected
//! when malformed, so nothing shapeless reaches the session state
//! machine. Outbound frames are built with `serde_json::json!`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{AgentError, AgentSessionConfig, ServerEvent};

pub const AUDIO_MIME_TYPE: &str = "audio/pcm;rate=16000";

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ServerMessage {
    #[serde(default)]
    setup_complete: Option<Value>,
    #[serde(default)]
    server_content: Option<ServerContent>,
    #[serde(default)]
    tool_call: Option<ToolCallMessage>,
    #[serde(default)]
    session_resumption_update: Option<ResumptionUpdate>,
    #[serde(default)]
    usage_metadata: Option<Value>,
    #[serde(default)]
    go_away: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    output_transcription: Option<OutputTranscription>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
}

#[derive(Debug, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutputTranscription {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallMessage {
    #[serde(default)]
    function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResumptionUpdate {
    #[serde(default)]
    new_handle: Option<String>,
    #[serde(default)]
    resumable: bool,
}

/// Decode one inbound text frame into zero or more server events.
///
/// A frame that is not valid JSON or does not match the known message
/// shape is a protocol error; unknown optional sections (setup ack,
/// usage metadata) decode to no events.
pub fn decode_server_message(text: &str) -> Result<Vec<ServerEvent>, AgentError> {
    let message: ServerMessage = serde_json::from_str(text)
        .map_err(|e| AgentError::Protocol(format!("malformed server message: {e}")))?;

    let mut events = Vec::new();

    if let Some(content) = message.server_content {
        if let Some(transcription) = content.output_transcription {
            if !transcription.text.is_empty() {
                events.push(ServerEvent::Transcript(transcription.text));
            }
        }
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(text) = part.text {
                    if !text.is_empty() {
                        events.push(ServerEvent::Transcript(text));
                    }
                }
                if let Some(inline) = part.inline_data {
                    let audio = BASE64.decode(inline.data.as_bytes()).map_err(|e| {
                        AgentError::Protocol(format!("invalid audio payload: {e}"))
                    })?;
                    if let Some(mime) = &inline.mime_type {
                        if !mime.starts_with("audio/pcm") {
                            tracing::debug!(mime, "ignoring non-PCM inline data");
                            continue;
                        }
                    }
                    events.push(ServerEvent::Audio(audio));
                }
            }
        }
        if content.interrupted {
            events.push(ServerEvent::Interrupted);
        }
        if content.turn_complete {
            events.push(ServerEvent::TurnComplete);
        }
    }

    if let Some(tool_call) = message.tool_call {
        for call in tool_call.function_calls {
            events.push(ServerEvent::ToolCall {
                id: call.id,
                name: call.name,
            });
        }
    }

    if let Some(update) = message.session_resumption_update {
        if update.resumable {
            if let Some(handle) = update.new_handle {
                events.push(ServerEvent::ResumptionToken(handle));
            }
        }
    }

    if message.setup_complete.is_some() {
        tracing::debug!("session setup acknowledged");
    }
    if message.go_away.is_some() {
        tracing::debug!("backend announced imminent disconnect");
    }
    let _ = message.usage_metadata;

    Ok(events)
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Session setup frame, the first message on a fresh connection.
pub fn encode_setup(model: &str, voice: &str, config: &AgentSessionConfig) -> String {
    let mut setup = json!({
        "model": format!("models/{model}"),
        "generationConfig": {
            "responseModalities": ["AUDIO"],
            "speechConfig": {
                "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice } }
            }
        },
        "systemInstruction": {
            "parts": [{ "text": config.instructions }]
        },
        "tools": [{
            "functionDeclarations": [{
                "name": config.end_game_tool.name,
                "description": config.end_game_tool.description,
            }]
        }],
        "outputAudioTranscription": {},
        "contextWindowCompression": {
            "slidingWindow": {}
        },
        "sessionResumption": {}
    });

    if let Some(token) = &config.resumption_token {
        setup["sessionResumption"] = json!({ "handle": token });
    }

    json!({ "setup": setup }).to_string()
}

/// Realtime PCM input from the current floor holder.
pub fn encode_audio(audio: &[u8]) -> String {
    json!({
        "realtimeInput": {
            "audio": {
                "data": BASE64.encode(audio),
                "mimeType": AUDIO_MIME_TYPE,
            }
        }
    })
    .to_string()
}

/// A complete text turn from the user side.
pub fn encode_text_turn(text: &str) -> String {
    json!({
        "clientContent": {
            "turns": [{ "role": "user", "parts": [{ "text": text }] }],
            "turnComplete": true,
        }
    })
    .to_string()
}

/// Explicit end-of-user-activity marker, sent when the floor holder's
/// speech ends so the agent responds without waiting for a VAD timeout.
pub fn encode_activity_end() -> String {
    json!({ "realtimeInput": { "activityEnd": {} } }).to_string()
}

/// Acknowledgement of a tool invocation.
pub fn encode_tool_response(id: &str, result: &str) -> String {
    json!({
        "toolResponse": {
            "functionResponses": [{ "id": id, "response": { "result": result } }]
        }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EndGameTool;

    fn session_config(token: Option<&str>) -> AgentSessionConfig {
        AgentSessionConfig {
            instructions: "You are the storyteller.".into(),
            first_message: "Welcome.".into(),
            end_game_tool: EndGameTool {
                name: "end_game".into(),
                description: "Call when the mystery is solved.".into(),
            },
            time_limit_secs: 600,
            resumption_token: token.map(String::from),
        }
    }

    #[test]
    fn decodes_transcript_and_turn_complete() {
        let frame = r#"{
            "serverContent": {
                "outputTranscription": { "text": "It was " },
                "turnComplete": true
            }
        }"#;
        let events = decode_server_message(frame).unwrap();
        assert_eq!(
            events,
            vec![
                ServerEvent::Transcript("It was ".into()),
                ServerEvent::TurnComplete,
            ]
        );
    }

    #[test]
    fn decodes_inline_audio() {
        let payload = BASE64.encode([1u8, 2, 3, 4]);
        let frame = format!(
            r#"{{"serverContent":{{"modelTurn":{{"parts":[{{"inlineData":{{"mimeType":"audio/pcm;rate=16000","data":"{payload}"}}}}]}}}}}}"#
        );
        let events = decode_server_message(&frame).unwrap();
        assert_eq!(events, vec![ServerEvent::Audio(vec![1, 2, 3, 4])]);
    }

    #[test]
    fn interruption_ordered_before_turn_complete() {
        let frame = r#"{"serverContent":{"interrupted":true,"turnComplete":true}}"#;
        let events = decode_server_message(frame).unwrap();
        assert_eq!(events, vec![ServerEvent::Interrupted, ServerEvent::TurnComplete]);
    }

    #[test]
    fn decodes_tool_calls() {
        let frame = r#"{"toolCall":{"functionCalls":[{"id":"c1","name":"end_game"}]}}"#;
        let events = decode_server_message(frame).unwrap();
        assert_eq!(
            events,
            vec![ServerEvent::ToolCall {
                id: "c1".into(),
                name: "end_game".into()
            }]
        );
    }

    #[test]
    fn resumption_handle_requires_resumable() {
        let frame = r#"{"sessionResumptionUpdate":{"newHandle":"h1","resumable":true}}"#;
        let events = decode_server_message(frame).unwrap();
        assert_eq!(events, vec![ServerEvent::ResumptionToken("h1".into())]);

        let frame = r#"{"sessionResumptionUpdate":{"newHandle":"h2","resumable":false}}"#;
        assert!(decode_server_message(frame).unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!(decode_server_message("not json").is_err());
        assert!(decode_server_message(r#"{"toolCall":{"functionCalls":[{"id":1}]}}"#).is_err());
        assert!(decode_server_message(r#"{"unexpectedTopLevel":{}}"#).is_err());
    }

    #[test]
    fn rejects_bad_audio_base64() {
        let frame = r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"data":"!!"}}]}}}"#;
        assert!(decode_server_message(frame).is_err());
    }

    #[test]
    fn setup_includes_tool_and_instructions() {
        let text = encode_setup("test-model", "Aoede", &session_config(None));
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["setup"]["model"], "models/test-model");
        assert_eq!(
            value["setup"]["tools"][0]["functionDeclarations"][0]["name"],
            "end_game"
        );
        assert!(value["setup"]["sessionResumption"]["handle"].is_null());
    }

    #[test]
    fn setup_carries_resumption_handle() {
        let text = encode_setup("test-model", "Aoede", &session_config(Some("tok-9")));
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["setup"]["sessionResumption"]["handle"], "tok-9");
    }

    #[test]
    fn audio_frame_round_trips() {
        let text = encode_audio(&[9, 8, 7]);
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        let data = value["realtimeInput"]["audio"]["data"].as_str().unwrap();
        assert_eq!(BASE64.decode(data).unwrap(), vec![9, 8, 7]);
        assert_eq!(value["realtimeInput"]["audio"]["mimeType"], AUDIO_MIME_TYPE);
    }

    #[test]
    fn tool_response_shape() {
        let text = encode_tool_response("c1", "Game ended");
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        let response = &value["toolResponse"]["functionResponses"][0];
        assert_eq!(response["id"], "c1");
        assert_eq!(response["response"]["result"], "Game ended");
    }
}
