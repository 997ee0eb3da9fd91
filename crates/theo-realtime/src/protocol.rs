// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

//! Wire frames for the streaming conversational service.
//!
//! Messages are internally-tagged JSON (`{"type": "response.create", ...}`).
//! Two top-level enums cover client-to-server and server-to-client
//! directions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Outgoing ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear {},
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseParams>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseParams {
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ResponseParams {
    pub fn with_trigger(trigger: &str, origin: &str) -> Self {
        Self {
            metadata: [
                ("trigger".to_string(), trigger.to_string()),
                ("origin".to_string(), origin.to_string()),
            ]
            .into_iter()
            .collect(),
        }
    }

    pub fn approval_flow(origin: &str) -> Self {
        Self {
            metadata: [
                ("origin".to_string(), origin.to_string()),
                ("approval_flow".to_string(), "true".to_string()),
            ]
            .into_iter()
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ConversationItem {
    #[serde(rename = "message")]
    Message {
        role: String,
        content: Vec<ContentPart>,
    },
    #[serde(rename = "function_call_output")]
    FunctionCallOutput { call_id: String, output: String },
}

impl ConversationItem {
    pub fn user_text(text: impl Into<String>) -> Self {
        ConversationItem::Message {
            role: "user".into(),
            content: vec![ContentPart::InputText { text: text.into() }],
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        ConversationItem::Message {
            role: "assistant".into(),
            content: vec![ContentPart::OutputText { text: text.into() }],
        }
    }

    pub fn user_image(image_b64: &str) -> Self {
        ConversationItem::Message {
            role: "user".into(),
            content: vec![ContentPart::InputImage {
                image_url: format!("data:image/jpeg;base64,{image_b64}"),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "input_text")]
    InputText { text: String },
    #[serde(rename = "output_text")]
    OutputText { text: String },
    #[serde(rename = "input_image")]
    InputImage { image_url: String },
}

/// `session.update.session`: voice, formats, VAD, instructions, tools.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub model: String,
    pub output_modalities: Vec<String>,
    pub audio: SessionAudio,
    pub instructions: String,
    pub tools: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionAudio {
    pub input: SessionAudioInput,
    pub output: SessionAudioOutput,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionAudioInput {
    pub turn_detection: TurnDetection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionAudioOutput {
    pub voice: String,
}

/// Server-side voice-activity-detection parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
    pub threshold: f64,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
    pub create_response: bool,
    pub interrupt_response: bool,
}

// ── Incoming ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: Value,
    },
    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        session: Value,
    },
    #[serde(rename = "response.created")]
    ResponseCreated {},
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { item: OutputItem },
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        #[serde(default)]
        delta: String,
    },
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        #[serde(default)]
        arguments: String,
    },
    #[serde(rename = "response.text.delta")]
    TextDelta {
        #[serde(default)]
        delta: String,
    },
    #[serde(rename = "response.output_audio.delta")]
    OutputAudioDelta { delta: String },
    #[serde(rename = "response.output_audio.done")]
    OutputAudioDone {},
    #[serde(rename = "response.output_audio_transcript.delta")]
    OutputAudioTranscriptDelta {
        #[serde(default)]
        delta: String,
    },
    #[serde(rename = "response.output_audio_transcript.done")]
    OutputAudioTranscriptDone {},
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {},
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {},
    #[serde(rename = "rate_limits.updated")]
    RateLimitsUpdated {
        #[serde(default)]
        rate_limits: Vec<RateLimit>,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: ApiError,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputItem {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub call_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RateLimit {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub remaining: Option<u64>,
    #[serde(default)]
    pub reset_seconds: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

// ── Close classification ──────────────────────────────────────────────────────

/// Explicit close-reason taxonomy: transient reasons get a short linear
/// backoff and reconnect, terminal reasons exit the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    KeepaliveTimeout,
    AuthError,
    ProtocolError,
    NetworkError,
}

impl CloseReason {
    pub fn is_transient(self) -> bool {
        matches!(self, CloseReason::KeepaliveTimeout | CloseReason::NetworkError)
    }
}

pub fn classify_close_reason(detail: &str) -> CloseReason {
    let detail = detail.to_lowercase();
    if detail.contains("keepalive") || detail.contains("ping timeout") {
        CloseReason::KeepaliveTimeout
    } else if detail.contains("401")
        || detail.contains("unauthorized")
        || detail.contains("invalid api key")
        || detail.contains("authentication")
    {
        CloseReason::AuthError
    } else if detail.contains("protocol") || detail.contains("1002") {
        CloseReason::ProtocolError
    } else {
        CloseReason::NetworkError
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_create_serializes_with_tag() {
        let event = ClientEvent::ResponseCreate { response: None };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value, json!({"type": "response.create"}));
    }

    #[test]
    fn response_create_carries_trigger_metadata() {
        let event = ClientEvent::ResponseCreate {
            response: Some(ResponseParams::with_trigger("image_message", "injection")),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["response"]["metadata"]["trigger"], json!("image_message"));
        assert_eq!(value["response"]["metadata"]["origin"], json!("injection"));
    }

    #[test]
    fn function_call_output_has_the_wire_shape() {
        let event = ClientEvent::ConversationItemCreate {
            item: ConversationItem::FunctionCallOutput {
                call_id: "call_1".into(),
                output: "{\"ok\":true}".into(),
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], json!("conversation.item.create"));
        assert_eq!(value["item"]["type"], json!("function_call_output"));
        assert_eq!(value["item"]["call_id"], json!("call_1"));
    }

    #[test]
    fn user_image_item_embeds_a_data_url() {
        let item = ConversationItem::user_image("QUJD");
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(
            value["content"][0]["image_url"],
            json!("data:image/jpeg;base64,QUJD")
        );
        assert_eq!(value["content"][0]["type"], json!("input_image"));
    }

    #[test]
    fn server_events_parse_by_type_tag() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"type": "response.output_item.added", "item": {"type": "function_call", "name": "set_pan", "call_id": "c1"}}"#,
        )
        .unwrap();
        match event {
            ServerEvent::OutputItemAdded { item } => {
                assert_eq!(item.kind, "function_call");
                assert_eq!(item.name.as_deref(), Some("set_pan"));
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn unknown_server_event_does_not_fail_parsing() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type": "response.brand_new_thing", "x": 1}"#).unwrap();
        assert!(matches!(event, ServerEvent::Unknown));
    }

    #[test]
    fn rate_limits_parse_with_missing_fields() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"type": "rate_limits.updated", "rate_limits": [{"name": "requests", "remaining": 99}]}"#,
        )
        .unwrap();
        match event {
            ServerEvent::RateLimitsUpdated { rate_limits } => {
                assert_eq!(rate_limits[0].remaining, Some(99));
                assert!(rate_limits[0].limit.is_none());
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn error_event_parses_message() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"type": "error", "error": {"message": "buffer is empty"}}"#,
        )
        .unwrap();
        match event {
            ServerEvent::Error { error } => assert_eq!(error.message, "buffer is empty"),
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn close_reasons_classify_by_detail() {
        assert_eq!(
            classify_close_reason("keepalive ping timeout"),
            CloseReason::KeepaliveTimeout
        );
        assert_eq!(classify_close_reason("HTTP 401 Unauthorized"), CloseReason::AuthError);
        assert_eq!(classify_close_reason("protocol violation"), CloseReason::ProtocolError);
        assert_eq!(classify_close_reason("connection reset by peer"), CloseReason::NetworkError);
    }

    #[test]
    fn transient_reasons_reconnect_terminal_do_not() {
        assert!(CloseReason::KeepaliveTimeout.is_transient());
        assert!(CloseReason::NetworkError.is_transient());
        assert!(!CloseReason::AuthError.is_transient());
        assert!(!CloseReason::ProtocolError.is_transient());
    }
}
