//! Envelopes forwarded from the relay to the client.

use serde::Deserialize;
use serde_json::Value;

/// Messages received from the relay.
///
/// Tags this client does not know deserialize to `Unknown`, so new upstream
/// event types never break parsing.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// The relay reached the upstream provider.
    #[serde(rename = "session.connected")]
    SessionConnected {
        #[serde(default)]
        message: Option<String>,
    },
    /// The upstream connection went away.
    #[serde(rename = "session.closed")]
    SessionClosed {
        #[serde(default)]
        code: Option<u16>,
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(rename = "session.created")]
    SessionCreated,
    #[serde(rename = "session.updated")]
    SessionUpdated,
    /// Server VAD detected the start of user speech.
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,
    /// Server VAD detected the end of user speech.
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,
    /// A base64 encoded PCM16 chunk of assistant audio.
    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },
    #[serde(rename = "response.audio.done")]
    AudioDone,
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        #[serde(default)]
        delta: String,
    },
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        #[serde(default)]
        transcript: String,
    },
    /// Assistant text. Upstream providers disagree on the field name.
    #[serde(rename = "response.text")]
    ResponseText {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        delta: Option<String>,
        #[serde(default)]
        content: Option<Value>,
        #[serde(default)]
        payload: Option<Value>,
    },
    #[serde(rename = "response.done")]
    ResponseDone,
    /// Final transcription of what the user said.
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted {
        #[serde(default)]
        transcript: String,
    },
    /// A tool call, with its arguments still JSON-encoded.
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        #[serde(default)]
        name: String,
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        arguments: String,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: Option<Value>,
        #[serde(default)]
        code: Option<Value>,
        #[serde(default)]
        message: Option<Value>,
    },
    #[serde(rename = "heartbeat")]
    Heartbeat,
    #[serde(rename = "pong")]
    Pong,
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Parses a single text frame.
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Extracts the text of a `response.text` event, trying each known field
    /// name in turn. Returns `None` for other events or when no text is present.
    pub fn response_text(&self) -> Option<&str> {
        let ServerEvent::ResponseText {
            text,
            delta,
            content,
            payload,
        } = self
        else {
            return None;
        };
        text.as_deref()
            .or(delta.as_deref())
            .or_else(|| content.as_ref().and_then(Value::as_str))
            .or_else(|| {
                payload
                    .as_ref()
                    .and_then(|p| p.pointer("/result/text"))
                    .and_then(Value::as_str)
            })
            .filter(|t| !t.is_empty())
    }

    /// A human readable description of an `error` event.
    pub fn error_description(&self) -> Option<String> {
        let ServerEvent::Error {
            error,
            code,
            message,
        } = self
        else {
            return None;
        };
        let detail = error
            .as_ref()
            .and_then(describe)
            .or_else(|| message.as_ref().and_then(describe))
            .unwrap_or_else(|| "unknown relay error".to_string());
        match code {
            Some(Value::String(c)) => Some(format!("{c}: {detail}")),
            Some(Value::Number(c)) => Some(format!("{c}: {detail}")),
            _ => Some(detail),
        }
    }
}

/// Text of an error detail that may be a string, an object carrying a
/// `message`, or any other JSON value.
fn describe(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => Some(
            map.get("message")
                .and_then(Value::as_str)
                .map_or_else(|| value.to_string(), str::to_string),
        ),
        other => Some(other.to_string()),
    }
}
