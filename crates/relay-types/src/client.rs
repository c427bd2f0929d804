//! Envelopes sent from the client to the relay.

use serde::{Deserialize, Serialize};

/// Messages sent from the client to the relay.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Opens the upstream conversation. Sent once, right after the socket opens.
    #[serde(rename = "session.init")]
    SessionInit {
        instructions: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tools: Vec<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },
    /// A block of base64 encoded PCM16 microphone audio.
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    /// Marks the end of the buffered user audio.
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,
    /// Adds a turn (text message or tool output) to the conversation.
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
    /// Asks the upstream model to generate a response.
    #[serde(rename = "response.create")]
    ResponseCreate,
    /// Cancels the response currently being generated.
    #[serde(rename = "response.cancel")]
    ResponseCancel,
    #[serde(rename = "ping")]
    Ping,
    /// Graceful close notification.
    #[serde(rename = "session.close")]
    SessionClose,
}

impl ClientEvent {
    /// Returns the wire tag of this event, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::SessionInit { .. } => "session.init",
            ClientEvent::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            ClientEvent::InputAudioBufferCommit => "input_audio_buffer.commit",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ResponseCreate => "response.create",
            ClientEvent::ResponseCancel => "response.cancel",
            ClientEvent::Ping => "ping",
            ClientEvent::SessionClose => "session.close",
        }
    }

    /// True for the envelopes that carry captured audio.
    pub fn is_audio(&self) -> bool {
        matches!(self, ClientEvent::InputAudioBufferAppend { .. })
    }

    /// Builds a user text turn.
    pub fn user_text(text: impl Into<String>) -> Self {
        ClientEvent::ConversationItemCreate {
            item: ConversationItem::Message {
                role: ItemRole::User,
                content: vec![ItemContent::InputText { text: text.into() }],
            },
        }
    }

    /// Builds the result turn for a tool call.
    pub fn tool_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        ClientEvent::ConversationItemCreate {
            item: ConversationItem::FunctionCallOutput {
                call_id: call_id.into(),
                output: output.into(),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemRole {
    User,
    Assistant,
    System,
}

/// A conversation item carried by `conversation.item.create`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    Message {
        role: ItemRole,
        content: Vec<ItemContent>,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

/// Content of a message item: text, or a reference to base64 audio.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemContent {
    InputText { text: String },
    InputAudio { audio: String },
}
