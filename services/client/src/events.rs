//! Notifications delivered to the host application.

use crate::session::state::{ConnectionState, SpeakingState};
use serde::Serialize;
use serde_json::Value;

/// Who a transcript fragment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A tool invocation requested by the assistant, with parsed arguments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub name: String,
    pub call_id: Option<String>,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    ConnectionChanged { state: ConnectionState },
    SpeakingChanged { state: SpeakingState },
    /// A transcript fragment. `is_final` marks the completed text of a turn.
    Transcript {
        role: Role,
        text: String,
        is_final: bool,
    },
    ToolCall(ToolCall),
    /// An `error` envelope from the relay. The session is no longer usable.
    ProtocolError { message: String },
}
