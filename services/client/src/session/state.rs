//! Connection, speaking and response bookkeeping for a single session.

use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl ConnectionState {
    /// True once the connection can no longer carry a conversation.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakingState {
    #[default]
    Idle,
    UserSpeaking,
    AssistantSpeaking,
}

/// Whether a `response.create` is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseState {
    #[default]
    Idle,
    InFlight { reason: &'static str },
}

/// The pure transition table of a session. Owned by the driver task; every
/// method returns whether something observable changed so the caller can
/// emit control messages and notifications.
#[derive(Debug, Default)]
pub struct SessionStateMachine {
    connection: ConnectionState,
    speaking: SpeakingState,
    response: ResponseState,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn speaking(&self) -> SpeakingState {
        self.speaking
    }

    pub fn response(&self) -> ResponseState {
        self.response
    }

    pub fn response_in_flight(&self) -> bool {
        matches!(self.response, ResponseState::InFlight { .. })
    }

    /// Idle -> Connecting. Reconnecting a finished state machine is allowed.
    pub fn begin_connecting(&mut self) -> bool {
        match self.connection {
            ConnectionState::Idle | ConnectionState::Disconnected | ConnectionState::Error => {
                self.connection = ConnectionState::Connecting;
                self.response = ResponseState::Idle;
                self.speaking = SpeakingState::Idle;
                true
            }
            _ => false,
        }
    }

    /// Connecting -> Connected. Returns false for duplicate or late notices.
    pub fn on_connected(&mut self) -> bool {
        if self.connection == ConnectionState::Connecting {
            self.connection = ConnectionState::Connected;
            true
        } else {
            false
        }
    }

    /// Claims the single response slot. Returns true when the caller must
    /// send `response.create`.
    pub fn request_response(&mut self, reason: &'static str) -> bool {
        if !self.can_send_control() {
            return false;
        }
        if let ResponseState::InFlight { reason: pending } = self.response {
            debug!(reason, pending, "Response already in flight; not requesting another.");
            return false;
        }
        self.response = ResponseState::InFlight { reason };
        true
    }

    /// Called on the first delta or a terminal response event.
    pub fn clear_response(&mut self) {
        self.response = ResponseState::Idle;
    }

    /// The relay or the socket went away. Returns false if already terminal.
    pub fn on_closed(&mut self) -> bool {
        self.finish(ConnectionState::Disconnected)
    }

    /// A protocol or transport error ended the connection.
    pub fn on_error(&mut self) -> bool {
        self.finish(ConnectionState::Error)
    }

    /// Local teardown. Error is re-entered as Disconnected.
    pub fn on_disconnect(&mut self) -> bool {
        if self.connection == ConnectionState::Disconnected {
            return false;
        }
        self.connection = ConnectionState::Disconnected;
        self.response = ResponseState::Idle;
        true
    }

    fn finish(&mut self, next: ConnectionState) -> bool {
        self.response = ResponseState::Idle;
        if self.connection.is_terminal() {
            return false;
        }
        self.connection = next;
        true
    }

    /// Returns the new state if it differs from the current one.
    pub fn set_speaking(&mut self, next: SpeakingState) -> Option<SpeakingState> {
        if self.speaking == next || self.connection != ConnectionState::Connected {
            return None;
        }
        self.speaking = next;
        Some(next)
    }

    /// Drops back to `Idle` regardless of the connection. Returns `Idle` if
    /// the speaking state changed, so the caller can publish it.
    pub fn silence(&mut self) -> Option<SpeakingState> {
        match std::mem::take(&mut self.speaking) {
            SpeakingState::Idle => None,
            _ => Some(SpeakingState::Idle),
        }
    }

    /// Control messages other than the initial close are only sent while
    /// the connection is live.
    pub fn can_send_control(&self) -> bool {
        matches!(
            self.connection,
            ConnectionState::Connecting | ConnectionState::Connected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> SessionStateMachine {
        let mut machine = SessionStateMachine::new();
        assert!(machine.begin_connecting());
        assert!(machine.on_connected());
        machine
    }

    #[test]
    fn lifecycle_follows_the_happy_path() {
        let mut machine = SessionStateMachine::new();
        assert_eq!(machine.connection(), ConnectionState::Idle);
        assert!(!machine.on_connected(), "cannot connect before connecting");
        assert!(machine.begin_connecting());
        assert!(!machine.begin_connecting());
        assert!(machine.on_connected());
        assert!(!machine.on_connected());
        assert!(machine.on_closed());
        assert_eq!(machine.connection(), ConnectionState::Disconnected);
        assert!(!machine.on_closed());
    }

    #[test]
    fn response_requests_are_idempotent() {
        let mut machine = connected();
        assert!(machine.request_response("speech_stopped"));
        assert!(!machine.request_response("speech_stopped"));
        assert_eq!(
            machine.response(),
            ResponseState::InFlight {
                reason: "speech_stopped"
            }
        );
        machine.clear_response();
        assert!(machine.request_response("text_input"));
    }

    #[test]
    fn no_requests_after_error() {
        let mut machine = connected();
        assert!(machine.request_response("greeting"));
        assert!(machine.on_error());
        assert!(!machine.response_in_flight());
        assert!(!machine.request_response("speech_stopped"));
        assert!(!machine.can_send_control());
    }

    #[test]
    fn disconnect_is_allowed_from_error_and_is_idempotent() {
        let mut machine = connected();
        machine.on_error();
        assert!(machine.on_disconnect());
        assert_eq!(machine.connection(), ConnectionState::Disconnected);
        assert!(!machine.on_disconnect());
        assert!(!machine.on_error(), "terminal states do not flip back to Error");
    }

    #[test]
    fn speaking_changes_only_while_connected() {
        let mut machine = SessionStateMachine::new();
        assert_eq!(machine.set_speaking(SpeakingState::UserSpeaking), None);

        let mut machine = connected();
        assert_eq!(
            machine.set_speaking(SpeakingState::UserSpeaking),
            Some(SpeakingState::UserSpeaking)
        );
        assert_eq!(machine.set_speaking(SpeakingState::UserSpeaking), None);
        machine.on_closed();
        assert_eq!(machine.set_speaking(SpeakingState::AssistantSpeaking), None);
    }

    #[test]
    fn silence_reports_a_change_even_after_the_connection_ended() {
        let mut machine = connected();
        machine.set_speaking(SpeakingState::AssistantSpeaking);
        assert!(machine.on_error());
        assert_eq!(machine.speaking(), SpeakingState::AssistantSpeaking);
        assert_eq!(machine.silence(), Some(SpeakingState::Idle));
        assert_eq!(machine.speaking(), SpeakingState::Idle);
        assert_eq!(machine.silence(), None);
        assert!(machine.on_disconnect());
        assert_eq!(machine.silence(), None);
    }

    #[test]
    fn terminal_states() {
        assert!(ConnectionState::Disconnected.is_terminal());
        assert!(ConnectionState::Error.is_terminal());
        assert!(!ConnectionState::Connected.is_terminal());
        assert!(!ConnectionState::Idle.is_terminal());
    }
}
