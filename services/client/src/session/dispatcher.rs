//! Message Dispatcher: routes inbound relay frames.
//!
//! Malformed or unknown envelopes are logged and dropped; nothing received
//! from the relay can crash the driver.

use super::{Driver, state::SpeakingState};
use crate::{
    events::{Role, SessionEvent, ToolCall},
    transport::{Inbound, RelayFrame},
};
use parley_core::{
    AudioFrame, AudioResult,
    audio_utils::decode_base64,
    endianness::{ByteOrder, correct_byte_order},
    reassembler::FragmentReassembler,
};
use parley_relay_types::ServerEvent;
use tracing::{debug, info, trace, warn};

/// Inbound audio path: reassembly, byte-order salvage, framing.
pub(super) struct InboundAudio {
    reassembler: FragmentReassembler,
    byte_order: ByteOrder,
    sample_rate: u32,
}

impl InboundAudio {
    pub(super) fn new(sample_rate: u32) -> Self {
        Self {
            reassembler: FragmentReassembler::new(),
            byte_order: ByteOrder::Little,
            sample_rate,
        }
    }

    /// Turns one relay chunk into a playable frame, or `None` while the
    /// chunk holds less than one whole sample.
    pub(super) fn accept(&mut self, chunk: &[u8]) -> AudioResult<Option<AudioFrame>> {
        let whole = self.reassembler.push(chunk);
        if whole.is_empty() {
            return Ok(None);
        }
        let (pcm, report) = correct_byte_order(&whole, self.byte_order);
        if let Some(report) = report.filter(|r| r.swapped) {
            warn!(?report, "Inbound audio looks byte-swapped; switching byte order.");
            self.byte_order = report.chosen;
        }
        AudioFrame::from_pcm16_le(pcm, self.sample_rate).map(Some)
    }

    pub(super) fn reset(&mut self) {
        self.reassembler.reset();
        self.byte_order = ByteOrder::Little;
    }
}

impl Driver {
    pub(super) async fn dispatch(&mut self, item: Inbound) {
        match item {
            Inbound::Frame(RelayFrame::Text(text)) => self.dispatch_text(&text).await,
            Inbound::Frame(RelayFrame::Binary(bytes)) => self.on_audio(&bytes),
            Inbound::Frame(RelayFrame::Close) | Inbound::Ended(None) => {
                info!("Relay closed the connection.");
                self.transport_open = false;
                self.on_session_closed().await;
            }
            Inbound::Ended(Some(e)) => {
                warn!(error = %e, "Relay connection failed.");
                self.transport_open = false;
                self.on_error(e.to_string()).await;
            }
        }
    }

    async fn dispatch_text(&mut self, text: &str) {
        let event = match ServerEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Discarding malformed relay envelope.");
                return;
            }
        };

        match event {
            ServerEvent::SessionConnected { message } => {
                info!(message = message.as_deref().unwrap_or_default(), "Relay connected upstream.");
                self.on_connected().await;
            }
            ServerEvent::SessionClosed { code, reason } => {
                info!(?code, reason = reason.as_deref().unwrap_or_default(), "Relay session closed.");
                self.on_session_closed().await;
            }
            ServerEvent::SessionCreated | ServerEvent::SessionUpdated => {
                debug!("Upstream session configured.");
            }
            ServerEvent::SpeechStarted => self.set_speaking(SpeakingState::UserSpeaking),
            ServerEvent::SpeechStopped => {
                self.set_speaking(SpeakingState::Idle);
                self.request_response("speech_stopped").await;
            }
            ServerEvent::AudioDelta { delta } => match decode_base64(&delta) {
                Ok(bytes) => self.on_audio(&bytes),
                Err(e) => warn!(error = %e, "Skipping undecodable audio delta."),
            },
            ServerEvent::AudioDone | ServerEvent::ResponseDone => {
                self.machine.clear_response();
                self.set_speaking(SpeakingState::Idle);
            }
            ServerEvent::AudioTranscriptDelta { delta } => {
                self.machine.clear_response();
                self.transcript(Role::Assistant, delta, false);
            }
            ServerEvent::AudioTranscriptDone { transcript } => {
                self.transcript(Role::Assistant, transcript, true);
            }
            ServerEvent::InputTranscriptionCompleted { transcript } => {
                self.transcript(Role::User, transcript, true);
            }
            ServerEvent::FunctionCallArgumentsDone {
                name,
                call_id,
                arguments,
            } => match serde_json::from_str(&arguments) {
                Ok(arguments) => {
                    info!(tool = %name, "Tool call received.");
                    self.publisher.event(SessionEvent::ToolCall(ToolCall {
                        name,
                        call_id,
                        arguments,
                    }));
                }
                Err(e) => warn!(tool = %name, error = %e, "Dropping tool call with malformed arguments."),
            },
            ref error @ ServerEvent::Error { .. } => {
                let message = error.error_description().unwrap_or_default();
                warn!(%message, "Relay reported an error.");
                self.on_error(message).await;
            }
            ServerEvent::Heartbeat | ServerEvent::Pong => trace!("Relay keep-alive."),
            // the same text also arrives as a transcript delta
            ref response @ ServerEvent::ResponseText { .. } => {
                trace!(text = response.response_text().unwrap_or_default(), "Response text.");
                self.machine.clear_response();
            }
            ServerEvent::Unknown => debug!("Ignoring unknown relay event."),
        }
    }

    fn on_audio(&mut self, chunk: &[u8]) {
        if !self.machine.can_send_control() {
            trace!("Ignoring audio on a closed session.");
            return;
        }
        match self.audio.accept(chunk) {
            Ok(Some(frame)) => {
                trace!(samples = frame.sample_count(), "Assistant audio frame.");
                self.machine.clear_response();
                self.set_speaking(SpeakingState::AssistantSpeaking);
                self.playback.enqueue(frame);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Skipping malformed audio chunk."),
        }
    }

    fn transcript(&mut self, role: Role, text: String, is_final: bool) {
        if text.is_empty() && !is_final {
            return;
        }
        self.publisher.event(SessionEvent::Transcript {
            role,
            text,
            is_final,
        });
    }
}
