//! Error types surfaced by the session and its collaborators.

use parley_core::AudioError;
use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Failures of the token/relay provisioning collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    /// The caller must sign in again before a session can be provisioned.
    #[error("provisioning requires re-authentication: {0}")]
    AuthRequired(String),
    /// The collaborator was unreachable or temporarily overloaded.
    #[error("provisioning temporarily unavailable: {0}")]
    Transient(String),
    #[error("provisioning rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("provisioning returned an unusable response: {0}")]
    InvalidResponse(String),
}

impl ProvisionError {
    /// Stable machine readable code for the host application.
    pub fn code(&self) -> &'static str {
        match self {
            ProvisionError::AuthRequired(_) => "auth_required",
            ProvisionError::Transient(_) => "transient",
            ProvisionError::Rejected { .. } => "rejected",
            ProvisionError::InvalidResponse(_) => "invalid_response",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ProvisionError::Transient(_))
    }

    /// Maps a non-success HTTP status onto the taxonomy.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => ProvisionError::AuthRequired(body),
            408 | 429 | 500..=599 => ProvisionError::Transient(format!("HTTP {status}: {body}")),
            _ => ProvisionError::Rejected { status, body },
        }
    }
}

/// Socket level failures of the relay connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("relay handshake timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid relay endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("websocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),
    #[error("relay connection closed")]
    Closed,
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                TransportError::Closed
            }
            other => TransportError::WebSocket(Box::new(other)),
        }
    }
}

/// Everything `Session::init` and the session commands can fail with.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("audio device error: {0:#}")]
    Device(anyhow::Error),
    #[error(transparent)]
    Audio(#[from] AudioError),
    /// The session has already been torn down.
    #[error("session is closed")]
    Closed,
}

impl SessionError {
    /// Machine readable code, mirroring [`ProvisionError::code`] for the other kinds.
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::Provision(e) => e.code(),
            SessionError::Transport(TransportError::Timeout(_)) => "timeout",
            SessionError::Transport(_) => "transport",
            SessionError::Device(_) => "device",
            SessionError::Audio(_) => "audio",
            SessionError::Closed => "closed",
        }
    }
}
