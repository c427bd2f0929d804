//! Reconnect policy applied by hosts after a session ends unexpectedly.

use crate::error::{SessionError, TransportError};
use std::time::Duration;
use tokio_tungstenite::tungstenite;

const MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Delay before the given 1-based attempt: linear, capped at 30s.
    /// `None` once the attempts are used up.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        Some(self.base_delay.saturating_mul(attempt).min(MAX_DELAY))
    }

    /// Whether a failure is worth another attempt. Credential and contract
    /// failures are permanent.
    pub fn should_retry(error: &SessionError) -> bool {
        match error {
            SessionError::Provision(e) => e.is_retryable(),
            SessionError::Transport(TransportError::WebSocket(e)) => !is_auth_rejection(e),
            SessionError::Transport(TransportError::InvalidEndpoint(_)) => false,
            SessionError::Transport(_) => true,
            SessionError::Device(_) | SessionError::Audio(_) | SessionError::Closed => false,
        }
    }
}

fn is_auth_rejection(err: &tungstenite::Error) -> bool {
    match err {
        tungstenite::Error::Http(response) => {
            matches!(response.status().as_u16(), 401 | 403)
        }
        _ => false,
    }
}
