//! The token/relay provisioning collaborator.
//!
//! Before a relay connection can be opened the client exchanges a voice
//! mode for a short-lived session token, the relay endpoint and the audio
//! contract of the conversation.

use crate::error::{ProvisionError, TransportError};
use async_trait::async_trait;
use parley_core::audio_utils::{PROTOCOL_INPUT_SAMPLE_RATE, PROTOCOL_OUTPUT_SAMPLE_RATE};
use parley_relay_types::ClientEvent;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionRequest {
    pub mode: String,
}

impl ProvisionRequest {
    pub fn new(mode: impl Into<String>) -> Self {
        Self { mode: mode.into() }
    }
}

/// Negotiated input and output formats of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub input_format: String,
    pub input_sample_rate: u32,
    pub output_format: String,
    pub output_sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_format: "pcm16".to_string(),
            input_sample_rate: PROTOCOL_INPUT_SAMPLE_RATE,
            output_format: "pcm16".to_string(),
            output_sample_rate: PROTOCOL_OUTPUT_SAMPLE_RATE,
        }
    }
}

/// Everything needed to open and initialise a relay session.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Provisioning {
    #[serde(alias = "ws_url")]
    pub relay_url: String,
    #[serde(alias = "session_token")]
    pub token: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub tools: Vec<Value>,
    #[serde(default)]
    pub audio_config: AudioConfig,
}

impl Provisioning {
    /// The relay URL with the session credentials appended as query parameters.
    pub fn relay_endpoint(&self, mode: &str) -> Result<Url, TransportError> {
        let mut params = vec![("session_token", self.token.as_str())];
        if let Some(user_id) = &self.user_id {
            params.push(("user_id", user_id.as_str()));
        }
        params.push(("mode", mode));
        let url = Url::parse_with_params(&self.relay_url, &params)
            .map_err(|e| TransportError::InvalidEndpoint(format!("{}: {e}", self.relay_url)))?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(TransportError::InvalidEndpoint(format!(
                "unsupported scheme '{other}'"
            ))),
        }
    }

    /// The `session.init` envelope sent once the socket is open.
    pub fn session_init(&self) -> ClientEvent {
        ClientEvent::SessionInit {
            instructions: self.instructions.clone(),
            tools: self.tools.clone(),
            user_id: self.user_id.clone(),
        }
    }
}

#[async_trait]
pub trait ProvisioningService: Send + Sync {
    async fn provision(&self, request: &ProvisionRequest) -> Result<Provisioning, ProvisionError>;
}

/// Provisions sessions through an HTTP endpoint.
#[derive(Clone)]
pub struct HttpProvisioner {
    client: reqwest::Client,
    url: String,
    access_token: Option<String>,
}

impl HttpProvisioner {
    pub fn new(url: impl Into<String>, access_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            access_token,
        }
    }
}

#[async_trait]
impl ProvisioningService for HttpProvisioner {
    #[instrument(skip_all, fields(mode = %request.mode))]
    async fn provision(&self, request: &ProvisionRequest) -> Result<Provisioning, ProvisionError> {
        let mut builder = self.client.post(&self.url).json(request);
        if let Some(token) = &self.access_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProvisionError::Transient(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProvisionError::Transient(e.to_string()))?;
        if !status.is_success() {
            return Err(ProvisionError::from_status(status.as_u16(), body));
        }

        let provisioning: Provisioning = serde_json::from_str(&body)
            .map_err(|e| ProvisionError::InvalidResponse(e.to_string()))?;
        debug!(relay = %provisioning.relay_url, "Session provisioned");
        Ok(provisioning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_relay_field_aliases() {
        let provisioning: Provisioning = serde_json::from_value(json!({
            "ws_url": "wss://relay.test/realtime",
            "session_token": "tok",
            "user_id": "u-7",
            "app_id": "app",
            "instructions": "be brief",
            "tools": [{ "name": "navigate" }],
        }))
        .unwrap();
        assert_eq!(provisioning.relay_url, "wss://relay.test/realtime");
        assert_eq!(provisioning.token, "tok");
        assert_eq!(provisioning.app_id.as_deref(), Some("app"));
        assert_eq!(provisioning.audio_config, AudioConfig::default());
        assert_eq!(provisioning.audio_config.output_sample_rate, 24000);
    }

    #[test]
    fn partial_audio_config_keeps_defaults() {
        let provisioning: Provisioning = serde_json::from_value(json!({
            "relay_url": "wss://relay.test",
            "token": "t",
            "audio_config": { "input_sample_rate": 8000 }
        }))
        .unwrap();
        assert_eq!(provisioning.audio_config.input_sample_rate, 8000);
        assert_eq!(provisioning.audio_config.output_format, "pcm16");
        assert_eq!(provisioning.user_id, None);
    }

    #[test]
    fn missing_token_is_rejected() {
        let result: Result<Provisioning, _> =
            serde_json::from_value(json!({ "relay_url": "wss://relay.test" }));
        assert!(result.is_err());
    }

    #[test]
    fn relay_endpoint_carries_credentials() {
        let provisioning: Provisioning = serde_json::from_value(json!({
            "relay_url": "wss://relay.test/functions/v1/realtime-relay",
            "token": "a b&c",
            "user_id": "u-1"
        }))
        .unwrap();
        let url = provisioning.relay_endpoint("emotion").unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("session_token".to_string(), "a b&c".to_string()),
                ("user_id".to_string(), "u-1".to_string()),
                ("mode".to_string(), "emotion".to_string()),
            ]
        );
    }

    #[test]
    fn relay_endpoint_rejects_http_urls() {
        let provisioning: Provisioning = serde_json::from_value(json!({
            "relay_url": "https://relay.test",
            "token": "t"
        }))
        .unwrap();
        assert!(matches!(
            provisioning.relay_endpoint("emotion"),
            Err(TransportError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn session_init_forwards_instructions_and_tools() {
        let provisioning: Provisioning = serde_json::from_value(json!({
            "relay_url": "wss://relay.test",
            "token": "t",
            "instructions": "be brief",
            "tools": [{ "name": "navigate" }]
        }))
        .unwrap();
        match provisioning.session_init() {
            ClientEvent::SessionInit {
                instructions,
                tools,
                user_id,
            } => {
                assert_eq!(instructions, "be brief");
                assert_eq!(tools.len(), 1);
                assert_eq!(user_id, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
