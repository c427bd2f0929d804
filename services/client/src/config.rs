use crate::session::SessionConfig;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub provision_url: String,
    pub provision_access_token: Option<String>,
    pub voice_mode: String,
    pub heartbeat_interval: Duration,
    pub connect_timeout: Duration,
    pub capture_block_size: usize,
    pub playback_queue_limit: usize,
    /// `None` when the greeting turn is disabled.
    pub greeting: Option<String>,
    pub reconnect_attempts: u32,
    pub log_level: Level,
}

/// Reads a positive integer variable, falling back to `default` when unset.
fn positive_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    let Ok(raw) = std::env::var(name) else {
        return Ok(default);
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => Ok(value),
        _ => Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("'{raw}' is not a positive integer"),
        )),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let provision_url = std::env::var("PROVISION_URL")
            .map_err(|_| ConfigError::MissingVar("PROVISION_URL".to_string()))?;
        reqwest::Url::parse(&provision_url)
            .map_err(|e| ConfigError::InvalidValue("PROVISION_URL".to_string(), e.to_string()))?;

        let provision_access_token = std::env::var("PROVISION_ACCESS_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());

        let voice_mode = std::env::var("VOICE_MODE").unwrap_or_else(|_| "emotion".to_string());

        let heartbeat_interval =
            Duration::from_secs(positive_var("HEARTBEAT_INTERVAL_SECS", 30u64)?);
        let connect_timeout = Duration::from_secs(positive_var("CONNECT_TIMEOUT_SECS", 30u64)?);
        let capture_block_size = positive_var("CAPTURE_BLOCK_SIZE", 4096usize)?;
        let playback_queue_limit = positive_var("PLAYBACK_QUEUE_LIMIT", 256usize)?;

        let greeting = match std::env::var("GREETING") {
            Ok(text) if text.trim().is_empty() => None,
            Ok(text) => Some(text),
            Err(_) => Some("你好".to_string()),
        };

        let reconnect_attempts = match std::env::var("RECONNECT_ATTEMPTS") {
            Ok(raw) => raw.trim().parse::<u32>().map_err(|_| {
                ConfigError::InvalidValue(
                    "RECONNECT_ATTEMPTS".to_string(),
                    format!("'{raw}' is not a non-negative integer"),
                )
            })?,
            Err(_) => 3,
        };

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            provision_url,
            provision_access_token,
            voice_mode,
            heartbeat_interval,
            connect_timeout,
            capture_block_size,
            playback_queue_limit,
            greeting,
            reconnect_attempts,
            log_level,
        })
    }

    /// The runtime knobs handed to `Session::init`.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            heartbeat_interval: self.heartbeat_interval,
            connect_timeout: self.connect_timeout,
            capture_block_size: self.capture_block_size,
            playback_queue_limit: self.playback_queue_limit,
            greeting: self.greeting.clone(),
            ..SessionConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("PROVISION_URL");
            env::remove_var("PROVISION_ACCESS_TOKEN");
            env::remove_var("VOICE_MODE");
            env::remove_var("HEARTBEAT_INTERVAL_SECS");
            env::remove_var("CONNECT_TIMEOUT_SECS");
            env::remove_var("CAPTURE_BLOCK_SIZE");
            env::remove_var("PLAYBACK_QUEUE_LIMIT");
            env::remove_var("GREETING");
            env::remove_var("RECONNECT_ATTEMPTS");
            env::remove_var("RUST_LOG");
        }
    }

    fn set_minimal_env() {
        unsafe {
            env::set_var("PROVISION_URL", "https://example.test/functions/v1/realtime-token");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_defaults() {
        clear_env_vars();
        set_minimal_env();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(
            config.provision_url,
            "https://example.test/functions/v1/realtime-token"
        );
        assert_eq!(config.provision_access_token, None);
        assert_eq!(config.voice_mode, "emotion");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.capture_block_size, 4096);
        assert_eq!(config.playback_queue_limit, 256);
        assert_eq!(config.greeting.as_deref(), Some("你好"));
        assert_eq!(config.reconnect_attempts, 3);
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("PROVISION_ACCESS_TOKEN", "jwt-abc");
            env::set_var("VOICE_MODE", "coach");
            env::set_var("HEARTBEAT_INTERVAL_SECS", "10");
            env::set_var("CONNECT_TIMEOUT_SECS", "5");
            env::set_var("CAPTURE_BLOCK_SIZE", "2048");
            env::set_var("PLAYBACK_QUEUE_LIMIT", "16");
            env::set_var("GREETING", "hello there");
            env::set_var("RECONNECT_ATTEMPTS", "0");
            env::set_var("RUST_LOG", "debug");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.provision_access_token.as_deref(), Some("jwt-abc"));
        assert_eq!(config.voice_mode, "coach");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.capture_block_size, 2048);
        assert_eq!(config.playback_queue_limit, 16);
        assert_eq!(config.greeting.as_deref(), Some("hello there"));
        assert_eq!(config.reconnect_attempts, 0);
        assert_eq!(config.log_level, Level::DEBUG);

        let session = config.session_config();
        assert_eq!(session.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(session.playback_queue_limit, 16);
        assert_eq!(session.greeting.as_deref(), Some("hello there"));
    }

    #[test]
    #[serial]
    fn test_config_empty_greeting_disables_it() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("GREETING", "  ");
        }

        let config = Config::from_env().expect("Config should load successfully");
        assert_eq!(config.greeting, None);
    }

    #[test]
    #[serial]
    fn test_config_missing_provision_url() {
        clear_env_vars();

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(var) => assert_eq!(var, "PROVISION_URL"),
            _ => panic!("Expected MissingVar for PROVISION_URL"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_provision_url() {
        clear_env_vars();
        unsafe {
            env::set_var("PROVISION_URL", "not a url");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "PROVISION_URL"),
            _ => panic!("Expected InvalidValue for PROVISION_URL"),
        }
    }

    #[test]
    #[serial]
    fn test_config_rejects_zero_block_size() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("CAPTURE_BLOCK_SIZE", "0");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "CAPTURE_BLOCK_SIZE"),
            _ => panic!("Expected InvalidValue for CAPTURE_BLOCK_SIZE"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }
}
