use std::time::Duration;
use tandem_core::{PlaybackMode, ReconnectPolicy, playback::DEFAULT_PLAYBACK_MIME, session::DEFAULT_HANDSHAKE_TOKEN};
use tracing::Level;
use url::Url;

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
    pub server_url: Url,
    pub session_id: String,
    pub reconnect_attempts: u32,
    pub reconnect_interval: Duration,
    pub handshake_token: String,
    pub playback_mode: PlaybackMode,
    pub playback_default_mime: String,
    pub input_device: Option<String>,
    pub log_level: Level,
}

/// Parses and checks a WebSocket base URL.
pub fn parse_server_url(name: &str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("scheme '{other}' is not ws or wss"),
        )),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let server_url_str =
            std::env::var("TANDEM_SERVER_URL").unwrap_or_else(|_| "ws://localhost:8000".to_string());
        let server_url = parse_server_url("TANDEM_SERVER_URL", &server_url_str)?;

        let session_id = std::env::var("TANDEM_SESSION_ID").unwrap_or_else(|_| "1".to_string());
        if session_id.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "TANDEM_SESSION_ID".to_string(),
                "must not be empty".to_string(),
            ));
        }

        let reconnect_attempts = parse_number("TANDEM_RECONNECT_ATTEMPTS", 10u32)?;
        let reconnect_interval =
            Duration::from_millis(parse_number("TANDEM_RECONNECT_INTERVAL_MS", 3000u64)?);

        let handshake_token = std::env::var("TANDEM_HANDSHAKE_TOKEN")
            .unwrap_or_else(|_| DEFAULT_HANDSHAKE_TOKEN.to_string());

        let playback_mode_str =
            std::env::var("TANDEM_PLAYBACK_MODE").unwrap_or_else(|_| "concurrent".to_string());
        let playback_mode = match playback_mode_str.to_lowercase().as_str() {
            "concurrent" => PlaybackMode::Concurrent,
            "sequential" => PlaybackMode::Sequential,
            other => {
                return Err(ConfigError::InvalidValue(
                    "TANDEM_PLAYBACK_MODE".to_string(),
                    format!("'{other}' is not 'concurrent' or 'sequential'"),
                ));
            }
        };

        let playback_default_mime = std::env::var("TANDEM_PLAYBACK_DEFAULT_MIME")
            .unwrap_or_else(|_| DEFAULT_PLAYBACK_MIME.to_string());

        let input_device = std::env::var("TANDEM_INPUT_DEVICE")
            .ok()
            .filter(|name| !name.trim().is_empty());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            server_url,
            session_id,
            reconnect_attempts,
            reconnect_interval,
            handshake_token,
            playback_mode,
            playback_default_mime,
            input_device,
            log_level,
        })
    }

    fn base(&self) -> &str {
        self.server_url.as_str().trim_end_matches('/')
    }

    /// Endpoint of the text channel for this session.
    pub fn text_url(&self) -> String {
        format!("{}/ws/{}", self.base(), self.session_id)
    }

    /// Endpoint of the audio channel for this session.
    pub fn audio_url(&self) -> String {
        format!("{}/ws/audio/{}", self.base(), self.session_id)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(self.reconnect_attempts, self.reconnect_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("TANDEM_SERVER_URL");
            env::remove_var("TANDEM_SESSION_ID");
            env::remove_var("TANDEM_RECONNECT_ATTEMPTS");
            env::remove_var("TANDEM_RECONNECT_INTERVAL_MS");
            env::remove_var("TANDEM_HANDSHAKE_TOKEN");
            env::remove_var("TANDEM_PLAYBACK_MODE");
            env::remove_var("TANDEM_PLAYBACK_DEFAULT_MIME");
            env::remove_var("TANDEM_INPUT_DEVICE");
            env::remove_var("RUST_LOG");
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
    fn test_config_defaults() {
        clear_env_vars();

        let config = Config::from_env().unwrap();
        assert_eq!(config.session_id, "1");
        assert_eq!(config.reconnect_attempts, 10);
        assert_eq!(config.reconnect_interval, Duration::from_millis(3000));
        assert_eq!(config.handshake_token, "hello");
        assert_eq!(config.playback_mode, PlaybackMode::Concurrent);
        assert_eq!(config.playback_default_mime, "audio/wav");
        assert_eq!(config.input_device, None);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.text_url(), "ws://localhost:8000/ws/1");
        assert_eq!(config.audio_url(), "ws://localhost:8000/ws/audio/1");

        let policy = config.reconnect_policy();
        assert_eq!(policy.max_attempts(), 10);
        assert_eq!(policy.delay(), Duration::from_millis(3000));

        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_config_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("TANDEM_SERVER_URL", "wss://agent.example.com/base/");
            env::set_var("TANDEM_SESSION_ID", "42");
            env::set_var("TANDEM_RECONNECT_ATTEMPTS", "3");
            env::set_var("TANDEM_RECONNECT_INTERVAL_MS", "250");
            env::set_var("TANDEM_HANDSHAKE_TOKEN", "hi");
            env::set_var("TANDEM_PLAYBACK_MODE", "Sequential");
            env::set_var("TANDEM_INPUT_DEVICE", "USB Mic");
            env::set_var("RUST_LOG", "debug");
        }

        let config = Config::from_env().unwrap();
        assert_eq!(config.text_url(), "wss://agent.example.com/base/ws/42");
        assert_eq!(config.audio_url(), "wss://agent.example.com/base/ws/audio/42");
        assert_eq!(config.reconnect_attempts, 3);
        assert_eq!(config.reconnect_interval, Duration::from_millis(250));
        assert_eq!(config.handshake_token, "hi");
        assert_eq!(config.playback_mode, PlaybackMode::Sequential);
        assert_eq!(config.input_device.as_deref(), Some("USB Mic"));
        assert_eq!(config.log_level, Level::DEBUG);

        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_config_rejects_http_url() {
        clear_env_vars();
        unsafe {
            env::set_var("TANDEM_SERVER_URL", "http://localhost:8000");
        }

        let result = Config::from_env();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue(var, _)) if var == "TANDEM_SERVER_URL"
        ));

        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_config_invalid_numbers_and_modes() {
        clear_env_vars();
        unsafe {
            env::set_var("TANDEM_RECONNECT_ATTEMPTS", "ten");
        }
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidValue(var, _)) if var == "TANDEM_RECONNECT_ATTEMPTS"
        ));

        clear_env_vars();
        unsafe {
            env::set_var("TANDEM_PLAYBACK_MODE", "shuffle");
        }
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidValue(var, _)) if var == "TANDEM_PLAYBACK_MODE"
        ));

        clear_env_vars();
        unsafe {
            env::set_var("RUST_LOG", "INVALID_LEVEL");
        }
        let result = Config::from_env();
        assert!(result.is_err());
        if let Err(ConfigError::InvalidValue(var, msg)) = result {
            assert_eq!(var, "RUST_LOG");
            assert!(msg.contains("is not a valid log level"));
        }

        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_config_rejects_blank_session_id() {
        clear_env_vars();
        unsafe {
            env::set_var("TANDEM_SESSION_ID", "  ");
        }
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidValue(var, _)) if var == "TANDEM_SESSION_ID"
        ));
        clear_env_vars();
    }
}
