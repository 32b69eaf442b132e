use crate::audio_utils::{CAPTURE_BLOCK_SIZE, CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE};
use jarvis_core::persona::{DEFAULT_VOICE, LIVE_MODEL};
use secrecy::SecretString;
use std::path::PathBuf;
use tracing::Level;

/// Gain applied to the RMS of each captured frame before it is reported.
pub const DEFAULT_VOLUME_GAIN: f32 = 500.0;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Fixed audio parameters of a session.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AudioSettings {
    pub capture_sample_rate: u32,
    pub capture_block_size: usize,
    pub playback_sample_rate: u32,
    pub volume_gain: f32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            capture_block_size: CAPTURE_BLOCK_SIZE,
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
            volume_gain: DEFAULT_VOLUME_GAIN,
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub gemini_api_key: SecretString,
    pub live_model: String,
    pub voice_name: String,
    pub log_level: Level,
    /// Optional file whose contents replace the built-in system instruction.
    pub persona_path: Option<PathBuf>,
    pub audio: AudioSettings,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let live_model = std::env::var("LIVE_MODEL").unwrap_or_else(|_| LIVE_MODEL.to_string());
        let voice_name = std::env::var("VOICE_NAME").unwrap_or_else(|_| DEFAULT_VOICE.to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let persona_path = std::env::var("PERSONA_PATH").ok().map(PathBuf::from);

        let mut audio = AudioSettings::default();
        if let Ok(gain_str) = std::env::var("VOLUME_GAIN") {
            audio.volume_gain = gain_str
                .parse::<f32>()
                .ok()
                .filter(|g| g.is_finite() && *g > 0.0)
                .ok_or_else(|| {
                    ConfigError::InvalidValue(
                        "VOLUME_GAIN".to_string(),
                        format!("'{}' is not a positive number", gain_str),
                    )
                })?;
        }

        Ok(Self {
            gemini_api_key,
            live_model,
            voice_name,
            log_level,
            persona_path,
            audio,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::env;
    use tracing::Level;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("GEMINI_API_KEY");
            env::remove_var("LIVE_MODEL");
            env::remove_var("VOICE_NAME");
            env::remove_var("RUST_LOG");
            env::remove_var("PERSONA_PATH");
            env::remove_var("VOLUME_GAIN");
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
    fn test_audio_settings_defaults() {
        let audio = AudioSettings::default();
        assert_eq!(audio.capture_sample_rate, 16_000);
        assert_eq!(audio.capture_block_size, 4096);
        assert_eq!(audio.playback_sample_rate, 24_000);
        assert_eq!(audio.volume_gain, 500.0);
    }

    #[test]
    #[serial]
    fn test_config_from_env_minimal() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "test-gemini-key");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.gemini_api_key.expose_secret(), "test-gemini-key");
        assert_eq!(config.live_model, LIVE_MODEL);
        assert_eq!(config.voice_name, "Kore");
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.persona_path, None);
        assert_eq!(config.audio, AudioSettings::default());
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "custom-key");
            env::set_var("LIVE_MODEL", "models/custom-live");
            env::set_var("VOICE_NAME", "Puck");
            env::set_var("RUST_LOG", "debug");
            env::set_var("PERSONA_PATH", "/custom/persona.txt");
            env::set_var("VOLUME_GAIN", "250");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.live_model, "models/custom-live");
        assert_eq!(config.voice_name, "Puck");
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.persona_path, Some(PathBuf::from("/custom/persona.txt")));
        assert_eq!(config.audio.volume_gain, 250.0);
    }

    #[test]
    #[serial]
    fn test_config_missing_api_key() {
        clear_env_vars();
        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(msg) => assert!(msg.contains("GEMINI_API_KEY")),
            _ => panic!("Expected MissingVar for GEMINI_API_KEY"),
        }

        unsafe {
            env::set_var("GEMINI_API_KEY", "   ");
        }
        assert!(matches!(Config::from_env(), Err(ConfigError::MissingVar(_))));
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "test-gemini-key");
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }

    #[test]
    #[serial]
    fn test_config_rejects_non_positive_gain() {
        for bad in ["0", "-3", "loud", "NaN"] {
            clear_env_vars();
            unsafe {
                env::set_var("GEMINI_API_KEY", "test-gemini-key");
                env::set_var("VOLUME_GAIN", bad);
            }
            match Config::from_env().unwrap_err() {
                ConfigError::InvalidValue(var, _) => assert_eq!(var, "VOLUME_GAIN"),
                _ => panic!("Expected InvalidValue for VOLUME_GAIN={bad}"),
            }
        }
    }
}
