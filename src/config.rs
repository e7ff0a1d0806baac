//! Session configuration.
//!
//! Sources are layered YAML file > environment > defaults. The endpoint and
//! bearer token have no default and are checked before any device or socket
//! is opened, so a misconfigured caller fails fast with a typed error
//! instead of a half-open session.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default capture/playback sample rate.
pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 16_000;

/// Default frame size in samples.
pub const DEFAULT_FRAME_SIZE_SAMPLES: usize = 1024;

/// Default delay between side prompts.
pub const DEFAULT_PROMPT_INTERVAL: Duration = Duration::from_secs(60);

/// Default bound on session drain time.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Error Types
// =============================================================================

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No bearer token was supplied
    #[error("auth token is required: set OPENAI_API_KEY or `auth_token` in the config file")]
    MissingAuthToken,

    /// No endpoint URI was supplied
    #[error("endpoint URI is required: set REALTIME_ENDPOINT or `endpoint` in the config file")]
    MissingEndpoint,

    /// A zero sample rate or frame size can never produce a frame
    #[error("{0} must be non-zero")]
    ZeroAudioParameter(&'static str),

    /// The config file could not be read
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that failed
        path: String,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The config file is not valid YAML
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path that failed
        path: String,
        /// Underlying parse error
        source: serde_yaml::Error,
    },
}

// =============================================================================
// Configuration Types
// =============================================================================

/// One operator-supplied steering instruction, delivered mid-session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidePrompt {
    /// Conversation role the prompt is attributed to
    #[serde(default = "default_prompt_role")]
    pub role: String,
    /// Instruction text
    pub text: String,
}

fn default_prompt_role() -> String {
    "system".to_string()
}

impl SidePrompt {
    /// A system-role prompt, the usual case.
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: default_prompt_role(),
            text: text.into(),
        }
    }
}

/// Everything a session needs, assembled once before `start` and never
/// mutated afterwards.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Capture and playback sample rate in Hz
    pub sample_rate_hz: u32,
    /// Samples per capture frame
    pub frame_size_samples: usize,
    /// Realtime endpoint URI (required, no default)
    pub endpoint: String,
    /// Bearer token for the endpoint (required)
    pub auth_token: String,
    /// Delay between side prompts
    pub prompt_interval: Duration,
    /// Bound on drain time during shutdown
    pub drain_timeout: Duration,
    /// Side prompts, delivered in order exactly once per session
    pub prompts: Vec<SidePrompt>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            frame_size_samples: DEFAULT_FRAME_SIZE_SAMPLES,
            endpoint: String::new(),
            auth_token: String::new(),
            prompt_interval: DEFAULT_PROMPT_INTERVAL,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            prompts: Vec::new(),
        }
    }
}

/// Raw YAML shape; every field optional so the file only has to say what it
/// overrides.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    sample_rate_hz: Option<u32>,
    frame_size_samples: Option<usize>,
    endpoint: Option<String>,
    auth_token: Option<String>,
    prompt_interval_secs: Option<u64>,
    drain_timeout_secs: Option<u64>,
    prompts: Option<Vec<SidePrompt>>,
}

impl SessionConfig {
    /// Load from environment variables over defaults.
    pub fn from_env() -> Self {
        Self::merge(FileConfig::default())
    }

    /// Load from a YAML file, with environment variables filling anything
    /// the file leaves unset.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: FileConfig =
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self::merge(file))
    }

    /// Apply file values over env values over defaults.
    fn merge(file: FileConfig) -> Self {
        let defaults = Self::default();
        Self {
            sample_rate_hz: file
                .sample_rate_hz
                .or_else(|| env_parse::<u32>("REALTIME_SAMPLE_RATE_HZ"))
                .unwrap_or(defaults.sample_rate_hz),
            frame_size_samples: file
                .frame_size_samples
                .or_else(|| env_parse::<usize>("REALTIME_FRAME_SIZE"))
                .unwrap_or(defaults.frame_size_samples),
            endpoint: file
                .endpoint
                .or_else(|| std::env::var("REALTIME_ENDPOINT").ok())
                .unwrap_or_default(),
            auth_token: file
                .auth_token
                .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                .unwrap_or_default(),
            prompt_interval: file
                .prompt_interval_secs
                .or_else(|| env_parse::<u64>("REALTIME_PROMPT_INTERVAL_SECS"))
                .map(Duration::from_secs)
                .unwrap_or(defaults.prompt_interval),
            drain_timeout: file
                .drain_timeout_secs
                .or_else(|| env_parse::<u64>("REALTIME_DRAIN_TIMEOUT_SECS"))
                .map(Duration::from_secs)
                .unwrap_or(defaults.drain_timeout),
            prompts: file.prompts.unwrap_or(defaults.prompts),
        }
    }

    /// Check required fields. Called by the session before it opens any
    /// device or socket.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.is_empty() {
            return Err(ConfigError::MissingEndpoint);
        }
        if self.auth_token.is_empty() {
            return Err(ConfigError::MissingAuthToken);
        }
        if self.sample_rate_hz == 0 {
            return Err(ConfigError::ZeroAudioParameter("sample rate"));
        }
        if self.frame_size_samples == 0 {
            return Err(ConfigError::ZeroAudioParameter("frame size"));
        }
        Ok(())
    }

    /// Byte length of one capture frame (mono 16-bit PCM).
    pub fn frame_bytes(&self) -> usize {
        self.frame_size_samples * 2
    }
}

/// Read and parse a numeric environment override. A set-but-unparsable
/// value is warned about and ignored rather than silently dropped.
fn env_parse<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(key).ok()?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(key, value = %raw, error = %err, "ignoring unparsable environment override");
            None
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.sample_rate_hz, 16_000);
        assert_eq!(config.frame_size_samples, 1024);
        assert_eq!(config.frame_bytes(), 2048);
        assert_eq!(config.prompt_interval, Duration::from_secs(60));
        assert!(config.prompts.is_empty());
        // Endpoint and token are both required and carry no default.
        assert!(config.endpoint.is_empty());
        assert!(config.auth_token.is_empty());
    }

    #[test]
    fn test_validate_requires_auth_token() {
        let config = SessionConfig {
            endpoint: "wss://example.com/rt".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingAuthToken)
        ));
    }

    #[test]
    fn test_validate_requires_endpoint() {
        let config = SessionConfig {
            auth_token: "tok".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingEndpoint)
        ));
    }

    #[test]
    fn test_validate_rejects_zero_frame_size() {
        let config = SessionConfig {
            auth_token: "tok".to_string(),
            frame_size_samples: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroAudioParameter(_))
        ));
    }

    #[test]
    fn test_from_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            concat!(
                "endpoint: \"wss://example.com/rt\"\n",
                "auth_token: \"file-token\"\n",
                "sample_rate_hz: 24000\n",
                "frame_size_samples: 480\n",
                "prompt_interval_secs: 5\n",
                "prompts:\n",
                "  - text: \"Be a tour guide.\"\n",
                "  - role: user\n",
                "    text: \"Talk like a robot.\"\n",
            )
        )
        .unwrap();

        let config = SessionConfig::from_file(file.path()).unwrap();
        assert_eq!(config.endpoint, "wss://example.com/rt");
        assert_eq!(config.auth_token, "file-token");
        assert_eq!(config.sample_rate_hz, 24_000);
        assert_eq!(config.frame_size_samples, 480);
        assert_eq!(config.prompt_interval, Duration::from_secs(5));
        assert_eq!(config.prompts.len(), 2);
        assert_eq!(config.prompts[0].role, "system");
        assert_eq!(config.prompts[1].role, "user");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_missing_is_io_error() {
        let result = SessionConfig::from_file(Path::new("/nonexistent/config.yaml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_env_parse_rejects_garbage_and_accepts_numbers() {
        // Unique keys so parallel tests cannot interfere.
        unsafe {
            std::env::set_var("DUPLEX_TEST_ENV_PARSE_BAD", "16k");
            std::env::set_var("DUPLEX_TEST_ENV_PARSE_GOOD", "24000");
        }
        assert_eq!(env_parse::<u32>("DUPLEX_TEST_ENV_PARSE_BAD"), None);
        assert_eq!(
            env_parse::<u32>("DUPLEX_TEST_ENV_PARSE_GOOD"),
            Some(24_000)
        );
        assert_eq!(env_parse::<u32>("DUPLEX_TEST_ENV_PARSE_UNSET"), None);
    }

    #[test]
    fn test_from_file_bad_yaml_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "prompts: [unclosed").unwrap();
        let result = SessionConfig::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }
}
