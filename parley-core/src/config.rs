//! Session configuration and caller intents

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Contents could not be parsed
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// Parsed but inconsistent
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Placeholder track configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaceholderConfig {
    /// Blank canvas width when no previous track dictates one
    pub width: u32,
    /// Blank canvas height when no previous track dictates one
    pub height: u32,
    /// Frames per second drawn onto the blank canvas
    pub frame_rate: u32,
}

impl Default for PlaceholderConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            frame_rate: 10,
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Microphone used when the caller does not pick one
    pub default_audio_input_device_id: String,
    /// Speaker used when the caller does not pick one
    pub default_audio_output_device_id: String,
    /// Camera used when the caller does not pick one
    pub default_video_device_id: String,
    /// Placeholder tracks
    pub placeholder: PlaceholderConfig,
    /// Capacity of the engine and local-track event channels
    pub event_channel_capacity: usize,
    /// Reacquire local tracks when the app returns to the foreground
    pub reacquire_on_foreground: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_audio_input_device_id: "default".to_string(),
            default_audio_output_device_id: "default".to_string(),
            default_video_device_id: "default".to_string(),
            placeholder: PlaceholderConfig::default(),
            event_channel_capacity: 1000,
            reacquire_on_foreground: false,
        }
    }
}

impl SessionConfig {
    /// Parse and validate a JSON document
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed or fails validation
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or its contents are invalid
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check internal consistency
    ///
    /// # Errors
    ///
    /// Returns error describing the first inconsistent field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_channel_capacity must be greater than zero".to_string(),
            ));
        }
        if self.placeholder.frame_rate == 0 || self.placeholder.frame_rate > 1000 {
            return Err(ConfigError::Invalid(format!(
                "placeholder frame_rate must be within 1..=1000, got {}",
                self.placeholder.frame_rate
            )));
        }
        if self.placeholder.width == 0 || self.placeholder.height == 0 {
            return Err(ConfigError::Invalid(
                "placeholder dimensions must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// What the caller wants published when joining
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InitialSettings {
    /// Join with audio muted
    pub is_audio_muted: bool,
    /// Join with video muted
    pub is_video_muted: bool,
    /// Preferred microphone
    pub audio_input_device_id: Option<String>,
    /// Preferred speaker
    pub audio_output_device_id: Option<String>,
    /// Preferred camera
    pub video_device_id: Option<String>,
}
