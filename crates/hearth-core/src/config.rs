//! Configuration - TOML で与える設定
//!
//! Every field has a default, so an empty file (or no file) yields the sample
//! home with the default learning and retry parameters.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{Duration, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{DeviceId, DeviceKind};
use crate::preference::LearningPolicy;
use crate::retry::RetryPolicy;

/// One entry of the static device catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub id: DeviceId,
    pub kind: DeviceKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

impl DeviceSpec {
    pub fn new(id: &str, kind: DeviceKind, name: &str, room: Option<&str>) -> Self {
        Self {
            id: DeviceId::new(id),
            kind,
            name: name.to_string(),
            room: room.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeConfig {
    /// Directory holding the device snapshot, preference table and interaction log.
    pub data_dir: PathBuf,
    /// Local offset used to derive time-of-day buckets.
    pub utc_offset_minutes: i32,
    pub feedback_window_secs: i64,
    pub learning: LearningPolicy,
    pub retry: RetryPolicy,
    pub devices: Vec<DeviceSpec>,
}

impl Default for HomeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            utc_offset_minutes: 0,
            feedback_window_secs: 300,
            learning: LearningPolicy::default(),
            retry: RetryPolicy::default(),
            devices: sample_home(),
        }
    }
}

/// ConfigError は設定の読込・検証エラー
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl HomeConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: HomeConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.utc_offset_minutes.abs() > 18 * 60 {
            return invalid(format!(
                "utc_offset_minutes {} is outside +/-18h",
                self.utc_offset_minutes
            ));
        }
        if self.feedback_window_secs < 0 {
            return invalid("feedback_window_secs must not be negative".into());
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1".into());
        }
        if !(self.retry.multiplier.is_finite() && self.retry.multiplier >= 1.0) {
            return invalid("retry.multiplier must be a finite number >= 1.0".into());
        }
        self.learning.validate().map_err(ConfigError::Invalid)?;

        let mut seen = BTreeSet::new();
        for device in &self.devices {
            if device.id.as_str().trim().is_empty() {
                return invalid("device id must not be empty".into());
            }
            if !seen.insert(device.id.as_str()) {
                return invalid(format!("duplicate device id `{}`", device.id));
            }
        }
        Ok(())
    }

    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or(Utc.fix())
    }

    pub fn feedback_window(&self) -> Duration {
        Duration::seconds(self.feedback_window_secs)
    }

    pub fn devices_path(&self) -> PathBuf {
        self.data_dir.join("devices.json")
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir.join("preferences.json")
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("interactions.jsonl")
    }
}

/// The built-in catalog used when the config lists no devices.
pub fn sample_home() -> Vec<DeviceSpec> {
    vec![
        DeviceSpec::new("living_room_light", DeviceKind::Light, "Living room light", Some("living_room")),
        DeviceSpec::new("bedroom_light", DeviceKind::Light, "Bedroom light", Some("bedroom")),
        DeviceSpec::new("kitchen_light", DeviceKind::Light, "Kitchen light", Some("kitchen")),
        DeviceSpec::new("study_light", DeviceKind::Light, "Study light", Some("study")),
        DeviceSpec::new("thermostat", DeviceKind::Thermostat, "Thermostat", Some("living_room")),
        DeviceSpec::new("front_door", DeviceKind::Door, "Front door", Some("entrance")),
        DeviceSpec::new("bedroom_fan", DeviceKind::Fan, "Bedroom fan", Some("bedroom")),
        DeviceSpec::new("living_room_curtain", DeviceKind::Curtain, "Living room curtain", Some("living_room")),
    ]
}
