//! Devices: kind, identity, attribute state and command targets.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attribute -> value map. Used for device state and for command arguments.
///
/// BTreeMap keeps serialization order stable, so snapshots and log lines diff cleanly.
pub type StateMap = BTreeMap<String, serde_json::Value>;

/// Argument map handed over by the resolver.
pub type Arguments = BTreeMap<String, serde_json::Value>;

/// The fixed set of device kinds. Each kind owns a capability table
/// (see `domain::capability`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Light,
    Thermostat,
    Door,
    Fan,
    Curtain,
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 5] = [
        DeviceKind::Light,
        DeviceKind::Thermostat,
        DeviceKind::Door,
        DeviceKind::Fan,
        DeviceKind::Curtain,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::Light => "light",
            DeviceKind::Thermostat => "thermostat",
            DeviceKind::Door => "door",
            DeviceKind::Fan => "fan",
            DeviceKind::Curtain => "curtain",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown device kind `{0}`")]
pub struct UnknownKind(pub String);

impl FromStr for DeviceKind {
    type Err = UnknownKind;

    /// Accepts singular and plural category names ("light", "lights").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let singular = normalized.strip_suffix('s').unwrap_or(&normalized);
        DeviceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized || kind.as_str() == singular)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A device as owned by the registry.
///
/// Created from the static catalog at startup, mutated only through
/// `DeviceRegistry::apply_operation`, never removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub kind: DeviceKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    pub state: StateMap,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    pub fn new(
        id: DeviceId,
        kind: DeviceKind,
        name: impl Into<String>,
        room: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            room,
            state: kind.initial_state(),
            updated_at: now,
        }
    }
}

/// What a command acts on: one device, or every device of a kind (batch).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Target {
    Device(DeviceId),
    Category(DeviceKind),
}

impl Target {
    pub fn is_batch(&self) -> bool {
        matches!(self, Target::Category(_))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Device(id) => write!(f, "device {id}"),
            Target::Category(kind) => write!(f, "all {kind} devices"),
        }
    }
}
