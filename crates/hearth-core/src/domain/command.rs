//! Resolved commands as handed over by the external resolver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::device::{Arguments, DeviceId, DeviceKind, Target};
use super::errors::HomeError;

/// Routing key naming a single device.
pub const DEVICE_ID_KEY: &str = "device_id";
/// Routing key naming a device kind (batch).
pub const CATEGORY_KEY: &str = "category";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedCommand {
    pub operation: String,
    #[serde(default)]
    pub arguments: Arguments,
    #[serde(default)]
    pub raw_text: String,
    pub timestamp: DateTime<Utc>,
}

impl ResolvedCommand {
    pub fn new(
        operation: impl Into<String>,
        arguments: Arguments,
        raw_text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            operation: operation.into(),
            arguments,
            raw_text: raw_text.into(),
            timestamp,
        }
    }

    /// Split the routing keys off the argument map.
    ///
    /// Returns the target and the remaining operation parameters.
    pub fn split_target(&self) -> Result<(Target, Arguments), HomeError> {
        let mut params = self.arguments.clone();
        let device = params.remove(DEVICE_ID_KEY);
        let category = params.remove(CATEGORY_KEY);

        let target = match (device, category) {
            (Some(_), Some(_)) => {
                return Err(HomeError::invalid_argument(
                    DEVICE_ID_KEY,
                    "give either device_id or category, not both",
                ));
            }
            (Some(id), None) => {
                let id = id
                    .as_str()
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| HomeError::invalid_argument(DEVICE_ID_KEY, "expected a non-empty string"))?;
                Target::Device(DeviceId::new(id))
            }
            (None, Some(category)) => {
                let name = category
                    .as_str()
                    .ok_or_else(|| HomeError::invalid_argument(CATEGORY_KEY, "expected a string"))?;
                let kind = name
                    .parse::<DeviceKind>()
                    .map_err(|e| HomeError::invalid_argument(CATEGORY_KEY, e.to_string()))?;
                Target::Category(kind)
            }
            (None, None) => {
                return Err(HomeError::invalid_argument(
                    DEVICE_ID_KEY,
                    "command names no target (device_id or category)",
                ));
            }
        };
        Ok((target, params))
    }
}
