//! Capability tables: which operations each device kind supports and the
//! schema of their parameters.
//!
//! Tables are static and checked at the dispatch boundary. Arguments coming
//! from the resolver are validated against them and rejected on mismatch;
//! nothing is coerced.

use serde_json::{Value, json};

use super::device::{Arguments, DeviceKind, StateMap};

/// Type and bounds of a single parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamKind {
    /// Integer in `min..=max`.
    Int { min: i64, max: i64 },
    /// Number in `min..=max`.
    Float { min: f64, max: f64 },
    /// One of a fixed set of strings.
    Choice(&'static [&'static str]),
    /// Any non-empty string.
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    /// Whether the PreferenceStore may learn and override this parameter.
    pub learnable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperationSpec {
    pub name: &'static str,
    pub params: &'static [ParamSpec],
}

/// A single argument failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentError {
    pub parameter: String,
    pub reason: String,
}

impl ArgumentError {
    fn new(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }
}

const NO_PARAMS: &[ParamSpec] = &[];

const LIGHT_OPS: &[OperationSpec] = &[
    OperationSpec { name: "turn_on", params: NO_PARAMS },
    OperationSpec { name: "turn_off", params: NO_PARAMS },
    OperationSpec {
        name: "set_brightness",
        params: &[ParamSpec {
            name: "level",
            kind: ParamKind::Int { min: 0, max: 100 },
            learnable: true,
        }],
    },
    OperationSpec {
        name: "set_color",
        params: &[ParamSpec { name: "color", kind: ParamKind::Text, learnable: false }],
    },
];

const THERMOSTAT_OPS: &[OperationSpec] = &[
    OperationSpec {
        name: "set_temperature",
        params: &[ParamSpec {
            name: "temp",
            kind: ParamKind::Float { min: 16.0, max: 30.0 },
            learnable: true,
        }],
    },
    OperationSpec {
        name: "set_mode",
        params: &[ParamSpec {
            name: "mode",
            kind: ParamKind::Choice(&["auto", "heat", "cool", "off"]),
            learnable: false,
        }],
    },
];

const DOOR_OPS: &[OperationSpec] = &[
    OperationSpec { name: "lock", params: NO_PARAMS },
    OperationSpec { name: "unlock", params: NO_PARAMS },
    OperationSpec { name: "open", params: NO_PARAMS },
    OperationSpec { name: "close", params: NO_PARAMS },
];

const FAN_OPS: &[OperationSpec] = &[
    OperationSpec { name: "turn_on", params: NO_PARAMS },
    OperationSpec { name: "turn_off", params: NO_PARAMS },
    OperationSpec {
        name: "set_speed",
        params: &[ParamSpec {
            name: "speed",
            kind: ParamKind::Int { min: 1, max: 3 },
            learnable: true,
        }],
    },
];

const CURTAIN_OPS: &[OperationSpec] = &[
    OperationSpec { name: "open", params: NO_PARAMS },
    OperationSpec { name: "close", params: NO_PARAMS },
    OperationSpec {
        name: "set_position",
        params: &[ParamSpec {
            name: "position",
            kind: ParamKind::Int { min: 0, max: 100 },
            learnable: false,
        }],
    },
];

impl DeviceKind {
    pub fn operations(self) -> &'static [OperationSpec] {
        match self {
            DeviceKind::Light => LIGHT_OPS,
            DeviceKind::Thermostat => THERMOSTAT_OPS,
            DeviceKind::Door => DOOR_OPS,
            DeviceKind::Fan => FAN_OPS,
            DeviceKind::Curtain => CURTAIN_OPS,
        }
    }

    pub fn operation(self, name: &str) -> Option<&'static OperationSpec> {
        self.operations().iter().find(|op| op.name == name)
    }

    /// State of a freshly installed device.
    pub fn initial_state(self) -> StateMap {
        let v = match self {
            DeviceKind::Light => json!({ "is_on": false, "brightness": 100, "color": "white" }),
            DeviceKind::Thermostat => {
                json!({ "current_temp": 22.0, "target_temp": 22.0, "mode": "auto" })
            }
            DeviceKind::Door => json!({ "is_locked": true, "is_closed": true }),
            DeviceKind::Fan => json!({ "is_on": false, "speed": 1 }),
            DeviceKind::Curtain => json!({ "position": 0 }),
        };
        match v {
            Value::Object(map) => map.into_iter().collect(),
            _ => StateMap::new(),
        }
    }
}

impl OperationSpec {
    pub fn param(&self, name: &str) -> Option<&'static ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn learnable_params(&self) -> impl Iterator<Item = &'static ParamSpec> {
        let params: &'static [ParamSpec] = self.params;
        params.iter().filter(|p| p.learnable)
    }

    /// Validate a full argument map: every parameter present and well-formed,
    /// nothing extra.
    pub fn validate(&self, args: &Arguments) -> Result<(), ArgumentError> {
        for spec in self.params {
            let value = args
                .get(spec.name)
                .ok_or_else(|| ArgumentError::new(spec.name, "missing required argument"))?;
            spec.check(value)?;
        }
        if let Some(extra) = args.keys().find(|k| self.param(k).is_none()) {
            return Err(ArgumentError::new(
                extra.as_str(),
                format!("not a parameter of `{}`", self.name),
            ));
        }
        Ok(())
    }
}

impl ParamSpec {
    /// Check a single value against this parameter's type and bounds.
    pub fn check(&self, value: &Value) -> Result<(), ArgumentError> {
        match self.kind {
            ParamKind::Int { min, max } => {
                let n = value
                    .as_i64()
                    .ok_or_else(|| ArgumentError::new(self.name, format!("expected integer, got {value}")))?;
                if !(min..=max).contains(&n) {
                    return Err(ArgumentError::new(
                        self.name,
                        format!("{n} is outside {min}..={max}"),
                    ));
                }
            }
            ParamKind::Float { min, max } => {
                let n = value
                    .as_f64()
                    .ok_or_else(|| ArgumentError::new(self.name, format!("expected number, got {value}")))?;
                if !(min..=max).contains(&n) {
                    return Err(ArgumentError::new(
                        self.name,
                        format!("{n} is outside {min}..={max}"),
                    ));
                }
            }
            ParamKind::Choice(choices) => {
                let s = value
                    .as_str()
                    .ok_or_else(|| ArgumentError::new(self.name, format!("expected string, got {value}")))?;
                if !choices.contains(&s) {
                    return Err(ArgumentError::new(
                        self.name,
                        format!("`{s}` is not one of {}", choices.join(", ")),
                    ));
                }
            }
            ParamKind::Text => {
                let s = value
                    .as_str()
                    .ok_or_else(|| ArgumentError::new(self.name, format!("expected string, got {value}")))?;
                if s.trim().is_empty() {
                    return Err(ArgumentError::new(self.name, "must not be empty"));
                }
            }
        }
        Ok(())
    }

    /// Render a learned numeric value in this parameter's JSON type.
    ///
    /// Integer parameters are rounded; returns `None` for non-numeric kinds.
    pub fn numeric_value(&self, value: f64) -> Option<Value> {
        match self.kind {
            ParamKind::Int { .. } => Some(json!(value.round() as i64)),
            ParamKind::Float { .. } => serde_json::Number::from_f64(value).map(Value::Number),
            ParamKind::Choice(_) | ParamKind::Text => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn args(v: Value) -> Arguments {
        match v {
            Value::Object(map) => map.into_iter().collect(),
            _ => Arguments::new(),
        }
    }

    #[test]
    fn every_kind_has_operations_and_state() {
        for kind in DeviceKind::ALL {
            assert!(!kind.operations().is_empty(), "{kind} has no operations");
            assert!(!kind.initial_state().is_empty(), "{kind} has no state");
        }
    }

    #[test]
    fn learnable_params_are_numeric() {
        for kind in DeviceKind::ALL {
            for op in kind.operations() {
                for p in op.learnable_params() {
                    assert!(p.numeric_value(1.0).is_some(), "{}.{} is not numeric", op.name, p.name);
                }
            }
        }
    }

    #[rstest]
    #[case::in_range(json!({"level": 40}), true)]
    #[case::lower_bound(json!({"level": 0}), true)]
    #[case::upper_bound(json!({"level": 100}), true)]
    #[case::too_high(json!({"level": 101}), false)]
    #[case::float_for_int(json!({"level": 40.5}), false)]
    #[case::string_for_int(json!({"level": "40"}), false)]
    #[case::missing(json!({}), false)]
    #[case::extra(json!({"level": 40, "color": "red"}), false)]
    fn brightness_validation(#[case] input: Value, #[case] ok: bool) {
        let op = DeviceKind::Light.operation("set_brightness").unwrap();
        assert_eq!(op.validate(&args(input)).is_ok(), ok);
    }

    #[rstest]
    #[case::valid("cool", true)]
    #[case::invalid("turbo", false)]
    fn mode_is_an_enum(#[case] mode: &str, #[case] ok: bool) {
        let op = DeviceKind::Thermostat.operation("set_mode").unwrap();
        assert_eq!(op.validate(&args(json!({ "mode": mode }))).is_ok(), ok);
    }

    #[test]
    fn temperature_accepts_integers_as_numbers() {
        let op = DeviceKind::Thermostat.operation("set_temperature").unwrap();
        assert!(op.validate(&args(json!({"temp": 24}))).is_ok());
        assert!(op.validate(&args(json!({"temp": 15.5}))).is_err());
    }

    #[test]
    fn validation_error_names_the_parameter() {
        let op = DeviceKind::Fan.operation("set_speed").unwrap();
        let err = op.validate(&args(json!({"speed": 9}))).unwrap_err();
        assert_eq!(err.parameter, "speed");
        assert!(err.reason.contains("1..=3"));
    }

    #[test]
    fn numeric_value_rounds_integers() {
        let level = DeviceKind::Light.operation("set_brightness").unwrap().param("level").unwrap();
        assert_eq!(level.numeric_value(39.6), Some(json!(40)));

        let temp = DeviceKind::Thermostat.operation("set_temperature").unwrap().param("temp").unwrap();
        assert_eq!(temp.numeric_value(23.5), Some(json!(23.5)));
    }

    #[test]
    fn unknown_operation_is_none() {
        assert!(DeviceKind::Door.operation("set_brightness").is_none());
    }
}
