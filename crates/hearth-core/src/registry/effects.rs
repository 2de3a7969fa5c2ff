//! Per-kind state effects of an operation.
//!
//! Arguments reaching this module have already been validated against the
//! capability table, so lookups of declared parameters cannot miss.

use serde_json::{Value, json};

use crate::domain::{Arguments, DeviceKind, StateMap};

/// Compute the state after applying `operation` to `state`.
///
/// `Err` carries the reason the device refused the operation; the input
/// state is never modified.
pub(crate) fn apply(
    kind: DeviceKind,
    operation: &str,
    args: &Arguments,
    state: &StateMap,
) -> Result<StateMap, String> {
    let mut next = state.clone();
    match (kind, operation) {
        (DeviceKind::Light | DeviceKind::Fan, "turn_on") => set(&mut next, "is_on", json!(true)),
        (DeviceKind::Light | DeviceKind::Fan, "turn_off") => set(&mut next, "is_on", json!(false)),
        (DeviceKind::Light, "set_brightness") => {
            let level = arg(args, "level")?;
            if level.as_i64().unwrap_or(0) > 0 {
                set(&mut next, "is_on", json!(true));
            }
            set(&mut next, "brightness", level);
        }
        (DeviceKind::Light, "set_color") => set(&mut next, "color", arg(args, "color")?),

        (DeviceKind::Thermostat, "set_temperature") => {
            set(&mut next, "target_temp", as_float(arg(args, "temp")?));
            if next.get("mode").and_then(Value::as_str) == Some("off") {
                set(&mut next, "mode", json!("auto"));
            }
        }
        (DeviceKind::Thermostat, "set_mode") => set(&mut next, "mode", arg(args, "mode")?),

        (DeviceKind::Door, "lock") => set(&mut next, "is_locked", json!(true)),
        (DeviceKind::Door, "unlock") => set(&mut next, "is_locked", json!(false)),
        (DeviceKind::Door, "open") => {
            if flag(state, "is_locked") {
                return Err("door is locked; unlock it first".to_string());
            }
            set(&mut next, "is_closed", json!(false));
        }
        (DeviceKind::Door, "close") => set(&mut next, "is_closed", json!(true)),

        (DeviceKind::Fan, "set_speed") => {
            set(&mut next, "speed", arg(args, "speed")?);
            set(&mut next, "is_on", json!(true));
        }

        (DeviceKind::Curtain, "open") => set(&mut next, "position", json!(100)),
        (DeviceKind::Curtain, "close") => set(&mut next, "position", json!(0)),
        (DeviceKind::Curtain, "set_position") => set(&mut next, "position", arg(args, "position")?),

        (kind, op) => return Err(format!("{kind} has no effect for `{op}`")),
    }
    Ok(next)
}

fn set(state: &mut StateMap, key: &str, value: Value) {
    state.insert(key.to_string(), value);
}

fn arg(args: &Arguments, name: &str) -> Result<Value, String> {
    args.get(name)
        .cloned()
        .ok_or_else(|| format!("missing argument `{name}`"))
}

fn flag(state: &StateMap, key: &str) -> bool {
    state.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Temperatures are stored as floats so `24` and `24.0` compare equal.
fn as_float(value: Value) -> Value {
    value
        .as_f64()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(value)
}
