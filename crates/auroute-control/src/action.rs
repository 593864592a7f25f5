//! User/UI-originated actions and their JSON wire encoding (spec §4.10, §6.5).
//!
//! Mirrors the host's `ActionDispatcher` action set: a single flat enum of
//! "things a control surface can ask the engine to do", carried alongside up
//! to four loosely-typed parameter slots rather than per-variant payloads, so
//! that a generic listener can log or replay any action uniformly.

use serde::Deserialize;
use serde_json::Value;

/// The catalog of user-facing actions a control surface (UI, MIDI controller,
/// OSC bridge) can dispatch into the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Toggles bypass on the plugin at `int_param`.
    PluginBypass,
    /// Toggles bypass for the whole chain.
    MasterBypass,
    /// Sets a volume target (`string_param`: `"input"` or `"monitor"`) to
    /// `float_param` (0..1).
    SetVolume,
    /// Toggles mute for a target (`string_param`).
    ToggleMute,
    /// Loads a named preset (`int_param`: slot index).
    LoadPreset,
    /// Immediately mutes all outputs, overriding everything else.
    PanicMute,
    /// Adjusts input gain by `float_param` relative to the current value.
    InputGainAdjust,
    /// Advances to the next quick-slot preset.
    NextPreset,
    /// Returns to the previous quick-slot preset.
    PreviousPreset,
    /// Toggles the input mute flag specifically (distinct from `ToggleMute`,
    /// which takes a target).
    InputMuteToggle,
    /// Switches directly to quick-slot `int_param` (0..`NUM_SLOTS`).
    SwitchPresetSlot,
    /// Toggles whether the monitor sink is enabled.
    MonitorToggle,
    /// Toggles whether the recorder is active.
    RecordingToggle,
    /// Toggles whether the shared-memory IPC writer is enabled.
    IpcToggle,
    /// Sets parameter `int_param2` on plugin `int_param` to `float_param`
    /// (0..1, plugin-normalized).
    SetPluginParameter,
}

/// A dispatched action plus whatever subset of its parameter slots are
/// meaningful for that action. Unused slots are left at their defaults
/// rather than wrapped in an `Option` per-field, matching the host's shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionEvent {
    pub action: Action,
    pub int_param: i32,
    pub int_param2: i32,
    pub float_param: f32,
    pub string_param: String,
}

impl ActionEvent {
    #[must_use]
    pub fn new(action: Action) -> Self {
        Self {
            action,
            int_param: 0,
            int_param2: 0,
            float_param: 0.0,
            string_param: String::new(),
        }
    }

    #[must_use]
    pub fn with_int(mut self, value: i32) -> Self {
        self.int_param = value;
        self
    }

    #[must_use]
    pub fn with_int2(mut self, value: i32) -> Self {
        self.int_param2 = value;
        self
    }

    #[must_use]
    pub fn with_float(mut self, value: f32) -> Self {
        self.float_param = value;
        self
    }

    #[must_use]
    pub fn with_string(mut self, value: impl Into<String>) -> Self {
        self.string_param = value.into();
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ActionParseError {
    #[error("not a valid action envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    /// Unrecognized action names are intentionally not an error at the
    /// dispatch layer (spec §6.5: "unknown names silently ignored"), but
    /// `parse` surfaces them so a caller that wants strict behavior can.
    #[error("unrecognized action name: {0}")]
    UnknownAction(String),
}

#[derive(Debug, Deserialize)]
struct ActionEnvelope {
    #[serde(rename = "type")]
    kind: String,
    action: String,
    #[serde(default)]
    params: Value,
}

fn param_f32(params: &Value, key: &str) -> f32 {
    params.get(key).and_then(Value::as_f64).unwrap_or(0.0) as f32
}

fn param_i32(params: &Value, key: &str) -> i32 {
    params.get(key).and_then(Value::as_i64).unwrap_or(0) as i32
}

fn param_str(params: &Value, key: &str) -> String {
    params
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Parses a `{"type":"action","action":"...","params":{...}}` envelope
/// (spec §6.5) into an [`ActionEvent`].
///
/// # Errors
/// Returns [`ActionParseError::Malformed`] if `json` isn't a valid action
/// envelope at all, or [`ActionParseError::UnknownAction`] if `action` names
/// something this build doesn't recognize.
pub fn parse_action(json: &str) -> Result<ActionEvent, ActionParseError> {
    let envelope: ActionEnvelope = serde_json::from_str(json)?;
    if envelope.kind != "action" {
        return Err(ActionParseError::UnknownAction(envelope.kind));
    }
    let params = &envelope.params;

    let event = match envelope.action.as_str() {
        "plugin_bypass" => ActionEvent::new(Action::PluginBypass).with_int(param_i32(params, "index")),
        "master_bypass" => ActionEvent::new(Action::MasterBypass),
        "set_volume" => ActionEvent::new(Action::SetVolume)
            .with_string(param_str(params, "target"))
            .with_float(param_f32(params, "value")),
        "toggle_mute" => ActionEvent::new(Action::ToggleMute).with_string(param_str(params, "target")),
        "load_preset" => ActionEvent::new(Action::LoadPreset).with_int(param_i32(params, "index")),
        "panic_mute" => ActionEvent::new(Action::PanicMute),
        "input_gain" => ActionEvent::new(Action::InputGainAdjust).with_float(param_f32(params, "delta")),
        "next_preset" => ActionEvent::new(Action::NextPreset),
        "previous_preset" => ActionEvent::new(Action::PreviousPreset),
        "input_mute_toggle" => ActionEvent::new(Action::InputMuteToggle),
        "switch_preset_slot" => ActionEvent::new(Action::SwitchPresetSlot).with_int(param_i32(params, "slot")),
        "monitor_toggle" => ActionEvent::new(Action::MonitorToggle),
        "recording_toggle" => ActionEvent::new(Action::RecordingToggle),
        "ipc_toggle" => ActionEvent::new(Action::IpcToggle),
        "set_plugin_parameter" => ActionEvent::new(Action::SetPluginParameter)
            .with_int(param_i32(params, "pluginIndex"))
            .with_int2(param_i32(params, "paramIndex"))
            .with_float(param_f32(params, "value")),
        other => return Err(ActionParseError::UnknownAction(other.to_string())),
    };
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_set_volume_monitor_scenario() {
        let json = r#"{"type":"action","action":"set_volume","params":{"target":"monitor","value":0.75}}"#;
        let event = parse_action(json).unwrap();
        assert_eq!(event.action, Action::SetVolume);
        assert_eq!(event.string_param, "monitor");
        assert!((event.float_param - 0.75).abs() < f32::EPSILON);
    }

    #[test]
    fn parses_plugin_bypass_index() {
        let json = r#"{"type":"action","action":"plugin_bypass","params":{"index":2}}"#;
        let event = parse_action(json).unwrap();
        assert_eq!(event.action, Action::PluginBypass);
        assert_eq!(event.int_param, 2);
    }

    #[test]
    fn parses_set_plugin_parameter() {
        let json =
            r#"{"type":"action","action":"set_plugin_parameter","params":{"pluginIndex":1,"paramIndex":3,"value":0.2}}"#;
        let event = parse_action(json).unwrap();
        assert_eq!(event.action, Action::SetPluginParameter);
        assert_eq!(event.int_param, 1);
        assert_eq!(event.int_param2, 3);
        assert!((event.float_param - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn parses_actions_with_no_params() {
        for name in ["master_bypass", "panic_mute", "next_preset", "monitor_toggle", "ipc_toggle"] {
            let json = format!(r#"{{"type":"action","action":"{name}"}}"#);
            assert!(parse_action(&json).is_ok(), "failed to parse {name}");
        }
    }

    #[test]
    fn unknown_action_name_is_an_error() {
        let json = r#"{"type":"action","action":"levitate","params":{}}"#;
        assert!(matches!(parse_action(json), Err(ActionParseError::UnknownAction(_))));
    }

    #[test]
    fn wrong_envelope_type_is_rejected() {
        let json = r#"{"type":"state","action":"panic_mute"}"#;
        assert!(matches!(parse_action(json), Err(ActionParseError::UnknownAction(_))));
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(parse_action("not json"), Err(ActionParseError::Malformed(_))));
    }
}
