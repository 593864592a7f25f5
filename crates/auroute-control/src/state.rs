//! Canonical UI-facing application state and its JSON wire encoding
//! (spec §3, §4.11, §6.4).
//!
//! `AppState` is the single mutable snapshot a control surface renders from.
//! `StateBroadcaster` owns it behind a mutex: [`StateBroadcaster::update`]
//! mutates it under the lock, then notifies listeners from a snapshot taken
//! after the lock is released, so a listener can itself query state without
//! deadlocking against the writer.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// One chain position as reported to a control surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginState {
    pub name: String,
    pub bypass: bool,
    pub loaded: bool,
}

/// The two volume faders a control surface can move.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Volumes {
    pub input: f32,
    pub monitor: f32,
}

impl Default for Volumes {
    fn default() -> Self {
        Self {
            input: 1.0,
            monitor: 1.0,
        }
    }
}

/// Canonical application state snapshot (spec §6.4's `data` object).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    pub plugins: Vec<PluginState>,
    pub volumes: Volumes,
    pub master_bypassed: bool,
    pub muted: bool,
    pub output_muted: bool,
    pub input_muted: bool,
    pub preset: String,
    pub latency_ms: f32,
    pub monitor_latency_ms: f32,
    pub level_db: f32,
    pub cpu_percent: f32,
    pub sample_rate: u32,
    pub buffer_size: u32,
    /// `1` (mono) or `2` (stereo).
    pub channel_mode: u8,
    pub monitor_enabled: bool,
    /// `0..NUM_SLOTS`.
    pub active_slot: u8,
    pub recording: bool,
    pub recording_seconds: f64,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            plugins: Vec::new(),
            volumes: Volumes::default(),
            master_bypassed: false,
            muted: false,
            output_muted: false,
            input_muted: false,
            preset: String::new(),
            latency_ms: 0.0,
            monitor_latency_ms: 0.0,
            level_db: f32::NEG_INFINITY,
            cpu_percent: 0.0,
            sample_rate: 48_000,
            buffer_size: 256,
            channel_mode: 2,
            monitor_enabled: false,
            active_slot: 0,
            recording: false,
            recording_seconds: 0.0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StateEnvelope {
    #[serde(rename = "type")]
    kind: String,
    data: AppState,
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("failed to encode/decode state envelope: {0}")]
    Json(#[from] serde_json::Error),
    #[error("not a state envelope (type was {0:?})")]
    WrongEnvelopeType(String),
}

/// Receives the new snapshot after every [`StateBroadcaster::update`].
pub trait StateListener: Send + Sync {
    fn on_state_changed(&self, state: &AppState);
}

impl<F: Fn(&AppState) + Send + Sync> StateListener for F {
    fn on_state_changed(&self, state: &AppState) {
        self(state);
    }
}

/// Owns the canonical [`AppState`] and fans out change notifications.
#[derive(Default)]
pub struct StateBroadcaster {
    state: Mutex<AppState>,
    listeners: Mutex<Vec<Arc<dyn StateListener>>>,
}

impl StateBroadcaster {
    #[must_use]
    pub fn new(initial: AppState) -> Self {
        Self {
            state: Mutex::new(initial),
            listeners: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> AppState {
        self.state.lock().expect("state mutex poisoned").clone()
    }

    pub fn add_listener(&self, listener: Arc<dyn StateListener>) {
        self.listeners.lock().expect("listener mutex poisoned").push(listener);
    }

    /// Applies `mutator` to the canonical state under the lock, then
    /// notifies listeners with the updated snapshot after releasing it.
    pub fn update(&self, mutator: impl FnOnce(&mut AppState)) {
        let snapshot = {
            let mut state = self.state.lock().expect("state mutex poisoned");
            mutator(&mut state);
            state.clone()
        };
        let listeners = self.listeners.lock().expect("listener mutex poisoned").clone();
        for listener in &listeners {
            listener.on_state_changed(&snapshot);
        }
    }

    /// Serializes the current snapshot to the spec §6.4 wire format.
    ///
    /// # Errors
    /// Returns an error only if serialization itself fails, which does not
    /// happen for well-formed [`AppState`] values.
    pub fn to_json(&self) -> Result<String, StateError> {
        let envelope = StateEnvelope {
            kind: "state".to_string(),
            data: self.snapshot(),
        };
        Ok(serde_json::to_string(&envelope)?)
    }
}

/// Parses a `{"type":"state","data":{...}}` envelope back into [`AppState`],
/// used by tests and by any consumer that round-trips the wire format.
///
/// # Errors
/// Returns [`StateError::Json`] if `json` doesn't deserialize, or
/// [`StateError::WrongEnvelopeType`] if it deserializes but isn't a state
/// envelope.
pub fn parse_state(json: &str) -> Result<AppState, StateError> {
    let envelope: StateEnvelope = serde_json::from_str(json)?;
    if envelope.kind != "state" {
        return Err(StateError::WrongEnvelopeType(envelope.kind));
    }
    Ok(envelope.data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_reports_silence() {
        let state = AppState::default();
        assert_eq!(state.level_db, f32::NEG_INFINITY);
        assert!(!state.recording);
        assert_eq!(state.channel_mode, 2);
    }

    #[test]
    fn update_mutates_and_notifies_with_new_snapshot() {
        let broadcaster = StateBroadcaster::new(AppState::default());
        let seen: Arc<Mutex<Option<AppState>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        broadcaster.add_listener(Arc::new(move |state: &AppState| {
            *slot.lock().unwrap() = Some(state.clone());
        }));

        broadcaster.update(|state| {
            state.muted = true;
            state.preset = "Lead Vocal".to_string();
        });

        let notified = seen.lock().unwrap().clone().unwrap();
        assert!(notified.muted);
        assert_eq!(notified.preset, "Lead Vocal");
        assert!(broadcaster.snapshot().muted);
    }

    #[test]
    fn state_round_trips_through_json() {
        let broadcaster = StateBroadcaster::new(AppState::default());
        broadcaster.update(|state| {
            state.plugins.push(PluginState {
                name: "Gain".to_string(),
                bypass: false,
                loaded: true,
            });
            state.volumes.monitor = 0.75;
            state.active_slot = 2;
        });

        let json = broadcaster.to_json().unwrap();
        let parsed = parse_state(&json).unwrap();
        assert_eq!(parsed, broadcaster.snapshot());
    }

    #[test]
    fn wire_format_matches_expected_shape() {
        let broadcaster = StateBroadcaster::new(AppState::default());
        let json = broadcaster.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "state");
        assert!(value["data"]["volumes"]["input"].is_number());
        assert!(value["data"]["plugins"].is_array());
        assert_eq!(value["data"]["channel_mode"], 2);
    }

    #[test]
    fn rejects_non_state_envelope() {
        let json = r#"{"type":"action","data":{}}"#;
        assert!(matches!(parse_state(json), Err(StateError::Json(_)) | Err(StateError::WrongEnvelopeType(_))));
    }
}
