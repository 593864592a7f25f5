//! Session and quick-preset-slot persistence (spec §6.6).
//!
//! Uses RON for human-readable, version-control-friendly serialization of
//! the plugin chain and the audio parameters that travel with it. The same
//! format backs both a full session file and the five quick preset slots
//! (`A`..`E`), which are chain-definition-plus-parameter-snapshot files
//! using the `.dppreset` extension.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use auroute_plugin::{Plugin, PluginDescriptor};

use crate::graph::{PluginGraph, ReplaceRequest};

/// Number of quick preset slots (`A` through `E`).
pub const NUM_SLOTS: usize = 5;

/// File extension used for both full sessions and quick-slot presets.
pub const PRESET_EXTENSION: &str = "dppreset";

/// Returns the single-letter label for a quick-slot index (`0` -> `'A'`).
///
/// # Panics
/// Panics if `index >= NUM_SLOTS`.
#[must_use]
pub fn slot_label(index: usize) -> char {
    assert!(index < NUM_SLOTS, "slot index {index} out of range");
    (b'A' + index as u8) as char
}

/// Specification for how to instantiate a plugin, serialized by identity
/// rather than by live instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PluginSpec {
    /// Built-in processor compiled into the binary; portable across
    /// platforms, validated only by a non-empty name.
    Builtin {
        name: String,
        #[serde(default)]
        parameters: HashMap<u32, f64>,
    },
    /// VST3 plugin loaded from a bundle path.
    ///
    /// Paths are stored as-is and are machine-specific; loading a session
    /// from an untrusted source can reference arbitrary paths, so `validate`
    /// rejects non-absolute paths and directory traversal.
    Vst3 {
        path: PathBuf,
        #[serde(default)]
        parameters: HashMap<u32, f64>,
    },
}

impl PluginSpec {
    /// # Errors
    /// Returns an error if the specification is structurally invalid (empty
    /// builtin name, non-absolute VST3 path, or a path containing `..`/`.`
    /// components).
    pub fn validate(&self) -> Result<(), SessionError> {
        match self {
            Self::Builtin { name, .. } => {
                if name.is_empty() {
                    return Err(SessionError::InvalidData(
                        "built-in processor name cannot be empty".to_string(),
                    ));
                }
                Ok(())
            }
            Self::Vst3 { path, .. } => {
                if !path.is_absolute() {
                    return Err(SessionError::InvalidPath(format!(
                        "VST3 path must be absolute, got: {}",
                        path.display()
                    )));
                }
                if path.components().any(|c| {
                    matches!(
                        c,
                        std::path::Component::ParentDir | std::path::Component::CurDir
                    )
                }) {
                    return Err(SessionError::InvalidPath(format!(
                        "VST3 path contains invalid components (.. or .): {}",
                        path.display()
                    )));
                }
                if let Some(ext) = path.extension() {
                    if ext != "vst3" {
                        tracing::warn!(path = %path.display(), ext = %ext.to_string_lossy(), "VST3 path has unexpected extension");
                    }
                } else {
                    tracing::warn!(path = %path.display(), "VST3 path has no extension");
                }
                Ok(())
            }
        }
    }

    fn descriptor(&self) -> PluginDescriptor {
        match self {
            Self::Builtin { name, .. } => PluginDescriptor::builtin(name),
            Self::Vst3 { path, .. } => PluginDescriptor {
                unique_id: path.display().to_string(),
                file_or_identifier: path.display().to_string(),
                name: path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                manufacturer: String::new(),
                format_name: "VST3".to_string(),
            },
        }
    }
}

/// One position in the persisted chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPlugin {
    pub plugin: PluginSpec,
    #[serde(default)]
    pub bypassed: bool,
    /// Base64-encoded `save_state` blob, if the plugin reported one.
    #[serde(default)]
    pub state_base64: Option<String>,
}

/// Top-level session/preset structure. The same shape serializes both a
/// full session and a quick-slot preset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub version: u32,
    pub name: String,
    pub sample_rate: u32,
    pub block_size: usize,
    #[serde(default = "default_input_gain")]
    pub input_gain: f32,
    /// `1` (mono) or `2` (stereo).
    #[serde(default = "default_channel_mode")]
    pub channel_mode: u8,
    #[serde(default)]
    pub monitor_enabled: bool,
    #[serde(default = "default_monitor_volume")]
    pub monitor_volume: f32,
    #[serde(default)]
    pub ipc_enabled: bool,
    pub chain: Vec<SessionPlugin>,
}

fn default_input_gain() -> f32 {
    1.0
}

fn default_channel_mode() -> u8 {
    2
}

fn default_monitor_volume() -> f32 {
    1.0
}

impl Session {
    #[must_use]
    pub fn new(name: impl Into<String>, sample_rate: u32, block_size: usize) -> Self {
        Self {
            version: 1,
            name: name.into(),
            sample_rate,
            block_size,
            input_gain: 1.0,
            channel_mode: 2,
            monitor_enabled: false,
            monitor_volume: 1.0,
            ipc_enabled: false,
            chain: Vec::new(),
        }
    }

    /// # Errors
    /// Returns an error if serialization or the write to `path` fails.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| SessionError::SerializationFailed(e.to_string()))?;
        std::fs::write(path.as_ref(), ron_string).map_err(|e| SessionError::IoError(e.to_string()))
    }

    /// # Errors
    /// Returns an error if the file cannot be read, fails to deserialize, is
    /// a newer format version than this crate understands, or contains an
    /// invalid plugin path.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let ron_string =
            std::fs::read_to_string(path.as_ref()).map_err(|e| SessionError::IoError(e.to_string()))?;
        let session: Self =
            ron::from_str(&ron_string).map_err(|e| SessionError::DeserializationFailed(e.to_string()))?;

        if session.version > 1 {
            return Err(SessionError::UnsupportedVersion(session.version));
        }
        for entry in &session.chain {
            entry.plugin.validate()?;
        }
        Ok(session)
    }

    /// Captures the current chain (descriptors, bypass flags, and
    /// `save_state` blobs) into a session snapshot, for the fast-path
    /// comparison in the Preset/Slot Applier.
    #[must_use]
    pub fn snapshot_chain(specs: &[(PluginSpec, bool, Box<dyn Plugin>)]) -> Vec<SessionPlugin> {
        specs
            .iter()
            .map(|(spec, bypassed, plugin)| {
                let blob = plugin.save_state();
                SessionPlugin {
                    plugin: spec.clone(),
                    bypassed: *bypassed,
                    state_base64: (!blob.is_empty())
                        .then(|| base64::engine::general_purpose::STANDARD.encode(blob)),
                }
            })
            .collect()
    }

    /// Builds the declarative requests the Preset/Slot Applier (spec §4.12)
    /// needs to drive [`PluginGraph::replace_all_async`] on the slow path.
    ///
    /// # Errors
    /// Returns an error if any plugin specification fails validation, or if
    /// a state blob fails to base64-decode.
    pub fn to_replace_requests(&self) -> Result<Vec<ReplaceRequest>, SessionError> {
        self.chain
            .iter()
            .map(|entry| {
                entry.plugin.validate()?;
                let state_blob = match &entry.state_base64 {
                    Some(encoded) => base64::engine::general_purpose::STANDARD
                        .decode(encoded)
                        .map_err(|e| SessionError::InvalidData(format!("bad base64 state: {e}")))?,
                    None => Vec::new(),
                };
                Ok(ReplaceRequest {
                    descriptor: entry.plugin.descriptor(),
                    bypassed: entry.bypassed,
                    has_state: !state_blob.is_empty(),
                    state_blob,
                })
            })
            .collect()
    }

    /// Loads plugins directly onto `graph` via `plugin_loader`, used for the
    /// session's initial load (as opposed to the preset applier's
    /// fast/slow-path dance, which goes through [`Self::to_replace_requests`]).
    ///
    /// # Errors
    /// Returns an error if any plugin fails to load or its parameters fail
    /// to apply.
    pub fn apply_to_graph<F>(&self, graph: &PluginGraph, mut plugin_loader: F) -> Result<(), SessionError>
    where
        F: FnMut(&PluginSpec) -> Result<Box<dyn Plugin>, String>,
    {
        for entry in &self.chain {
            entry.plugin.validate()?;
            let descriptor = entry.plugin.descriptor();
            let mut plugin = plugin_loader(&entry.plugin).map_err(|reason| SessionError::PluginLoadFailed {
                plugin_path: descriptor.file_or_identifier.clone(),
                reason,
            })?;

            let parameters = match &entry.plugin {
                PluginSpec::Builtin { parameters, .. } | PluginSpec::Vst3 { parameters, .. } => parameters,
            };
            for (&param_id, &value) in parameters {
                plugin
                    .set_parameter(param_id, value as f32)
                    .map_err(|e| SessionError::ParameterFailed {
                        plugin_name: descriptor.name.clone(),
                        param_id,
                        reason: e.to_string(),
                    })?;
            }

            let index = graph
                .add(descriptor.clone(), plugin)
                .map_err(|e| SessionError::PluginLoadFailed {
                    plugin_path: descriptor.file_or_identifier.clone(),
                    reason: e.to_string(),
                })?;
            if entry.bypassed {
                graph
                    .set_bypassed(index, true)
                    .map_err(|e| SessionError::PluginLoadFailed {
                        plugin_path: descriptor.file_or_identifier.clone(),
                        reason: e.to_string(),
                    })?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("serialization failed: {0}")]
    SerializationFailed(String),
    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),
    #[error("unsupported session version: {0}")]
    UnsupportedVersion(u32),
    #[error("invalid session data: {0}")]
    InvalidData(String),
    #[error("plugin loading failed for {plugin_path}: {reason}")]
    PluginLoadFailed { plugin_path: String, reason: String },
    #[error("failed to set parameter {param_id} on plugin {plugin_name}: {reason}")]
    ParameterFailed {
        plugin_name: String,
        param_id: u32,
        reason: String,
    },
    #[error("invalid plugin path: {0}")]
    InvalidPath(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_creation_defaults() {
        let session = Session::new("Test Session", 48_000, 512);
        assert_eq!(session.version, 1);
        assert_eq!(session.sample_rate, 48_000);
        assert_eq!(session.block_size, 512);
        assert!((session.input_gain - 1.0).abs() < f32::EPSILON);
        assert_eq!(session.channel_mode, 2);
        assert!(session.chain.is_empty());
    }

    #[test]
    fn session_round_trips_through_ron() {
        let mut session = Session::new("Test", 48_000, 512);
        session.chain.push(SessionPlugin {
            plugin: PluginSpec::Vst3 {
                path: PathBuf::from("/Library/Audio/Plug-Ins/VST3/TestPlugin.vst3"),
                parameters: HashMap::from([(0, 0.5)]),
            },
            bypassed: false,
            state_base64: None,
        });

        let ron_string = ron::ser::to_string_pretty(&session, ron::ser::PrettyConfig::default()).unwrap();
        let deserialized: Session = ron::from_str(&ron_string).unwrap();
        assert_eq!(deserialized.name, session.name);
        assert_eq!(deserialized.chain.len(), 1);
    }

    #[test]
    fn validate_rejects_relative_vst3_path() {
        let spec = PluginSpec::Vst3 {
            path: PathBuf::from("relative/path/Test.vst3"),
            parameters: HashMap::new(),
        };
        assert!(matches!(spec.validate(), Err(SessionError::InvalidPath(_))));
    }

    #[test]
    fn validate_rejects_directory_traversal() {
        let spec = PluginSpec::Vst3 {
            path: PathBuf::from("/Library/../etc/passwd"),
            parameters: HashMap::new(),
        };
        assert!(matches!(spec.validate(), Err(SessionError::InvalidPath(_))));
    }

    #[test]
    fn load_rejects_invalid_paths_from_disk() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let invalid = r#"(
            version: 1,
            name: "Invalid",
            sample_rate: 48000,
            block_size: 512,
            input_gain: 1.0,
            channel_mode: 2,
            monitor_enabled: false,
            monitor_volume: 1.0,
            ipc_enabled: false,
            chain: [(
                plugin: Vst3(path: "../../etc/passwd", parameters: {}),
                bypassed: false,
                state_base64: None,
            )],
        )"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(invalid.as_bytes()).unwrap();

        assert!(matches!(Session::load(file.path()), Err(SessionError::InvalidPath(_))));
    }

    #[test]
    fn slot_label_maps_index_to_letter() {
        assert_eq!(slot_label(0), 'A');
        assert_eq!(slot_label(4), 'E');
    }

    #[test]
    #[should_panic(expected = "slot index")]
    fn slot_label_panics_out_of_range() {
        let _ = slot_label(NUM_SLOTS);
    }

    #[test]
    fn to_replace_requests_decodes_state_blobs() {
        let mut session = Session::new("Test", 48_000, 512);
        session.chain.push(SessionPlugin {
            plugin: PluginSpec::Builtin {
                name: "gain".to_string(),
                parameters: HashMap::new(),
            },
            bypassed: true,
            state_base64: Some(base64::engine::general_purpose::STANDARD.encode([0, 0, 128, 63])),
        });

        let requests = session.to_replace_requests().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].has_state);
        assert!(requests[0].bypassed);
        assert_eq!(requests[0].state_blob, vec![0, 0, 128, 63]);
    }
}
