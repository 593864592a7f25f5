//! Plugin abstraction layer.
//!
//! This crate defines the common `Plugin` trait that all plugin formats
//! (VST3, CLAP, built-in) must implement, plus the `PluginDescriptor` used
//! to identify and re-instantiate a plugin by identity (spec §6.3).

use auroute_core::{ChannelCount, Frames, Sample, SampleRate};

/// Audio buffer for processing
pub struct AudioBuffer<'a> {
    pub inputs: &'a [&'a [Sample]],
    pub outputs: &'a mut [&'a mut [Sample]],
    pub frames: Frames,
}

/// MIDI/parameter events
#[derive(Debug, Clone)]
pub enum Event {
    /// Note on event
    NoteOn {
        channel: u8,
        note: u8,
        velocity: f32,
        sample_offset: u32,
    },
    /// Note off event
    NoteOff {
        channel: u8,
        note: u8,
        sample_offset: u32,
    },
    /// Parameter change
    ParamChange {
        id: u32,
        value: f32,
        sample_offset: u32,
    },
}

/// Buffer of events for a processing block
pub struct EventBuffer {
    pub events: Vec<Event>,
}

impl EventBuffer {
    #[must_use]
    pub const fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Information about a parameter
#[derive(Debug, Clone)]
pub struct ParameterInfo {
    pub id: u32,
    pub name: String,
    pub min_value: f32,
    pub max_value: f32,
    pub default_value: f32,
}

/// Plugin metadata, as reported by a live instance.
#[derive(Debug, Clone)]
pub struct PluginInfo {
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub unique_id: String,
}

/// A serializable identity for a plugin, independent of any live instance
/// (spec §6.3). Two descriptors are the "same plugin" iff `unique_id` and
/// `file_or_identifier` match, regardless of `name`/`manufacturer`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PluginDescriptor {
    /// The plugin format's own identity (e.g. a VST3 class ID, or a builtin name).
    pub unique_id: String,
    /// File path or platform identifier used to load the plugin.
    pub file_or_identifier: String,
    pub name: String,
    pub manufacturer: String,
    /// e.g. "VST3", "Builtin".
    pub format_name: String,
}

impl PluginDescriptor {
    /// Identity used by the fast-path equality check in spec §4.12: two
    /// chains are "the same" iff every descriptor's identity matches at the
    /// same index, independent of display metadata.
    #[must_use]
    pub fn identity(&self) -> (&str, &str) {
        (&self.unique_id, &self.file_or_identifier)
    }

    #[must_use]
    pub fn builtin(name: &str) -> Self {
        Self {
            unique_id: format!("auroute.builtin.{name}"),
            file_or_identifier: format!("builtin:{name}"),
            name: name.to_string(),
            manufacturer: "auroute".to_string(),
            format_name: "Builtin".to_string(),
        }
    }
}

/// Main plugin trait that all plugin formats implement
pub trait Plugin: Send {
    /// Get plugin information
    fn info(&self) -> &PluginInfo;

    /// Initialize the plugin with sample rate and max block size
    fn initialize(
        &mut self,
        sample_rate: SampleRate,
        max_block_size: Frames,
    ) -> Result<(), PluginError>;

    /// Process audio
    fn process(&mut self, audio: &mut AudioBuffer, events: &EventBuffer)
    -> Result<(), PluginError>;

    /// Set a parameter value (thread-safe, can be called from UI thread)
    fn set_parameter(&mut self, id: u32, value: f32) -> Result<(), PluginError>;

    /// Get a parameter value
    fn get_parameter(&self, id: u32) -> Result<f32, PluginError>;

    /// Get all parameters
    fn parameters(&self) -> Vec<ParameterInfo>;

    /// Get number of input channels
    fn input_channels(&self) -> ChannelCount;

    /// Get number of output channels
    fn output_channels(&self) -> ChannelCount;

    /// Deactivate and cleanup
    fn deactivate(&mut self);

    /// Serialize current parameter state to an opaque blob, for the preset
    /// applier's fast-path (spec §4.12). Default: no persistable state.
    fn save_state(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Restore parameter state from a blob previously produced by
    /// `save_state`. Default: ignore.
    fn load_state(&mut self, _blob: &[u8]) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Plugin-related errors
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("Plugin initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Plugin processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Plugin format error: {0}")]
    FormatError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_buffer() {
        let mut buffer = EventBuffer::new();
        buffer.events.push(Event::NoteOn {
            channel: 0,
            note: 60,
            velocity: 0.8,
            sample_offset: 0,
        });
        assert_eq!(buffer.events.len(), 1);
    }

    #[test]
    fn descriptor_identity_ignores_display_fields() {
        let mut a = PluginDescriptor::builtin("gain");
        let b = a.clone();
        a.name = "Renamed".to_string();
        a.manufacturer = "Someone Else".to_string();
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn descriptor_identity_differs_by_file_or_identifier() {
        let a = PluginDescriptor::builtin("gain");
        let mut b = PluginDescriptor::builtin("gain");
        b.file_or_identifier = "builtin:gain2".to_string();
        assert_ne!(a.identity(), b.identity());
    }
}
