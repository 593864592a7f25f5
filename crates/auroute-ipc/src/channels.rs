//! Non-RT command/event channels wiring a host application to the audio
//! engine (spec §10.1 ambient stack). Distinct from the RT-safe
//! [`crate::notification::NotificationQueue`]: these channels carry
//! structural requests (add/remove/move a plugin) that the engine applies
//! off the RT thread, whereas the notification queue carries RT-originated
//! diagnostics.

use crossbeam_channel::{Receiver, Sender};

use auroute_core::Sample;
use auroute_plugin::PluginDescriptor;

/// Commands sent from a controlling (UI or host) thread to the audio engine.
///
/// IMPORTANT: variants must stay cheap to construct; plugin instances
/// themselves travel over the separate `plugin_tx` channel rather than being
/// embedded here, since they are not `Clone`.
#[derive(Debug, Clone)]
pub enum AudioCommand {
    Start,
    Stop,
    SetParameter {
        plugin_index: usize,
        param_id: u32,
        value: f32,
    },
    AddPlugin {
        descriptor: PluginDescriptor,
    },
    RemovePlugin {
        index: usize,
    },
    MovePlugin {
        from: usize,
        to: usize,
    },
    SetBypassed {
        index: usize,
        bypassed: bool,
    },
}

/// Events sent from the audio engine back to a controlling thread.
#[derive(Debug, Clone)]
pub enum AudioEvent {
    Started,
    Stopped,
    /// Sent once when the engine successfully starts and configures the
    /// audio device. Reports the actual sample rate in use, which may
    /// differ from the requested rate if the device doesn't support it.
    EngineInitialized { sample_rate: u32 },
    Error(String),
    PeakLevel { channel: usize, level: Sample },
    PluginAdded { index: usize },
    PluginRemoved { index: usize },
    /// Waveform peak data for visualization; `position` accumulates
    /// continuously across buffers so a consumer can resynchronize.
    WaveformSample {
        position: u64,
        left_peak: Sample,
        right_peak: Sample,
    },
}

pub type CommandSender = rtrb::Producer<AudioCommand>;
pub type CommandReceiver = rtrb::Consumer<AudioCommand>;
pub type EventSender = rtrb::Producer<AudioEvent>;
pub type EventReceiver = rtrb::Consumer<AudioEvent>;

/// A boxed plugin instance, handed from a controlling thread to the engine
/// over the separate, non-real-time-safe `plugin_tx` channel.
pub type PluginInstance = Box<dyn auroute_plugin::Plugin>;

/// Creates a connected pair of channels for bidirectional host↔engine
/// communication, each command/event ring sized to `capacity`.
#[must_use]
pub fn create_channels(capacity: usize) -> (UiChannels, AudioChannels) {
    let (cmd_tx, cmd_rx) = rtrb::RingBuffer::new(capacity);
    let (evt_tx, evt_rx) = rtrb::RingBuffer::new(capacity);
    let (plugin_tx, plugin_rx) = crossbeam_channel::unbounded();

    (
        UiChannels {
            command_tx: cmd_tx,
            event_rx: evt_rx,
            plugin_tx,
        },
        AudioChannels {
            command_rx: cmd_rx,
            event_tx: evt_tx,
            plugin_rx,
        },
    )
}

/// Held by the controlling thread: sends commands, receives events.
pub struct UiChannels {
    pub command_tx: rtrb::Producer<AudioCommand>,
    pub event_rx: rtrb::Consumer<AudioEvent>,
    pub plugin_tx: Sender<PluginInstance>,
}

/// Held by the audio engine: receives commands, sends events.
pub struct AudioChannels {
    pub command_rx: rtrb::Consumer<AudioCommand>,
    pub event_tx: rtrb::Producer<AudioEvent>,
    pub plugin_rx: Receiver<PluginInstance>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_creation_and_push() {
        let (mut ui, _audio) = create_channels(256);
        assert!(ui.command_tx.push(AudioCommand::Start).is_ok());
    }

    #[test]
    fn commands_flow_from_ui_to_audio_side() {
        let (mut ui, mut audio) = create_channels(8);
        ui.command_tx
            .push(AudioCommand::SetParameter {
                plugin_index: 0,
                param_id: 0,
                value: 0.5,
            })
            .unwrap();
        let received = audio.command_rx.pop().unwrap();
        assert!(matches!(
            received,
            AudioCommand::SetParameter { plugin_index: 0, param_id: 0, value } if (value - 0.5).abs() < f32::EPSILON
        ));
    }
}
