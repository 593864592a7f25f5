//! Plugin Graph: a real-time-safe linear plugin chain (spec §4.5).
//!
//! Unlike a general audio-processor graph, the chain here is always
//! `source -> plugin[0] -> plugin[1] -> ... -> plugin[n-1] -> sink`: there is
//! no topology to resolve, so there is no topological sort or cycle check,
//! only an ordered `Vec`.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use auroute_core::{Frames, SampleRate};
use auroute_plugin::{AudioBuffer, EventBuffer, Plugin, PluginDescriptor, PluginError};

/// A single position in the chain.
pub struct PluginSlot {
    pub descriptor: PluginDescriptor,
    pub plugin: Box<dyn Plugin>,
    pub bypassed: bool,
}

impl PluginSlot {
    #[must_use]
    pub fn new(descriptor: PluginDescriptor, plugin: Box<dyn Plugin>) -> Self {
        Self {
            descriptor,
            plugin,
            bypassed: false,
        }
    }
}

/// Chain state mutated only under `PluginGraph::state`'s mutex.
struct ChainState {
    slots: Vec<PluginSlot>,
    /// Pre-sized and cleared after every `process_block` so it never grows
    /// across calls (spec §4.5's "pre-allocated empty MIDI scratch buffer").
    midi_scratch: EventBuffer,
    /// Holds the running result between slots so each plugin sees the
    /// previous plugin's output as its input, rather than the chain's
    /// original input on every iteration. Grown on demand; steady-state
    /// operation never resizes it once warmed up with the first block.
    audio_scratch: Vec<Vec<f32>>,
}

/// Errors from a structural edit to the [`PluginGraph`].
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("index {0} out of range (chain has {1} plugins)")]
    IndexOutOfRange(usize, usize),
    #[error("plugin initialization failed: {0}")]
    Plugin(#[from] PluginError),
}

/// A declarative request used by [`PluginGraph::replace_all_async`]: load
/// `descriptor` via `factory`, then apply `bypassed` and, if `has_state`,
/// `state_blob`.
pub struct ReplaceRequest {
    pub descriptor: PluginDescriptor,
    pub bypassed: bool,
    pub state_blob: Vec<u8>,
    pub has_state: bool,
}

type PluginFactory = dyn Fn(&PluginDescriptor) -> Result<Box<dyn Plugin>, PluginError> + Send + Sync;

/// Real-time-safe ordered chain of plugins with non-RT structural mutation.
///
/// **Concurrency contract** (spec §4.5): structural edits hold `state`'s
/// mutex and always run with `suspended = true`. The RT `process_block`
/// checks `suspended` first and is a no-op while set; if it observes
/// `suspended == false` it attempts a non-blocking `try_lock` on `state` and
/// treats contention exactly like suspension (skip this callback, count it,
/// never block). Because every structural writer sets `suspended` before
/// acquiring the lock, the RT thread either sees the fully-suspended state
/// or acquires the lock uncontended — it is never left waiting on a
/// structural edit that is already in flight.
pub struct PluginGraph {
    state: Mutex<ChainState>,
    suspended: AtomicBool,
    prepared: AtomicBool,
    sample_rate: AtomicU32,
    block_size: AtomicU32,
    skipped_blocks: AtomicU64,
}

impl PluginGraph {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChainState {
                slots: Vec::new(),
                midi_scratch: EventBuffer::new(),
                audio_scratch: Vec::new(),
            }),
            suspended: AtomicBool::new(true),
            prepared: AtomicBool::new(false),
            sample_rate: AtomicU32::new(0),
            block_size: AtomicU32::new(0),
            skipped_blocks: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().expect("chain mutex poisoned").slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn skipped_blocks(&self) -> u64 {
        self.skipped_blocks.load(Ordering::Relaxed)
    }

    /// Configures every node for the audio format and marks the graph ready
    /// to process. Structural operation: suspends processing for the
    /// duration.
    pub fn prepare(&self, sample_rate: SampleRate, block_size: Frames) -> Result<(), GraphError> {
        self.suspend_processing(true);
        {
            let mut state = self.state.lock().expect("chain mutex poisoned");
            for slot in &mut state.slots {
                slot.plugin.initialize(sample_rate, block_size)?;
            }
            state.midi_scratch.clear();
        }
        self.sample_rate.store(sample_rate as u32, Ordering::Relaxed);
        self.block_size.store(block_size as u32, Ordering::Relaxed);
        self.prepared.store(true, Ordering::Release);
        self.suspend_processing(false);
        Ok(())
    }

    /// Instantiates and appends a plugin, emitting a rebuild (here: simply
    /// inserting at the end — the chain has no separate edge list to
    /// rewire).
    pub fn add(&self, descriptor: PluginDescriptor, mut plugin: Box<dyn Plugin>) -> Result<usize, GraphError> {
        self.suspend_processing(true);
        let index = {
            let mut state = self.state.lock().expect("chain mutex poisoned");
            if self.prepared.load(Ordering::Acquire) {
                plugin.initialize(
                    self.sample_rate.load(Ordering::Relaxed) as SampleRate,
                    self.block_size.load(Ordering::Relaxed) as Frames,
                )?;
            }
            state.slots.push(PluginSlot::new(descriptor, plugin));
            state.slots.len() - 1
        };
        self.suspend_processing(false);
        tracing::debug!(index, "added plugin to chain");
        Ok(index)
    }

    /// Destroys the plugin at `index` after suspending, shifting subsequent
    /// indices down.
    pub fn remove(&self, index: usize) -> Result<PluginSlot, GraphError> {
        self.suspend_processing(true);
        let result = {
            let mut state = self.state.lock().expect("chain mutex poisoned");
            let len = state.slots.len();
            if index >= len {
                self.suspend_processing(false);
                return Err(GraphError::IndexOutOfRange(index, len));
            }
            state.slots.remove(index)
        };
        self.suspend_processing(false);
        tracing::debug!(index, "removed plugin from chain");
        Ok(result)
    }

    /// Relocates a plugin within the chain.
    pub fn move_plugin(&self, from: usize, to: usize) -> Result<(), GraphError> {
        self.suspend_processing(true);
        {
            let mut state = self.state.lock().expect("chain mutex poisoned");
            let len = state.slots.len();
            if from >= len {
                self.suspend_processing(false);
                return Err(GraphError::IndexOutOfRange(from, len));
            }
            if to >= len {
                self.suspend_processing(false);
                return Err(GraphError::IndexOutOfRange(to, len));
            }
            let slot = state.slots.remove(from);
            state.slots.insert(to, slot);
        }
        self.suspend_processing(false);
        Ok(())
    }

    /// Reads whether the node at `index` is currently bypassed.
    pub fn is_bypassed(&self, index: usize) -> Result<bool, GraphError> {
        let state = self.state.lock().expect("chain mutex poisoned");
        let len = state.slots.len();
        state
            .slots
            .get(index)
            .map(|slot| slot.bypassed)
            .ok_or(GraphError::IndexOutOfRange(index, len))
    }

    /// Toggles bypass on a node; observed by the RT callback the next time
    /// it reads the slot (no suspend needed — `bypassed` is a plain `bool`
    /// behind the same mutex the RT thread already treats as a suspend
    /// point via `try_lock`).
    pub fn set_bypassed(&self, index: usize, flag: bool) -> Result<(), GraphError> {
        let mut state = self.state.lock().expect("chain mutex poisoned");
        let len = state.slots.len();
        let slot = state
            .slots
            .get_mut(index)
            .ok_or(GraphError::IndexOutOfRange(index, len))?;
        slot.bypassed = flag;
        Ok(())
    }

    /// Restores a saved state blob onto the live plugin instance at `index`,
    /// for the Preset/Slot Applier's fast path (spec §4.12): the instance
    /// stays loaded, only its internal parameters change. Suspended for the
    /// duration since `load_state` is not guaranteed RT-safe.
    pub fn apply_state(&self, index: usize, state_blob: &[u8]) -> Result<(), GraphError> {
        self.suspend_processing(true);
        let result = {
            let mut state = self.state.lock().expect("chain mutex poisoned");
            let len = state.slots.len();
            let slot = state
                .slots
                .get_mut(index)
                .ok_or(GraphError::IndexOutOfRange(index, len));
            match slot {
                Ok(slot) => slot.plugin.load_state(state_blob).map_err(GraphError::Plugin),
                Err(err) => Err(err),
            }
        };
        self.suspend_processing(false);
        result
    }

    /// While suspended, `process_block` is a no-op. Required around every
    /// structural change.
    pub fn suspend_processing(&self, flag: bool) {
        self.suspended.store(flag, Ordering::Release);
    }

    /// Clears the chain immediately, loads the requested plugins on a
    /// background worker via `factory`, then assembles them on the calling
    /// thread (here: the thread that later calls
    /// [`PendingReplace::finish`]) once loading completes, restoring bypass
    /// flags and state blobs, and invoking `on_done`.
    pub fn replace_all_async(
        self: &std::sync::Arc<Self>,
        requests: Vec<ReplaceRequest>,
        factory: std::sync::Arc<PluginFactory>,
        on_done: impl FnOnce() + Send + 'static,
    ) {
        self.suspend_processing(true);
        {
            let mut state = self.state.lock().expect("chain mutex poisoned");
            state.slots.clear();
        }

        let graph = std::sync::Arc::clone(self);
        std::thread::spawn(move || {
            let mut loaded = Vec::with_capacity(requests.len());
            for request in requests {
                match factory(&request.descriptor) {
                    Ok(mut plugin) => {
                        if request.has_state {
                            if let Err(err) = plugin.load_state(&request.state_blob) {
                                tracing::warn!(
                                    plugin = %request.descriptor.name,
                                    %err,
                                    "failed to restore plugin state, continuing with defaults"
                                );
                            }
                        }
                        loaded.push((request.descriptor, plugin, request.bypassed));
                    }
                    Err(err) => {
                        tracing::warn!(
                            plugin = %request.descriptor.name,
                            %err,
                            "failed to load plugin, skipping"
                        );
                    }
                }
            }

            {
                let mut state = graph.state.lock().expect("chain mutex poisoned");
                let sample_rate = graph.sample_rate.load(Ordering::Relaxed) as SampleRate;
                let block_size = graph.block_size.load(Ordering::Relaxed) as Frames;
                let prepared = graph.prepared.load(Ordering::Acquire);
                for (descriptor, mut plugin, bypassed) in loaded {
                    if prepared {
                        if let Err(err) = plugin.initialize(sample_rate, block_size) {
                            tracing::warn!(plugin = %descriptor.name, %err, "failed to initialize plugin");
                            continue;
                        }
                    }
                    state.slots.push(PluginSlot {
                        descriptor,
                        plugin,
                        bypassed,
                    });
                }
            }
            graph.suspend_processing(false);
            on_done();
        });
    }

    /// RT path. No-op if the graph is not prepared. No-op (without
    /// processing) if `frames` does not equal the prepared block size,
    /// rather than risk growing any internal buffer. Never blocks: if the
    /// chain is suspended or momentarily contended by a structural edit,
    /// this returns having done nothing beyond counting the skip.
    pub fn process_block(&self, buffer: &mut AudioBuffer, frames: Frames) {
        if !self.prepared.load(Ordering::Acquire) {
            return;
        }
        if frames != self.block_size.load(Ordering::Relaxed) as Frames {
            return;
        }
        if self.suspended.load(Ordering::Acquire) {
            self.skipped_blocks.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let Ok(mut state) = self.state.try_lock() else {
            self.skipped_blocks.fetch_add(1, Ordering::Relaxed);
            return;
        };
        if state.slots.is_empty() {
            let frames_usize = frames as usize;
            for (output, input) in buffer.outputs.iter_mut().zip(buffer.inputs.iter()) {
                output[..frames_usize].copy_from_slice(&input[..frames_usize]);
            }
            return;
        }

        let channels = buffer.outputs.len();
        let frames_usize = frames as usize;
        if state.audio_scratch.len() != channels {
            state.audio_scratch.resize_with(channels, Vec::new);
        }
        for channel in &mut state.audio_scratch {
            if channel.len() != frames_usize {
                channel.resize(frames_usize, 0.0);
            }
        }
        for (scratch, input) in state.audio_scratch.iter_mut().zip(buffer.inputs.iter()) {
            scratch[..frames_usize].copy_from_slice(&input[..frames_usize]);
        }

        state.midi_scratch.clear();
        for slot in &mut state.slots {
            if slot.bypassed {
                continue;
            }
            let scratch_refs: Vec<&[f32]> = state.audio_scratch.iter().map(Vec::as_slice).collect();
            let mut stage = AudioBuffer {
                inputs: &scratch_refs,
                outputs: &mut *buffer.outputs,
                frames,
            };
            if let Err(err) = slot.plugin.process(&mut stage, &state.midi_scratch) {
                tracing::warn!(plugin = %slot.descriptor.name, %err, "plugin process failed");
            }
            drop(scratch_refs);
            for (scratch, output) in state.audio_scratch.iter_mut().zip(buffer.outputs.iter()) {
                scratch[..frames_usize].copy_from_slice(&output[..frames_usize]);
            }
        }
        // Copy the final stage into buffer.outputs unconditionally: if every
        // slot was bypassed, no plugin ever wrote to buffer.outputs, and
        // without this it would stay whatever the caller zeroed it to.
        for (output, scratch) in buffer.outputs.iter_mut().zip(state.audio_scratch.iter()) {
            output[..frames_usize].copy_from_slice(&scratch[..frames_usize]);
        }
        state.midi_scratch.clear();
    }
}

impl Default for PluginGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auroute_plugin::{ParameterInfo, PluginInfo};

    struct PassThrough {
        info: PluginInfo,
    }

    impl PassThrough {
        fn new(name: &str) -> Self {
            Self {
                info: PluginInfo {
                    name: name.to_string(),
                    vendor: "test".to_string(),
                    version: "0".to_string(),
                    unique_id: format!("test.{name}"),
                },
            }
        }
    }

    impl Plugin for PassThrough {
        fn info(&self) -> &PluginInfo {
            &self.info
        }
        fn initialize(&mut self, _sample_rate: SampleRate, _max_block_size: Frames) -> Result<(), PluginError> {
            Ok(())
        }
        fn process(&mut self, audio: &mut AudioBuffer, _events: &EventBuffer) -> Result<(), PluginError> {
            for ch in 0..audio.outputs.len() {
                for i in 0..audio.frames {
                    audio.outputs[ch][i] = audio.inputs[ch][i] * 2.0;
                }
            }
            Ok(())
        }
        fn set_parameter(&mut self, _id: u32, _value: f32) -> Result<(), PluginError> {
            Ok(())
        }
        fn get_parameter(&self, _id: u32) -> Result<f32, PluginError> {
            Ok(0.0)
        }
        fn parameters(&self) -> Vec<ParameterInfo> {
            Vec::new()
        }
        fn input_channels(&self) -> usize {
            2
        }
        fn output_channels(&self) -> usize {
            2
        }
        fn deactivate(&mut self) {}
    }

    #[test]
    fn empty_chain_is_a_no_op_pass_through() {
        let graph = PluginGraph::new();
        graph.prepare(48_000, 4).unwrap();
        assert_eq!(graph.len(), 0);

        let left = vec![1.0_f32, 2.0, 3.0, 4.0];
        let right = vec![5.0_f32, 6.0, 7.0, 8.0];
        let mut out_left = vec![0.0_f32; 4];
        let mut out_right = vec![0.0_f32; 4];
        let inputs: Vec<&[f32]> = vec![&left, &right];
        let mut outputs: Vec<&mut [f32]> = vec![&mut out_left, &mut out_right];
        let mut buffer = AudioBuffer {
            inputs: &inputs,
            outputs: &mut outputs,
            frames: 4,
        };
        graph.process_block(&mut buffer, 4);
        assert_eq!(out_left, left);
        assert_eq!(out_right, right);
    }

    #[test]
    fn bypassed_only_slot_passes_through_unchanged() {
        let graph = PluginGraph::new();
        graph.prepare(48_000, 4).unwrap();
        let descriptor = PluginDescriptor::builtin("passthrough");
        let index = graph
            .add(descriptor, Box::new(PassThrough::new("passthrough")))
            .unwrap();
        graph.set_bypassed(index, true).unwrap();

        let left = vec![1.0_f32, 2.0, 3.0, 4.0];
        let right = vec![5.0_f32, 6.0, 7.0, 8.0];
        let mut out_left = vec![9.0_f32; 4];
        let mut out_right = vec![9.0_f32; 4];
        let inputs: Vec<&[f32]> = vec![&left, &right];
        let mut outputs: Vec<&mut [f32]> = vec![&mut out_left, &mut out_right];
        let mut buffer = AudioBuffer {
            inputs: &inputs,
            outputs: &mut outputs,
            frames: 4,
        };
        graph.process_block(&mut buffer, 4);
        assert_eq!(out_left, left);
        assert_eq!(out_right, right);
    }

    #[test]
    fn add_and_process_applies_plugin() {
        let graph = PluginGraph::new();
        graph.prepare(48_000, 4).unwrap();
        let descriptor = PluginDescriptor::builtin("passthrough");
        graph.add(descriptor, Box::new(PassThrough::new("passthrough"))).unwrap();

        let input = vec![1.0_f32; 4];
        let mut output = vec![0.0_f32; 4];
        let inputs: Vec<&[f32]> = vec![&input, &input];
        let mut outputs: Vec<&mut [f32]> = vec![&mut output, &mut vec![0.0; 4]];
        let mut buffer = AudioBuffer {
            inputs: &inputs,
            outputs: &mut outputs,
            frames: 4,
        };
        graph.process_block(&mut buffer, 4);
        assert_eq!(output, vec![2.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn mismatched_block_size_is_a_no_op() {
        let graph = PluginGraph::new();
        graph.prepare(48_000, 64).unwrap();
        let input = vec![1.0_f32; 4];
        let mut output = vec![9.0_f32; 4];
        let inputs: Vec<&[f32]> = vec![&input, &input];
        let mut outputs: Vec<&mut [f32]> = vec![&mut output, &mut vec![9.0; 4]];
        let mut buffer = AudioBuffer {
            inputs: &inputs,
            outputs: &mut outputs,
            frames: 4,
        };
        graph.process_block(&mut buffer, 4);
        assert_eq!(output, vec![9.0, 9.0, 9.0, 9.0]);
    }

    #[test]
    fn suspended_graph_skips_and_counts() {
        let graph = PluginGraph::new();
        graph.prepare(48_000, 4).unwrap();
        graph.suspend_processing(true);
        let input = vec![1.0_f32; 4];
        let mut output = vec![0.0_f32; 4];
        let inputs: Vec<&[f32]> = vec![&input, &input];
        let mut outputs: Vec<&mut [f32]> = vec![&mut output, &mut vec![0.0; 4]];
        let mut buffer = AudioBuffer {
            inputs: &inputs,
            outputs: &mut outputs,
            frames: 4,
        };
        graph.process_block(&mut buffer, 4);
        assert_eq!(graph.skipped_blocks(), 1);
    }

    #[test]
    fn remove_shifts_subsequent_indices() {
        let graph = PluginGraph::new();
        graph.prepare(48_000, 4).unwrap();
        graph.add(PluginDescriptor::builtin("a"), Box::new(PassThrough::new("a"))).unwrap();
        graph.add(PluginDescriptor::builtin("b"), Box::new(PassThrough::new("b"))).unwrap();
        graph.remove(0).unwrap();
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn move_plugin_reorders_chain() {
        let graph = PluginGraph::new();
        graph.prepare(48_000, 4).unwrap();
        graph.add(PluginDescriptor::builtin("a"), Box::new(PassThrough::new("a"))).unwrap();
        graph.add(PluginDescriptor::builtin("b"), Box::new(PassThrough::new("b"))).unwrap();
        graph.move_plugin(0, 1).unwrap();
        let state = graph.state.lock().unwrap();
        assert_eq!(state.slots[0].descriptor.name, "b");
        assert_eq!(state.slots[1].descriptor.name, "a");
    }

    #[test]
    fn chained_plugins_compound_in_series() {
        let graph = PluginGraph::new();
        graph.prepare(48_000, 4).unwrap();
        graph.add(PluginDescriptor::builtin("a"), Box::new(PassThrough::new("a"))).unwrap();
        graph.add(PluginDescriptor::builtin("b"), Box::new(PassThrough::new("b"))).unwrap();

        let input = vec![1.0_f32; 4];
        let mut output = vec![0.0_f32; 4];
        let mut output2 = vec![0.0_f32; 4];
        let inputs: Vec<&[f32]> = vec![&input, &input];
        let mut outputs: Vec<&mut [f32]> = vec![&mut output, &mut output2];
        let mut buffer = AudioBuffer {
            inputs: &inputs,
            outputs: &mut outputs,
            frames: 4,
        };
        graph.process_block(&mut buffer, 4);
        assert_eq!(output, vec![4.0, 4.0, 4.0, 4.0]);
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let graph = PluginGraph::new();
        graph.prepare(48_000, 4).unwrap();
        assert!(matches!(graph.remove(0), Err(GraphError::IndexOutOfRange(0, 0))));
    }
}
