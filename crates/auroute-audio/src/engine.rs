//! Audio engine: device I/O via cpal, wired through the plugin graph,
//! recorder, shared-memory IPC writer and output router (spec §4.9).
//!
//! cpal does not guarantee a single duplex callback the way the engine
//! this crate is descended from assumed (a JUCE `AudioIODeviceCallback`
//! driving both directions at once). Input and output devices run their
//! own cpal streams, bridged through a lock-free `rtrb` ring so the real
//! processing step — gain, the plugin chain, the recorder, the IPC writer,
//! the output router — runs on one dedicated thread fed by the input
//! stream's callback and drained by the output stream's callback.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;

use auroute_core::{Frames, SampleRate};
use auroute_ipc::channels::{AudioChannels, AudioCommand, AudioEvent};
use auroute_ipc::notification::{Notification, NotificationQueue};
use auroute_ipc::shared_mem_writer::SharedMemWriter;
use auroute_plugin::AudioBuffer;

use crate::graph::PluginGraph;
use crate::latency::LatencyMonitor;
use crate::output_router::OutputRouter;
use crate::recorder::Recorder;
use crate::AudioConfig;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no default input device available")]
    NoInputDevice,
    #[error("no default output device available")]
    NoOutputDevice,
    #[error("failed to build audio stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
    #[error("engine is already running")]
    AlreadyRunning,
}

fn store_f32(cell: &AtomicU32, value: f32) {
    cell.store(value.to_bits(), Ordering::Relaxed);
}

fn load_f32(cell: &AtomicU32) -> f32 {
    f32::from_bits(cell.load(Ordering::Relaxed))
}

fn rms(data: &[f32]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = data.iter().map(|s| s * s).sum();
    (sum_sq / data.len() as f32).sqrt()
}

/// Mono/stereo channel mode, mirroring the original's `channelMode_`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Mono,
    Stereo,
}

/// Atomic controls shared between the engine's public API and the RT
/// processing thread. Each field is read with `Ordering::Relaxed` on the
/// audio thread, matching the original's per-field relaxed atomics.
struct Controls {
    input_gain_bits: AtomicU32,
    muted: AtomicBool,
    output_muted: AtomicBool,
    channel_mode: AtomicU32,
    input_level_bits: AtomicU32,
    output_level_bits: AtomicU32,
    ipc_enabled: AtomicBool,
}

impl Controls {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            input_gain_bits: AtomicU32::new(1.0_f32.to_bits()),
            muted: AtomicBool::new(false),
            output_muted: AtomicBool::new(false),
            channel_mode: AtomicU32::new(2),
            input_level_bits: AtomicU32::new(0),
            output_level_bits: AtomicU32::new(0),
            ipc_enabled: AtomicBool::new(false),
        })
    }
}

/// Coordinates device I/O and the real-time processing chain.
pub struct AudioEngine {
    config: Mutex<AudioConfig>,
    graph: Arc<PluginGraph>,
    router: Arc<OutputRouter>,
    recorder: Arc<Recorder>,
    latency: Arc<LatencyMonitor>,
    notifications: Arc<NotificationQueue>,
    controls: Arc<Controls>,
    running: AtomicBool,

    input_stream: Option<cpal::Stream>,
    output_stream: Option<cpal::Stream>,
    processing_handle: Option<std::thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    /// When the IPC writer from a prior run was torn down, so the next
    /// writer honors `REINIT_GRACE_MS` (spec §4.4) even across a stop/start
    /// cycle of this same engine.
    shared_mem_last_shutdown: Arc<Mutex<Option<Instant>>>,
}

impl AudioEngine {
    #[must_use]
    pub fn new(
        config: AudioConfig,
        graph: Arc<PluginGraph>,
        router: Arc<OutputRouter>,
        recorder: Arc<Recorder>,
        latency: Arc<LatencyMonitor>,
        notifications: Arc<NotificationQueue>,
    ) -> Self {
        Self {
            config: Mutex::new(config),
            graph,
            router,
            recorder,
            latency,
            notifications,
            controls: Controls::new(),
            running: AtomicBool::new(false),
            input_stream: None,
            output_stream: None,
            processing_handle: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            shared_mem_last_shutdown: Arc::new(Mutex::new(None)),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn set_input_gain(&self, gain: f32) {
        store_f32(&self.controls.input_gain_bits, gain);
    }

    #[must_use]
    pub fn input_gain(&self) -> f32 {
        load_f32(&self.controls.input_gain_bits)
    }

    pub fn set_muted(&self, flag: bool) {
        self.controls.muted.store(flag, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.controls.muted.load(Ordering::Relaxed)
    }

    pub fn set_output_muted(&self, flag: bool) {
        self.controls.output_muted.store(flag, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_output_muted(&self) -> bool {
        self.controls.output_muted.load(Ordering::Relaxed)
    }

    pub fn set_channel_mode(&self, mode: ChannelMode) {
        self.controls.channel_mode.store(
            match mode {
                ChannelMode::Mono => 1,
                ChannelMode::Stereo => 2,
            },
            Ordering::Relaxed,
        );
    }

    pub fn set_ipc_enabled(&self, flag: bool) {
        self.controls.ipc_enabled.store(flag, Ordering::Release);
    }

    #[must_use]
    pub fn is_ipc_enabled(&self) -> bool {
        self.controls.ipc_enabled.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn input_level(&self) -> f32 {
        load_f32(&self.controls.input_level_bits)
    }

    #[must_use]
    pub fn output_level(&self) -> f32 {
        load_f32(&self.controls.output_level_bits)
    }

    /// Opens the default input/output devices, starts their cpal streams,
    /// and spawns the bridging processing thread that runs the RT pipeline.
    pub fn start(&mut self, channels: AudioChannels) -> Result<(), EngineError> {
        if self.running.swap(true, Ordering::Relaxed) {
            return Err(EngineError::AlreadyRunning);
        }

        let host = cpal::default_host();
        let input_device = host.default_input_device().ok_or(EngineError::NoInputDevice)?;
        let output_device = host.default_output_device().ok_or(EngineError::NoOutputDevice)?;

        let (sample_rate, block_size, output_channels) = {
            let config = self.config.lock().expect("engine config mutex poisoned");
            (config.sample_rate, config.block_size, config.output_channels)
        };

        let stream_config = StreamConfig {
            channels: output_channels as u16,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Fixed(block_size as u32),
        };

        self.graph.prepare(sample_rate as SampleRate, block_size as Frames).ok();
        self.latency.reconfigure(sample_rate, block_size as u32);
        self.router.initialize(block_size);

        let bridge_capacity = block_size * output_channels * 8;
        let (mut input_tx, input_rx) = rtrb::RingBuffer::<f32>::new(bridge_capacity);
        let (output_tx, mut output_rx) = rtrb::RingBuffer::<f32>::new(bridge_capacity);

        let input_stream = input_device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    if input_tx.push(sample).is_err() {
                        break;
                    }
                }
            },
            |err| tracing::warn!(%err, "input stream error"),
            None,
        )?;

        let output_stream = output_device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for sample in data.iter_mut() {
                    *sample = output_rx.pop().unwrap_or(0.0);
                }
            },
            |err| tracing::warn!(%err, "output stream error"),
            None,
        )?;

        input_stream.play()?;
        output_stream.play()?;

        self.shutdown.store(false, Ordering::Relaxed);
        let handle = self.spawn_processing_thread(input_rx, output_tx, channels, sample_rate, block_size, output_channels);

        self.input_stream = Some(input_stream);
        self.output_stream = Some(output_stream);
        self.processing_handle = Some(handle);
        Ok(())
    }

    fn spawn_processing_thread(
        &self,
        mut input_rx: rtrb::Consumer<f32>,
        mut output_tx: rtrb::Producer<f32>,
        mut channels: AudioChannels,
        sample_rate: u32,
        block_size: usize,
        output_channels: usize,
    ) -> std::thread::JoinHandle<()> {
        let graph = Arc::clone(&self.graph);
        let router = Arc::clone(&self.router);
        let recorder = Arc::clone(&self.recorder);
        let latency = Arc::clone(&self.latency);
        let notifications = Arc::clone(&self.notifications);
        let controls = Arc::clone(&self.controls);
        let shutdown = Arc::clone(&self.shutdown);
        let shared_mem_last_shutdown = Arc::clone(&self.shared_mem_last_shutdown);

        std::thread::Builder::new()
            .name("auroute-audio-process".into())
            .spawn(move || {
                let mut work_in: Vec<f32> = vec![0.0; block_size * output_channels];
                let mut work_out: Vec<f32> = vec![0.0; block_size * output_channels];
                let mut channel_bufs: Vec<Vec<f32>> = vec![vec![0.0; block_size]; output_channels];
                let mut output_bufs: Vec<Vec<f32>> = vec![vec![0.0; block_size]; output_channels];

                // Built once, here, before the RT loop starts, so toggling
                // IPC on later never allocates or opens shared memory on
                // the processing thread.
                let last_shutdown = *shared_mem_last_shutdown
                    .lock()
                    .expect("shared mem last-shutdown mutex poisoned");
                let mut shared_mem_writer: Option<SharedMemWriter> = match SharedMemWriter::initialize_after(
                    last_shutdown,
                    sample_rate,
                    output_channels as u32,
                    block_size as u32,
                ) {
                    Ok(writer) => Some(writer),
                    Err(err) => {
                        tracing::warn!(%err, "failed to initialize shared-memory IPC writer");
                        None
                    }
                };

                while !shutdown.load(Ordering::Relaxed) {
                    while let Ok(command) = channels.command_rx.pop() {
                        apply_command(&graph, &command, &mut channels.event_tx);
                    }

                    if input_rx.slots() < block_size * output_channels {
                        std::thread::sleep(std::time::Duration::from_micros(500));
                        continue;
                    }

                    for sample in work_in.iter_mut().take(block_size * output_channels) {
                        *sample = input_rx.pop().unwrap_or(0.0);
                    }

                    latency.mark_start();

                    // 1. Copy input into per-channel work buffers (mono sum vs. stereo copy).
                    let mode = controls.channel_mode.load(Ordering::Relaxed);
                    let gain = load_f32(&controls.input_gain_bits);
                    let muted = controls.muted.load(Ordering::Relaxed);
                    let out_muted = controls.output_muted.load(Ordering::Relaxed);

                    for channel in &mut channel_bufs {
                        channel.iter_mut().for_each(|s| *s = 0.0);
                    }
                    if mode == 1 {
                        for frame in 0..block_size {
                            let mut sum = 0.0_f32;
                            for ch in 0..output_channels {
                                sum += work_in[frame * output_channels + ch];
                            }
                            channel_bufs[0][frame] = sum;
                        }
                        if channel_bufs.len() > 1 {
                            let mono = channel_bufs[0].clone();
                            channel_bufs[1].copy_from_slice(&mono);
                        }
                    } else {
                        for frame in 0..block_size {
                            for (ch, channel) in channel_bufs.iter_mut().enumerate() {
                                channel[frame] = work_in[frame * output_channels + ch];
                            }
                        }
                    }

                    // Apply input gain.
                    if (gain - 1.0).abs() > 0.001 {
                        for channel in &mut channel_bufs {
                            for s in channel.iter_mut() {
                                *s *= gain;
                            }
                        }
                    }

                    controls.input_level_bits.store(rms(&channel_bufs[0]).to_bits(), Ordering::Relaxed);

                    for channel in &mut output_bufs {
                        channel.iter_mut().for_each(|s| *s = 0.0);
                    }

                    if !muted {
                        // 2. Run the plugin chain.
                        {
                            let input_refs: Vec<&[f32]> = channel_bufs.iter().map(Vec::as_slice).collect();
                            let mut output_refs: Vec<&mut [f32]> = output_bufs.iter_mut().map(Vec::as_mut_slice).collect();
                            let mut buffer = AudioBuffer {
                                inputs: &input_refs,
                                outputs: &mut output_refs,
                                frames: block_size,
                            };
                            graph.process_block(&mut buffer, block_size);
                        }

                        let output_refs: Vec<&[f32]> = output_bufs.iter().map(Vec::as_slice).collect();

                        // 2.5. Recorder (lock-free).
                        recorder.write_block(&output_refs, block_size);

                        // 2.6. Shared-memory IPC writer, if enabled. The
                        // writer itself is always live once this loop is
                        // running; the toggle only gates whether it's fed.
                        if controls.ipc_enabled.load(Ordering::Acquire) {
                            if let Some(writer) = shared_mem_writer.as_mut() {
                                writer.write_audio(&output_refs, block_size as u32);
                            }
                        }

                        // 3. Route to the monitor sink.
                        router.route(&output_refs, output_channels, block_size, &mut |_monitor_channels| {
                            // A dedicated monitor cpal stream is wired up by
                            // the application layer; this engine only
                            // produces the routed buffer and its level.
                        });
                    }

                    // 4. Copy processed audio to the main output, silencing on mute.
                    let silence = muted || out_muted;
                    for frame in 0..block_size {
                        for ch in 0..output_channels {
                            let sample = if silence { 0.0 } else { output_bufs[ch][frame] };
                            work_out[frame * output_channels + ch] = sample;
                        }
                    }
                    for &sample in &work_out {
                        let _ = output_tx.push(sample);
                    }

                    let mut out_rms = rms(&output_bufs[0]);
                    if output_bufs.len() > 1 {
                        out_rms = out_rms.max(rms(&output_bufs[1]));
                    }
                    controls.output_level_bits.store(out_rms.to_bits(), Ordering::Relaxed);

                    latency.mark_end();

                    if let Some(notification) = notifications.pop() {
                        let _ = channels.event_tx.push(AudioEvent::Error(notification.message));
                    }
                }

                if let Some(writer) = shared_mem_writer.take() {
                    let marker = writer.shutdown();
                    if let Ok(mut guard) = shared_mem_last_shutdown.lock() {
                        *guard = Some(marker.at);
                    }
                }
            })
            .expect("failed to spawn audio processing thread")
    }

    /// Stops both cpal streams and joins the processing thread.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.input_stream = None;
        self.output_stream = None;
        if let Some(handle) = self.processing_handle.take() {
            let _ = handle.join();
        }
        if self.recorder.is_recording() {
            let _ = self.recorder.stop_recording();
        }
        self.running.store(false, Ordering::Relaxed);
    }
}

fn apply_command(graph: &Arc<PluginGraph>, command: &AudioCommand, events: &mut rtrb::Producer<AudioEvent>) {
    match command {
        AudioCommand::SetParameter { .. } | AudioCommand::Start | AudioCommand::Stop | AudioCommand::AddPlugin { .. } => {
            // `Start`/`Stop` are handled by the application layer that owns
            // `AudioEngine::start`/`stop`. `AddPlugin` instances arrive over
            // the separate `plugin_rx` channel, since plugins are not
            // `Clone` and cannot ride inside an `AudioCommand`.
        }
        AudioCommand::RemovePlugin { index } => {
            if graph.remove(*index).is_ok() {
                let _ = events.push(AudioEvent::PluginRemoved { index: *index });
            }
        }
        AudioCommand::MovePlugin { from, to } => {
            let _ = graph.move_plugin(*from, *to);
        }
        AudioCommand::SetBypassed { index, bypassed } => {
            let _ = graph.set_bypassed(*index, *bypassed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_engine() -> AudioEngine {
        AudioEngine::new(
            AudioConfig::default(),
            Arc::new(PluginGraph::new()),
            Arc::new(OutputRouter::new()),
            Arc::new(Recorder::new()),
            Arc::new(LatencyMonitor::new(48_000, 256)),
            Arc::new(NotificationQueue::new()),
        )
    }

    #[test]
    fn default_engine_state_is_unmuted_and_unity_gain() {
        let engine = new_engine();
        assert!(!engine.is_muted());
        assert!(!engine.is_output_muted());
        assert_eq!(engine.input_gain(), 1.0);
        assert!(!engine.is_running());
    }

    #[test]
    fn mute_and_gain_setters_roundtrip() {
        let engine = new_engine();
        engine.set_muted(true);
        engine.set_input_gain(0.5);
        engine.set_channel_mode(ChannelMode::Mono);
        assert!(engine.is_muted());
        assert_eq!(engine.input_gain(), 0.5);
    }

    #[test]
    fn starting_twice_is_rejected() {
        let mut engine = new_engine();
        engine.running.store(true, Ordering::Relaxed);
        let (_ui, audio_channels) = auroute_ipc::channels::create_channels(16);
        assert!(matches!(engine.start(audio_channels), Err(EngineError::AlreadyRunning)));
    }
}
