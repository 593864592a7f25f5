//! auroute - cross-process audio routing daemon.
//!
//! Wires the ring-buffer-backed audio engine, the plugin graph, and the
//! control plane together into a running process, driven over stdin/stdout
//! by the action/state JSON protocol (spec §6.4, §6.5).

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use auroute_audio::{AudioConfig, AudioEngine, LatencyMonitor, OutputRouter, PluginGraph, Recorder};
use auroute_control::{
    parse_action, Action, ActionDispatcher, ActionEvent, AppState, PluginState, StateBroadcaster, Volumes,
};
use auroute_ipc::{create_channels, AudioEvent, NotificationQueue};

/// auroute audio routing daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Sample rate to request from the audio devices
    #[arg(long, default_value_t = 48_000)]
    sample_rate: u32,

    /// Block size (frames per callback) to request
    #[arg(long, default_value_t = 256)]
    block_size: usize,

    /// Channel layout to run the engine in
    #[arg(long, value_enum, default_value_t = ChannelModeArg::Stereo)]
    channel_mode: ChannelModeArg,

    /// Enable the shared-memory IPC writer on startup
    #[arg(long)]
    ipc: bool,

    /// Session file (.dppreset) to load the plugin chain from on startup
    #[arg(long)]
    session: Option<PathBuf>,

    /// How often to emit a state snapshot on stdout, in milliseconds
    #[arg(long, default_value_t = 250)]
    state_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ChannelModeArg {
    Mono,
    Stereo,
}

/// Engine mutations requested by a dispatched action. Kept separate from
/// [`AudioEngine`] itself (which owns non-`Send` device streams and must
/// stay on the thread that started it) so the dispatcher's listener only
/// ever touches plain, freely shareable data.
enum EngineCommand {
    SetInputGain(f32),
    AdjustInputGain(f32),
    ToggleMuted,
    ToggleOutputMuted,
    ToggleIpcEnabled,
    PanicMute,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "auroute=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!(?args, "starting auroute");

    let config = AudioConfig {
        sample_rate: args.sample_rate,
        block_size: args.block_size,
        input_channels: 2,
        output_channels: 2,
    };

    let graph = Arc::new(PluginGraph::new());
    let router = Arc::new(OutputRouter::new());
    let recorder = Arc::new(Recorder::new());
    let latency = Arc::new(LatencyMonitor::new(args.sample_rate, args.block_size as u32));
    let notifications = Arc::new(NotificationQueue::new());

    if let Some(session_path) = &args.session {
        load_session(&graph, session_path)?;
    }

    let mut engine = AudioEngine::new(
        config,
        Arc::clone(&graph),
        Arc::clone(&router),
        Arc::clone(&recorder),
        Arc::clone(&latency),
        Arc::clone(&notifications),
    );

    engine.set_ipc_enabled(args.ipc);
    engine.set_channel_mode(match args.channel_mode {
        ChannelModeArg::Mono => auroute_audio::engine::ChannelMode::Mono,
        ChannelModeArg::Stereo => auroute_audio::engine::ChannelMode::Stereo,
    });

    let (mut ui_channels, audio_channels) = create_channels(256);
    engine.start(audio_channels).context("failed to start audio engine")?;
    tracing::info!("audio engine started");

    let dispatcher = Arc::new(ActionDispatcher::new());
    let state = Arc::new(StateBroadcaster::new(AppState::default()));
    let (engine_cmd_tx, engine_cmd_rx) = auroute_ipc::crossbeam_channel::unbounded::<EngineCommand>();

    register_action_listener(&dispatcher, &engine_cmd_tx, &graph, &recorder, &router, &state);

    // Print every state change as a JSON line (spec §6.4), so a driving
    // process can tail stdout the same way it feeds stdin with actions.
    {
        let stdout_state = Arc::clone(&state);
        state.add_listener(Arc::new(move |_: &AppState| {
            if let Ok(line) = stdout_state.to_json() {
                println!("{line}");
            }
        }));
    }

    let stdin_dispatcher = Arc::clone(&dispatcher);
    let stdin_thread = std::thread::spawn(move || run_stdin_loop(&stdin_dispatcher));

    let poll_interval = Duration::from_millis(args.state_interval_ms.max(1));
    loop {
        std::thread::sleep(poll_interval);
        while let Ok(command) = engine_cmd_rx.try_recv() {
            apply_engine_command(&engine, command, &state);
        }
        while let Ok(event) = ui_channels.event_rx.pop() {
            handle_engine_event(&event);
        }
        refresh_state(&state, &engine, &graph, &recorder, &latency, &router);
        if stdin_thread.is_finished() {
            break;
        }
    }

    tracing::info!("stdin closed, shutting down");
    engine.stop();
    Ok(())
}

fn apply_engine_command(engine: &AudioEngine, command: EngineCommand, state: &Arc<StateBroadcaster>) {
    match command {
        EngineCommand::SetInputGain(gain) => {
            engine.set_input_gain(gain);
            state.update(|s| s.volumes.input = gain);
        }
        EngineCommand::AdjustInputGain(delta) => {
            let gain = (engine.input_gain() + delta).max(0.0);
            engine.set_input_gain(gain);
            state.update(|s| s.volumes.input = gain);
        }
        EngineCommand::ToggleMuted => {
            let flag = !engine.is_muted();
            engine.set_muted(flag);
            state.update(|s| s.muted = flag);
        }
        EngineCommand::ToggleOutputMuted => {
            let flag = !engine.is_output_muted();
            engine.set_output_muted(flag);
            state.update(|s| s.output_muted = flag);
        }
        EngineCommand::ToggleIpcEnabled => engine.set_ipc_enabled(!engine.is_ipc_enabled()),
        EngineCommand::PanicMute => {
            engine.set_muted(true);
            engine.set_output_muted(true);
            state.update(|s| {
                s.muted = true;
                s.output_muted = true;
            });
        }
    }
}

fn load_session(graph: &Arc<PluginGraph>, path: &PathBuf) -> Result<()> {
    let session = auroute_audio::session::Session::load(path)
        .with_context(|| format!("failed to load session {}", path.display()))?;
    session
        .apply_to_graph(graph, |spec| match spec {
            auroute_audio::session::PluginSpec::Builtin { name, .. } => {
                auroute_audio::builtin::create_builtin(name).ok_or_else(|| format!("unknown builtin: {name}"))
            }
            auroute_audio::session::PluginSpec::Vst3 { path, .. } => {
                Err(format!("VST3 hosting is not available in this build: {}", path.display()))
            }
        })
        .context("failed to apply session to graph")?;
    tracing::info!(path = %path.display(), plugins = graph.len(), "loaded session");
    Ok(())
}

fn handle_engine_event(event: &AudioEvent) {
    match event {
        AudioEvent::Error(message) => tracing::error!(%message, "engine error"),
        AudioEvent::EngineInitialized { sample_rate } => {
            tracing::info!(sample_rate, "engine initialized");
        }
        other => tracing::debug!(?other, "engine event"),
    }
}

fn run_stdin_loop(dispatcher: &Arc<ActionDispatcher>) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_action(line) {
            Ok(event) => dispatcher.dispatch(event),
            Err(err) => tracing::warn!(%err, raw = line, "ignoring unparseable action"),
        }
    }
}

/// Translates dispatched [`Action`]s into graph/state mutations and
/// [`EngineCommand`]s. This is the application-layer half of spec §4.10:
/// the dispatcher itself only fans out events, it has no opinion on what
/// they mean.
fn register_action_listener(
    dispatcher: &Arc<ActionDispatcher>,
    engine_cmd_tx: &auroute_ipc::crossbeam_channel::Sender<EngineCommand>,
    graph: &Arc<PluginGraph>,
    recorder: &Arc<Recorder>,
    router: &Arc<OutputRouter>,
    state: &Arc<StateBroadcaster>,
) {
    let engine_cmd_tx = engine_cmd_tx.clone();
    let graph = Arc::clone(graph);
    let recorder = Arc::clone(recorder);
    let router = Arc::clone(router);
    let state = Arc::clone(state);

    dispatcher.add_listener(Arc::new(move |event: &ActionEvent| {
        match event.action {
            Action::MasterBypass => {
                state.update(|s| s.master_bypassed = !s.master_bypassed);
            }
            Action::PluginBypass => {
                if let Ok(index) = usize::try_from(event.int_param) {
                    match graph.is_bypassed(index) {
                        Ok(current) => {
                            if let Err(err) = graph.set_bypassed(index, !current) {
                                tracing::warn!(%err, "plugin_bypass failed");
                            }
                        }
                        Err(err) => tracing::warn!(%err, "plugin_bypass: index out of range"),
                    }
                }
            }
            Action::SetVolume => match event.string_param.as_str() {
                "input" => {
                    let _ = engine_cmd_tx.send(EngineCommand::SetInputGain(event.float_param));
                }
                "monitor" => {
                    router.monitor.set_volume(event.float_param);
                    state.update(|s| s.volumes.monitor = event.float_param);
                }
                other => tracing::warn!(target = other, "set_volume: unknown target"),
            },
            Action::ToggleMute => match event.string_param.as_str() {
                "output" => {
                    let _ = engine_cmd_tx.send(EngineCommand::ToggleOutputMuted);
                }
                _ => {
                    let _ = engine_cmd_tx.send(EngineCommand::ToggleMuted);
                }
            },
            Action::InputMuteToggle => {
                let _ = engine_cmd_tx.send(EngineCommand::ToggleMuted);
            }
            Action::PanicMute => {
                let _ = engine_cmd_tx.send(EngineCommand::PanicMute);
            }
            Action::InputGainAdjust => {
                let _ = engine_cmd_tx.send(EngineCommand::AdjustInputGain(event.float_param));
            }
            Action::MonitorToggle => {
                let flag = !router.monitor.enabled();
                router.monitor.set_enabled(flag);
                state.update(|s| s.monitor_enabled = flag);
            }
            Action::RecordingToggle => {
                if recorder.is_recording() {
                    let _ = recorder.stop_recording();
                    state.update(|s| s.recording = false);
                } else {
                    tracing::warn!("recording_toggle: no destination path wired up in this build");
                }
            }
            Action::IpcToggle => {
                let _ = engine_cmd_tx.send(EngineCommand::ToggleIpcEnabled);
            }
            Action::SetPluginParameter
            | Action::LoadPreset
            | Action::NextPreset
            | Action::PreviousPreset
            | Action::SwitchPresetSlot => {
                tracing::debug!(?event, "preset/parameter action not wired to a session manager in this build");
            }
        }
    }));
}

fn refresh_state(
    state: &Arc<StateBroadcaster>,
    engine: &AudioEngine,
    graph: &Arc<PluginGraph>,
    recorder: &Arc<Recorder>,
    latency: &Arc<LatencyMonitor>,
    router: &Arc<OutputRouter>,
) {
    state.update(|s| {
        s.plugins = (0..graph.len())
            .map(|i| PluginState {
                name: format!("plugin[{i}]"),
                bypass: graph.is_bypassed(i).unwrap_or(false),
                loaded: true,
            })
            .collect();
        s.volumes = Volumes {
            input: engine.input_gain(),
            monitor: router.monitor.volume(),
        };
        s.muted = engine.is_muted();
        s.output_muted = engine.is_output_muted();
        s.level_db = 20.0 * engine.output_level().max(1e-9).log10();
        s.cpu_percent = latency.cpu_percent();
        s.latency_ms = latency.buffer_latency_ms();
        s.recording = recorder.is_recording();
        s.recording_seconds = recorder.recorded_seconds();
    });
}
