//! Offline WAV file processor
//!
//! Processes WAV files through a chain of built-in processors in offline
//! mode (non-real-time). Useful for testing a chain configuration or
//! batch-processing files without standing up the audio device.

use anyhow::{Context, Result};
use clap::Parser;
use hound::{WavReader, WavWriter};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use auroute_audio::builtin::create_builtin;
use auroute_audio::graph::PluginGraph;
use auroute_audio::session::{PluginSpec, Session};
use auroute_plugin::{AudioBuffer, EventBuffer, Plugin};

/// Offline WAV file processor
#[derive(Parser, Debug)]
#[command(name = "auroute-process")]
#[command(about = "Process WAV files through a chain of built-in processors", long_about = None)]
struct Args {
    /// Input WAV file
    #[arg(short, long, required_unless_present_any = ["inspect", "save_session"])]
    input: Option<PathBuf>,

    /// Output WAV file
    #[arg(short, long, required_unless_present_any = ["inspect", "save_session"])]
    output: Option<PathBuf>,

    /// Built-in processor name (e.g. "gain")
    #[arg(short, long, required_unless_present_any = ["inspect", "session"])]
    plugin: Option<String>,

    /// Processing block size (default: 512)
    #[arg(short, long, default_value_t = 512)]
    block_size: usize,

    /// Set plugin parameters (format: "id=value", where `id` is the
    /// numeric parameter index). Values are clamped to the parameter's
    /// reported range. Can be specified multiple times.
    #[arg(long = "param")]
    params: Vec<String>,

    /// Load session file (.dppreset/.ron) instead of specifying a plugin
    #[arg(short, long, conflicts_with = "plugin")]
    session: Option<PathBuf>,

    /// Save current configuration as a session file
    #[arg(long)]
    save_session: Option<PathBuf>,

    /// Inspect plugin parameters and info (don't process audio)
    #[arg(long, conflicts_with_all = ["input", "output", "session"])]
    inspect: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "auroute=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.inspect {
        let name = args.plugin.as_ref().context("--plugin required for --inspect")?;
        inspect_plugin(name)
    } else if args.save_session.is_some() {
        save_session_mode(&args)
    } else if args.session.is_some() {
        process_with_session(&args)
    } else {
        process_with_plugin(&args)
    }
}

fn load_builtin(name: &str) -> Result<Box<dyn Plugin>> {
    create_builtin(name).with_context(|| format!("no built-in processor named '{name}'"))
}

/// Inspect plugin parameters and information
fn inspect_plugin(name: &str) -> Result<()> {
    println!("Inspecting built-in processor: {name}\n");

    let mut plugin = load_builtin(name)?;
    let info = plugin.info();

    println!("Plugin Information:");
    println!("  Name:      {}", info.name);
    println!("  Vendor:    {}", info.vendor);
    println!("  Version:   {}", info.version);
    println!("  Unique ID: {}", info.unique_id);
    println!(
        "  Channels:  {} in, {} out",
        plugin.input_channels(),
        plugin.output_channels()
    );
    println!();

    println!("Initializing plugin...");
    plugin
        .initialize(48000, 512)
        .context("Failed to initialize plugin")?;

    let parameters = plugin.parameters();

    if parameters.is_empty() {
        println!("No parameters available.");
    } else {
        println!("Parameters ({} total):", parameters.len());
        println!("{}", "=".repeat(80));

        for param in &parameters {
            println!("  [{:3}] {}", param.id, param.name);
            println!(
                "        Range:   {:.3} to {:.3}",
                param.min_value, param.max_value
            );
            println!("        Default: {:.3}", param.default_value);

            match plugin.get_parameter(param.id) {
                Ok(value) => println!("        Current: {value:.3}"),
                Err(e) => println!("        Current: <unavailable> ({e})"),
            }
            println!();
        }
    }

    Ok(())
}

/// Apply `id=value` parameter settings to a plugin
fn apply_parameters(plugin: &mut dyn Plugin, param_specs: &[String]) -> Result<()> {
    let parameters = plugin.parameters();

    for spec in param_specs {
        let parts: Vec<&str> = spec.splitn(2, '=').collect();
        if parts.len() != 2 {
            anyhow::bail!("Invalid parameter format '{spec}'. Expected 'id=value'");
        }

        let id: u32 = parts[0]
            .trim()
            .parse()
            .with_context(|| format!("Invalid parameter id '{}' (must be a number)", parts[0]))?;
        let value: f32 = parts[1]
            .trim()
            .parse()
            .with_context(|| format!("Invalid parameter value '{}' (must be a number)", parts[1]))?;

        let param = parameters
            .iter()
            .find(|p| p.id == id)
            .with_context(|| format!("Parameter id {id} not found in plugin"))?;

        if value < param.min_value || value > param.max_value {
            tracing::warn!(
                "Parameter {} value {:.3} is outside range [{:.3}, {:.3}], clamping",
                id,
                value,
                param.min_value,
                param.max_value
            );
        }

        let clamped_value = value.clamp(param.min_value, param.max_value);
        plugin
            .set_parameter(id, clamped_value)
            .with_context(|| format!("Failed to set parameter {id}"))?;

        tracing::info!("Set parameter {} = {:.3}", id, clamped_value);
    }

    Ok(())
}

/// Save current plugin configuration as a session, without processing audio
fn save_session_mode(args: &Args) -> Result<()> {
    let name = args
        .plugin
        .as_ref()
        .context("--plugin required when using --save-session")?;
    let session_path = args.save_session.as_ref().context("--save-session path required")?;

    tracing::info!("Creating session from plugin configuration");
    tracing::info!("Plugin: {name}");
    tracing::info!("Session: {}", session_path.display());

    let mut plugin = load_builtin(name)?;
    plugin
        .initialize(48000, args.block_size)
        .context("Failed to initialize plugin")?;

    tracing::info!("Plugin loaded: {}", plugin.info().name);

    if !args.params.is_empty() {
        tracing::info!("Setting {} parameter(s)...", args.params.len());
        apply_parameters(&mut plugin, &args.params)?;
    }

    let mut parameters = std::collections::HashMap::new();
    for param in plugin.parameters() {
        if let Ok(value) = plugin.get_parameter(param.id) {
            parameters.insert(param.id, f64::from(value));
        }
    }

    let mut session = Session::new("Saved Configuration", 48000, args.block_size);
    session.chain.push(auroute_audio::session::SessionPlugin {
        plugin: PluginSpec::Builtin {
            name: name.clone(),
            parameters,
        },
        bypassed: false,
        state_base64: None,
    });

    session.save(session_path).context("Failed to save session")?;

    tracing::info!("Session saved to {}", session_path.display());
    println!("Session saved successfully: {}", session_path.display());

    Ok(())
}

/// Process audio using a session file
fn process_with_session(args: &Args) -> Result<()> {
    let input = args.input.as_ref().context("--input required for processing")?;
    let output = args.output.as_ref().context("--output required for processing")?;
    let session_path = args.session.as_ref().context("--session path required")?;

    tracing::info!("Processing with session");
    tracing::info!("Input:   {}", input.display());
    tracing::info!("Output:  {}", output.display());
    tracing::info!("Session: {}", session_path.display());

    let session = Session::load(session_path).context("Failed to load session")?;

    tracing::info!("Session loaded: {}", session.name);
    tracing::info!(
        "  Sample rate: {} Hz, Block size: {} frames",
        session.sample_rate,
        session.block_size
    );
    tracing::info!("  {} plugin(s) in chain", session.chain.len());

    tracing::info!("Reading input WAV file...");
    let mut reader = WavReader::open(input)
        .with_context(|| format!("Failed to open input file: {}", input.display()))?;

    let spec = reader.spec();
    tracing::info!(
        "Input format: {} Hz, {} channels, {} bits, {:?}",
        spec.sample_rate,
        spec.channels,
        spec.bits_per_sample,
        spec.sample_format
    );

    let samples = read_wav_samples(&mut reader, &spec)?;
    let channel_count = spec.channels as usize;

    tracing::info!("Reconstructing plugin chain from session...");
    let graph = PluginGraph::new();
    session
        .apply_to_graph(&graph, |plugin_spec| match plugin_spec {
            PluginSpec::Builtin { name, .. } => {
                tracing::info!("  Loading built-in processor: {name}");
                create_builtin(name).ok_or_else(|| format!("no built-in processor named '{name}'"))
            }
            PluginSpec::Vst3 { path, .. } => {
                Err(format!("VST3 hosting is not available in this build: {}", path.display()))
            }
        })
        .context("Failed to reconstruct chain from session")?;
    graph
        .prepare(session.sample_rate, session.block_size)
        .context("Failed to prepare chain")?;

    tracing::info!("Chain reconstructed with {} plugin(s)", graph.len());

    tracing::info!("Processing audio...");
    let output_samples = process_audio_with_graph(&samples, channel_count, &graph, session.block_size);

    tracing::info!("Writing output WAV file...");
    write_wav(output, &output_samples, spec)?;

    tracing::info!("Done! Output written to {}", output.display());
    println!("Processing complete: {}", output.display());

    Ok(())
}

/// Process audio file through a single built-in processor
fn process_with_plugin(args: &Args) -> Result<()> {
    let input = args.input.as_ref().context("--input required for processing")?;
    let output = args.output.as_ref().context("--output required for processing")?;
    let name = args.plugin.as_ref().context("--plugin required when not using --session")?;

    tracing::info!("Offline WAV processor");
    tracing::info!("Input:  {}", input.display());
    tracing::info!("Output: {}", output.display());
    tracing::info!("Plugin: {name}");
    tracing::info!("Block size: {}", args.block_size);

    tracing::info!("Reading input WAV file...");
    let mut reader = WavReader::open(input)
        .with_context(|| format!("Failed to open input file: {}", input.display()))?;

    let spec = reader.spec();
    tracing::info!(
        "Input format: {} Hz, {} channels, {} bits, {:?}",
        spec.sample_rate,
        spec.channels,
        spec.bits_per_sample,
        spec.sample_format
    );

    let samples = read_wav_samples(&mut reader, &spec)?;
    let channel_count = spec.channels as usize;
    let frame_count = samples.len() / channel_count;

    tracing::info!("Read {frame_count} frames ({} samples)", samples.len());

    tracing::info!("Loading built-in processor...");
    let mut plugin = load_builtin(name)?;

    plugin
        .initialize(spec.sample_rate, args.block_size)
        .context("Failed to initialize plugin")?;

    tracing::info!("Plugin loaded: {}", plugin.info().name);
    tracing::info!(
        "Plugin channels: {} in, {} out",
        plugin.input_channels(),
        plugin.output_channels()
    );

    if !args.params.is_empty() {
        tracing::info!("Setting {} parameter(s)...", args.params.len());
        apply_parameters(&mut plugin, &args.params)?;
    }

    tracing::info!("Processing audio...");
    let output_samples = process_audio(&samples, channel_count, &mut *plugin, args.block_size)?;

    tracing::info!("Writing output WAV file...");
    write_wav(output, &output_samples, spec)?;

    tracing::info!("Done! Output written to {output:?}");

    Ok(())
}

/// Read WAV samples and convert to f32
fn read_wav_samples(
    reader: &mut WavReader<std::io::BufReader<std::fs::File>>,
    spec: &hound::WavSpec,
) -> Result<Vec<f32>> {
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => {
            tracing::info!("Reading float samples...");
            reader
                .samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read float samples")?
        }
        hound::SampleFormat::Int => {
            tracing::info!("Reading integer samples and converting to float...");
            match spec.bits_per_sample {
                16 => reader
                    .samples::<i16>()
                    .map(|s| s.map(|sample| f32::from(sample) / f32::from(i16::MAX)))
                    .collect::<Result<Vec<_>, _>>()
                    .context("Failed to read 16-bit samples")?,
                24 => reader
                    .samples::<i32>()
                    .map(|s| s.map(|sample| sample as f32 / 8_388_608.0)) // 2^23
                    .collect::<Result<Vec<_>, _>>()
                    .context("Failed to read 24-bit samples")?,
                32 => reader
                    .samples::<i32>()
                    .map(|s| s.map(|sample| sample as f32 / i32::MAX as f32))
                    .collect::<Result<Vec<_>, _>>()
                    .context("Failed to read 32-bit samples")?,
                bits => anyhow::bail!("Unsupported bit depth: {bits}"),
            }
        }
    };

    Ok(samples)
}

/// Process audio through a `PluginGraph` in offline mode
fn process_audio_with_graph(
    input_samples: &[f32],
    channel_count: usize,
    graph: &PluginGraph,
    block_size: usize,
) -> Vec<f32> {
    let frame_count = input_samples.len() / channel_count;
    let mut output_samples = vec![0.0_f32; input_samples.len()];

    let mut input_buffers: Vec<Vec<f32>> = vec![vec![0.0; block_size]; channel_count];
    let mut output_buffers: Vec<Vec<f32>> = vec![vec![0.0; block_size]; channel_count];

    let mut frames_processed = 0;
    while frames_processed < frame_count {
        let frames_remaining = frame_count - frames_processed;
        let current_block_size = frames_remaining.min(block_size);

        for frame in 0..current_block_size {
            let sample_offset = (frames_processed + frame) * channel_count;
            for (ch, buf) in input_buffers.iter_mut().enumerate() {
                buf[frame] = input_samples.get(sample_offset + ch).copied().unwrap_or(0.0);
            }
        }
        if current_block_size < block_size {
            for buf in &mut input_buffers {
                buf[current_block_size..].fill(0.0);
            }
        }

        let input_refs: Vec<&[f32]> = input_buffers.iter().map(Vec::as_slice).collect();
        let mut output_refs: Vec<&mut [f32]> = output_buffers.iter_mut().map(Vec::as_mut_slice).collect();

        let mut audio = AudioBuffer {
            inputs: &input_refs,
            outputs: &mut output_refs,
            frames: block_size,
        };
        graph.process_block(&mut audio, block_size);

        for frame in 0..current_block_size {
            let sample_offset = (frames_processed + frame) * channel_count;
            for (ch, buf) in output_buffers.iter().enumerate() {
                if sample_offset + ch < output_samples.len() {
                    output_samples[sample_offset + ch] = buf[frame];
                }
            }
        }

        frames_processed += current_block_size;

        if frames_processed % (block_size * 100) == 0 {
            tracing::debug!("Processed {frames_processed}/{frame_count} frames");
        }
    }

    tracing::info!("Processed {frames_processed} frames total");
    output_samples
}

/// Process audio through a single plugin in offline mode
fn process_audio(
    input_samples: &[f32],
    channel_count: usize,
    plugin: &mut dyn Plugin,
    block_size: usize,
) -> Result<Vec<f32>> {
    let frame_count = input_samples.len() / channel_count;
    let mut output_samples = vec![0.0_f32; input_samples.len()];

    let mut input_buffers: Vec<Vec<f32>> = vec![vec![0.0; block_size]; channel_count];
    let mut output_buffers: Vec<Vec<f32>> = vec![vec![0.0; block_size]; channel_count];

    let event_buffer = EventBuffer::new();

    let mut frames_processed = 0;
    while frames_processed < frame_count {
        let frames_remaining = frame_count - frames_processed;
        let current_block_size = frames_remaining.min(block_size);

        for frame in 0..current_block_size {
            let sample_offset = (frames_processed + frame) * channel_count;
            for (ch, buf) in input_buffers.iter_mut().enumerate() {
                buf[frame] = input_samples.get(sample_offset + ch).copied().unwrap_or(0.0);
            }
        }
        if current_block_size < block_size {
            for buf in &mut input_buffers {
                buf[current_block_size..].fill(0.0);
            }
        }

        let input_refs: Vec<&[f32]> = input_buffers.iter().map(Vec::as_slice).collect();
        let mut output_refs: Vec<&mut [f32]> = output_buffers.iter_mut().map(Vec::as_mut_slice).collect();

        let mut audio = AudioBuffer {
            inputs: &input_refs,
            outputs: &mut output_refs,
            frames: current_block_size,
        };

        plugin.process(&mut audio, &event_buffer)?;

        for frame in 0..current_block_size {
            let sample_offset = (frames_processed + frame) * channel_count;
            for (ch, buf) in output_buffers.iter().enumerate() {
                if sample_offset + ch < output_samples.len() {
                    output_samples[sample_offset + ch] = buf[frame];
                }
            }
        }

        frames_processed += current_block_size;

        if frames_processed % (block_size * 100) == 0 {
            tracing::debug!("Processed {frames_processed}/{frame_count} frames");
        }
    }

    tracing::info!("Processed {frames_processed} frames total");
    Ok(output_samples)
}

/// Write interleaved samples to WAV file
fn write_wav(path: &PathBuf, samples: &[f32], spec: hound::WavSpec) -> Result<()> {
    let mut writer =
        WavWriter::create(path, spec).with_context(|| format!("Failed to create output file: {}", path.display()))?;

    match spec.sample_format {
        hound::SampleFormat::Float => {
            for &sample in samples {
                writer.write_sample(sample).context("Failed to write float sample")?;
            }
        }
        hound::SampleFormat::Int => match spec.bits_per_sample {
            16 => {
                for &sample in samples {
                    let int_sample = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
                    writer.write_sample(int_sample).context("Failed to write 16-bit sample")?;
                }
            }
            24 => {
                for &sample in samples {
                    let int_sample = (sample.clamp(-1.0, 1.0) * 8_388_607.0) as i32; // 2^23 - 1
                    writer.write_sample(int_sample).context("Failed to write 24-bit sample")?;
                }
            }
            32 => {
                for &sample in samples {
                    let int_sample = (sample.clamp(-1.0, 1.0) * i32::MAX as f32) as i32;
                    writer.write_sample(int_sample).context("Failed to write 32-bit sample")?;
                }
            }
            bits => anyhow::bail!("Unsupported output bit depth: {bits}"),
        },
    }

    writer.finalize().context("Failed to finalize WAV file")?;
    Ok(())
}
