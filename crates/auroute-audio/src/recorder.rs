//! Lock-free audio recorder: the RT callback pushes into a bounded FIFO,
//! a background thread drains it to a WAV file (spec §4.8).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

/// Capacity of the RT-to-disk FIFO, in interleaved samples.
const RECORDER_FIFO_CAPACITY: usize = 32_768;

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("recorder is already recording")]
    AlreadyRecording,
    #[error("recorder is not currently recording")]
    NotRecording,
    #[error("failed to create wav writer: {0}")]
    Io(#[from] hound::Error),
}

/// Records processed audio to a WAV file. `write_block` is RT-safe: it
/// only takes an uncontended `parking_lot::Mutex` guarding the FIFO
/// producer handle, which is only ever contended during start/stop.
pub struct Recorder {
    recording: AtomicBool,
    producer: Mutex<Option<rtrb::Producer<f32>>>,
    writer_handle: Mutex<Option<JoinHandle<()>>>,
    current_file: Mutex<Option<PathBuf>>,
    samples_written: Arc<AtomicU64>,
    sample_rate: AtomicU64,
}

impl Recorder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            recording: AtomicBool::new(false),
            producer: Mutex::new(None),
            writer_handle: Mutex::new(None),
            current_file: Mutex::new(None),
            samples_written: Arc::new(AtomicU64::new(0)),
            sample_rate: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn recording_file(&self) -> Option<PathBuf> {
        self.current_file.lock().clone()
    }

    #[must_use]
    pub fn recorded_seconds(&self) -> f64 {
        let sample_rate = self.sample_rate.load(Ordering::Relaxed);
        if sample_rate == 0 {
            return 0.0;
        }
        self.samples_written.load(Ordering::Relaxed) as f64 / sample_rate as f64
    }

    /// Begins recording interleaved `channels`-channel audio at `sample_rate`
    /// to `path`. Spawns the background disk-writer thread.
    pub fn start_recording(&self, path: PathBuf, sample_rate: u32, channels: u16) -> Result<(), RecorderError> {
        if self.recording.load(Ordering::Relaxed) {
            return Err(RecorderError::AlreadyRecording);
        }

        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec)?;

        let (producer, mut consumer) = rtrb::RingBuffer::<f32>::new(RECORDER_FIFO_CAPACITY);
        let counter = Arc::clone(&self.samples_written);
        let handle = std::thread::Builder::new()
            .name("auroute-recorder-writer".into())
            .spawn(move || {
                loop {
                    match consumer.pop() {
                        Ok(sample) => {
                            if writer.write_sample(sample).is_err() {
                                break;
                            }
                            counter.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(rtrb::PopError::Empty) => {
                            if consumer.is_abandoned() {
                                break;
                            }
                            std::thread::sleep(std::time::Duration::from_millis(1));
                        }
                    }
                }
                let _ = writer.finalize();
            })
            .expect("failed to spawn recorder writer thread");

        *self.producer.lock() = Some(producer);
        *self.writer_handle.lock() = Some(handle);
        *self.current_file.lock() = Some(path);
        self.sample_rate.store(u64::from(sample_rate), Ordering::Relaxed);
        self.samples_written.store(0, Ordering::Relaxed);
        self.recording.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Stops recording, drains the FIFO, and joins the writer thread.
    pub fn stop_recording(&self) -> Result<(), RecorderError> {
        if !self.recording.swap(false, Ordering::Relaxed) {
            return Err(RecorderError::NotRecording);
        }
        *self.producer.lock() = None;
        if let Some(handle) = self.writer_handle.lock().take() {
            let _ = handle.join();
        }
        Ok(())
    }

    /// RT-safe. Pushes interleaved samples from `channels` for `frames`
    /// frames into the FIFO. Silently drops the remaining frames once the
    /// FIFO can't hold a whole frame, rather than blocking the audio
    /// callback or splitting a frame across channels.
    pub fn write_block(&self, channels: &[&[f32]], frames: usize) {
        if !self.recording.load(Ordering::Relaxed) {
            return;
        }
        let mut guard = self.producer.lock();
        let Some(producer) = guard.as_mut() else {
            return;
        };
        let frame_len = channels.len();
        for frame in 0..frames {
            // Checked against the whole frame up front: a push failing
            // partway through a frame would leave the FIFO holding some but
            // not all of that frame's channels, permanently misaligning the
            // interleaved order the writer thread expects for every frame
            // after it.
            if producer.slots() < frame_len {
                return;
            }
            for channel in channels {
                let _ = producer.push(channel[frame]);
            }
        }
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_write_stop_produces_readable_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let recorder = Recorder::new();
        recorder.start_recording(path.clone(), 48_000, 2).unwrap();

        let left = vec![0.5_f32; 16];
        let right = vec![-0.5_f32; 16];
        recorder.write_block(&[&left, &right], 16);
        recorder.stop_recording().unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 48_000);
    }

    #[test]
    fn double_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new();
        recorder
            .start_recording(dir.path().join("a.wav"), 48_000, 1)
            .unwrap();
        let second = recorder.start_recording(dir.path().join("b.wav"), 48_000, 1);
        assert!(matches!(second, Err(RecorderError::AlreadyRecording)));
        recorder.stop_recording().unwrap();
    }

    #[test]
    fn stop_without_start_errors() {
        let recorder = Recorder::new();
        assert!(matches!(recorder.stop_recording(), Err(RecorderError::NotRecording)));
    }

    #[test]
    fn write_block_without_recording_is_a_no_op() {
        let recorder = Recorder::new();
        let channel = vec![1.0_f32; 4];
        recorder.write_block(&[&channel], 4);
        assert_eq!(recorder.recorded_seconds(), 0.0);
    }
}
