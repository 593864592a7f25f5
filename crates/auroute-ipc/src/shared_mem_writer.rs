//! Bridges the RT audio callback's non-interleaved per-channel buffers to
//! the interleaved shared-memory ring buffer (spec §4.4).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use auroute_core::protocol::{EVENT_NAME, REINIT_GRACE_MS, SHM_NAME};

use crate::named_event::NamedEvent;
use crate::ring_buffer::{required_region_size, RingBuffer};
use crate::shared_memory::SharedMemoryRegion;

#[derive(Debug, thiserror::Error)]
pub enum SharedMemWriterError {
    #[error(transparent)]
    Memory(#[from] crate::shared_memory::SharedMemoryError),
    #[error(transparent)]
    Event(#[from] crate::named_event::NamedEventError),
    #[error(transparent)]
    RingBuffer(#[from] crate::ring_buffer::RingBufferError),
}

/// RT-safe producer side of the IPC path. Owns the shared-memory region, the
/// ring buffer constructed inside it, the named event, and a pre-allocated
/// interleave scratch buffer so `write_audio` never allocates.
pub struct SharedMemWriter {
    region: SharedMemoryRegion,
    ring: RingBuffer,
    event: NamedEvent,
    scratch: Vec<f32>,
    channels: usize,
    dropped_frames: AtomicU64,
    last_shutdown: Option<Instant>,
}

impl SharedMemWriter {
    /// Allocates the region, constructs the ring buffer, creates the event,
    /// and pre-allocates the interleave scratch buffer.
    ///
    /// If this writer was previously shut down, honors [`REINIT_GRACE_MS`]
    /// so a consumer still polling the old mapping observes
    /// `producer_active = false` before the header is reconstructed.
    pub fn initialize(
        sample_rate: u32,
        channels: u32,
        buffer_frames: u32,
    ) -> Result<Self, SharedMemWriterError> {
        Self::initialize_after(None, sample_rate, channels, buffer_frames)
    }

    /// Like [`Self::initialize`], but honoring a caller-tracked
    /// `last_shutdown` timestamp from a prior writer's [`ShutdownMarker`].
    /// Lets a lifecycle owner (e.g. the audio engine) carry the grace-period
    /// contract across a writer that was torn down and is now being rebuilt,
    /// without needing a live `Self` to call [`Self::reinitialize`] on.
    pub fn initialize_after(
        last_shutdown: Option<Instant>,
        sample_rate: u32,
        channels: u32,
        buffer_frames: u32,
    ) -> Result<Self, SharedMemWriterError> {
        if let Some(shutdown_at) = last_shutdown {
            let grace = Duration::from_millis(REINIT_GRACE_MS);
            let elapsed = shutdown_at.elapsed();
            if elapsed < grace {
                std::thread::sleep(grace - elapsed);
            }
        }

        let size = required_region_size(buffer_frames, channels);
        let mut region = SharedMemoryRegion::create(SHM_NAME, size)?;
        // SAFETY: `region` was just sized to `size` bytes above and outlives
        // `ring`, which borrows no Rust lifetime but is dropped first.
        let ring = unsafe {
            RingBuffer::init_as_producer(
                region.as_mut_ptr(),
                size,
                buffer_frames,
                channels,
                sample_rate,
            )?
        };
        let event = NamedEvent::create(EVENT_NAME)?;

        Ok(Self {
            region,
            ring,
            event,
            scratch: vec![0.0; buffer_frames as usize * channels as usize],
            channels: channels as usize,
            dropped_frames: AtomicU64::new(0),
            last_shutdown,
        })
    }

    /// Re-initializes after a prior `shutdown`, honoring the grace period.
    pub fn reinitialize(
        &self,
        sample_rate: u32,
        channels: u32,
        buffer_frames: u32,
    ) -> Result<Self, SharedMemWriterError> {
        Self::initialize_after(self.last_shutdown, sample_rate, channels, buffer_frames)
    }

    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// RT-safe. `channel_ptrs` holds one slice per channel, each at least
    /// `frames` samples. Interleaves into the scratch buffer, writes to the
    /// ring buffer, and signals the event unconditionally — even on a
    /// zero-frame write — so a consumer can never miss every signal due to a
    /// single dropped wakeup.
    pub fn write_audio(&mut self, channel_ptrs: &[&[f32]], frames: u32) {
        let capacity_frames = (self.scratch.len() / self.channels.max(1)) as u32;
        let to_write = frames.min(capacity_frames);
        let dropped = u64::from(frames - to_write);

        for (ch, samples) in channel_ptrs.iter().enumerate().take(self.channels) {
            for frame in 0..to_write as usize {
                self.scratch[frame * self.channels + ch] = samples[frame];
            }
        }

        let written = self.ring.write(&self.scratch[..to_write as usize * self.channels], to_write);
        let shortfall = u64::from(to_write - written) + dropped;
        if shortfall > 0 {
            self.dropped_frames.fetch_add(shortfall, Ordering::Relaxed);
        }

        // Signal unconditionally, even if `written == 0`: an OS wake is
        // cheap relative to a stalled consumer, and a spurious wake is
        // harmless (the consumer simply observes `available_read() == 0`).
        let _ = self.event.signal();
    }

    /// Clears `producer_active` before unmapping, so a consumer racing the
    /// teardown observes a clean close rather than treating it as a crash.
    pub fn shutdown(mut self) -> ShutdownMarker {
        self.ring.mark_producer_inactive();
        ShutdownMarker {
            at: Instant::now(),
        }
    }
}

/// Proof that `shutdown` ran; callers thread the timestamp back into
/// [`SharedMemWriter::reinitialize`] via `last_shutdown`-style bookkeeping at
/// the engine layer.
pub struct ShutdownMarker {
    pub at: Instant,
}
