//! Fans the processed buffer to a separate monitor sink (spec §4.7).

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

fn store_f32(cell: &AtomicU32, value: f32) {
    cell.store(value.to_bits(), Ordering::Relaxed);
}

fn load_f32(cell: &AtomicU32) -> f32 {
    f32::from_bits(cell.load(Ordering::Relaxed))
}

/// Per-sink atomic state. The main output is written directly by the
/// engine; a `SinkState` only ever describes the monitor sink.
pub struct SinkState {
    enabled_bits: AtomicU32,
    volume_bits: AtomicU32,
    level_bits: AtomicU32,
}

impl SinkState {
    #[must_use]
    fn new() -> Self {
        Self {
            enabled_bits: AtomicU32::new(0),
            volume_bits: AtomicU32::new(1.0_f32.to_bits()),
            level_bits: AtomicU32::new(0.0_f32.to_bits()),
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled_bits.load(Ordering::Relaxed) != 0
    }

    pub fn set_enabled(&self, flag: bool) {
        self.enabled_bits.store(u32::from(flag), Ordering::Relaxed);
    }

    #[must_use]
    pub fn volume(&self) -> f32 {
        load_f32(&self.volume_bits)
    }

    pub fn set_volume(&self, value: f32) {
        store_f32(&self.volume_bits, value.clamp(0.0, 1.0));
    }

    #[must_use]
    pub fn level(&self) -> f32 {
        load_f32(&self.level_bits)
    }

    fn set_level(&self, value: f32) {
        store_f32(&self.level_bits, value);
    }
}

impl Default for SinkState {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes the engine's processed buffer to the monitor sink, scaling by
/// volume only when necessary to avoid an unneeded copy at unity gain.
///
/// `scratch` is pre-allocated once by `initialize` and touched only by
/// `route` afterwards; both are called exclusively from the single RT
/// processing thread, so a plain `UnsafeCell` replaces a lock here.
pub struct OutputRouter {
    pub monitor: SinkState,
    scratch: UnsafeCell<Vec<f32>>,
}

// SAFETY: `scratch` is mutated only by `initialize` (before the processing
// thread starts) and `route` (from that one thread thereafter); `OutputRouter`
// is shared across threads solely so other threads can read `monitor`'s
// atomics.
unsafe impl Sync for OutputRouter {}

impl OutputRouter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            monitor: SinkState::new(),
            scratch: UnsafeCell::new(Vec::new()),
        }
    }

    /// Pre-allocates the stereo scratch buffer for `frames`-sized blocks.
    /// Call once from a non-RT setup path (e.g. `AudioEngine::start`) before
    /// the processing thread begins calling `route`; `route` itself never
    /// grows this buffer.
    pub fn initialize(&self, frames: usize) {
        // SAFETY: called before the processing thread starts, so no
        // concurrent access to `scratch` is possible yet.
        let scratch = unsafe { &mut *self.scratch.get() };
        scratch.clear();
        scratch.resize(frames * 2, 0.0);
    }

    /// RT path. `processed` holds one slice per channel; `source_channels`
    /// is how many of those channels actually carry signal (1 for mono).
    /// `sink` receives exactly two channels: if the source is mono, both
    /// monitor channels receive the same signal.
    pub fn route(&self, processed: &[&[f32]], source_channels: usize, frames: usize, sink: &mut dyn FnMut(&[&[f32]])) {
        if !self.monitor.enabled() {
            return;
        }
        let peak = processed
            .iter()
            .take(source_channels.max(1))
            .flat_map(|ch| ch.iter().take(frames))
            .fold(0.0_f32, |acc, &s| acc.max(s.abs()));
        self.monitor.set_level(peak);

        let volume = self.monitor.volume();
        if (volume - 1.0).abs() < 1e-6 {
            if source_channels <= 1 {
                let mono = processed[0];
                sink(&[mono, mono]);
            } else {
                sink(&[processed[0], processed[1]]);
            }
            return;
        }

        // SAFETY: only the processing thread calls `route`, and it never
        // runs concurrently with `initialize`.
        let scratch = unsafe { &mut *self.scratch.get() };
        if scratch.len() != frames * 2 {
            // `initialize` was never called for this block size; fall back
            // to an unscaled pass-through rather than resizing on the RT path.
            tracing::warn!(frames, "output router scratch not sized for this block, skipping volume scaling");
            if source_channels <= 1 {
                let mono = processed[0];
                sink(&[mono, mono]);
            } else {
                sink(&[processed[0], processed[1]]);
            }
            return;
        }
        let (left, right) = scratch.split_at_mut(frames);
        if source_channels <= 1 {
            for i in 0..frames {
                let scaled = processed[0][i] * volume;
                left[i] = scaled;
                right[i] = scaled;
            }
        } else {
            for i in 0..frames {
                left[i] = processed[0][i] * volume;
                right[i] = processed[1][i] * volume;
            }
        }
        sink(&[left, right]);
    }
}

impl Default for OutputRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_monitor_never_calls_sink() {
        let router = OutputRouter::new();
        let left = vec![1.0_f32; 4];
        let right = vec![1.0_f32; 4];
        let mut called = false;
        router.route(&[&left, &right], 2, 4, &mut |_| called = true);
        assert!(!called);
    }

    #[test]
    fn unity_volume_passes_through_without_scaling() {
        let router = OutputRouter::new();
        router.monitor.set_enabled(true);
        let left = vec![0.5_f32; 4];
        let right = vec![0.25_f32; 4];
        let mut observed = Vec::new();
        router.route(&[&left, &right], 2, 4, &mut |chans| {
            observed = chans.iter().map(|c| c.to_vec()).collect();
        });
        assert_eq!(observed[0], left);
        assert_eq!(observed[1], right);
    }

    #[test]
    fn scaled_volume_applies_to_scratch() {
        let router = OutputRouter::new();
        router.initialize(4);
        router.monitor.set_enabled(true);
        router.monitor.set_volume(0.5);
        let left = vec![1.0_f32; 4];
        let right = vec![1.0_f32; 4];
        let mut observed = Vec::new();
        router.route(&[&left, &right], 2, 4, &mut |chans| {
            observed = chans.iter().map(|c| c.to_vec()).collect();
        });
        assert_eq!(observed[0], vec![0.5, 0.5, 0.5, 0.5]);
        assert_eq!(observed[1], vec![0.5, 0.5, 0.5, 0.5]);
    }

    #[test]
    fn scaling_without_initialize_falls_back_to_unscaled_pass_through() {
        let router = OutputRouter::new();
        router.monitor.set_enabled(true);
        router.monitor.set_volume(0.5);
        let left = vec![1.0_f32; 4];
        let right = vec![1.0_f32; 4];
        let mut observed = Vec::new();
        router.route(&[&left, &right], 2, 4, &mut |chans| {
            observed = chans.iter().map(|c| c.to_vec()).collect();
        });
        assert_eq!(observed[0], left);
        assert_eq!(observed[1], right);
    }

    #[test]
    fn mono_source_duplicates_to_both_monitor_channels() {
        let router = OutputRouter::new();
        router.monitor.set_enabled(true);
        let mono = vec![0.75_f32; 4];
        let mut observed = Vec::new();
        router.route(&[&mono], 1, 4, &mut |chans| {
            observed = chans.iter().map(|c| c.to_vec()).collect();
        });
        assert_eq!(observed[0], observed[1]);
    }

    #[test]
    fn volume_is_clamped_to_unit_range() {
        let sink = SinkState::new();
        sink.set_volume(5.0);
        assert_eq!(sink.volume(), 1.0);
        sink.set_volume(-1.0);
        assert_eq!(sink.volume(), 0.0);
    }
}
