//! RT-callable latency tracking (spec §4.6).

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

/// Smoothing factor for the exponential moving average of processing time.
const SMOOTHING_FACTOR: f32 = 0.1;

/// Tracks per-callback processing duration via an exponential moving
/// average, and derives CPU%/latency figures for UI display.
///
/// `mark_start`/`mark_end` are RT-callable: they touch only a local
/// `Instant` and a single atomic store.
pub struct LatencyMonitor {
    avg_processing_ms_bits: AtomicU32,
    start: std::cell::Cell<Option<Instant>>,
    sample_rate: AtomicU32,
    buffer_size: AtomicU32,
}

// SAFETY: `start` is only ever touched by the single RT thread that calls
// `mark_start`/`mark_end`; the atomics are the only state shared with
// readers on other threads.
unsafe impl Sync for LatencyMonitor {}

impl LatencyMonitor {
    #[must_use]
    pub fn new(sample_rate: u32, buffer_size: u32) -> Self {
        Self {
            avg_processing_ms_bits: AtomicU32::new(0.0_f32.to_bits()),
            start: std::cell::Cell::new(None),
            sample_rate: AtomicU32::new(sample_rate),
            buffer_size: AtomicU32::new(buffer_size),
        }
    }

    pub fn reconfigure(&self, sample_rate: u32, buffer_size: u32) {
        self.sample_rate.store(sample_rate, Ordering::Relaxed);
        self.buffer_size.store(buffer_size, Ordering::Relaxed);
        self.avg_processing_ms_bits.store(0.0_f32.to_bits(), Ordering::Relaxed);
    }

    /// RT-safe. Call once at the top of the audio callback.
    pub fn mark_start(&self) {
        self.start.set(Some(Instant::now()));
    }

    /// RT-safe. Call once at the end of the audio callback. Updates the
    /// exponential moving average stored in an atomic for UI reads.
    pub fn mark_end(&self) {
        let Some(start) = self.start.get() else {
            return;
        };
        let elapsed_ms = start.elapsed().as_secs_f32() * 1000.0;
        let prev = f32::from_bits(self.avg_processing_ms_bits.load(Ordering::Relaxed));
        let next = if prev == 0.0 {
            elapsed_ms
        } else {
            prev + SMOOTHING_FACTOR * (elapsed_ms - prev)
        };
        self.avg_processing_ms_bits.store(next.to_bits(), Ordering::Relaxed);
    }

    #[must_use]
    pub fn avg_processing_ms(&self) -> f32 {
        f32::from_bits(self.avg_processing_ms_bits.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn callback_period_ms(&self) -> f32 {
        let sample_rate = self.sample_rate.load(Ordering::Relaxed) as f32;
        let buffer_size = self.buffer_size.load(Ordering::Relaxed) as f32;
        if sample_rate == 0.0 {
            return 0.0;
        }
        buffer_size / sample_rate * 1000.0
    }

    #[must_use]
    pub fn cpu_percent(&self) -> f32 {
        let period = self.callback_period_ms();
        if period == 0.0 {
            return 0.0;
        }
        self.avg_processing_ms() / period * 100.0
    }

    #[must_use]
    pub fn buffer_latency_ms(&self) -> f32 {
        self.callback_period_ms()
    }

    #[must_use]
    pub fn ipc_path_latency_ms(&self) -> f32 {
        self.buffer_latency_ms() + self.avg_processing_ms()
    }

    #[must_use]
    pub fn monitor_path_latency_ms(&self) -> f32 {
        self.buffer_latency_ms() * 2.0 + self.avg_processing_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn callback_period_matches_buffer_size_over_sample_rate() {
        let monitor = LatencyMonitor::new(48_000, 480);
        assert!((monitor.callback_period_ms() - 10.0).abs() < 0.01);
    }

    #[test]
    fn mark_start_end_updates_average() {
        let monitor = LatencyMonitor::new(48_000, 480);
        monitor.mark_start();
        sleep(Duration::from_millis(1));
        monitor.mark_end();
        assert!(monitor.avg_processing_ms() > 0.0);
    }

    #[test]
    fn reconfigure_resets_average_and_period() {
        let monitor = LatencyMonitor::new(48_000, 480);
        monitor.mark_start();
        monitor.mark_end();
        monitor.reconfigure(44_100, 256);
        assert_eq!(monitor.avg_processing_ms(), 0.0);
        assert!((monitor.callback_period_ms() - 256.0 / 44_100.0 * 1000.0).abs() < 0.001);
    }

    #[test]
    fn total_latency_compositions_match_spec() {
        let monitor = LatencyMonitor::new(48_000, 480);
        monitor.mark_start();
        monitor.mark_end();
        let input = monitor.buffer_latency_ms();
        let proc = monitor.avg_processing_ms();
        assert!((monitor.ipc_path_latency_ms() - (input + proc)).abs() < 0.001);
        assert!((monitor.monitor_path_latency_ms() - (input + proc + input)).abs() < 0.001);
    }
}
