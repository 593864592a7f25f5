//! SPSC lock-free ring buffer placed directly in a shared-memory region
//! (spec §4.1). Byte-compatible header shared between a producer and a
//! consumer that may live in different processes.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use auroute_core::protocol::PROTOCOL_VERSION;

/// Binary header laid out at the start of the mapped region (spec §3, §6.1).
/// `write_pos` and `read_pos` each occupy a full 64-byte cache line so
/// producer and consumer never false-share; the remaining scalar fields
/// share a third cache line. Total size is exactly 192 bytes.
#[repr(C)]
struct Header {
    write_pos: AtomicU64,
    _pad0: [u8; 56],
    read_pos: AtomicU64,
    _pad1: [u8; 56],
    sample_rate: AtomicU32,
    channels: AtomicU32,
    buffer_frames: AtomicU32,
    version: AtomicU32,
    producer_active: AtomicU32,
    _pad2: [u8; 44],
}

/// Size of [`Header`] in bytes; also the offset at which PCM payload begins.
pub const HEADER_SIZE: usize = std::mem::size_of::<Header>();

/// Computes the total mapping size required for a given capacity/channel
/// count: `header_size + buffer_frames * channels * sizeof(f32)`.
#[must_use]
pub fn required_region_size(capacity_frames: u32, channels: u32) -> usize {
    HEADER_SIZE + capacity_frames as usize * channels as usize * std::mem::size_of::<f32>()
}

#[must_use]
fn is_power_of_two(n: u32) -> bool {
    n != 0 && (n & (n - 1)) == 0
}

/// Errors from constructing or attaching a [`RingBuffer`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RingBufferError {
    #[error("capacity_frames must be a nonzero power of two, got {0}")]
    CapacityNotPowerOfTwo(u32),
    #[error("channels must be 1 or 2, got {0}")]
    InvalidChannels(u32),
    #[error("sample_rate must be nonzero")]
    InvalidSampleRate,
    #[error("memory region too small: need {needed} bytes, have {got}")]
    RegionTooSmall { needed: usize, got: usize },
    #[error("protocol version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// A lock-free single-producer/single-consumer ring buffer of interleaved
/// audio frames, backed by caller-provided memory (normally a
/// [`crate::shared_memory::SharedMemoryRegion`]).
///
/// A `RingBuffer` does not own the memory it points into; the producer side
/// and the consumer side each hold their own instance pointing at the same
/// bytes. This mirrors the split ownership of the region itself (spec §4.2)
/// from the ring buffer algorithm (spec §4.1).
pub struct RingBuffer {
    header: NonNull<Header>,
    data: NonNull<f32>,
    mask: u32,
}

// SAFETY: a `RingBuffer` is used exclusively by one side (producer xor
// consumer) of the protocol; all shared state crossing sides is atomic.
unsafe impl Send for RingBuffer {}

impl RingBuffer {
    /// Construct the header in place at the start of `memory`, zero the
    /// payload, and publish `producer_active = true`.
    ///
    /// # Safety
    /// `memory` must be valid for reads and writes for at least
    /// `required_region_size(capacity_frames, channels)` bytes, and must
    /// outlive the returned `RingBuffer` and any consumer attached to the
    /// same bytes.
    pub unsafe fn init_as_producer(
        memory: *mut u8,
        memory_len: usize,
        capacity_frames: u32,
        channels: u32,
        sample_rate: u32,
    ) -> Result<Self, RingBufferError> {
        if !is_power_of_two(capacity_frames) {
            return Err(RingBufferError::CapacityNotPowerOfTwo(capacity_frames));
        }
        if channels == 0 || channels > 2 {
            return Err(RingBufferError::InvalidChannels(channels));
        }
        if sample_rate == 0 {
            return Err(RingBufferError::InvalidSampleRate);
        }
        let needed = required_region_size(capacity_frames, channels);
        if memory_len < needed {
            return Err(RingBufferError::RegionTooSmall {
                needed,
                got: memory_len,
            });
        }

        // SAFETY: caller guarantees `memory` is valid for `needed` bytes.
        let header_ptr = memory.cast::<Header>();
        unsafe {
            header_ptr.write(Header {
                write_pos: AtomicU64::new(0),
                _pad0: [0; 56],
                read_pos: AtomicU64::new(0),
                _pad1: [0; 56],
                sample_rate: AtomicU32::new(sample_rate),
                channels: AtomicU32::new(channels),
                buffer_frames: AtomicU32::new(capacity_frames),
                version: AtomicU32::new(PROTOCOL_VERSION),
                producer_active: AtomicU32::new(0),
                _pad2: [0; 44],
            });
        }
        // SAFETY: `header_ptr` was just initialized above.
        let header = unsafe { &*header_ptr };
        let data_ptr = unsafe { memory.add(HEADER_SIZE) }.cast::<f32>();
        let payload_floats = capacity_frames as usize * channels as usize;
        unsafe {
            std::ptr::write_bytes(data_ptr, 0, payload_floats);
        }
        header.producer_active.store(1, Ordering::Release);

        Ok(Self {
            header: NonNull::new(header_ptr).expect("memory pointer must be non-null"),
            data: NonNull::new(data_ptr).expect("memory pointer must be non-null"),
            mask: capacity_frames - 1,
        })
    }

    /// Attach to an existing header written by a producer, validating that
    /// it describes a protocol-compatible buffer. Fails without side
    /// effects on any validation error.
    ///
    /// # Safety
    /// `memory` must be valid for reads and writes for at least `memory_len`
    /// bytes and must remain valid for the lifetime of the returned
    /// `RingBuffer`.
    pub unsafe fn attach_as_consumer(
        memory: *mut u8,
        memory_len: usize,
    ) -> Result<Self, RingBufferError> {
        if memory_len < HEADER_SIZE {
            return Err(RingBufferError::RegionTooSmall {
                needed: HEADER_SIZE,
                got: memory_len,
            });
        }
        let header_ptr = memory.cast::<Header>();
        // SAFETY: caller guarantees `memory` is valid for `memory_len` bytes.
        let header = unsafe { &*header_ptr };

        let version = header.version.load(Ordering::Acquire);
        if version != PROTOCOL_VERSION {
            return Err(RingBufferError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                found: version,
            });
        }
        let capacity_frames = header.buffer_frames.load(Ordering::Acquire);
        let channels = header.channels.load(Ordering::Acquire);
        let sample_rate = header.sample_rate.load(Ordering::Acquire);
        if !is_power_of_two(capacity_frames) {
            return Err(RingBufferError::CapacityNotPowerOfTwo(capacity_frames));
        }
        if channels == 0 || channels > 2 {
            return Err(RingBufferError::InvalidChannels(channels));
        }
        if sample_rate == 0 {
            return Err(RingBufferError::InvalidSampleRate);
        }
        let needed = required_region_size(capacity_frames, channels);
        if memory_len < needed {
            return Err(RingBufferError::RegionTooSmall {
                needed,
                got: memory_len,
            });
        }

        let data_ptr = unsafe { memory.add(HEADER_SIZE) }.cast::<f32>();
        Ok(Self {
            header: NonNull::new(header_ptr).expect("memory pointer must be non-null"),
            data: NonNull::new(data_ptr).expect("memory pointer must be non-null"),
            mask: capacity_frames - 1,
        })
    }

    fn header(&self) -> &Header {
        // SAFETY: constructed with a pointer valid for the buffer's lifetime.
        unsafe { self.header.as_ref() }
    }

    #[must_use]
    pub fn channels(&self) -> u32 {
        self.header().channels.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.header().sample_rate.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.header().buffer_frames.load(Ordering::Relaxed)
    }

    /// Clears `producer_active`. Must be called by the producer before the
    /// region is unmapped, so a consumer can distinguish a clean shutdown
    /// from a crash (spec §4.4, §8).
    pub fn mark_producer_inactive(&self) {
        self.header()
            .producer_active
            .store(0, Ordering::Release);
    }

    #[must_use]
    pub fn producer_active(&self) -> bool {
        self.header().producer_active.load(Ordering::Acquire) != 0
    }

    /// Producer-side write (spec §4.1 write algorithm). Returns the number
    /// of frames actually written; never overwrites unread data.
    pub fn write(&mut self, data: &[f32], frames: u32) -> u32 {
        if frames == 0 {
            return 0;
        }
        let header = self.header();
        let channels = header.channels.load(Ordering::Relaxed);
        let capacity = header.buffer_frames.load(Ordering::Relaxed);

        let w = header.write_pos.load(Ordering::Relaxed);
        let r = header.read_pos.load(Ordering::Acquire);

        let used = w - r;
        let space = capacity as u64 - used;
        let to_write = u64::from(frames).min(space) as u32;
        if to_write == 0 {
            return 0;
        }

        let idx = (w as u32) & self.mask;
        let first = to_write.min(capacity - idx);
        let second = to_write - first;

        // SAFETY: idx/first/second were derived from the validated header
        // and stay within the payload established at init/attach time.
        unsafe {
            let dst = self.data.as_ptr().add(idx as usize * channels as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, first as usize * channels as usize);
            if second > 0 {
                let src = data.as_ptr().add(first as usize * channels as usize);
                std::ptr::copy_nonoverlapping(src, self.data.as_ptr(), second as usize * channels as usize);
            }
        }

        header.write_pos.store(w + u64::from(to_write), Ordering::Release);
        to_write
    }

    /// Consumer-side read (spec §4.1 read algorithm). Returns the number of
    /// frames actually read.
    pub fn read(&mut self, data: &mut [f32], frames: u32) -> u32 {
        if frames == 0 {
            return 0;
        }
        let header = self.header();
        let channels = header.channels.load(Ordering::Relaxed);
        let capacity = header.buffer_frames.load(Ordering::Relaxed);

        let w = header.write_pos.load(Ordering::Acquire);
        let r = header.read_pos.load(Ordering::Relaxed);

        let available = (w - r).min(u64::from(capacity)) as u32;
        let to_read = frames.min(available);
        if to_read == 0 {
            return 0;
        }

        let idx = (r as u32) & self.mask;
        let first = to_read.min(capacity - idx);
        let second = to_read - first;

        // SAFETY: see `write`.
        unsafe {
            let src = self.data.as_ptr().add(idx as usize * channels as usize);
            std::ptr::copy_nonoverlapping(src, data.as_mut_ptr(), first as usize * channels as usize);
            if second > 0 {
                let dst = data.as_mut_ptr().add(first as usize * channels as usize);
                std::ptr::copy_nonoverlapping(self.data.as_ptr(), dst, second as usize * channels as usize);
            }
        }

        header.read_pos.store(r + u64::from(to_read), Ordering::Release);
        to_read
    }

    #[must_use]
    pub fn available_read(&self) -> u32 {
        let header = self.header();
        let w = header.write_pos.load(Ordering::Acquire);
        let r = header.read_pos.load(Ordering::Relaxed);
        (w - r).min(u64::from(header.buffer_frames.load(Ordering::Relaxed))) as u32
    }

    #[must_use]
    pub fn available_write(&self) -> u32 {
        let header = self.header();
        let w = header.write_pos.load(Ordering::Relaxed);
        let r = header.read_pos.load(Ordering::Acquire);
        let capacity = header.buffer_frames.load(Ordering::Relaxed);
        capacity - (w - r) as u32
    }

    /// Zeroes both cursors. Valid only when both ends are quiescent.
    pub fn reset(&mut self) {
        let header = self.header();
        header.write_pos.store(0, Ordering::Relaxed);
        header.read_pos.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_pair(capacity_frames: u32, channels: u32) -> (RingBuffer, RingBuffer, Box<[u8]>) {
        let size = required_region_size(capacity_frames, channels);
        let mut mem = vec![0_u8; size].into_boxed_slice();
        let ptr = mem.as_mut_ptr();
        // SAFETY: `mem` stays alive for the lifetime of the test (it is
        // returned alongside the two ring buffers, which do not own it).
        let producer =
            unsafe { RingBuffer::init_as_producer(ptr, size, capacity_frames, channels, 48_000) }
                .unwrap();
        let consumer = unsafe { RingBuffer::attach_as_consumer(ptr, size) }.unwrap();
        (producer, consumer, mem)
    }

    #[test]
    fn header_is_192_bytes_and_three_cache_lines() {
        assert_eq!(HEADER_SIZE, 192);
    }

    #[test]
    fn scenario_1_exact_round_trip_stereo() {
        let (mut p, mut c, _mem) = make_pair(4096, 2);
        let input: Vec<f32> = (0..200).map(|i| i as f32 / 1000.0).collect();
        let written = p.write(&input, 100);
        assert_eq!(written, 100);

        let mut out = vec![0.0_f32; 200];
        let read = c.read(&mut out, 100);
        assert_eq!(read, 100);
        assert_eq!(out, input);
    }

    #[test]
    fn scenario_2_five_cycles_of_32_mono() {
        let (mut p, mut c, _mem) = make_pair(64, 1);
        for cycle in 0..5u32 {
            let input: Vec<f32> = (0..32).map(|i| (cycle * 100 + i) as f32).collect();
            assert_eq!(p.write(&input, 32), 32);
            let mut out = vec![0.0_f32; 32];
            assert_eq!(c.read(&mut out, 32), 32);
            assert_eq!(out, input);
        }
    }

    #[test]
    fn scenario_3_overrun_then_recovery() {
        let (mut p, mut c, _mem) = make_pair(64, 1);
        let full = vec![1.0_f32; 64];
        assert_eq!(p.write(&full, 64), 64);

        let extra = vec![2.0_f32; 16];
        assert_eq!(p.write(&extra, 16), 0);

        let mut drained = vec![0.0_f32; 32];
        assert_eq!(c.read(&mut drained, 32), 32);

        assert_eq!(p.write(&extra, 16), 16);
    }

    #[test]
    fn scenario_4_underrun_on_empty() {
        let (mut p, mut c, _mem) = make_pair(4096, 2);
        let mut out = vec![0.0_f32; 128];
        assert_eq!(c.read(&mut out, 64), 0);

        let input = vec![0.5_f32; 20];
        assert_eq!(p.write(&input, 10), 10);
        let mut out2 = vec![0.0_f32; 20];
        assert_eq!(c.read(&mut out2, 10), 10);
        assert_eq!(c.read(&mut out2, 64), 0);
    }

    #[test]
    fn scenario_5_version_mismatch_fails_attach_cleanly() {
        let capacity = 4096;
        let channels = 2;
        let size = required_region_size(capacity, channels);
        let mut mem = vec![0_u8; size].into_boxed_slice();
        let ptr = mem.as_mut_ptr();
        let _producer =
            unsafe { RingBuffer::init_as_producer(ptr, size, capacity, channels, 48_000) }
                .unwrap();

        // Corrupt the version field in place (offset: two 64-byte cache
        // lines, then sample_rate + channels + buffer_frames = 12 bytes).
        let version_offset = 64 + 64 + 12;
        unsafe {
            ptr.add(version_offset).cast::<u32>().write(99);
        }

        let result = unsafe { RingBuffer::attach_as_consumer(ptr, size) };
        assert!(matches!(
            result,
            Err(RingBufferError::VersionMismatch { expected: 1, found: 99 })
        ));
    }

    #[test]
    fn invalid_channel_count_rejected() {
        let size = required_region_size(16, 2);
        let mut mem = vec![0_u8; size].into_boxed_slice();
        let err = unsafe { RingBuffer::init_as_producer(mem.as_mut_ptr(), size, 16, 3, 48_000) }
            .unwrap_err();
        assert_eq!(err, RingBufferError::InvalidChannels(3));
    }

    #[test]
    fn non_power_of_two_capacity_rejected() {
        let size = required_region_size(10, 2);
        let mut mem = vec![0_u8; size].into_boxed_slice();
        let err = unsafe { RingBuffer::init_as_producer(mem.as_mut_ptr(), size, 10, 2, 48_000) }
            .unwrap_err();
        assert_eq!(err, RingBufferError::CapacityNotPowerOfTwo(10));
    }

    #[test]
    fn capacity_bound_holds_after_many_operations() {
        let (mut p, mut c, _mem) = make_pair(64, 1);
        let data = vec![1.0_f32; 17];
        for _ in 0..50 {
            p.write(&data, 17);
            let mut out = vec![0.0_f32; 13];
            c.read(&mut out, 13);
            assert!(p.available_read() <= 64);
        }
    }

    #[test]
    fn zero_frame_requests_are_no_ops() {
        let (mut p, mut c, _mem) = make_pair(64, 1);
        assert_eq!(p.write(&[], 0), 0);
        let mut out = [0.0_f32; 1];
        assert_eq!(c.read(&mut out, 0), 0);
    }

    #[test]
    fn wrap_around_integrity() {
        let (mut p, mut c, _mem) = make_pair(32, 2);
        // Advance both cursors close to the wrap point first.
        let warm = vec![0.0_f32; 40]; // 20 frames stereo
        p.write(&warm, 20);
        let mut sink = vec![0.0_f32; 40];
        c.read(&mut sink, 20);

        let payload: Vec<f32> = (0..24).map(|i| i as f32).collect(); // 12 frames stereo
        assert_eq!(p.write(&payload, 12), 12);
        let mut out = vec![0.0_f32; 24];
        assert_eq!(c.read(&mut out, 12), 12);
        assert_eq!(out, payload);
    }

    #[test]
    fn concurrent_spsc_correctness() {
        use std::thread;

        let capacity = 1024;
        let channels = 2;
        let size = required_region_size(capacity, channels);
        let mut mem = vec![0_u8; size].into_boxed_slice();
        let ptr = mem.as_mut_ptr() as usize;

        let n_blocks = 200;
        let block_frames = 37;

        let producer_thread = thread::spawn(move || {
            let mut p = unsafe {
                RingBuffer::init_as_producer(ptr as *mut u8, size, capacity, channels, 48_000)
            }
            .unwrap();
            for block in 0..n_blocks {
                let payload: Vec<f32> = (0..block_frames * channels)
                    .map(|i| (block * block_frames * channels + i) as f32)
                    .collect();
                let mut written = 0u32;
                while written < block_frames {
                    written += p.write(&payload[(written * channels) as usize..], block_frames - written);
                }
            }
        });

        // Let the producer construct the header before the consumer attaches.
        thread::sleep(std::time::Duration::from_millis(5));

        let consumer_thread = thread::spawn(move || {
            let mut c =
                unsafe { RingBuffer::attach_as_consumer(ptr as *mut u8, size) }.unwrap();
            let mut total_read = 0u32;
            let mut out = vec![0.0_f32; (block_frames * channels) as usize];
            let mut all: Vec<f32> = Vec::new();
            while total_read < n_blocks * block_frames {
                let got = c.read(&mut out, block_frames);
                if got > 0 {
                    total_read += got;
                    all.extend_from_slice(&out[..(got * channels) as usize]);
                }
            }
            all
        });

        producer_thread.join().unwrap();
        let all = consumer_thread.join().unwrap();

        let expected: Vec<f32> = (0..n_blocks * block_frames * channels)
            .map(|i| i as f32)
            .collect();
        assert_eq!(all, expected);
    }
}
