//! Core types, traits, and constants shared across the auroute workspace.
//!
//! This crate provides fundamental building blocks that all other auroute crates depend on:
//! sample/frame type aliases, the shared-memory wire protocol's scalar constants, and the
//! workspace-wide error type.

/// Sample rate in Hz
pub type SampleRate = u32;

/// Number of audio frames (samples per channel)
pub type Frames = usize;

/// Audio sample type (32-bit float is standard for plugin hosting)
pub type Sample = f32;

/// Number of audio channels
pub type ChannelCount = usize;

/// Common sample rates
pub mod sample_rates {
    use super::SampleRate;

    /// 44.1 kHz sample rate (CD quality)
    pub const SR_44100: SampleRate = 44100;
    /// 48 kHz sample rate (professional audio standard)
    pub const SR_48000: SampleRate = 48000;
    /// 88.2 kHz sample rate (2x CD quality)
    pub const SR_88200: SampleRate = 88200;
    /// 96 kHz sample rate (high resolution audio)
    pub const SR_96000: SampleRate = 96000;
}

/// Audio buffer block sizes
pub mod block_sizes {
    use super::Frames;

    /// 64 frames per block (very low latency, ~1.3ms @ 48kHz)
    pub const BLOCK_64: Frames = 64;
    /// 128 frames per block (low latency, ~2.7ms @ 48kHz)
    pub const BLOCK_128: Frames = 128;
    /// 256 frames per block (balanced, ~5.3ms @ 48kHz)
    pub const BLOCK_256: Frames = 256;
    /// 512 frames per block (higher latency, ~10.7ms @ 48kHz)
    pub const BLOCK_512: Frames = 512;
}

/// Constants governing the shared-memory ring-buffer wire protocol (spec §6.1).
pub mod protocol {
    use super::{ChannelCount, Frames, SampleRate};

    /// Current wire protocol version. A consumer attaching to a header with a
    /// different version must fail the attach.
    pub const PROTOCOL_VERSION: u32 = 1;

    /// Default ring-buffer capacity, in frames. Must stay a power of two.
    pub const DEFAULT_BUFFER_FRAMES: Frames = 4096;

    /// Default sample rate used when none is negotiated with the device.
    pub const DEFAULT_SAMPLE_RATE: SampleRate = 48_000;

    /// Default channel count (stereo).
    pub const DEFAULT_CHANNELS: ChannelCount = 2;

    /// Minimum header size in bytes (three 64-byte cache lines, see spec §3/§6.1).
    pub const MIN_HEADER_SIZE: usize = 192;

    /// Portable mapping name at the API layer; translated per-platform by the
    /// shared-memory region implementation.
    pub const SHM_NAME: &str = "Local\\DirectPipeAudio";

    /// Portable named-event name at the API layer.
    pub const EVENT_NAME: &str = "Local\\DirectPipeDataReady";

    /// Consumer wait timeout, in milliseconds, for the named event.
    pub const EVENT_TIMEOUT_MS: u64 = 500;

    /// Grace period honored by the producer before re-initializing shared
    /// memory that was previously torn down, so a consumer has a chance to
    /// observe `producer_active = false` before the header is overwritten.
    pub const REINIT_GRACE_MS: u64 = 5;
}

/// Common error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Audio-related error
    #[error("Audio error: {0}")]
    Audio(String),

    /// Plugin-related error
    #[error("Plugin error: {0}")]
    Plugin(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other unclassified error
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_rates() {
        assert_eq!(sample_rates::SR_48000, 48000);
    }

    #[test]
    fn protocol_defaults_match_spec() {
        assert_eq!(protocol::PROTOCOL_VERSION, 1);
        assert_eq!(protocol::DEFAULT_BUFFER_FRAMES, 4096);
        assert!(protocol::DEFAULT_BUFFER_FRAMES.is_power_of_two());
        assert_eq!(protocol::DEFAULT_SAMPLE_RATE, 48_000);
        assert_eq!(protocol::DEFAULT_CHANNELS, 2);
        assert!(protocol::MIN_HEADER_SIZE >= 192);
    }
}
