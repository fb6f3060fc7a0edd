pub mod capture;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod mute;
pub mod playback;

pub use capture::{AudioTap, TestToneTap};
pub use decoder::{AudioDecoder, DecodedAudio};
pub use encoder::{AacPacket, AudioEncoder};
pub use error::AudioError;
pub use mute::MuteBlacklist;
pub use playback::{deinterleave, AudioPlayback, AudioSink, NullAudioSink};

/// Fixed capture/playback sample rate.
pub const SAMPLE_RATE: u32 = 48_000;

/// AAC encoder window in PCM frames per channel.
pub const AAC_FRAME_SIZE: usize = 1024;
