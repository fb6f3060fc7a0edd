use beam_audio::MuteBlacklist;
use beam_transport::Heartbeat;

/// Session-wide tuning. There is no configuration file; the shell
/// constructs this in code and the defaults are the shipped behavior.
#[derive(Debug, Clone)]
pub struct BeamConfig {
    /// Encoder expected rate and minimum capture frame interval.
    pub target_fps: u32,
    /// Video encoder average bitrate, bits per second.
    pub video_bitrate: u32,
    /// Audio bitrate for stereo streams.
    pub audio_bitrate_stereo: u32,
    /// Audio bitrate for mono streams.
    pub audio_bitrate_mono: u32,
    /// Bundle IDs whose process-global audio must not be muted while
    /// non-beamed windows remain.
    pub mute_blacklist: MuteBlacklist,
    /// Forced IDR cadence in frames.
    pub max_keyframe_interval: u32,
    /// Control-channel ping period and disconnect threshold.
    pub heartbeat: Heartbeat,
    /// Reassembly GC cutoff in 90 kHz ticks.
    pub reassembly_gc_window: u32,
}

impl Default for BeamConfig {
    fn default() -> Self {
        Self {
            target_fps: 30,
            video_bitrate: 8_000_000,
            audio_bitrate_stereo: 128_000,
            audio_bitrate_mono: 64_000,
            mute_blacklist: MuteBlacklist::default(),
            max_keyframe_interval: 60,
            heartbeat: Heartbeat::default(),
            reassembly_gc_window: beam_protocol::packet::REASSEMBLY_GC_WINDOW,
        }
    }
}
