use thiserror::Error;

#[derive(Debug, Error)]
pub enum VideoError {
    /// Creating the compression context failed. Fatal for the session.
    #[error("encoder initialization failed: {0}")]
    EncoderInit(String),

    /// A single frame failed to encode; logged and dropped.
    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decoder initialization failed: {0}")]
    DecoderInit(String),

    /// The decoder rejected a slice (typically a missing reference frame).
    /// The session answers this with a `keyframe_request`.
    #[error("decode failed: {0}")]
    Decode(String),

    #[error("capture error: {0}")]
    Capture(String),

    #[error("ffmpeg error: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),
}
