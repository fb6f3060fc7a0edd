use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("AAC encoder error: {0}")]
    Encoder(String),

    #[error("AAC decoder error: {0}")]
    Decoder(String),

    #[error("audio capture error: {0}")]
    Capture(String),

    #[error("audio playback error: {0}")]
    Playback(String),
}
