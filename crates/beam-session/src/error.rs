use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] beam_transport::TransportError),

    #[error("video error: {0}")]
    Video(#[from] beam_video::VideoError),

    #[error("audio error: {0}")]
    Audio(#[from] beam_audio::AudioError),

    #[error("window error: {0}")]
    Window(#[from] beam_window::WindowError),

    #[error("identity store error: {0}")]
    Identity(String),

    #[error("session is not in a state for this operation")]
    InvalidState,
}
