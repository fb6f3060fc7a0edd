use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("datagram truncated: expected at least {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("control frame too large: {0} bytes (max 1000000)")]
    FrameTooLarge(usize),

    #[error("control message error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
