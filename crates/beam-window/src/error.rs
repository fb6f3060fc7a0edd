use thiserror::Error;

#[derive(Debug, Error)]
pub enum WindowError {
    /// The virtual-display facility is unavailable on this platform; the
    /// session continues unhidden.
    #[error("virtual display not supported on this platform")]
    NotSupported,

    /// The virtual display cannot grow enough for another window.
    #[error("virtual display is full")]
    DisplayFull,

    #[error("no matching window for pid {pid}")]
    WindowNotFound { pid: i32 },

    #[error("platform error: {0}")]
    Platform(String),
}
