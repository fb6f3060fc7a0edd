use thiserror::Error;

#[derive(Debug, Error)]
pub enum InputError {
    /// The accessibility element lookup or action failed; the caller falls
    /// back to the OS-event delivery path.
    #[error("accessibility action failed: {0}")]
    Accessibility(String),

    #[error("event post failed: {0}")]
    Post(String),
}
