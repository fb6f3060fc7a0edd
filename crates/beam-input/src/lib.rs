pub mod capture;
pub mod error;
pub mod inject;

pub use capture::{InputCapture, PointerKind};
pub use error::InputError;
pub use inject::{AccessibilityApi, EventPoster, InputInjector, MouseEventKind};
