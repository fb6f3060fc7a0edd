pub mod error;
pub mod hider;

pub use error::WindowError;
pub use hider::{
    AxWindowHandle, DisplayHandle, HideHandle, VirtualDisplayApi, WindowControl, WindowHider,
};
