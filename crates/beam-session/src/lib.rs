pub mod config;
pub mod error;
pub mod identity;
pub mod session;

pub use config::BeamConfig;
pub use error::SessionError;
pub use identity::load_or_create_device_id;
pub use session::{
    BeamTarget, CursorApi, ReceiverPlatform, SenderPlatform, Session, SessionEvent, SessionStats,
};
