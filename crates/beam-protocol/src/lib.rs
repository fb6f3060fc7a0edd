pub mod control;
pub mod error;
pub mod input;
pub mod packet;
pub mod types;

pub use control::ControlMessage;
pub use error::ProtocolError;
pub use input::{InputEvent, Modifiers, MouseButton};
pub use packet::{AssembledNal, PacketHeader, Reassembler};
pub use types::{Peer, Rect, SessionRole, SessionState, WindowRef};

/// Protocol major version, advertised in the discovery TXT record.
pub const PROTOCOL_VERSION: u32 = 1;
