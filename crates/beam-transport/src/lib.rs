pub mod control;
pub mod discovery;
pub mod error;
pub mod udp;

pub use control::{ChannelEvent, ChannelState, ControlChannel, Heartbeat};
pub use discovery::{Discovery, DiscoveryConfig, DiscoveryEvent};
pub use error::TransportError;
pub use udp::{MediaReceiver, MediaSender, ReceiverStats, SenderStats};
