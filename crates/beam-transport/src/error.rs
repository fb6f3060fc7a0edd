use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("mDNS error: {0}")]
    Mdns(String),

    #[error("channel is not connected")]
    NotConnected,

    #[error("protocol error: {0}")]
    Protocol(#[from] beam_protocol::ProtocolError),
}

impl From<mdns_sd::Error> for TransportError {
    fn from(e: mdns_sd::Error) -> Self {
        TransportError::Mdns(e.to_string())
    }
}
