use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Packet does not start with the frame marker: {0:02x?}")]
    BadStart([u8; 2]),
    #[error("Packet footer missing or corrupt")]
    BadStop,
    #[error("Unknown packet type {0:#04x}")]
    UnknownPacketType(u8),
    #[error("Stream sink error: {0}")]
    Sink(#[from] std::io::Error),
    #[error("Stream sink write blocked for more than {0:?}")]
    WriteTimeout(std::time::Duration),
}
