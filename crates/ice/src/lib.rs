//! ICE session and candidate selection, the ICE packet stream, the packet
//! engine collaborator interface, and the ICE transport accept/connect
//! loops.

pub mod candidate;
pub mod packet_engine;
pub mod packet_stream;
pub mod session;
pub mod transport;

#[derive(Debug)]
pub enum Error {
    Codec(String),
    Handshake(String),
    NotConnected,
    ChecksFailed,
    Io(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Codec(reason) => write!(f, "stun codec error: {reason}"),
            Error::Handshake(reason) => write!(f, "handshake error: {reason}"),
            Error::NotConnected => write!(f, "packet engine not connected"),
            Error::ChecksFailed => write!(f, "ICE connectivity checks failed"),
            Error::Io(reason) => write!(f, "io error: {reason}"),
        }
    }
}

impl std::error::Error for Error {}
