//! Discovery manager, rendezvous server connection, SCRAM-SHA-1 client
//! login and the rendezvous wire schemas.

pub mod connection;
pub mod discovery_manager;
pub mod messages;
pub mod scram;

#[derive(Debug)]
pub enum Error {
    Transient(String),
    Protocol(String),
    AuthFailed(String),
    NotAuthenticated,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Transient(reason) => write!(f, "rendezvous transport error: {reason}"),
            Error::Protocol(reason) => write!(f, "rendezvous protocol error: {reason}"),
            Error::AuthFailed(reason) => write!(f, "rendezvous authentication failed: {reason}"),
            Error::NotAuthenticated => write!(f, "rendezvous connection not authenticated"),
        }
    }
}

impl std::error::Error for Error {}
