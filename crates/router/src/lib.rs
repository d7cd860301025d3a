//! Name table, rule table, session-cast table and the PushMessage dispatch
//! that ties them together. Transport-agnostic: endpoints are reached
//! through the `EndpointSink` trait, never through a concrete connection
//! type.

pub mod endpoint;
pub mod message;
pub mod name_table;
pub mod router;
pub mod rule;
pub mod rule_table;
pub mod session_cast;

#[derive(Debug)]
pub enum Error {
    PushFailed(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::PushFailed(reason) => write!(f, "failed to push message: {reason}"),
        }
    }
}

impl std::error::Error for Error {}
