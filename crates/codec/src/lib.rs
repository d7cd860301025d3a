//! ## Session Traversal Utilities for NAT (STUN) and TURN, client side
//!
//! [RFC8489]: https://tools.ietf.org/html/rfc8489
//! [RFC8656]: https://tools.ietf.org/html/rfc8656
//! [RFC8445]: https://tools.ietf.org/html/rfc8445
//!
//! This codec speaks the subset of STUN/TURN/ICE needed to run as a client:
//! Binding (reflexive address discovery, NAT keepalives), Allocate/Refresh
//! (TURN relay lifecycle) and Send/Data indications (relayed application
//! data), plus the ICE connectivity-check attributes from [RFC8445].

pub mod crypto;
pub mod message;

use self::message::{Message, attributes::AttributeType};

use std::{array::TryFromSliceError, ops::Range, str::Utf8Error};

#[derive(Debug)]
pub enum Error {
    InvalidInput,
    NotFoundIntegrity,
    IntegrityFailed,
    NotFoundMagicNumber,
    UnknownMethod,
    Utf8Error(Utf8Error),
    TryFromSliceError(TryFromSliceError),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<Utf8Error> for Error {
    fn from(value: Utf8Error) -> Self {
        Self::Utf8Error(value)
    }
}

impl From<TryFromSliceError> for Error {
    fn from(value: TryFromSliceError) -> Self {
        Self::TryFromSliceError(value)
    }
}

/// Cache of `(attribute type, body range)` pairs produced while decoding a
/// single message. Internal use only; reset and reused across `decode` calls
/// so steady-state decoding does not allocate.
#[derive(Debug, Clone)]
pub struct Attributes(Vec<(AttributeType, Range<usize>)>);

impl Default for Attributes {
    fn default() -> Self {
        Self(Vec::with_capacity(20))
    }
}

impl Attributes {
    pub fn append(&mut self, kind: AttributeType, range: Range<usize>) {
        self.0.push((kind, range));
    }

    /// First matching attribute, if any.
    pub fn get(&self, kind: &AttributeType) -> Option<Range<usize>> {
        self.0
            .iter()
            .find(|(k, _)| k == kind)
            .map(|(_, v)| v.clone())
    }

    /// Every matching attribute, in wire order.
    pub fn get_all<'a>(&'a self, kind: &'a AttributeType) -> impl Iterator<Item = &'a Range<usize>> {
        self.0.iter().filter(move |(k, _)| k == kind).map(|(_, v)| v)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

/// Stateful STUN message decoder; holds the `Attributes` scratch buffer
/// across calls.
///
/// # Test
///
/// ```
/// use meshbusd_codec::message::attributes::UserName;
/// use meshbusd_codec::Decoder;
///
/// let buffer = [
///     0x00, 0x01, 0x00, 0x4c, 0x21, 0x12, 0xa4, 0x42, 0x71, 0x66, 0x46, 0x31,
///     0x2b, 0x59, 0x79, 0x65, 0x56, 0x69, 0x32, 0x72, 0x00, 0x06, 0x00, 0x09,
///     0x55, 0x43, 0x74, 0x39, 0x3a, 0x56, 0x2f, 0x2b, 0x2f, 0x00, 0x00, 0x00,
///     0xc0, 0x57, 0x00, 0x04, 0x00, 0x00, 0x03, 0xe7, 0x80, 0x29, 0x00, 0x08,
///     0x22, 0x49, 0xda, 0x28, 0x2c, 0x6f, 0x2e, 0xdb, 0x00, 0x24, 0x00, 0x04,
///     0x6e, 0x00, 0x28, 0xff, 0x00, 0x08, 0x00, 0x14, 0x19, 0x58, 0xda, 0x38,
///     0xed, 0x1e, 0xdd, 0xc8, 0x6b, 0x8e, 0x22, 0x63, 0x3a, 0x22, 0x63, 0x97,
///     0xcf, 0xf5, 0xde, 0x82, 0x80, 0x28, 0x00, 0x04, 0x56, 0xf7, 0xa3, 0xed,
/// ];
///
/// let mut decoder = Decoder::default();
/// let message = decoder.decode(&buffer).unwrap();
/// assert!(message.get::<UserName>().is_some());
/// ```
#[derive(Default)]
pub struct Decoder(Attributes);

impl Decoder {
    pub fn decode<'a>(&'a mut self, bytes: &'a [u8]) -> Result<Message<'a>, Error> {
        assert!(bytes.len() >= 4);

        if bytes[0] >> 6 != 0 {
            return Err(Error::InvalidInput);
        }

        self.0.clear();
        Message::decode(bytes, &mut self.0)
    }

    pub fn message_size(bytes: &[u8]) -> Result<usize, Error> {
        Message::message_size(bytes)
    }
}
