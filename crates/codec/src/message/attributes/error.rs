//! `ERROR-CODE` attribute (RFC8489 §14.8).

use super::{Attribute, AttributeType};
use crate::Error;

use bytes::{BufMut, BytesMut};

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum ErrorType {
    BadRequest,
    Unauthorized,
    AllocationMismatch,
    WrongCredentials,
    UnsupportedTransportProtocol,
    AllocationQuotaReached,
    StaleNonce,
    InsufficientCapacity,
    ServerError,
    Unknown(u16),
}

impl From<ErrorType> for u16 {
    fn from(value: ErrorType) -> Self {
        match value {
            ErrorType::BadRequest => 400,
            ErrorType::Unauthorized => 401,
            ErrorType::AllocationMismatch => 437,
            ErrorType::WrongCredentials => 441,
            ErrorType::UnsupportedTransportProtocol => 442,
            ErrorType::AllocationQuotaReached => 486,
            ErrorType::StaleNonce => 438,
            ErrorType::InsufficientCapacity => 508,
            ErrorType::ServerError => 500,
            ErrorType::Unknown(code) => code,
        }
    }
}

impl From<u16> for ErrorType {
    fn from(value: u16) -> Self {
        match value {
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            437 => Self::AllocationMismatch,
            441 => Self::WrongCredentials,
            442 => Self::UnsupportedTransportProtocol,
            486 => Self::AllocationQuotaReached,
            438 => Self::StaleNonce,
            508 => Self::InsufficientCapacity,
            500 => Self::ServerError,
            code => Self::Unknown(code),
        }
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct ErrorCode {
    pub code: u16,
}

impl From<ErrorType> for ErrorCode {
    fn from(value: ErrorType) -> Self {
        Self { code: value.into() }
    }
}

impl ErrorCode {
    pub fn kind(&self) -> ErrorType {
        ErrorType::from(self.code)
    }
}

/// # Test
///
/// ```
/// use bytes::BytesMut;
/// use meshbusd_codec::message::attributes::{Attribute, ErrorCode, error::ErrorType};
///
/// let mut bytes = BytesMut::new();
/// ErrorCode::serialize(ErrorType::Unauthorized.into(), &mut bytes, &[0u8; 12]);
/// let decoded = ErrorCode::deserialize(&bytes, &[0u8; 12]).unwrap();
/// assert_eq!(decoded.kind(), ErrorType::Unauthorized);
/// ```
impl<'a> Attribute<'a> for ErrorCode {
    const TYPE: AttributeType = AttributeType::ErrorCode;
    type Item = ErrorCode;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _token: &[u8]) {
        bytes.put_u16(0);
        bytes.put_u8((value.code / 100) as u8);
        bytes.put_u8((value.code % 100) as u8);
    }

    fn deserialize(bytes: &'a [u8], _token: &'a [u8]) -> Result<Self::Item, Error> {
        if bytes.len() < 4 {
            return Err(Error::InvalidInput);
        }

        let code = bytes[2] as u16 * 100 + bytes[3] as u16;
        Ok(ErrorCode { code })
    }
}
