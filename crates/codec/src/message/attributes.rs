//! STUN/TURN/ICE attribute registry.
//!
//! [RFC8489 §14]: https://datatracker.ietf.org/doc/html/rfc8489#section-14
//! [RFC8656 §14]: https://datatracker.ietf.org/doc/html/rfc8656#section-14
//! [RFC8445 §7.1.1]: https://datatracker.ietf.org/doc/html/rfc8445#section-7.1.1
//!
//! Only the attributes this codebase actually produces or consumes are
//! modeled: long-term credential negotiation (USERNAME/REALM/NONCE/
//! MESSAGE-INTEGRITY/PASSWORD-ALGORITHM), TURN relaying of a Send/Data
//! indication (XOR-PEER-ADDRESS/XOR-RELAYED-ADDRESS/DATA/LIFETIME/
//! REQUESTED-TRANSPORT), reflexive address discovery (XOR-MAPPED-ADDRESS),
//! and ICE connectivity checks (PRIORITY/USE-CANDIDATE/ICE-CONTROLLING/
//! ICE-CONTROLLED).

pub mod error;

use crate::Error;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::{BufMut, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

pub use error::ErrorCode;

const MAGIC_NUMBER: [u8; 4] = 0x2112_A442u32.to_be_bytes();

#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum AttributeType {
    UserName = 0x0006,
    MessageIntegrity = 0x0008,
    ErrorCode = 0x0009,
    Realm = 0x0014,
    Nonce = 0x0015,
    XorPeerAddress = 0x0012,
    Data = 0x0013,
    XorRelayedAddress = 0x0016,
    RequestedTransport = 0x0019,
    Lifetime = 0x000d,
    MessageIntegritySha256 = 0x001c,
    PasswordAlgorithm = 0x001d,
    XorMappedAddress = 0x0020,
    Priority = 0x0024,
    UseCandidate = 0x0025,
    IceControlled = 0x8029,
    IceControlling = 0x802a,
    Software = 0x8022,
    Fingerprint = 0x8028,
}

/// A STUN/TURN message attribute: a typed view over its serialized form.
///
/// `Item` is the in-memory representation produced by `deserialize` and
/// consumed by `serialize`; `token` is the 12-byte STUN transaction id,
/// needed to XOR-obfuscate address attributes.
pub trait Attribute<'a> {
    const TYPE: AttributeType;

    type Item;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, token: &[u8]);
    fn deserialize(bytes: &'a [u8], token: &'a [u8]) -> Result<Self::Item, Error>;
}

fn xor_bytes(dst: &mut [u8], token: &[u8]) {
    for (i, byte) in dst.iter_mut().enumerate() {
        let pad = if i < 4 { MAGIC_NUMBER[i] } else { token[i - 4] };
        *byte ^= pad;
    }
}

fn encode_xor_address(addr: SocketAddr, bytes: &mut BytesMut, token: &[u8]) {
    bytes.put_u8(0);
    bytes.put_u8(if addr.is_ipv4() { 0x01 } else { 0x02 });
    bytes.put_u16(addr.port() ^ u16::from_be_bytes([MAGIC_NUMBER[0], MAGIC_NUMBER[1]]));

    match addr.ip() {
        IpAddr::V4(ip) => {
            let mut octets = ip.octets();
            xor_bytes(&mut octets, token);
            bytes.put_slice(&octets);
        }
        IpAddr::V6(ip) => {
            let mut octets = ip.octets();
            xor_bytes(&mut octets, token);
            bytes.put_slice(&octets);
        }
    }
}

fn decode_xor_address(bytes: &[u8], token: &[u8]) -> Result<SocketAddr, Error> {
    if bytes.len() < 8 {
        return Err(Error::InvalidInput);
    }

    let family = bytes[1];
    let port = u16::from_be_bytes([bytes[2], bytes[3]]) ^ u16::from_be_bytes([MAGIC_NUMBER[0], MAGIC_NUMBER[1]]);

    let ip = match family {
        0x01 => {
            let mut octets: [u8; 4] = bytes[4..8].try_into()?;
            xor_bytes(&mut octets, token);
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        0x02 => {
            if bytes.len() < 20 {
                return Err(Error::InvalidInput);
            }

            let mut octets: [u8; 16] = bytes[4..20].try_into()?;
            xor_bytes(&mut octets, token);
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return Err(Error::InvalidInput),
    };

    Ok(SocketAddr::new(ip, port))
}

/// `XOR-MAPPED-ADDRESS`: the reflexive transport address observed by the
/// STUN server, as seen in a Binding response.
///
/// # Test
///
/// ```
/// use bytes::BytesMut;
/// use meshbusd_codec::message::attributes::{Attribute, XorMappedAddress};
///
/// let token = [0u8; 12];
/// let mut bytes = BytesMut::new();
/// let addr = "127.0.0.1:51678".parse().unwrap();
/// XorMappedAddress::serialize(addr, &mut bytes, &token);
/// assert_eq!(XorMappedAddress::deserialize(&bytes, &token).unwrap(), addr);
/// ```
pub struct XorMappedAddress;

impl<'a> Attribute<'a> for XorMappedAddress {
    const TYPE: AttributeType = AttributeType::XorMappedAddress;
    type Item = SocketAddr;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, token: &[u8]) {
        encode_xor_address(value, bytes, token);
    }

    fn deserialize(bytes: &'a [u8], token: &'a [u8]) -> Result<Self::Item, Error> {
        decode_xor_address(bytes, token)
    }
}

/// `XOR-PEER-ADDRESS`: the address of the peer a Send/Data indication is
/// relayed to or from.
pub struct XorPeerAddress;

impl<'a> Attribute<'a> for XorPeerAddress {
    const TYPE: AttributeType = AttributeType::XorPeerAddress;
    type Item = SocketAddr;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, token: &[u8]) {
        encode_xor_address(value, bytes, token);
    }

    fn deserialize(bytes: &'a [u8], token: &'a [u8]) -> Result<Self::Item, Error> {
        decode_xor_address(bytes, token)
    }
}

/// `XOR-RELAYED-ADDRESS`: the relayed transport address returned by a TURN
/// Allocate response; this is the address gathered as a Relayed candidate.
pub struct XorRelayedAddress;

impl<'a> Attribute<'a> for XorRelayedAddress {
    const TYPE: AttributeType = AttributeType::XorRelayedAddress;
    type Item = SocketAddr;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, token: &[u8]) {
        encode_xor_address(value, bytes, token);
    }

    fn deserialize(bytes: &'a [u8], token: &'a [u8]) -> Result<Self::Item, Error> {
        decode_xor_address(bytes, token)
    }
}

/// `USERNAME`: long-term credential identity, UTF-8.
pub struct UserName;

impl<'a> Attribute<'a> for UserName {
    const TYPE: AttributeType = AttributeType::UserName;
    type Item = &'a str;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _token: &[u8]) {
        bytes.put_slice(value.as_bytes());
    }

    fn deserialize(bytes: &'a [u8], _token: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(std::str::from_utf8(bytes)?)
    }
}

/// `REALM`: the long-term credential realm, as offered by a 401/438 challenge.
pub struct Realm;

impl<'a> Attribute<'a> for Realm {
    const TYPE: AttributeType = AttributeType::Realm;
    type Item = &'a str;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _token: &[u8]) {
        bytes.put_slice(value.as_bytes());
    }

    fn deserialize(bytes: &'a [u8], _token: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(std::str::from_utf8(bytes)?)
    }
}

/// `NONCE`: anti-replay token issued alongside a REALM challenge.
pub struct Nonce;

impl<'a> Attribute<'a> for Nonce {
    const TYPE: AttributeType = AttributeType::Nonce;
    type Item = &'a str;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _token: &[u8]) {
        bytes.put_slice(value.as_bytes());
    }

    fn deserialize(bytes: &'a [u8], _token: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(std::str::from_utf8(bytes)?)
    }
}

/// `SOFTWARE`: informational agent string.
pub struct Software;

impl<'a> Attribute<'a> for Software {
    const TYPE: AttributeType = AttributeType::Software;
    type Item = &'a str;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _token: &[u8]) {
        bytes.put_slice(value.as_bytes());
    }

    fn deserialize(bytes: &'a [u8], _token: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(std::str::from_utf8(bytes)?)
    }
}

/// `DATA`: the application payload carried by a Send/Data indication.
pub struct Data;

impl<'a> Attribute<'a> for Data {
    const TYPE: AttributeType = AttributeType::Data;
    type Item = &'a [u8];

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _token: &[u8]) {
        bytes.put_slice(value);
    }

    fn deserialize(bytes: &'a [u8], _token: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(bytes)
    }
}

/// `LIFETIME`: seconds until a TURN allocation expires (requested or granted).
pub struct Lifetime;

impl<'a> Attribute<'a> for Lifetime {
    const TYPE: AttributeType = AttributeType::Lifetime;
    type Item = u32;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _token: &[u8]) {
        bytes.put_u32(value);
    }

    fn deserialize(bytes: &'a [u8], _token: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(u32::from_be_bytes(bytes.try_into()?))
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum RequestedTransportProtocol {
    Udp,
}

/// `REQUESTED-TRANSPORT`: always UDP (17) for this daemon's TURN usage.
pub struct RequestedTransport;

impl<'a> Attribute<'a> for RequestedTransport {
    const TYPE: AttributeType = AttributeType::RequestedTransport;
    type Item = RequestedTransportProtocol;

    fn serialize(_value: Self::Item, bytes: &mut BytesMut, _token: &[u8]) {
        bytes.put_u8(17);
        bytes.put_bytes(0, 3);
    }

    fn deserialize(bytes: &'a [u8], _token: &'a [u8]) -> Result<Self::Item, Error> {
        if bytes.first() == Some(&17) {
            Ok(RequestedTransportProtocol::Udp)
        } else {
            Err(Error::InvalidInput)
        }
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum PasswordAlgorithm {
    Md5,
    Sha256,
}

/// `PASSWORD-ALGORITHM`: which long-term credential digest to use.
pub struct PasswordAlgorithmAttr;

impl<'a> Attribute<'a> for PasswordAlgorithmAttr {
    const TYPE: AttributeType = AttributeType::PasswordAlgorithm;
    type Item = PasswordAlgorithm;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _token: &[u8]) {
        bytes.put_u16(match value {
            PasswordAlgorithm::Md5 => 0x0001,
            PasswordAlgorithm::Sha256 => 0x0002,
        });
        bytes.put_u16(0);
    }

    fn deserialize(bytes: &'a [u8], _token: &'a [u8]) -> Result<Self::Item, Error> {
        match bytes.first_chunk::<2>().map(|b| u16::from_be_bytes(*b)) {
            Some(0x0001) => Ok(PasswordAlgorithm::Md5),
            Some(0x0002) => Ok(PasswordAlgorithm::Sha256),
            _ => Err(Error::InvalidInput),
        }
    }
}

/// `MESSAGE-INTEGRITY`: 20-byte HMAC-SHA1 over everything preceding it.
pub struct MessageIntegrity;

impl<'a> Attribute<'a> for MessageIntegrity {
    const TYPE: AttributeType = AttributeType::MessageIntegrity;
    type Item = &'a [u8];

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _token: &[u8]) {
        bytes.put_slice(value);
    }

    fn deserialize(bytes: &'a [u8], _token: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(bytes)
    }
}

/// `MESSAGE-INTEGRITY-SHA256`: 32-byte HMAC-SHA256 variant (RFC8489).
pub struct MessageIntegritySha256;

impl<'a> Attribute<'a> for MessageIntegritySha256 {
    const TYPE: AttributeType = AttributeType::MessageIntegritySha256;
    type Item = &'a [u8];

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _token: &[u8]) {
        bytes.put_slice(value);
    }

    fn deserialize(bytes: &'a [u8], _token: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(bytes)
    }
}

/// `PRIORITY`: RFC 8445 candidate priority carried on a connectivity check.
///
/// # Test
///
/// ```
/// use bytes::BytesMut;
/// use meshbusd_codec::message::attributes::{Attribute, Priority};
///
/// let mut bytes = BytesMut::new();
/// Priority::serialize(2130706431, &mut bytes, &[0u8; 12]);
/// assert_eq!(Priority::deserialize(&bytes, &[0u8; 12]).unwrap(), 2130706431);
/// ```
pub struct Priority;

impl<'a> Attribute<'a> for Priority {
    const TYPE: AttributeType = AttributeType::Priority;
    type Item = u32;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _token: &[u8]) {
        bytes.put_u32(value);
    }

    fn deserialize(bytes: &'a [u8], _token: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(u32::from_be_bytes(bytes.try_into()?))
    }
}

/// `USE-CANDIDATE`: zero-length flag; the controlling agent nominates a pair.
pub struct UseCandidate;

impl<'a> Attribute<'a> for UseCandidate {
    const TYPE: AttributeType = AttributeType::UseCandidate;
    type Item = ();

    fn serialize(_value: Self::Item, _bytes: &mut BytesMut, _token: &[u8]) {}

    fn deserialize(_bytes: &'a [u8], _token: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(())
    }
}

/// `ICE-CONTROLLING`: 8-byte tie-breaker carried by the controlling agent.
pub struct IceControlling;

impl<'a> Attribute<'a> for IceControlling {
    const TYPE: AttributeType = AttributeType::IceControlling;
    type Item = u64;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _token: &[u8]) {
        bytes.put_u64(value);
    }

    fn deserialize(bytes: &'a [u8], _token: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(u64::from_be_bytes(bytes.try_into()?))
    }
}

/// `ICE-CONTROLLED`: 8-byte tie-breaker carried by the controlled agent.
pub struct IceControlled;

impl<'a> Attribute<'a> for IceControlled {
    const TYPE: AttributeType = AttributeType::IceControlled;
    type Item = u64;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _token: &[u8]) {
        bytes.put_u64(value);
    }

    fn deserialize(bytes: &'a [u8], _token: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(u64::from_be_bytes(bytes.try_into()?))
    }
}
