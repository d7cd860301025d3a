pub mod attributes;
pub mod methods;

use crate::{
    Attributes, Error,
    crypto::{Password, fingerprint, hmac_sha1},
    message::{
        attributes::{Attribute, AttributeType, MessageIntegrity, MessageIntegritySha256},
        methods::Method,
    },
};

use bytes::{BufMut, BytesMut};

pub(crate) static MAGIC_NUMBER: u32 = 0x2112A442;

pub struct MessageEncoder<'a> {
    token: &'a [u8],
    bytes: &'a mut BytesMut,
}

impl<'a> MessageEncoder<'a> {
    pub fn new(method: Method, token: &'a [u8; 12], bytes: &'a mut BytesMut) -> Self {
        bytes.clear();
        bytes.put_u16(method.into());
        bytes.put_u16(0);
        bytes.put_u32(MAGIC_NUMBER);
        bytes.put(token.as_slice());

        Self { bytes, token }
    }

    /// Build a new message that echoes the transaction id of `reader` (used
    /// for responses/errors, which MUST carry the request's transaction id).
    ///
    /// # Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use meshbusd_codec::message::methods::*;
    /// use meshbusd_codec::message::*;
    /// use meshbusd_codec::*;
    ///
    /// let buffer = [
    ///     0x00u8, 0x01, 0x00, 0x00, 0x21, 0x12, 0xa4, 0x42, 0x72, 0x6d, 0x49,
    ///     0x42, 0x72, 0x52, 0x64, 0x48, 0x57, 0x62, 0x4b, 0x2b,
    /// ];
    ///
    /// let mut attributes = Attributes::default();
    /// let mut buf = BytesMut::new();
    /// let old = Message::decode(&buffer[..], &mut attributes).unwrap();
    /// MessageEncoder::extend(Method::Binding(MethodType::Request), &old, &mut buf);
    ///
    /// assert_eq!(&buf[..], &buffer[..]);
    /// ```
    pub fn extend(method: Method, reader: &Message<'a>, bytes: &'a mut BytesMut) -> Self {
        let token = reader.transaction_id();

        bytes.clear();
        bytes.put_u16(method.into());
        bytes.put_u16(0);
        bytes.put_u32(MAGIC_NUMBER);
        bytes.put(token);
        Self { bytes, token }
    }

    /// Append an attribute, writing its type/length header and padding the
    /// body to a 32-bit boundary.
    ///
    /// # Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use meshbusd_codec::message::attributes::*;
    /// use meshbusd_codec::message::methods::*;
    /// use meshbusd_codec::message::*;
    /// use meshbusd_codec::*;
    ///
    /// let buffer = [
    ///     0x00u8, 0x01, 0x00, 0x00, 0x21, 0x12, 0xa4, 0x42, 0x72, 0x6d, 0x49,
    ///     0x42, 0x72, 0x52, 0x64, 0x48, 0x57, 0x62, 0x4b, 0x2b,
    /// ];
    ///
    /// let new_buf = [
    ///     0x00u8, 0x01, 0x00, 0x00, 0x21, 0x12, 0xa4, 0x42, 0x72, 0x6d, 0x49,
    ///     0x42, 0x72, 0x52, 0x64, 0x48, 0x57, 0x62, 0x4b, 0x2b, 0x00, 0x06, 0x00,
    ///     0x05, 0x70, 0x61, 0x6e, 0x64, 0x61, 0x00, 0x00, 0x00,
    /// ];
    ///
    /// let mut buf = BytesMut::new();
    /// let mut attributes = Attributes::default();
    /// let old = Message::decode(&buffer[..], &mut attributes).unwrap();
    /// let mut message =
    ///     MessageEncoder::extend(Method::Binding(MethodType::Request), &old, &mut buf);
    ///
    /// message.append::<UserName>("panda");
    ///
    /// assert_eq!(&new_buf[..], &buf[..]);
    /// ```
    pub fn append<'c, T: Attribute<'c>>(&'c mut self, value: T::Item) {
        self.bytes.put_u16(T::TYPE as u16);

        // reserve the length field, backfilled once the body is written.
        let os = self.bytes.len();
        unsafe { self.bytes.advance_mut(2) }
        T::serialize(value, self.bytes, self.token);

        let size = self.bytes.len() - os - 2;
        let size_buf = (size as u16).to_be_bytes();
        self.bytes[os] = size_buf[0];
        self.bytes[os + 1] = size_buf[1];

        let psize = alignment_32(size);
        if psize > 0 {
            self.bytes.put(&[0u8; 3][0..psize]);
        }
    }

    /// Finalize the message: write the header length, then optionally append
    /// MESSAGE-INTEGRITY and FINGERPRINT.
    pub fn flush(&mut self, password: Option<&Password>) -> Result<(), Error> {
        self.set_len(self.bytes.len() - 20);

        if let Some(it) = password {
            self.checksum(it)?;
        }

        Ok(())
    }

    /// Append MESSAGE-INTEGRITY (HMAC-SHA1 or SHA256 depending on the
    /// credential's algorithm) followed by FINGERPRINT, each computed over
    /// everything written so far.
    fn checksum(&mut self, password: &Password) -> Result<(), Error> {
        assert!(self.bytes.len() >= 20);
        let len = self.bytes.len();

        // account for the MessageIntegrity attribute before computing its HMAC.
        self.set_len(len + 4);

        {
            let hmac = hmac_sha1(password.as_ref(), &[self.bytes]);
            self.bytes.put_u16(match password {
                Password::Md5(_) => AttributeType::MessageIntegrity as u16,
                Password::Sha256(_) => AttributeType::MessageIntegritySha256 as u16,
            });

            self.bytes.put_u16(20);
            self.bytes.put_slice(&hmac);
        }

        // account for Fingerprint before computing the CRC over the prefix.
        self.set_len(len + 4 + 8);

        let fingerprint = fingerprint(self.bytes);
        self.bytes.put_u16(AttributeType::Fingerprint as u16);
        self.bytes.put_u16(4);
        self.bytes.put_u32(fingerprint);

        Ok(())
    }

    fn set_len(&mut self, len: usize) {
        self.bytes[2..4].copy_from_slice((len as u16).to_be_bytes().as_slice());
    }
}

pub struct Message<'a> {
    method: Method,
    bytes: &'a [u8],
    size: u16,
    attributes: &'a Attributes,
}

impl<'a> Message<'a> {
    #[inline]
    pub fn method(&self) -> Method {
        self.method
    }

    /// The 12-byte STUN transaction id (the header minus method, length, and
    /// magic cookie).
    #[inline]
    pub fn transaction_id(&self) -> &'a [u8] {
        &self.bytes[8..20]
    }

    /// Look up the first instance of an attribute and decode it.
    ///
    /// # Test
    ///
    /// ```
    /// use meshbusd_codec::message::attributes::*;
    /// use meshbusd_codec::message::methods::*;
    /// use meshbusd_codec::message::*;
    /// use meshbusd_codec::*;
    ///
    /// let buffer = [
    ///     0x00u8, 0x01, 0x00, 0x00, 0x21, 0x12, 0xa4, 0x42, 0x72, 0x6d, 0x49,
    ///     0x42, 0x72, 0x52, 0x64, 0x48, 0x57, 0x62, 0x4b, 0x2b,
    /// ];
    ///
    /// let mut attributes = Attributes::default();
    /// let message = Message::decode(&buffer[..], &mut attributes).unwrap();
    ///
    /// assert!(message.get::<UserName>().is_none());
    /// ```
    pub fn get<T: Attribute<'a>>(&self) -> Option<T::Item> {
        let range = self.attributes.get(&T::TYPE)?;
        T::deserialize(&self.bytes[range], self.transaction_id()).ok()
    }

    /// Iterate every instance of a repeatable attribute.
    pub fn get_all<T: Attribute<'a>>(&self) -> impl Iterator<Item = T::Item> + 'a {
        let bytes = self.bytes;
        let token = self.transaction_id();
        self.attributes
            .get_all(&T::TYPE)
            .map(move |it| T::deserialize(&bytes[it.clone()], token))
            .filter_map(Result::ok)
    }

    /// Verify MESSAGE-INTEGRITY (or MESSAGE-INTEGRITY-SHA256, matching the
    /// variant of `password`) against the serialized prefix of the message.
    pub fn checksum(&self, password: &Password) -> Result<(), Error> {
        if self.bytes.is_empty() || self.size < 20 {
            return Err(Error::InvalidInput);
        }

        let integrity = match password {
            Password::Md5(_) => self.get::<MessageIntegrity>(),
            Password::Sha256(_) => self.get::<MessageIntegritySha256>(),
        }
        .ok_or(Error::NotFoundIntegrity)?;

        let size_buf = (self.size + 4).to_be_bytes();
        let body = [
            &self.bytes[0..2],
            &size_buf[..],
            &self.bytes[4..self.size as usize],
        ];

        if integrity != hmac_sha1(password.as_ref(), &body).as_slice() {
            return Err(Error::IntegrityFailed);
        }

        Ok(())
    }

    /// Parse a STUN message, populating `attributes` with the `(type, range)`
    /// of every attribute encountered (attributes with an unknown type are
    /// silently skipped, per RFC8489 §5).
    ///
    /// # Test
    ///
    /// ```
    /// use meshbusd_codec::message::attributes::*;
    /// use meshbusd_codec::message::methods::*;
    /// use meshbusd_codec::message::*;
    /// use meshbusd_codec::*;
    ///
    /// let buffer: [u8; 20] = [
    ///     0x00, 0x01, 0x00, 0x00, 0x21, 0x12, 0xa4, 0x42, 0x72, 0x6d, 0x49, 0x42,
    ///     0x72, 0x52, 0x64, 0x48, 0x57, 0x62, 0x4b, 0x2b,
    /// ];
    ///
    /// let mut attributes = Attributes::default();
    /// let message = Message::decode(&buffer[..], &mut attributes).unwrap();
    ///
    /// assert_eq!(message.method(), Method::Binding(MethodType::Request));
    /// assert!(message.get::<UserName>().is_none());
    /// ```
    pub fn decode(bytes: &'a [u8], attributes: &'a mut Attributes) -> Result<Self, Error> {
        let len = bytes.len();

        if len < 20 {
            return Err(Error::InvalidInput);
        }

        let method = Method::try_from(u16::from_be_bytes(bytes[..2].try_into()?))?;

        // The length field excludes the 20-byte header.
        {
            let size = u16::from_be_bytes(bytes[2..4].try_into()?) as usize + 20;
            if len < size {
                return Err(Error::InvalidInput);
            }
        }

        if bytes[4..8] != MAGIC_NUMBER.to_be_bytes() {
            return Err(Error::NotFoundMagicNumber);
        }

        let mut find_integrity = false;
        let mut content_len = 0;
        let mut offset = 20;

        loop {
            if len - offset < 4 {
                break;
            }

            let key = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);

            if !find_integrity {
                content_len = offset as u16;
            }

            let size = u16::from_be_bytes([bytes[offset + 2], bytes[offset + 3]]) as usize;

            offset += 4;
            if len - offset < size {
                break;
            }

            let range = offset..(offset + size);

            if size > 0 {
                offset += size + alignment_32(size);
            }

            let attrkind = if let Ok(kind) = AttributeType::try_from(key) {
                if kind == AttributeType::MessageIntegrity {
                    find_integrity = true;
                }

                kind
            } else {
                continue;
            };

            attributes.append(attrkind, range);
        }

        Ok(Self {
            size: content_len,
            attributes,
            method,
            bytes,
        })
    }

    /// # Test
    ///
    /// ```
    /// use meshbusd_codec::message::*;
    ///
    /// let buffer: [u8; 20] = [
    ///     0x00, 0x01, 0x00, 0x00, 0x21, 0x12, 0xa4, 0x42, 0x72, 0x6d, 0x49, 0x42,
    ///     0x72, 0x52, 0x64, 0x48, 0x57, 0x62, 0x4b, 0x2b,
    /// ];
    ///
    /// assert_eq!(Message::message_size(&buffer[..]).unwrap(), 20);
    /// ```
    pub fn message_size(buffer: &[u8]) -> Result<usize, Error> {
        if buffer[0] >> 6 != 0 || buffer.len() < 20 {
            return Err(Error::InvalidInput);
        }

        Ok((u16::from_be_bytes(buffer[2..4].try_into()?) + 20) as usize)
    }
}

/// Pad an attribute body length up to the next multiple of 4 (RFC8489 §14).
///
/// # Test
///
/// ```
/// use meshbusd_codec::message::alignment_32;
///
/// assert_eq!(alignment_32(4), 0);
/// assert_eq!(alignment_32(0), 0);
/// assert_eq!(alignment_32(5), 3);
/// ```
#[inline(always)]
pub fn alignment_32(size: usize) -> usize {
    let range = size % 4;
    if size == 0 || range == 0 {
        return 0;
    }

    4 - range
}
