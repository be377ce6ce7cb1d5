//! BER tag-length-value primitives.
//!
//! Only the subset of X.690 that the LDAP v3 PDU grammar uses: single-byte
//! tags and definite lengths (short form, or long form up to four length
//! octets). Indefinite lengths are rejected.

use bytes::{BufMut, BytesMut};

use crate::error::ProtoError;

/// UNIVERSAL 1, BOOLEAN.
pub const TAG_BOOLEAN: u8 = 0x01;
/// UNIVERSAL 2, INTEGER.
pub const TAG_INTEGER: u8 = 0x02;
/// UNIVERSAL 4, OCTET STRING.
pub const TAG_OCTET_STRING: u8 = 0x04;
/// UNIVERSAL 10, ENUMERATED.
pub const TAG_ENUMERATED: u8 = 0x0a;
/// UNIVERSAL 16, SEQUENCE (constructed).
pub const TAG_SEQUENCE: u8 = 0x30;
/// UNIVERSAL 17, SET (constructed).
pub const TAG_SET: u8 = 0x31;

/// Parses the tag and length octets at the start of `buf`.
///
/// Returns `Ok(None)` when `buf` is too short to hold the complete header,
/// and `Ok(Some((header_len, content_len)))` otherwise. The caller decides
/// whether `header_len + content_len` bytes are actually available; nothing
/// is consumed here.
///
/// # Errors
///
/// [`ProtoError::BadLength`] for indefinite lengths or long forms wider than
/// four octets.
pub fn peek_header(buf: &[u8]) -> Result<Option<(usize, usize)>, ProtoError> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let len_octet = buf[1];
    if len_octet & 0x80 == 0 {
        return Ok(Some((2, len_octet as usize)));
    }
    let width = (len_octet & 0x7f) as usize;
    // width == 0 is the indefinite form, which DER-restricted LDAP forbids.
    if width == 0 || width > 4 {
        return Err(ProtoError::BadLength);
    }
    if buf.len() < 2 + width {
        return Ok(None);
    }
    let mut len = 0usize;
    for &b in &buf[2..2 + width] {
        len = (len << 8) | b as usize;
    }
    Ok(Some((2 + width, len)))
}

/// Cursor over a byte slice yielding one TLV at a time.
///
/// The reader never looks past the element it is positioned on, so a
/// malformed inner element cannot consume bytes belonging to a sibling.
pub struct BerReader<'a> {
    buf: &'a [u8],
}

impl<'a> BerReader<'a> {
    /// Creates a reader over `buf`.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// True once every byte has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Tag of the next element, if any.
    #[must_use]
    pub fn peek_tag(&self) -> Option<u8> {
        self.buf.first().copied()
    }

    fn split_next(&mut self) -> Result<(u8, &'a [u8], &'a [u8]), ProtoError> {
        let (header_len, content_len) =
            peek_header(self.buf)?.ok_or(ProtoError::Truncated)?;
        let total = header_len
            .checked_add(content_len)
            .ok_or(ProtoError::BadLength)?;
        if self.buf.len() < total {
            return Err(ProtoError::Truncated);
        }
        let tag = self.buf[0];
        let whole = &self.buf[..total];
        let content = &self.buf[header_len..total];
        self.buf = &self.buf[total..];
        Ok((tag, content, whole))
    }

    /// Consumes the next element, returning its tag and content.
    ///
    /// # Errors
    ///
    /// [`ProtoError::Truncated`] or [`ProtoError::BadLength`] on malformed
    /// input.
    pub fn read_any(&mut self) -> Result<(u8, &'a [u8]), ProtoError> {
        let (tag, content, _) = self.split_next()?;
        Ok((tag, content))
    }

    /// Consumes the next element including its header, returning the raw TLV.
    ///
    /// # Errors
    ///
    /// Same as [`BerReader::read_any`].
    pub fn read_raw(&mut self) -> Result<&'a [u8], ProtoError> {
        let (_, _, whole) = self.split_next()?;
        Ok(whole)
    }

    /// Consumes the next element, which must carry `tag`.
    ///
    /// # Errors
    ///
    /// [`ProtoError::UnexpectedTag`] if the tag differs; otherwise as
    /// [`BerReader::read_any`].
    pub fn read_expect(&mut self, tag: u8) -> Result<&'a [u8], ProtoError> {
        let (got, content) = self.read_any()?;
        if got != tag {
            return Err(ProtoError::UnexpectedTag(got));
        }
        Ok(content)
    }

    /// Reads an INTEGER.
    ///
    /// # Errors
    ///
    /// Tag mismatch, truncation, or a value wider than 64 bits.
    pub fn read_integer(&mut self) -> Result<i64, ProtoError> {
        decode_integer(self.read_expect(TAG_INTEGER)?)
    }

    /// Reads an ENUMERATED value.
    ///
    /// # Errors
    ///
    /// Tag mismatch, truncation, or a value wider than 64 bits.
    pub fn read_enumerated(&mut self) -> Result<i64, ProtoError> {
        decode_integer(self.read_expect(TAG_ENUMERATED)?)
    }

    /// Reads a BOOLEAN. Any non-zero content octet is `true`.
    ///
    /// # Errors
    ///
    /// Tag mismatch or an empty content field.
    pub fn read_boolean(&mut self) -> Result<bool, ProtoError> {
        let content = self.read_expect(TAG_BOOLEAN)?;
        match content {
            [b] => Ok(*b != 0),
            _ => Err(ProtoError::Malformed("boolean must be one octet")),
        }
    }

    /// Reads an OCTET STRING, returning the raw bytes.
    ///
    /// # Errors
    ///
    /// Tag mismatch or truncation.
    pub fn read_octet_string(&mut self) -> Result<&'a [u8], ProtoError> {
        self.read_expect(TAG_OCTET_STRING)
    }

    /// Reads an OCTET STRING as lossless UTF-8.
    ///
    /// LDAP strings (DNs, attribute descriptions, diagnostic messages) are
    /// UTF-8 per RFC 4511; anything else is malformed.
    ///
    /// # Errors
    ///
    /// Tag mismatch, truncation, or invalid UTF-8.
    pub fn read_string(&mut self) -> Result<String, ProtoError> {
        let bytes = self.read_octet_string()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ProtoError::Malformed("string field is not utf-8"))
    }
}

/// Decodes a two's-complement big-endian integer of at most eight octets.
pub(crate) fn decode_integer(content: &[u8]) -> Result<i64, ProtoError> {
    if content.is_empty() || content.len() > 8 {
        return Err(ProtoError::IntegerRange);
    }
    let mut value: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    for &b in content {
        value = (value << 8) | i64::from(b);
    }
    Ok(value)
}

/// Appends the definite-length encoding of `len`.
pub fn write_length(out: &mut BytesMut, len: usize) {
    if len < 0x80 {
        #[allow(clippy::cast_possible_truncation)]
        out.put_u8(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    let content = &bytes[skip..];
    #[allow(clippy::cast_possible_truncation)]
    out.put_u8(0x80 | content.len() as u8);
    out.extend_from_slice(content);
}

/// Appends a TLV whose content is produced by `content`.
///
/// The content is built into a scratch buffer first so the length octets can
/// be emitted before it.
pub fn write_tlv(out: &mut BytesMut, tag: u8, content: impl FnOnce(&mut BytesMut)) {
    let mut inner = BytesMut::new();
    content(&mut inner);
    out.put_u8(tag);
    write_length(out, inner.len());
    out.extend_from_slice(&inner);
}

/// Appends a primitive TLV holding `bytes` verbatim.
pub fn write_bytes(out: &mut BytesMut, tag: u8, bytes: &[u8]) {
    out.put_u8(tag);
    write_length(out, bytes.len());
    out.extend_from_slice(bytes);
}

/// Appends an integer-valued TLV (`INTEGER` or `ENUMERATED`) with the
/// minimal two's-complement encoding.
pub fn write_integer(out: &mut BytesMut, tag: u8, value: i64) {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < 7 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    write_bytes(out, tag, &bytes[start..]);
}

/// Appends a BOOLEAN TLV.
pub fn write_boolean(out: &mut BytesMut, value: bool) {
    write_bytes(out, TAG_BOOLEAN, &[if value { 0xff } else { 0x00 }]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_int(value: i64) -> BytesMut {
        let mut out = BytesMut::new();
        write_integer(&mut out, TAG_INTEGER, value);
        out
    }

    #[test]
    fn integer_roundtrip() {
        for value in [0, 1, 127, 128, 255, 256, -1, -128, -129, 1 << 30, i64::MIN, i64::MAX] {
            let encoded = encode_int(value);
            let mut reader = BerReader::new(&encoded);
            assert_eq!(reader.read_integer().unwrap(), value, "value {value}");
            assert!(reader.is_empty());
        }
    }

    #[test]
    fn integer_minimal_width() {
        assert_eq!(encode_int(0).as_ref(), &[0x02, 0x01, 0x00]);
        assert_eq!(encode_int(127).as_ref(), &[0x02, 0x01, 0x7f]);
        // 128 needs a leading zero octet to stay positive.
        assert_eq!(encode_int(128).as_ref(), &[0x02, 0x02, 0x00, 0x80]);
        assert_eq!(encode_int(-1).as_ref(), &[0x02, 0x01, 0xff]);
    }

    #[test]
    fn long_form_length() {
        let mut out = BytesMut::new();
        write_bytes(&mut out, TAG_OCTET_STRING, &[0xab; 300]);
        // 0x82 announces two length octets.
        assert_eq!(&out[..4], &[0x04, 0x82, 0x01, 0x2c]);

        let (header_len, content_len) = peek_header(&out).unwrap().unwrap();
        assert_eq!((header_len, content_len), (4, 300));

        let mut reader = BerReader::new(&out);
        assert_eq!(reader.read_octet_string().unwrap().len(), 300);
    }

    #[test]
    fn peek_header_incomplete() {
        assert!(peek_header(&[0x30]).unwrap().is_none());
        // Long form announcing two octets, only one present.
        assert!(peek_header(&[0x30, 0x82, 0x01]).unwrap().is_none());
    }

    #[test]
    fn indefinite_length_rejected() {
        assert!(matches!(
            peek_header(&[0x30, 0x80, 0x00]),
            Err(ProtoError::BadLength)
        ));
    }

    #[test]
    fn truncated_content() {
        let buf = [0x04, 0x05, 0x01, 0x02];
        let mut reader = BerReader::new(&buf);
        assert!(matches!(
            reader.read_octet_string(),
            Err(ProtoError::Truncated)
        ));
    }

    #[test]
    fn sibling_isolation() {
        // Two elements back to back; reading the first must not touch the second.
        let mut out = BytesMut::new();
        write_bytes(&mut out, TAG_OCTET_STRING, b"one");
        write_integer(&mut out, TAG_INTEGER, 7);
        let mut reader = BerReader::new(&out);
        assert_eq!(reader.read_octet_string().unwrap(), b"one");
        assert_eq!(reader.read_integer().unwrap(), 7);
        assert!(reader.is_empty());
    }

    #[test]
    fn boolean_values() {
        let mut out = BytesMut::new();
        write_boolean(&mut out, true);
        write_boolean(&mut out, false);
        let mut reader = BerReader::new(&out);
        assert!(reader.read_boolean().unwrap());
        assert!(!reader.read_boolean().unwrap());
    }
}
