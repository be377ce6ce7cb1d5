//! BER message framing for async streams.
//!
//! [`BerCodec`] is a [`tokio_util::codec`] codec that delimits the byte
//! stream into whole `LDAPMessage` TLVs and decodes them. Unlike a plain
//! length-prefixed protocol the frame boundary comes from the BER header
//! itself: outer tag, definite length, then exactly that many content bytes.
//!
//! # Security Considerations
//!
//! The declared frame length is validated against the configured cap BEFORE
//! any buffer space is reserved, so a hostile length prefix cannot drive
//! allocation. Decoding never consumes into the following message: short
//! buffers leave the input untouched and return `Ok(None)`.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::ber::{self, TAG_SEQUENCE};
use crate::error::ProtoError;
use crate::message::LdapMessage;

/// Default cap on one message, 8 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// Codec turning a byte stream into [`LdapMessage`] values and back.
#[derive(Debug, Clone)]
pub struct BerCodec {
    max_message_size: usize,
}

impl Default for BerCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl BerCodec {
    /// Codec with the default message size cap.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Codec with a custom message size cap.
    #[must_use]
    pub const fn with_max_size(max_message_size: usize) -> Self {
        Self { max_message_size }
    }
}

impl Decoder for BerCodec {
    type Item = LdapMessage;
    type Error = ProtoError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<LdapMessage>, ProtoError> {
        if src.is_empty() {
            return Ok(None);
        }
        // Every LDAPMessage is a universal SEQUENCE; anything else is not
        // LDAP and there is no way to resynchronize.
        if src[0] != TAG_SEQUENCE {
            return Err(ProtoError::UnexpectedTag(src[0]));
        }
        let Some((header_len, content_len)) = ber::peek_header(src)? else {
            return Ok(None);
        };
        let total = header_len + content_len;
        if total > self.max_message_size {
            return Err(ProtoError::MessageTooLarge {
                size: total,
                max: self.max_message_size,
            });
        }
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        let frame = src.split_to(total);
        LdapMessage::parse(&frame).map(Some)
    }
}

impl Encoder<LdapMessage> for BerCodec {
    type Error = ProtoError;

    fn encode(&mut self, item: LdapMessage, dst: &mut BytesMut) -> Result<(), ProtoError> {
        let bytes = item.to_bytes();
        if bytes.len() > self.max_message_size {
            return Err(ProtoError::MessageTooLarge {
                size: bytes.len(),
                max: self.max_message_size,
            });
        }
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{BindRequest, ProtocolOp};

    fn bind(id: i32) -> LdapMessage {
        LdapMessage::new(id, ProtocolOp::BindRequest(BindRequest::simple("u", &b"p"[..])))
    }

    #[test]
    fn decode_roundtrip() {
        let mut codec = BerCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(bind(1), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, bind(1));
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_partial_header() {
        let mut codec = BerCodec::new();
        let mut buf = BytesMut::from(&[0x30][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn decode_partial_body_leaves_input() {
        let mut codec = BerCodec::new();
        let mut full = BytesMut::new();
        codec.encode(bind(1), &mut full).unwrap();

        let cut = full.len() - 3;
        let mut buf = BytesMut::from(&full[..cut]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), cut);

        buf.extend_from_slice(&full[cut..]);
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn decode_two_pipelined_messages() {
        let mut codec = BerCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(bind(1), &mut buf).unwrap();
        codec.encode(bind(2), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().message_id, 1);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().message_id, 2);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_rejects_non_sequence() {
        let mut codec = BerCodec::new();
        let mut buf = BytesMut::from(&[0x04, 0x01, 0x00][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtoError::UnexpectedTag(0x04))
        ));
    }

    #[test]
    fn decode_rejects_oversize_before_buffering() {
        let mut codec = BerCodec::with_max_size(64);
        // Declares 1 MiB of content; only the header is present.
        let mut buf = BytesMut::from(&[0x30, 0x83, 0x10, 0x00, 0x00][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtoError::MessageTooLarge { size: _, max: 64 })
        ));
    }

    #[test]
    fn encode_rejects_oversize() {
        let mut codec = BerCodec::with_max_size(8);
        let mut buf = BytesMut::new();
        assert!(matches!(
            codec.encode(bind(1), &mut buf),
            Err(ProtoError::MessageTooLarge { .. })
        ));
        assert!(buf.is_empty());
    }
}
