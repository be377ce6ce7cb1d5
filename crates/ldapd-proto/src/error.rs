//! Protocol error types.

/// Errors produced while framing, decoding, or encoding LDAP messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// Underlying transport error surfaced through the codec.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A framed message would exceed the configured size cap.
    #[error("message of {size} bytes exceeds limit of {max} bytes")]
    MessageTooLarge {
        /// Declared or actual message size.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// An element carried a tag the grammar does not allow at that position.
    #[error("unexpected tag 0x{0:02x}")]
    UnexpectedTag(u8),

    /// Indefinite or oversized BER length encoding.
    #[error("invalid length encoding")]
    BadLength,

    /// An element declared more content than the buffer holds.
    #[error("truncated element")]
    Truncated,

    /// An INTEGER or ENUMERATED value outside the representable range.
    #[error("integer out of range")]
    IntegerRange,

    /// Structurally invalid message body.
    #[error("malformed message: {0}")]
    Malformed(&'static str),
}
