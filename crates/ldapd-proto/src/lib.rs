//! # ldapd-proto
//!
//! LDAP v3 message layer for the `ldapd` server framework (RFC 4511).
//!
//! This crate knows nothing about sockets or sessions. It provides:
//!
//! - [`ber`]: raw BER tag-length-value primitives (definite lengths only)
//! - [`message`]: typed protocol-op structs, [`LdapMessage`], result codes
//! - [`codec`]: [`BerCodec`], a [`tokio_util::codec`] codec that frames and
//!   decodes one LDAP message per BER `SEQUENCE` on the wire
//! - [`error`]: [`ProtoError`]
//!
//! # Wire Format
//!
//! Every LDAP PDU is a single BER `SEQUENCE`:
//!
//! ```text
//! LDAPMessage ::= SEQUENCE {
//!     messageID   INTEGER (0 .. maxInt),
//!     protocolOp  CHOICE { bindRequest, searchRequest, ... },
//!     controls    [0] Controls OPTIONAL }
//! ```
//!
//! Controls are carried opaquely; this crate never interprets them.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod ber;
pub mod codec;
pub mod error;
pub mod message;

pub use codec::BerCodec;
pub use error::ProtoError;
pub use message::{
    AbandonRequest, AddRequest, Ava, BindAuth, BindRequest, BindResponse, CompareRequest,
    DelRequest, ExtendedRequest, ExtendedResponse, Filter, LdapMessage, LdapResult, ModifyChange,
    ModifyDnRequest, ModifyOperation, ModifyRequest, PartialAttribute, ProtocolOp, SearchRequest,
    SearchResultEntry, SearchScope, SubstringFilter,
};
pub use message::{
    NOTICE_OF_DISCONNECTION_OID, RESULT_AUTH_METHOD_NOT_SUPPORTED, RESULT_COMPARE_FALSE,
    RESULT_COMPARE_TRUE, RESULT_INSUFFICIENT_ACCESS_RIGHTS, RESULT_INVALID_CREDENTIALS,
    RESULT_OPERATIONS_ERROR, RESULT_OTHER, RESULT_PROTOCOL_ERROR, RESULT_SUCCESS,
    RESULT_UNWILLING_TO_PERFORM, STARTTLS_OID,
};
