//! Typed LDAP v3 messages and protocol operations.
//!
//! [`LdapMessage`] is the unit the server dispatches on: a message id, one
//! [`ProtocolOp`], and optional controls carried as raw bytes. Each
//! operation struct mirrors its RFC 4511 ASN.1 production.

use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::ber::{
    self, BerReader, TAG_ENUMERATED, TAG_INTEGER, TAG_OCTET_STRING, TAG_SEQUENCE, TAG_SET,
};
use crate::error::ProtoError;

/// resultCode success (0).
pub const RESULT_SUCCESS: i32 = 0;
/// resultCode operationsError (1).
pub const RESULT_OPERATIONS_ERROR: i32 = 1;
/// resultCode protocolError (2).
pub const RESULT_PROTOCOL_ERROR: i32 = 2;
/// resultCode compareFalse (5).
pub const RESULT_COMPARE_FALSE: i32 = 5;
/// resultCode compareTrue (6).
pub const RESULT_COMPARE_TRUE: i32 = 6;
/// resultCode authMethodNotSupported (7).
pub const RESULT_AUTH_METHOD_NOT_SUPPORTED: i32 = 7;
/// resultCode invalidCredentials (49).
pub const RESULT_INVALID_CREDENTIALS: i32 = 49;
/// resultCode insufficientAccessRights (50).
pub const RESULT_INSUFFICIENT_ACCESS_RIGHTS: i32 = 50;
/// resultCode unwillingToPerform (53).
pub const RESULT_UNWILLING_TO_PERFORM: i32 = 53;
/// resultCode other (80).
pub const RESULT_OTHER: i32 = 80;

/// Response name of the unsolicited Notice of Disconnection (RFC 4511 §4.4.1).
pub const NOTICE_OF_DISCONNECTION_OID: &str = "1.3.6.1.4.1.1466.20036";
/// Request name of the StartTLS extended operation (RFC 4511 §4.14).
pub const STARTTLS_OID: &str = "1.3.6.1.4.1.1466.20037";

// Application-class tags of the protocolOp CHOICE.
const APP_BIND_REQUEST: u8 = 0x60;
const APP_BIND_RESPONSE: u8 = 0x61;
const APP_UNBIND_REQUEST: u8 = 0x42;
const APP_SEARCH_REQUEST: u8 = 0x63;
const APP_SEARCH_RESULT_ENTRY: u8 = 0x64;
const APP_SEARCH_RESULT_DONE: u8 = 0x65;
const APP_MODIFY_REQUEST: u8 = 0x66;
const APP_MODIFY_RESPONSE: u8 = 0x67;
const APP_ADD_REQUEST: u8 = 0x68;
const APP_ADD_RESPONSE: u8 = 0x69;
const APP_DEL_REQUEST: u8 = 0x4a;
const APP_DEL_RESPONSE: u8 = 0x6b;
const APP_MODIFY_DN_REQUEST: u8 = 0x6c;
const APP_MODIFY_DN_RESPONSE: u8 = 0x6d;
const APP_COMPARE_REQUEST: u8 = 0x6e;
const APP_COMPARE_RESPONSE: u8 = 0x6f;
const APP_ABANDON_REQUEST: u8 = 0x50;
const APP_EXTENDED_REQUEST: u8 = 0x77;
const APP_EXTENDED_RESPONSE: u8 = 0x78;

const CTX_CONTROLS: u8 = 0xa0;

/// One LDAP PDU: message id, protocol op, and raw optional controls.
#[derive(Debug, Clone, PartialEq)]
pub struct LdapMessage {
    /// Message id; positive for client requests, 0 for unsolicited
    /// server notifications.
    pub message_id: i32,
    /// The operation this message carries.
    pub op: ProtocolOp,
    /// Raw `controls [0]` TLV, if the peer sent one. Never interpreted.
    pub controls: Option<Bytes>,
}

impl LdapMessage {
    /// Wraps `op` with the given message id.
    #[must_use]
    pub fn new(message_id: i32, op: ProtocolOp) -> Self {
        Self {
            message_id,
            op,
            controls: None,
        }
    }

    /// Wraps `op` as an unsolicited notification (message id 0).
    #[must_use]
    pub fn unsolicited(op: ProtocolOp) -> Self {
        Self::new(0, op)
    }

    /// Parses exactly one complete `LDAPMessage` TLV.
    ///
    /// # Errors
    ///
    /// Any structural defect: wrong outer tag, truncation, a negative or
    /// out-of-range message id, or an op body that does not match its
    /// grammar.
    pub fn parse(buf: &[u8]) -> Result<Self, ProtoError> {
        let mut outer = BerReader::new(buf);
        let body = outer.read_expect(TAG_SEQUENCE)?;
        if !outer.is_empty() {
            return Err(ProtoError::Malformed("trailing bytes after message"));
        }

        let mut r = BerReader::new(body);
        let id = r.read_integer()?;
        let message_id =
            i32::try_from(id).map_err(|_| ProtoError::IntegerRange)?;
        if message_id < 0 {
            return Err(ProtoError::Malformed("negative message id"));
        }

        let (tag, content) = r.read_any()?;
        let op = ProtocolOp::parse(tag, content)?;

        let controls = if r.peek_tag() == Some(CTX_CONTROLS) {
            Some(Bytes::copy_from_slice(r.read_raw()?))
        } else {
            None
        };

        Ok(Self {
            message_id,
            op,
            controls,
        })
    }

    /// Encodes the message as a single BER TLV.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::new();
        ber::write_tlv(&mut out, TAG_SEQUENCE, |body| {
            ber::write_integer(body, TAG_INTEGER, i64::from(self.message_id));
            self.op.encode(body);
            if let Some(controls) = &self.controls {
                body.extend_from_slice(controls);
            }
        });
        out.freeze()
    }

    /// Typed view of a bind request.
    #[must_use]
    pub fn bind_request(&self) -> Option<&BindRequest> {
        match &self.op {
            ProtocolOp::BindRequest(r) => Some(r),
            _ => None,
        }
    }

    /// Typed view of a search request.
    #[must_use]
    pub fn search_request(&self) -> Option<&SearchRequest> {
        match &self.op {
            ProtocolOp::SearchRequest(r) => Some(r),
            _ => None,
        }
    }

    /// Typed view of an add request.
    #[must_use]
    pub fn add_request(&self) -> Option<&AddRequest> {
        match &self.op {
            ProtocolOp::AddRequest(r) => Some(r),
            _ => None,
        }
    }

    /// Typed view of a modify request.
    #[must_use]
    pub fn modify_request(&self) -> Option<&ModifyRequest> {
        match &self.op {
            ProtocolOp::ModifyRequest(r) => Some(r),
            _ => None,
        }
    }

    /// Typed view of a delete request.
    #[must_use]
    pub fn delete_request(&self) -> Option<&DelRequest> {
        match &self.op {
            ProtocolOp::DelRequest(r) => Some(r),
            _ => None,
        }
    }

    /// Typed view of a modify DN request.
    #[must_use]
    pub fn modify_dn_request(&self) -> Option<&ModifyDnRequest> {
        match &self.op {
            ProtocolOp::ModifyDnRequest(r) => Some(r),
            _ => None,
        }
    }

    /// Typed view of a compare request.
    #[must_use]
    pub fn compare_request(&self) -> Option<&CompareRequest> {
        match &self.op {
            ProtocolOp::CompareRequest(r) => Some(r),
            _ => None,
        }
    }

    /// Typed view of an extended request.
    #[must_use]
    pub fn extended_request(&self) -> Option<&ExtendedRequest> {
        match &self.op {
            ProtocolOp::ExtendedRequest(r) => Some(r),
            _ => None,
        }
    }

    /// Typed view of an abandon request.
    #[must_use]
    pub fn abandon_request(&self) -> Option<&AbandonRequest> {
        match &self.op {
            ProtocolOp::AbandonRequest(r) => Some(r),
            _ => None,
        }
    }

    /// True if this message is an unbind request.
    #[must_use]
    pub fn is_unbind_request(&self) -> bool {
        matches!(self.op, ProtocolOp::UnbindRequest)
    }
}

impl fmt::Display for LdapMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "messageId={}, {}", self.message_id, self.op.name())
    }
}

/// The protocolOp CHOICE of RFC 4511.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolOp {
    /// Bind request (application 0).
    BindRequest(BindRequest),
    /// Bind response (application 1).
    BindResponse(BindResponse),
    /// Unbind request (application 2); the session ends, no response.
    UnbindRequest,
    /// Search request (application 3).
    SearchRequest(SearchRequest),
    /// One search result entry (application 4).
    SearchResultEntry(SearchResultEntry),
    /// Final search response (application 5).
    SearchResultDone(LdapResult),
    /// Modify request (application 6).
    ModifyRequest(ModifyRequest),
    /// Modify response (application 7).
    ModifyResponse(LdapResult),
    /// Add request (application 8).
    AddRequest(AddRequest),
    /// Add response (application 9).
    AddResponse(LdapResult),
    /// Delete request (application 10).
    DelRequest(DelRequest),
    /// Delete response (application 11).
    DelResponse(LdapResult),
    /// Modify DN request (application 12).
    ModifyDnRequest(ModifyDnRequest),
    /// Modify DN response (application 13).
    ModifyDnResponse(LdapResult),
    /// Compare request (application 14).
    CompareRequest(CompareRequest),
    /// Compare response (application 15).
    CompareResponse(LdapResult),
    /// Abandon request (application 16); cancels an in-flight request,
    /// no response.
    AbandonRequest(AbandonRequest),
    /// Extended request (application 23).
    ExtendedRequest(ExtendedRequest),
    /// Extended response (application 24); also used for unsolicited
    /// notifications.
    ExtendedResponse(ExtendedResponse),
}

impl ProtocolOp {
    /// Wire-op name, for diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::BindRequest(_) => "BindRequest",
            Self::BindResponse(_) => "BindResponse",
            Self::UnbindRequest => "UnbindRequest",
            Self::SearchRequest(_) => "SearchRequest",
            Self::SearchResultEntry(_) => "SearchResultEntry",
            Self::SearchResultDone(_) => "SearchResultDone",
            Self::ModifyRequest(_) => "ModifyRequest",
            Self::ModifyResponse(_) => "ModifyResponse",
            Self::AddRequest(_) => "AddRequest",
            Self::AddResponse(_) => "AddResponse",
            Self::DelRequest(_) => "DelRequest",
            Self::DelResponse(_) => "DelResponse",
            Self::ModifyDnRequest(_) => "ModifyDnRequest",
            Self::ModifyDnResponse(_) => "ModifyDnResponse",
            Self::CompareRequest(_) => "CompareRequest",
            Self::CompareResponse(_) => "CompareResponse",
            Self::AbandonRequest(_) => "AbandonRequest",
            Self::ExtendedRequest(_) => "ExtendedRequest",
            Self::ExtendedResponse(_) => "ExtendedResponse",
        }
    }

    fn parse(tag: u8, content: &[u8]) -> Result<Self, ProtoError> {
        match tag {
            APP_BIND_REQUEST => Ok(Self::BindRequest(BindRequest::parse(content)?)),
            APP_BIND_RESPONSE => Ok(Self::BindResponse(BindResponse::parse(content)?)),
            APP_UNBIND_REQUEST => Ok(Self::UnbindRequest),
            APP_SEARCH_REQUEST => Ok(Self::SearchRequest(SearchRequest::parse(content)?)),
            APP_SEARCH_RESULT_ENTRY => {
                Ok(Self::SearchResultEntry(SearchResultEntry::parse(content)?))
            }
            APP_SEARCH_RESULT_DONE => Ok(Self::SearchResultDone(LdapResult::parse_body(content)?)),
            APP_MODIFY_REQUEST => Ok(Self::ModifyRequest(ModifyRequest::parse(content)?)),
            APP_MODIFY_RESPONSE => Ok(Self::ModifyResponse(LdapResult::parse_body(content)?)),
            APP_ADD_REQUEST => Ok(Self::AddRequest(AddRequest::parse(content)?)),
            APP_ADD_RESPONSE => Ok(Self::AddResponse(LdapResult::parse_body(content)?)),
            APP_DEL_REQUEST => Ok(Self::DelRequest(DelRequest::parse(content)?)),
            APP_DEL_RESPONSE => Ok(Self::DelResponse(LdapResult::parse_body(content)?)),
            APP_MODIFY_DN_REQUEST => Ok(Self::ModifyDnRequest(ModifyDnRequest::parse(content)?)),
            APP_MODIFY_DN_RESPONSE => {
                Ok(Self::ModifyDnResponse(LdapResult::parse_body(content)?))
            }
            APP_COMPARE_REQUEST => Ok(Self::CompareRequest(CompareRequest::parse(content)?)),
            APP_COMPARE_RESPONSE => Ok(Self::CompareResponse(LdapResult::parse_body(content)?)),
            APP_ABANDON_REQUEST => Ok(Self::AbandonRequest(AbandonRequest::parse(content)?)),
            APP_EXTENDED_REQUEST => Ok(Self::ExtendedRequest(ExtendedRequest::parse(content)?)),
            APP_EXTENDED_RESPONSE => {
                Ok(Self::ExtendedResponse(ExtendedResponse::parse(content)?))
            }
            other => Err(ProtoError::UnexpectedTag(other)),
        }
    }

    fn encode(&self, out: &mut BytesMut) {
        match self {
            Self::BindRequest(r) => r.encode(out),
            Self::BindResponse(r) => r.encode(out),
            Self::UnbindRequest => ber::write_bytes(out, APP_UNBIND_REQUEST, &[]),
            Self::SearchRequest(r) => r.encode(out),
            Self::SearchResultEntry(r) => r.encode(out),
            Self::SearchResultDone(r) => r.encode_as(out, APP_SEARCH_RESULT_DONE),
            Self::ModifyRequest(r) => r.encode(out),
            Self::ModifyResponse(r) => r.encode_as(out, APP_MODIFY_RESPONSE),
            Self::AddRequest(r) => r.encode(out),
            Self::AddResponse(r) => r.encode_as(out, APP_ADD_RESPONSE),
            Self::DelRequest(r) => r.encode(out),
            Self::DelResponse(r) => r.encode_as(out, APP_DEL_RESPONSE),
            Self::ModifyDnRequest(r) => r.encode(out),
            Self::ModifyDnResponse(r) => r.encode_as(out, APP_MODIFY_DN_RESPONSE),
            Self::CompareRequest(r) => r.encode(out),
            Self::CompareResponse(r) => r.encode_as(out, APP_COMPARE_RESPONSE),
            Self::AbandonRequest(r) => r.encode(out),
            Self::ExtendedRequest(r) => r.encode(out),
            Self::ExtendedResponse(r) => r.encode(out),
        }
    }
}

/// The components shared by every LDAP result message.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LdapResult {
    /// Result code (see the `RESULT_*` constants).
    pub result_code: i32,
    /// Matched DN, usually empty.
    pub matched_dn: String,
    /// Human-readable diagnostic, usually empty.
    pub diagnostic_message: String,
}

impl LdapResult {
    /// Result with the given code and empty DN and diagnostic.
    #[must_use]
    pub fn new(result_code: i32) -> Self {
        Self {
            result_code,
            ..Self::default()
        }
    }

    /// Sets the diagnostic message.
    #[must_use]
    pub fn with_diagnostic_message(mut self, message: impl Into<String>) -> Self {
        self.diagnostic_message = message.into();
        self
    }

    /// Sets the matched DN.
    #[must_use]
    pub fn with_matched_dn(mut self, dn: impl Into<String>) -> Self {
        self.matched_dn = dn.into();
        self
    }

    fn parse_fields(r: &mut BerReader<'_>) -> Result<Self, ProtoError> {
        let code = r.read_enumerated()?;
        let result_code = i32::try_from(code).map_err(|_| ProtoError::IntegerRange)?;
        let matched_dn = r.read_string()?;
        let diagnostic_message = r.read_string()?;
        // Optional referral [3]; carried on the wire but not modeled.
        if r.peek_tag() == Some(0xa3) {
            let _ = r.read_raw()?;
        }
        Ok(Self {
            result_code,
            matched_dn,
            diagnostic_message,
        })
    }

    fn parse_body(content: &[u8]) -> Result<Self, ProtoError> {
        let mut r = BerReader::new(content);
        Self::parse_fields(&mut r)
    }

    fn encode_fields(&self, out: &mut BytesMut) {
        ber::write_integer(out, TAG_ENUMERATED, i64::from(self.result_code));
        ber::write_bytes(out, TAG_OCTET_STRING, self.matched_dn.as_bytes());
        ber::write_bytes(out, TAG_OCTET_STRING, self.diagnostic_message.as_bytes());
    }

    fn encode_as(&self, out: &mut BytesMut, tag: u8) {
        ber::write_tlv(out, tag, |body| self.encode_fields(body));
    }
}

/// Authentication choice of a bind request.
#[derive(Debug, Clone, PartialEq)]
pub enum BindAuth {
    /// simple [0]: a password (possibly empty for anonymous binds).
    Simple(Bytes),
    /// sasl [3]: mechanism name plus optional initial credentials.
    Sasl {
        /// SASL mechanism name.
        mechanism: String,
        /// Initial credentials, mechanism specific.
        credentials: Option<Bytes>,
    },
}

/// BindRequest (application 0).
#[derive(Debug, Clone, PartialEq)]
pub struct BindRequest {
    /// Protocol version; 3 for LDAP v3.
    pub version: i32,
    /// Bind DN; empty for anonymous binds.
    pub name: String,
    /// Authentication choice.
    pub auth: BindAuth,
}

impl BindRequest {
    /// A simple bind.
    #[must_use]
    pub fn simple(name: impl Into<String>, password: impl Into<Bytes>) -> Self {
        Self {
            version: 3,
            name: name.into(),
            auth: BindAuth::Simple(password.into()),
        }
    }

    /// The simple-bind password, if this is a simple bind.
    #[must_use]
    pub fn simple_password(&self) -> Option<&[u8]> {
        match &self.auth {
            BindAuth::Simple(pw) => Some(pw),
            BindAuth::Sasl { .. } => None,
        }
    }

    fn parse(content: &[u8]) -> Result<Self, ProtoError> {
        let mut r = BerReader::new(content);
        let version = i32::try_from(r.read_integer()?).map_err(|_| ProtoError::IntegerRange)?;
        let name = r.read_string()?;
        let (tag, value) = r.read_any()?;
        let auth = match tag {
            0x80 => BindAuth::Simple(Bytes::copy_from_slice(value)),
            0xa3 => {
                let mut sasl = BerReader::new(value);
                let mechanism = sasl.read_string()?;
                let credentials = if sasl.is_empty() {
                    None
                } else {
                    Some(Bytes::copy_from_slice(sasl.read_octet_string()?))
                };
                BindAuth::Sasl {
                    mechanism,
                    credentials,
                }
            }
            other => return Err(ProtoError::UnexpectedTag(other)),
        };
        Ok(Self {
            version,
            name,
            auth,
        })
    }

    fn encode(&self, out: &mut BytesMut) {
        ber::write_tlv(out, APP_BIND_REQUEST, |body| {
            ber::write_integer(body, TAG_INTEGER, i64::from(self.version));
            ber::write_bytes(body, TAG_OCTET_STRING, self.name.as_bytes());
            match &self.auth {
                BindAuth::Simple(pw) => ber::write_bytes(body, 0x80, pw),
                BindAuth::Sasl {
                    mechanism,
                    credentials,
                } => ber::write_tlv(body, 0xa3, |sasl| {
                    ber::write_bytes(sasl, TAG_OCTET_STRING, mechanism.as_bytes());
                    if let Some(creds) = credentials {
                        ber::write_bytes(sasl, TAG_OCTET_STRING, creds);
                    }
                }),
            }
        });
    }
}

/// BindResponse (application 1).
#[derive(Debug, Clone, PartialEq)]
pub struct BindResponse {
    /// Common result components.
    pub result: LdapResult,
    /// serverSaslCreds [7], mechanism specific.
    pub server_sasl_creds: Option<Bytes>,
}

impl BindResponse {
    /// Response with the given result code.
    #[must_use]
    pub fn new(result_code: i32) -> Self {
        Self {
            result: LdapResult::new(result_code),
            server_sasl_creds: None,
        }
    }

    /// Sets the diagnostic message.
    #[must_use]
    pub fn with_diagnostic_message(mut self, message: impl Into<String>) -> Self {
        self.result.diagnostic_message = message.into();
        self
    }

    fn parse(content: &[u8]) -> Result<Self, ProtoError> {
        let mut r = BerReader::new(content);
        let result = LdapResult::parse_fields(&mut r)?;
        let server_sasl_creds = if r.peek_tag() == Some(0x87) {
            let (_, creds) = r.read_any()?;
            Some(Bytes::copy_from_slice(creds))
        } else {
            None
        };
        Ok(Self {
            result,
            server_sasl_creds,
        })
    }

    fn encode(&self, out: &mut BytesMut) {
        ber::write_tlv(out, APP_BIND_RESPONSE, |body| {
            self.result.encode_fields(body);
            if let Some(creds) = &self.server_sasl_creds {
                ber::write_bytes(body, 0x87, creds);
            }
        });
    }
}

/// Search scope of a search request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// baseObject (0): the entry itself.
    BaseObject,
    /// singleLevel (1): immediate children.
    SingleLevel,
    /// wholeSubtree (2): the entry and everything below it.
    WholeSubtree,
}

impl TryFrom<i64> for SearchScope {
    type Error = ProtoError;

    fn try_from(value: i64) -> Result<Self, ProtoError> {
        match value {
            0 => Ok(Self::BaseObject),
            1 => Ok(Self::SingleLevel),
            2 => Ok(Self::WholeSubtree),
            _ => Err(ProtoError::Malformed("unknown search scope")),
        }
    }
}

impl SearchScope {
    fn wire_value(self) -> i64 {
        match self {
            Self::BaseObject => 0,
            Self::SingleLevel => 1,
            Self::WholeSubtree => 2,
        }
    }
}

/// An attribute-value assertion (attribute description plus value).
#[derive(Debug, Clone, PartialEq)]
pub struct Ava {
    /// Attribute description.
    pub attribute: String,
    /// Assertion value.
    pub value: Bytes,
}

impl Ava {
    /// Builds an assertion.
    #[must_use]
    pub fn new(attribute: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    fn parse(content: &[u8]) -> Result<Self, ProtoError> {
        let mut r = BerReader::new(content);
        let attribute = r.read_string()?;
        let value = Bytes::copy_from_slice(r.read_octet_string()?);
        Ok(Self { attribute, value })
    }

    fn encode_into(&self, out: &mut BytesMut) {
        ber::write_bytes(out, TAG_OCTET_STRING, self.attribute.as_bytes());
        ber::write_bytes(out, TAG_OCTET_STRING, &self.value);
    }
}

/// Substring filter components; at least one of the fields is present.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubstringFilter {
    /// Attribute description being matched.
    pub attribute: String,
    /// initial [0], anchored at the start.
    pub initial: Option<Bytes>,
    /// any [1], in order.
    pub any: Vec<Bytes>,
    /// final [2], anchored at the end.
    pub last: Option<Bytes>,
}

/// Search filter CHOICE.
///
/// extensibleMatch is carried raw; everything else is fully typed.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// and [0]: every branch matches.
    And(Vec<Filter>),
    /// or [1]: any branch matches.
    Or(Vec<Filter>),
    /// not [2]: the branch does not match.
    Not(Box<Filter>),
    /// equalityMatch [3].
    Equality(Ava),
    /// substrings [4].
    Substrings(SubstringFilter),
    /// greaterOrEqual [5].
    GreaterOrEqual(Ava),
    /// lessOrEqual [6].
    LessOrEqual(Ava),
    /// present [7].
    Present(String),
    /// approxMatch [8].
    ApproxMatch(Ava),
    /// extensibleMatch [9], raw content bytes.
    ExtensibleMatch(Bytes),
}

impl Filter {
    /// A `(objectClass=*)`-style presence filter.
    #[must_use]
    pub fn present(attribute: impl Into<String>) -> Self {
        Self::Present(attribute.into())
    }

    fn parse(tag: u8, content: &[u8]) -> Result<Self, ProtoError> {
        match tag {
            0xa0 | 0xa1 => {
                let mut branches = Vec::new();
                let mut r = BerReader::new(content);
                while !r.is_empty() {
                    let (t, c) = r.read_any()?;
                    branches.push(Self::parse(t, c)?);
                }
                if branches.is_empty() {
                    return Err(ProtoError::Malformed("empty filter set"));
                }
                Ok(if tag == 0xa0 {
                    Self::And(branches)
                } else {
                    Self::Or(branches)
                })
            }
            0xa2 => {
                let mut r = BerReader::new(content);
                let (t, c) = r.read_any()?;
                Ok(Self::Not(Box::new(Self::parse(t, c)?)))
            }
            0xa3 => Ok(Self::Equality(Ava::parse(content)?)),
            0xa4 => {
                let mut r = BerReader::new(content);
                let attribute = r.read_string()?;
                let parts = r.read_expect(TAG_SEQUENCE)?;
                let mut sub = SubstringFilter {
                    attribute,
                    ..SubstringFilter::default()
                };
                let mut r = BerReader::new(parts);
                while !r.is_empty() {
                    let (t, c) = r.read_any()?;
                    let piece = Bytes::copy_from_slice(c);
                    match t {
                        0x80 => sub.initial = Some(piece),
                        0x81 => sub.any.push(piece),
                        0x82 => sub.last = Some(piece),
                        other => return Err(ProtoError::UnexpectedTag(other)),
                    }
                }
                Ok(Self::Substrings(sub))
            }
            0xa5 => Ok(Self::GreaterOrEqual(Ava::parse(content)?)),
            0xa6 => Ok(Self::LessOrEqual(Ava::parse(content)?)),
            0x87 => Ok(Self::Present(
                String::from_utf8(content.to_vec())
                    .map_err(|_| ProtoError::Malformed("present filter is not utf-8"))?,
            )),
            0xa8 => Ok(Self::ApproxMatch(Ava::parse(content)?)),
            0xa9 => Ok(Self::ExtensibleMatch(Bytes::copy_from_slice(content))),
            other => Err(ProtoError::UnexpectedTag(other)),
        }
    }

    fn encode(&self, out: &mut BytesMut) {
        match self {
            Self::And(branches) | Self::Or(branches) => {
                let tag = if matches!(self, Self::And(_)) { 0xa0 } else { 0xa1 };
                ber::write_tlv(out, tag, |body| {
                    for branch in branches {
                        branch.encode(body);
                    }
                });
            }
            Self::Not(branch) => ber::write_tlv(out, 0xa2, |body| branch.encode(body)),
            Self::Equality(ava) => ber::write_tlv(out, 0xa3, |body| ava.encode_into(body)),
            Self::Substrings(sub) => ber::write_tlv(out, 0xa4, |body| {
                ber::write_bytes(body, TAG_OCTET_STRING, sub.attribute.as_bytes());
                ber::write_tlv(body, TAG_SEQUENCE, |parts| {
                    if let Some(initial) = &sub.initial {
                        ber::write_bytes(parts, 0x80, initial);
                    }
                    for any in &sub.any {
                        ber::write_bytes(parts, 0x81, any);
                    }
                    if let Some(last) = &sub.last {
                        ber::write_bytes(parts, 0x82, last);
                    }
                });
            }),
            Self::GreaterOrEqual(ava) => ber::write_tlv(out, 0xa5, |body| ava.encode_into(body)),
            Self::LessOrEqual(ava) => ber::write_tlv(out, 0xa6, |body| ava.encode_into(body)),
            Self::Present(attribute) => ber::write_bytes(out, 0x87, attribute.as_bytes()),
            Self::ApproxMatch(ava) => ber::write_tlv(out, 0xa8, |body| ava.encode_into(body)),
            Self::ExtensibleMatch(raw) => ber::write_bytes(out, 0xa9, raw),
        }
    }
}

impl fmt::Display for Filter {
    /// RFC 4515 string form, for diagnostics. Values are rendered lossily
    /// and without escaping.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And(branches) => {
                write!(f, "(&")?;
                for b in branches {
                    write!(f, "{b}")?;
                }
                write!(f, ")")
            }
            Self::Or(branches) => {
                write!(f, "(|")?;
                for b in branches {
                    write!(f, "{b}")?;
                }
                write!(f, ")")
            }
            Self::Not(branch) => write!(f, "(!{branch})"),
            Self::Equality(ava) => {
                write!(f, "({}={})", ava.attribute, String::from_utf8_lossy(&ava.value))
            }
            Self::Substrings(sub) => {
                write!(f, "({}=", sub.attribute)?;
                if let Some(initial) = &sub.initial {
                    write!(f, "{}", String::from_utf8_lossy(initial))?;
                }
                write!(f, "*")?;
                for any in &sub.any {
                    write!(f, "{}*", String::from_utf8_lossy(any))?;
                }
                if let Some(last) = &sub.last {
                    write!(f, "{}", String::from_utf8_lossy(last))?;
                }
                write!(f, ")")
            }
            Self::GreaterOrEqual(ava) => {
                write!(f, "({}>={})", ava.attribute, String::from_utf8_lossy(&ava.value))
            }
            Self::LessOrEqual(ava) => {
                write!(f, "({}<={})", ava.attribute, String::from_utf8_lossy(&ava.value))
            }
            Self::Present(attribute) => write!(f, "({attribute}=*)"),
            Self::ApproxMatch(ava) => {
                write!(f, "({}~={})", ava.attribute, String::from_utf8_lossy(&ava.value))
            }
            Self::ExtensibleMatch(_) => write!(f, "(extensibleMatch)"),
        }
    }
}

/// SearchRequest (application 3).
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    /// Base DN of the search.
    pub base_object: String,
    /// Scope relative to the base.
    pub scope: SearchScope,
    /// derefAliases, carried but not interpreted by the framework.
    pub deref_aliases: i32,
    /// Maximum entries the client will accept; 0 means no client limit.
    pub size_limit: i32,
    /// Client time limit in seconds; 0 means no client limit.
    pub time_limit: i32,
    /// Return attribute descriptions only, without values.
    pub types_only: bool,
    /// Search filter.
    pub filter: Filter,
    /// Requested attributes; empty means all user attributes.
    pub attributes: Vec<String>,
}

impl SearchRequest {
    fn parse(content: &[u8]) -> Result<Self, ProtoError> {
        let mut r = BerReader::new(content);
        let base_object = r.read_string()?;
        let scope = SearchScope::try_from(r.read_enumerated()?)?;
        let deref_aliases =
            i32::try_from(r.read_enumerated()?).map_err(|_| ProtoError::IntegerRange)?;
        let size_limit = i32::try_from(r.read_integer()?).map_err(|_| ProtoError::IntegerRange)?;
        let time_limit = i32::try_from(r.read_integer()?).map_err(|_| ProtoError::IntegerRange)?;
        let types_only = r.read_boolean()?;
        let (tag, value) = r.read_any()?;
        let filter = Filter::parse(tag, value)?;
        let mut attributes = Vec::new();
        let attrs = r.read_expect(TAG_SEQUENCE)?;
        let mut r = BerReader::new(attrs);
        while !r.is_empty() {
            attributes.push(r.read_string()?);
        }
        Ok(Self {
            base_object,
            scope,
            deref_aliases,
            size_limit,
            time_limit,
            types_only,
            filter,
            attributes,
        })
    }

    fn encode(&self, out: &mut BytesMut) {
        ber::write_tlv(out, APP_SEARCH_REQUEST, |body| {
            ber::write_bytes(body, TAG_OCTET_STRING, self.base_object.as_bytes());
            ber::write_integer(body, TAG_ENUMERATED, self.scope.wire_value());
            ber::write_integer(body, TAG_ENUMERATED, i64::from(self.deref_aliases));
            ber::write_integer(body, TAG_INTEGER, i64::from(self.size_limit));
            ber::write_integer(body, TAG_INTEGER, i64::from(self.time_limit));
            ber::write_boolean(body, self.types_only);
            self.filter.encode(body);
            ber::write_tlv(body, TAG_SEQUENCE, |attrs| {
                for attribute in &self.attributes {
                    ber::write_bytes(attrs, TAG_OCTET_STRING, attribute.as_bytes());
                }
            });
        });
    }
}

/// One attribute with its values.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialAttribute {
    /// Attribute description.
    pub attr_type: String,
    /// Attribute values; a SET on the wire, order preserved here.
    pub values: Vec<Bytes>,
}

impl PartialAttribute {
    fn parse(content: &[u8]) -> Result<Self, ProtoError> {
        let mut r = BerReader::new(content);
        let attr_type = r.read_string()?;
        let set = r.read_expect(TAG_SET)?;
        let mut values = Vec::new();
        let mut r = BerReader::new(set);
        while !r.is_empty() {
            values.push(Bytes::copy_from_slice(r.read_octet_string()?));
        }
        Ok(Self { attr_type, values })
    }

    fn encode_into(&self, out: &mut BytesMut) {
        ber::write_tlv(out, TAG_SEQUENCE, |body| {
            ber::write_bytes(body, TAG_OCTET_STRING, self.attr_type.as_bytes());
            ber::write_tlv(body, TAG_SET, |set| {
                for value in &self.values {
                    ber::write_bytes(set, TAG_OCTET_STRING, value);
                }
            });
        });
    }
}

/// SearchResultEntry (application 4).
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResultEntry {
    /// DN of the returned entry.
    pub object_name: String,
    /// Returned attributes.
    pub attributes: Vec<PartialAttribute>,
}

impl SearchResultEntry {
    /// Entry with the given DN and no attributes yet.
    #[must_use]
    pub fn new(object_name: impl Into<String>) -> Self {
        Self {
            object_name: object_name.into(),
            attributes: Vec::new(),
        }
    }

    /// Appends an attribute with the given values.
    pub fn add_attribute<V>(&mut self, attr_type: impl Into<String>, values: V)
    where
        V: IntoIterator,
        V::Item: Into<Bytes>,
    {
        self.attributes.push(PartialAttribute {
            attr_type: attr_type.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
    }

    fn parse(content: &[u8]) -> Result<Self, ProtoError> {
        let mut r = BerReader::new(content);
        let object_name = r.read_string()?;
        let attrs = r.read_expect(TAG_SEQUENCE)?;
        let mut attributes = Vec::new();
        let mut r = BerReader::new(attrs);
        while !r.is_empty() {
            attributes.push(PartialAttribute::parse(r.read_expect(TAG_SEQUENCE)?)?);
        }
        Ok(Self {
            object_name,
            attributes,
        })
    }

    fn encode(&self, out: &mut BytesMut) {
        ber::write_tlv(out, APP_SEARCH_RESULT_ENTRY, |body| {
            ber::write_bytes(body, TAG_OCTET_STRING, self.object_name.as_bytes());
            ber::write_tlv(body, TAG_SEQUENCE, |attrs| {
                for attribute in &self.attributes {
                    attribute.encode_into(attrs);
                }
            });
        });
    }
}

/// Kind of change inside a modify request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyOperation {
    /// add (0).
    Add,
    /// delete (1).
    Delete,
    /// replace (2).
    Replace,
}

impl TryFrom<i64> for ModifyOperation {
    type Error = ProtoError;

    fn try_from(value: i64) -> Result<Self, ProtoError> {
        match value {
            0 => Ok(Self::Add),
            1 => Ok(Self::Delete),
            2 => Ok(Self::Replace),
            _ => Err(ProtoError::Malformed("unknown modify operation")),
        }
    }
}

impl ModifyOperation {
    fn wire_value(self) -> i64 {
        match self {
            Self::Add => 0,
            Self::Delete => 1,
            Self::Replace => 2,
        }
    }
}

/// One change of a modify request.
#[derive(Debug, Clone, PartialEq)]
pub struct ModifyChange {
    /// What to do with the attribute.
    pub operation: ModifyOperation,
    /// The attribute and values the operation applies to.
    pub modification: PartialAttribute,
}

/// ModifyRequest (application 6).
#[derive(Debug, Clone, PartialEq)]
pub struct ModifyRequest {
    /// DN of the entry being modified.
    pub object: String,
    /// Changes, applied in order.
    pub changes: Vec<ModifyChange>,
}

impl ModifyRequest {
    fn parse(content: &[u8]) -> Result<Self, ProtoError> {
        let mut r = BerReader::new(content);
        let object = r.read_string()?;
        let list = r.read_expect(TAG_SEQUENCE)?;
        let mut changes = Vec::new();
        let mut r = BerReader::new(list);
        while !r.is_empty() {
            let change = r.read_expect(TAG_SEQUENCE)?;
            let mut c = BerReader::new(change);
            let operation = ModifyOperation::try_from(c.read_enumerated()?)?;
            let modification = PartialAttribute::parse(c.read_expect(TAG_SEQUENCE)?)?;
            changes.push(ModifyChange {
                operation,
                modification,
            });
        }
        Ok(Self { object, changes })
    }

    fn encode(&self, out: &mut BytesMut) {
        ber::write_tlv(out, APP_MODIFY_REQUEST, |body| {
            ber::write_bytes(body, TAG_OCTET_STRING, self.object.as_bytes());
            ber::write_tlv(body, TAG_SEQUENCE, |list| {
                for change in &self.changes {
                    ber::write_tlv(list, TAG_SEQUENCE, |item| {
                        ber::write_integer(item, TAG_ENUMERATED, change.operation.wire_value());
                        change.modification.encode_into(item);
                    });
                }
            });
        });
    }
}

/// AddRequest (application 8).
#[derive(Debug, Clone, PartialEq)]
pub struct AddRequest {
    /// DN of the entry to create.
    pub entry: String,
    /// Initial attributes.
    pub attributes: Vec<PartialAttribute>,
}

impl AddRequest {
    fn parse(content: &[u8]) -> Result<Self, ProtoError> {
        let mut r = BerReader::new(content);
        let entry = r.read_string()?;
        let list = r.read_expect(TAG_SEQUENCE)?;
        let mut attributes = Vec::new();
        let mut r = BerReader::new(list);
        while !r.is_empty() {
            attributes.push(PartialAttribute::parse(r.read_expect(TAG_SEQUENCE)?)?);
        }
        Ok(Self { entry, attributes })
    }

    fn encode(&self, out: &mut BytesMut) {
        ber::write_tlv(out, APP_ADD_REQUEST, |body| {
            ber::write_bytes(body, TAG_OCTET_STRING, self.entry.as_bytes());
            ber::write_tlv(body, TAG_SEQUENCE, |list| {
                for attribute in &self.attributes {
                    attribute.encode_into(list);
                }
            });
        });
    }
}

/// DelRequest (application 10). The DN is the primitive content itself.
#[derive(Debug, Clone, PartialEq)]
pub struct DelRequest {
    /// DN of the entry to delete.
    pub dn: String,
}

impl DelRequest {
    fn parse(content: &[u8]) -> Result<Self, ProtoError> {
        Ok(Self {
            dn: String::from_utf8(content.to_vec())
                .map_err(|_| ProtoError::Malformed("delete dn is not utf-8"))?,
        })
    }

    fn encode(&self, out: &mut BytesMut) {
        ber::write_bytes(out, APP_DEL_REQUEST, self.dn.as_bytes());
    }
}

/// ModifyDNRequest (application 12).
#[derive(Debug, Clone, PartialEq)]
pub struct ModifyDnRequest {
    /// DN of the entry being renamed.
    pub entry: String,
    /// New relative DN.
    pub new_rdn: String,
    /// Whether the old RDN attribute values are removed.
    pub delete_old_rdn: bool,
    /// newSuperior [0], the new parent if the entry moves.
    pub new_superior: Option<String>,
}

impl ModifyDnRequest {
    fn parse(content: &[u8]) -> Result<Self, ProtoError> {
        let mut r = BerReader::new(content);
        let entry = r.read_string()?;
        let new_rdn = r.read_string()?;
        let delete_old_rdn = r.read_boolean()?;
        let new_superior = if r.peek_tag() == Some(0x80) {
            let (_, value) = r.read_any()?;
            Some(
                String::from_utf8(value.to_vec())
                    .map_err(|_| ProtoError::Malformed("new superior is not utf-8"))?,
            )
        } else {
            None
        };
        Ok(Self {
            entry,
            new_rdn,
            delete_old_rdn,
            new_superior,
        })
    }

    fn encode(&self, out: &mut BytesMut) {
        ber::write_tlv(out, APP_MODIFY_DN_REQUEST, |body| {
            ber::write_bytes(body, TAG_OCTET_STRING, self.entry.as_bytes());
            ber::write_bytes(body, TAG_OCTET_STRING, self.new_rdn.as_bytes());
            ber::write_boolean(body, self.delete_old_rdn);
            if let Some(new_superior) = &self.new_superior {
                ber::write_bytes(body, 0x80, new_superior.as_bytes());
            }
        });
    }
}

/// CompareRequest (application 14).
#[derive(Debug, Clone, PartialEq)]
pub struct CompareRequest {
    /// DN of the entry being compared.
    pub entry: String,
    /// The assertion to evaluate.
    pub ava: Ava,
}

impl CompareRequest {
    fn parse(content: &[u8]) -> Result<Self, ProtoError> {
        let mut r = BerReader::new(content);
        let entry = r.read_string()?;
        let ava = Ava::parse(r.read_expect(TAG_SEQUENCE)?)?;
        Ok(Self { entry, ava })
    }

    fn encode(&self, out: &mut BytesMut) {
        ber::write_tlv(out, APP_COMPARE_REQUEST, |body| {
            ber::write_bytes(body, TAG_OCTET_STRING, self.entry.as_bytes());
            ber::write_tlv(body, TAG_SEQUENCE, |ava| self.ava.encode_into(ava));
        });
    }
}

/// AbandonRequest (application 16). The target id is the primitive content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbandonRequest {
    /// Message id of the request to abandon.
    pub id: i32,
}

impl AbandonRequest {
    fn parse(content: &[u8]) -> Result<Self, ProtoError> {
        let id = i32::try_from(crate::ber::decode_integer(content)?)
            .map_err(|_| ProtoError::IntegerRange)?;
        Ok(Self { id })
    }

    fn encode(&self, out: &mut BytesMut) {
        // Same content encoding as INTEGER, under the application tag.
        let mut scratch = BytesMut::new();
        ber::write_integer(&mut scratch, TAG_INTEGER, i64::from(self.id));
        ber::write_bytes(out, APP_ABANDON_REQUEST, &scratch[2..]);
    }
}

/// ExtendedRequest (application 23).
#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedRequest {
    /// requestName [0]: the operation OID.
    pub request_name: String,
    /// requestValue [1], operation specific.
    pub request_value: Option<Bytes>,
}

impl ExtendedRequest {
    /// Request with the given OID and no value.
    #[must_use]
    pub fn new(request_name: impl Into<String>) -> Self {
        Self {
            request_name: request_name.into(),
            request_value: None,
        }
    }

    fn parse(content: &[u8]) -> Result<Self, ProtoError> {
        let mut r = BerReader::new(content);
        let (tag, value) = r.read_any()?;
        if tag != 0x80 {
            return Err(ProtoError::UnexpectedTag(tag));
        }
        let request_name = String::from_utf8(value.to_vec())
            .map_err(|_| ProtoError::Malformed("request name is not utf-8"))?;
        let request_value = if r.peek_tag() == Some(0x81) {
            let (_, value) = r.read_any()?;
            Some(Bytes::copy_from_slice(value))
        } else {
            None
        };
        Ok(Self {
            request_name,
            request_value,
        })
    }

    fn encode(&self, out: &mut BytesMut) {
        ber::write_tlv(out, APP_EXTENDED_REQUEST, |body| {
            ber::write_bytes(body, 0x80, self.request_name.as_bytes());
            if let Some(value) = &self.request_value {
                ber::write_bytes(body, 0x81, value);
            }
        });
    }
}

/// ExtendedResponse (application 24).
#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedResponse {
    /// Common result components.
    pub result: LdapResult,
    /// responseName [10], usually an OID.
    pub response_name: Option<String>,
    /// responseValue [11], operation specific.
    pub response_value: Option<Bytes>,
}

impl ExtendedResponse {
    /// Response with the given result code and no name or value.
    #[must_use]
    pub fn new(result_code: i32) -> Self {
        Self {
            result: LdapResult::new(result_code),
            response_name: None,
            response_value: None,
        }
    }

    /// Sets the diagnostic message.
    #[must_use]
    pub fn with_diagnostic_message(mut self, message: impl Into<String>) -> Self {
        self.result.diagnostic_message = message.into();
        self
    }

    /// Sets the response name.
    #[must_use]
    pub fn with_response_name(mut self, name: impl Into<String>) -> Self {
        self.response_name = Some(name.into());
        self
    }

    fn parse(content: &[u8]) -> Result<Self, ProtoError> {
        let mut r = BerReader::new(content);
        let result = LdapResult::parse_fields(&mut r)?;
        let mut response_name = None;
        let mut response_value = None;
        if r.peek_tag() == Some(0x8a) {
            let (_, value) = r.read_any()?;
            response_name = Some(
                String::from_utf8(value.to_vec())
                    .map_err(|_| ProtoError::Malformed("response name is not utf-8"))?,
            );
        }
        if r.peek_tag() == Some(0x8b) {
            let (_, value) = r.read_any()?;
            response_value = Some(Bytes::copy_from_slice(value));
        }
        Ok(Self {
            result,
            response_name,
            response_value,
        })
    }

    fn encode(&self, out: &mut BytesMut) {
        ber::write_tlv(out, APP_EXTENDED_RESPONSE, |body| {
            self.result.encode_fields(body);
            if let Some(name) = &self.response_name {
                ber::write_bytes(body, 0x8a, name.as_bytes());
            }
            if let Some(value) = &self.response_value {
                ber::write_bytes(body, 0x8b, value);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: &LdapMessage) -> LdapMessage {
        let bytes = msg.to_bytes();
        LdapMessage::parse(&bytes).expect("reparse")
    }

    #[test]
    fn bind_request_roundtrip() {
        let msg = LdapMessage::new(
            1,
            ProtocolOp::BindRequest(BindRequest::simple("cn=admin,dc=example", &b"secret"[..])),
        );
        let back = roundtrip(&msg);
        assert_eq!(back, msg);
        let bind = back.bind_request().unwrap();
        assert_eq!(bind.version, 3);
        assert_eq!(bind.simple_password(), Some(&b"secret"[..]));
    }

    #[test]
    fn sasl_bind_roundtrip() {
        let msg = LdapMessage::new(
            2,
            ProtocolOp::BindRequest(BindRequest {
                version: 3,
                name: String::new(),
                auth: BindAuth::Sasl {
                    mechanism: "EXTERNAL".into(),
                    credentials: Some(Bytes::from_static(b"x")),
                },
            }),
        );
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn search_request_roundtrip() {
        let filter = Filter::And(vec![
            Filter::Equality(Ava::new("objectClass", &b"person"[..])),
            Filter::Or(vec![
                Filter::Substrings(SubstringFilter {
                    attribute: "cn".into(),
                    initial: Some(Bytes::from_static(b"val")),
                    any: vec![Bytes::from_static(b"ere")],
                    last: None,
                }),
                Filter::Not(Box::new(Filter::present("pwdExpired"))),
            ]),
            Filter::GreaterOrEqual(Ava::new("uidNumber", &b"1000"[..])),
        ]);
        let msg = LdapMessage::new(
            7,
            ProtocolOp::SearchRequest(SearchRequest {
                base_object: "dc=example,dc=com".into(),
                scope: SearchScope::WholeSubtree,
                deref_aliases: 0,
                size_limit: 100,
                time_limit: 30,
                types_only: false,
                filter,
                attributes: vec!["cn".into(), "mail".into()],
            }),
        );
        let back = roundtrip(&msg);
        assert_eq!(back, msg);
        assert_eq!(
            back.search_request().unwrap().filter.to_string(),
            "(&(objectClass=person)(|(cn=val*ere*)(!(pwdExpired=*)))(uidNumber>=1000))"
        );
    }

    #[test]
    fn search_entry_roundtrip() {
        let mut entry = SearchResultEntry::new("cn=someone,dc=example");
        entry.add_attribute("mail", [&b"a@example.com"[..], &b"b@example.com"[..]]);
        entry.add_attribute("cn", [&b"someone"[..]]);
        let msg = LdapMessage::new(7, ProtocolOp::SearchResultEntry(entry));
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn modify_roundtrip() {
        let msg = LdapMessage::new(
            3,
            ProtocolOp::ModifyRequest(ModifyRequest {
                object: "cn=someone,dc=example".into(),
                changes: vec![ModifyChange {
                    operation: ModifyOperation::Replace,
                    modification: PartialAttribute {
                        attr_type: "mail".into(),
                        values: vec![Bytes::from_static(b"new@example.com")],
                    },
                }],
            }),
        );
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn add_delete_modify_dn_compare_roundtrip() {
        for op in [
            ProtocolOp::AddRequest(AddRequest {
                entry: "cn=new,dc=example".into(),
                attributes: vec![PartialAttribute {
                    attr_type: "objectClass".into(),
                    values: vec![Bytes::from_static(b"person")],
                }],
            }),
            ProtocolOp::DelRequest(DelRequest {
                dn: "cn=old,dc=example".into(),
            }),
            ProtocolOp::ModifyDnRequest(ModifyDnRequest {
                entry: "cn=old,dc=example".into(),
                new_rdn: "cn=new".into(),
                delete_old_rdn: true,
                new_superior: Some("ou=people,dc=example".into()),
            }),
            ProtocolOp::CompareRequest(CompareRequest {
                entry: "cn=someone,dc=example".into(),
                ava: Ava::new("mail", &b"a@example.com"[..]),
            }),
        ] {
            let msg = LdapMessage::new(4, op);
            assert_eq!(roundtrip(&msg), msg);
        }
    }

    #[test]
    fn unbind_and_abandon_roundtrip() {
        let unbind = LdapMessage::new(9, ProtocolOp::UnbindRequest);
        assert_eq!(roundtrip(&unbind), unbind);
        assert!(unbind.is_unbind_request());

        let abandon = LdapMessage::new(11, ProtocolOp::AbandonRequest(AbandonRequest { id: 10 }));
        let back = roundtrip(&abandon);
        assert_eq!(back.abandon_request().unwrap().id, 10);
    }

    #[test]
    fn extended_roundtrip() {
        let request = LdapMessage::new(
            1,
            ProtocolOp::ExtendedRequest(ExtendedRequest::new(STARTTLS_OID)),
        );
        let back = roundtrip(&request);
        assert_eq!(back.extended_request().unwrap().request_name, STARTTLS_OID);

        let response = LdapMessage::unsolicited(ProtocolOp::ExtendedResponse(
            ExtendedResponse::new(RESULT_UNWILLING_TO_PERFORM)
                .with_diagnostic_message("server is about to stop")
                .with_response_name(NOTICE_OF_DISCONNECTION_OID),
        ));
        let back = roundtrip(&response);
        assert_eq!(back.message_id, 0);
        match &back.op {
            ProtocolOp::ExtendedResponse(r) => {
                assert_eq!(r.result.result_code, RESULT_UNWILLING_TO_PERFORM);
                assert_eq!(r.response_name.as_deref(), Some(NOTICE_OF_DISCONNECTION_OID));
            }
            other => panic!("unexpected op {}", other.name()),
        }
    }

    #[test]
    fn id_restamping_preserves_op() {
        // Wrapping a decoded op under a different id must leave the op intact.
        let original = LdapMessage::new(5, ProtocolOp::BindResponse(BindResponse::new(0)));
        let decoded = LdapMessage::parse(&original.to_bytes()).unwrap();
        for id in [0, 1, 42, i32::MAX] {
            let restamped = LdapMessage::new(id, decoded.op.clone());
            let back = LdapMessage::parse(&restamped.to_bytes()).unwrap();
            assert_eq!(back.message_id, id);
            assert_eq!(back.op, decoded.op);
        }
    }

    #[test]
    fn controls_are_preserved_verbatim() {
        let mut bytes = BytesMut::from(
            LdapMessage::new(6, ProtocolOp::UnbindRequest)
                .to_bytes()
                .as_ref(),
        );
        // Splice a controls TLV into the body and fix the outer length by
        // rebuilding the message.
        let mut msg = LdapMessage::parse(&bytes).unwrap();
        msg.controls = Some(Bytes::from_static(&[0xa0, 0x02, 0x30, 0x00]));
        bytes = BytesMut::from(msg.to_bytes().as_ref());
        let back = LdapMessage::parse(&bytes).unwrap();
        assert_eq!(back.controls, msg.controls);
    }

    #[test]
    fn negative_message_id_rejected() {
        let mut out = BytesMut::new();
        crate::ber::write_tlv(&mut out, TAG_SEQUENCE, |body| {
            crate::ber::write_integer(body, TAG_INTEGER, -1);
            ber::write_bytes(body, APP_UNBIND_REQUEST, &[]);
        });
        assert!(LdapMessage::parse(&out).is_err());
    }

    #[test]
    fn unknown_op_tag_rejected() {
        let mut out = BytesMut::new();
        crate::ber::write_tlv(&mut out, TAG_SEQUENCE, |body| {
            crate::ber::write_integer(body, TAG_INTEGER, 1);
            ber::write_bytes(body, 0x7f, &[]);
        });
        assert!(matches!(
            LdapMessage::parse(&out),
            Err(ProtoError::UnexpectedTag(0x7f))
        ));
    }
}
