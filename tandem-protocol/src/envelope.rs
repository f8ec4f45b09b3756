//! Envelope schema and binary codec.
//!
//! Envelopes are encoded as tag-length-value records with varint integers
//! and length-delimited strings/bytes. Field numbers are protocol-stable:
//!
//! ```text
//! Envelope { request: Request (1) | response: Response (2) }
//! Request  { id: uint32 (1), method: string (2), payload: bytes (3) }
//! Response { id: uint32 (1), payload: bytes (2), error: Error (3) }
//! Error    { code: uint32 (1), message: string (2) }
//! ```
//!
//! All fields are optional on the wire; absent and empty normalize to the
//! same thing. Unknown fields are skipped by wire type so envelopes from
//! newer peers still decode.

use crate::error::{ErrorCode, ProtocolError};
use bytes::{Buf, BufMut, Bytes, BytesMut};

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

/// A framed message carrying either a request or a response.
///
/// An envelope with neither field populated is legal and ignored by
/// receivers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub request: Option<Request>,
    pub response: Option<Response>,
}

/// An outbound method call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    /// Call identifier, unique per session per direction of traffic.
    pub id: u32,
    /// Method name; matched case-sensitively against the handler table.
    pub method: String,
    /// Opaque argument bytes, possibly empty.
    pub payload: Bytes,
}

/// The reply to a [`Request`], correlated by `id`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    /// Echoes the request's `id`.
    pub id: u32,
    /// Opaque result bytes, possibly empty.
    pub payload: Bytes,
    /// Present when the call failed; absent on success.
    pub error: Option<ResponseError>,
}

/// Structured error detail transported inside a [`Response`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseError {
    /// Reserved code; see [`ErrorCode`].
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
}

impl Envelope {
    pub fn request(request: Request) -> Self {
        Self {
            request: Some(request),
            response: None,
        }
    }

    pub fn response(response: Response) -> Self {
        Self {
            request: None,
            response: Some(response),
        }
    }

    /// Encodes the envelope. Absent and empty fields are not written.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        if let Some(ref request) = self.request {
            let body = request.encode();
            put_tag(&mut buf, 1, WIRE_LEN);
            put_uvarint(&mut buf, body.len() as u64);
            buf.extend_from_slice(&body);
        }
        if let Some(ref response) = self.response {
            let body = response.encode();
            put_tag(&mut buf, 2, WIRE_LEN);
            put_uvarint(&mut buf, body.len() as u64);
            buf.extend_from_slice(&body);
        }
        buf
    }

    /// Decodes an envelope from a complete frame payload.
    pub fn decode(mut buf: Bytes) -> Result<Self, ProtocolError> {
        let mut envelope = Envelope::default();
        while buf.has_remaining() {
            let (field, wire) = get_tag(&mut buf)?;
            match (field, wire) {
                (1, WIRE_LEN) => {
                    envelope.request = Some(Request::decode(get_len_delimited(&mut buf)?)?);
                }
                (2, WIRE_LEN) => {
                    envelope.response = Some(Response::decode(get_len_delimited(&mut buf)?)?);
                }
                _ => skip_field(&mut buf, wire)?,
            }
        }
        Ok(envelope)
    }
}

impl Request {
    pub fn new(id: u32, method: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            method: method.into(),
            payload: payload.into(),
        }
    }

    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        if self.id != 0 {
            put_tag(&mut buf, 1, WIRE_VARINT);
            put_uvarint(&mut buf, u64::from(self.id));
        }
        if !self.method.is_empty() {
            put_len_delimited(&mut buf, 2, self.method.as_bytes());
        }
        if !self.payload.is_empty() {
            put_len_delimited(&mut buf, 3, &self.payload);
        }
        buf
    }

    fn decode(mut buf: Bytes) -> Result<Self, ProtocolError> {
        let mut request = Request::default();
        while buf.has_remaining() {
            let (field, wire) = get_tag(&mut buf)?;
            match (field, wire) {
                (1, WIRE_VARINT) => request.id = get_uvarint(&mut buf)? as u32,
                (2, WIRE_LEN) => request.method = get_string(&mut buf)?,
                (3, WIRE_LEN) => request.payload = get_len_delimited(&mut buf)?,
                _ => skip_field(&mut buf, wire)?,
            }
        }
        Ok(request)
    }
}

impl Response {
    /// A successful response carrying `payload`.
    pub fn ok(id: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
            error: None,
        }
    }

    /// The canned reply for a request whose method has no handler.
    pub fn no_such_method(id: u32) -> Self {
        Self {
            id,
            payload: Bytes::new(),
            error: Some(ResponseError::from_code(ErrorCode::NoSuchMethod)),
        }
    }

    /// A failed handler invocation; `message` carries the handler's text.
    pub fn handler_error(id: u32, message: impl Into<String>) -> Self {
        Self {
            id,
            payload: Bytes::new(),
            error: Some(ResponseError {
                code: ErrorCode::Handler.as_u32(),
                message: message.into(),
            }),
        }
    }

    /// The synthetic sentinel delivered to waiters when a session tears
    /// down. Never sent on the wire.
    pub fn disconnected() -> Self {
        Self {
            id: 0,
            payload: Bytes::new(),
            error: Some(ResponseError::from_code(ErrorCode::Disconnected)),
        }
    }

    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        if self.id != 0 {
            put_tag(&mut buf, 1, WIRE_VARINT);
            put_uvarint(&mut buf, u64::from(self.id));
        }
        if !self.payload.is_empty() {
            put_len_delimited(&mut buf, 2, &self.payload);
        }
        if let Some(ref error) = self.error {
            let body = error.encode();
            put_tag(&mut buf, 3, WIRE_LEN);
            put_uvarint(&mut buf, body.len() as u64);
            buf.extend_from_slice(&body);
        }
        buf
    }

    fn decode(mut buf: Bytes) -> Result<Self, ProtocolError> {
        let mut response = Response::default();
        while buf.has_remaining() {
            let (field, wire) = get_tag(&mut buf)?;
            match (field, wire) {
                (1, WIRE_VARINT) => response.id = get_uvarint(&mut buf)? as u32,
                (2, WIRE_LEN) => response.payload = get_len_delimited(&mut buf)?,
                (3, WIRE_LEN) => {
                    response.error = Some(ResponseError::decode(get_len_delimited(&mut buf)?)?);
                }
                _ => skip_field(&mut buf, wire)?,
            }
        }
        Ok(response)
    }
}

impl ResponseError {
    /// Builds the canned error detail for a reserved code.
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code: code.as_u32(),
            message: code.to_string(),
        }
    }

    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        if self.code != 0 {
            put_tag(&mut buf, 1, WIRE_VARINT);
            put_uvarint(&mut buf, u64::from(self.code));
        }
        if !self.message.is_empty() {
            put_len_delimited(&mut buf, 2, self.message.as_bytes());
        }
        buf
    }

    fn decode(mut buf: Bytes) -> Result<Self, ProtocolError> {
        let mut code = 0u32;
        let mut message = String::new();
        while buf.has_remaining() {
            let (field, wire) = get_tag(&mut buf)?;
            match (field, wire) {
                (1, WIRE_VARINT) => code = get_uvarint(&mut buf)? as u32,
                (2, WIRE_LEN) => message = get_string(&mut buf)?,
                _ => skip_field(&mut buf, wire)?,
            }
        }
        Ok(Self { code, message })
    }
}

fn put_uvarint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

fn get_uvarint(buf: &mut Bytes) -> Result<u64, ProtocolError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        if shift >= 64 {
            return Err(ProtocolError::VarintOverflow);
        }
        if !buf.has_remaining() {
            return Err(ProtocolError::Truncated);
        }
        let byte = buf.get_u8();
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

fn put_tag(buf: &mut BytesMut, field: u32, wire: u8) {
    put_uvarint(buf, (u64::from(field) << 3) | u64::from(wire));
}

fn get_tag(buf: &mut Bytes) -> Result<(u32, u8), ProtocolError> {
    let tag = get_uvarint(buf)?;
    Ok(((tag >> 3) as u32, (tag & 0x7) as u8))
}

fn put_len_delimited(buf: &mut BytesMut, field: u32, bytes: &[u8]) {
    put_tag(buf, field, WIRE_LEN);
    put_uvarint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn get_len_delimited(buf: &mut Bytes) -> Result<Bytes, ProtocolError> {
    let len = get_uvarint(buf)?;
    if len > buf.remaining() as u64 {
        return Err(ProtocolError::Truncated);
    }
    Ok(buf.split_to(len as usize))
}

fn get_string(buf: &mut Bytes) -> Result<String, ProtocolError> {
    let bytes = get_len_delimited(buf)?;
    let text = std::str::from_utf8(&bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
    Ok(text.to_string())
}

fn skip_field(buf: &mut Bytes, wire: u8) -> Result<(), ProtocolError> {
    match wire {
        WIRE_VARINT => {
            get_uvarint(buf)?;
        }
        WIRE_FIXED64 => {
            if buf.remaining() < 8 {
                return Err(ProtocolError::Truncated);
            }
            buf.advance(8);
        }
        WIRE_LEN => {
            get_len_delimited(buf)?;
        }
        WIRE_FIXED32 => {
            if buf.remaining() < 4 {
                return Err(ProtocolError::Truncated);
            }
            buf.advance(4);
        }
        other => return Err(ProtocolError::InvalidWireType(other)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(envelope: &Envelope) -> Envelope {
        Envelope::decode(envelope.encode().freeze()).unwrap()
    }

    #[test]
    fn test_request_envelope_roundtrip() {
        let envelope = Envelope::request(Request::new(7, "echo", vec![1, 2, 3]));
        assert_eq!(roundtrip(&envelope), envelope);
    }

    #[test]
    fn test_response_envelope_roundtrip() {
        let envelope = Envelope::response(Response::ok(7, vec![9, 8, 7]));
        assert_eq!(roundtrip(&envelope), envelope);
    }

    #[test]
    fn test_error_response_roundtrip() {
        let envelope = Envelope::response(Response::handler_error(3, "kaboom"));
        let decoded = roundtrip(&envelope);
        let error = decoded.response.unwrap().error.unwrap();
        assert_eq!(error.code, 0);
        assert_eq!(error.message, "kaboom");
    }

    #[test]
    fn test_request_wire_bytes_are_stable() {
        let envelope = Envelope::request(Request::new(1, "echo", vec![1, 2, 3]));
        let encoded = envelope.encode();
        // field 1 (request), then id=1, method="echo", payload=[1,2,3]
        assert_eq!(
            &encoded[..],
            &[
                0x0A, 0x0D, // envelope.request, 13 bytes
                0x08, 0x01, // id = 1
                0x12, 0x04, b'e', b'c', b'h', b'o', // method
                0x1A, 0x03, 0x01, 0x02, 0x03, // payload
            ]
        );
    }

    #[test]
    fn test_empty_envelope_encodes_to_nothing() {
        let envelope = Envelope::default();
        assert!(envelope.encode().is_empty());
        let decoded = Envelope::decode(Bytes::new()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_absent_and_empty_normalize() {
        // Zero id, empty method, empty payload: nothing hits the wire.
        let envelope = Envelope::request(Request::default());
        let encoded = envelope.encode();
        assert_eq!(&encoded[..], &[0x0A, 0x00]);
        assert_eq!(roundtrip(&envelope), envelope);
    }

    #[test]
    fn test_unknown_fields_are_skipped() {
        let mut buf = BytesMut::new();
        // Unknown varint field 9, then a real request.
        put_tag(&mut buf, 9, WIRE_VARINT);
        put_uvarint(&mut buf, 300);
        // Unknown fixed32 field 10.
        put_tag(&mut buf, 10, WIRE_FIXED32);
        buf.extend_from_slice(&[0, 0, 0, 0]);
        // Unknown length-delimited field 11.
        put_len_delimited(&mut buf, 11, b"future");
        let request = Request::new(5, "ping", Bytes::new());
        let body = request.encode();
        put_tag(&mut buf, 1, WIRE_LEN);
        put_uvarint(&mut buf, body.len() as u64);
        buf.extend_from_slice(&body);

        let decoded = Envelope::decode(buf.freeze()).unwrap();
        assert_eq!(decoded.request.unwrap().method, "ping");
    }

    #[test]
    fn test_group_wire_type_is_rejected() {
        let mut buf = BytesMut::new();
        put_tag(&mut buf, 4, 3);
        let result = Envelope::decode(buf.freeze());
        assert!(matches!(result, Err(ProtocolError::InvalidWireType(3))));
    }

    #[test]
    fn test_truncated_length_delimited() {
        let mut buf = BytesMut::new();
        put_tag(&mut buf, 1, WIRE_LEN);
        put_uvarint(&mut buf, 40); // claims 40 bytes, provides none
        let result = Envelope::decode(buf.freeze());
        assert!(matches!(result, Err(ProtocolError::Truncated)));
    }

    #[test]
    fn test_truncated_varint() {
        let buf = Bytes::from_static(&[0x08, 0x80]); // continuation bit, no next byte
        let result = Request::decode(buf);
        assert!(matches!(result, Err(ProtocolError::Truncated)));
    }

    #[test]
    fn test_varint_overflow() {
        // Eleven continuation bytes exceed 64 bits.
        let buf = Bytes::from_static(&[
            0x08, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01,
        ]);
        let result = Request::decode(buf);
        assert!(matches!(result, Err(ProtocolError::VarintOverflow)));
    }

    #[test]
    fn test_invalid_utf8_method() {
        let mut buf = BytesMut::new();
        put_len_delimited(&mut buf, 2, &[0xFF, 0xFE]);
        let result = Request::decode(buf.freeze());
        assert!(matches!(result, Err(ProtocolError::InvalidUtf8)));
    }

    #[test]
    fn test_multibyte_varint_roundtrip() {
        let request = Request::new(u32::MAX, "m", Bytes::new());
        let envelope = Envelope::request(request.clone());
        assert_eq!(roundtrip(&envelope).request.unwrap().id, u32::MAX);
    }

    #[test]
    fn test_canned_responses() {
        let response = Response::no_such_method(12);
        assert_eq!(response.id, 12);
        let error = response.error.unwrap();
        assert_eq!(error.code, ErrorCode::NoSuchMethod.as_u32());
        assert_eq!(error.message, "method not found");

        let sentinel = Response::disconnected();
        assert_eq!(sentinel.error.unwrap().code, ErrorCode::Disconnected.as_u32());
    }

    #[test]
    fn test_empty_payload_response_roundtrip() {
        let envelope = Envelope::response(Response::ok(2, Bytes::new()));
        let decoded = roundtrip(&envelope);
        let response = decoded.response.unwrap();
        assert_eq!(response.id, 2);
        assert!(response.payload.is_empty());
        assert!(response.error.is_none());
    }
}
