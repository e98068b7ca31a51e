//! Message codec adapter.
//!
//! The real fleet uses an SBE-generated schema; that generator and its
//! runtime are out of scope here. This module plays the same role: a
//! thin typed encode/decode layer with the same field surface
//! (`timestampNs`, `correlationId`, `tag`, `key`, `value`, `format`,
//! `dims`, `majorOrder`) and the same cursor discipline (callers advance
//! past `header_size + decoded_length` to find the next catenated
//! message), over a small hand-rolled wire format standing in for the
//! generated one.

use smallvec::SmallVec;
use std::convert::TryInto;

use crate::property_store::PropertyValue;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer too short: need at least {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },
    #[error("unknown format discriminant {0}")]
    UnknownFormat(u8),
    #[error("unknown major-order discriminant {0}")]
    UnknownMajorOrder(u8),
    #[error("string field is not valid utf-8")]
    InvalidUtf8,
}

type CodecResult<T> = Result<T, CodecError>;

/// Primitive value format, mirrors `PropertyValue`'s type tags plus the
/// "no value" marker used by property *read* requests ().
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Nothing,
    I64,
    F64,
    Bool,
    Symbol,
    Str,
    Bytes,
}

impl Format {
    fn discriminant(self) -> u8 {
        match self {
            Format::Nothing => 0,
            Format::I64 => 1,
            Format::F64 => 2,
            Format::Bool => 3,
            Format::Symbol => 4,
            Format::Str => 5,
            Format::Bytes => 6,
        }
    }

    fn from_discriminant(d: u8) -> CodecResult<Self> {
        Ok(match d {
            0 => Format::Nothing,
            1 => Format::I64,
            2 => Format::F64,
            3 => Format::Bool,
            4 => Format::Symbol,
            5 => Format::Str,
            6 => Format::Bytes,
            other => return Err(CodecError::UnknownFormat(other)),
        })
    }

    pub fn of(value: &PropertyValue) -> Self {
        match value {
            PropertyValue::I64(_) => Format::I64,
            PropertyValue::F64(_) => Format::F64,
            PropertyValue::Bool(_) => Format::Bool,
            PropertyValue::Symbol(_) => Format::Symbol,
            PropertyValue::Str(_) => Format::Str,
            PropertyValue::Bytes(_) => Format::Bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MajorOrder {
    Row,
    Column,
}

impl MajorOrder {
    fn discriminant(self) -> u8 {
        match self {
            MajorOrder::Row => 0,
            MajorOrder::Column => 1,
        }
    }

    fn from_discriminant(d: u8) -> CodecResult<Self> {
        match d {
            0 => Ok(MajorOrder::Row),
            1 => Ok(MajorOrder::Column),
            other => Err(CodecError::UnknownMajorOrder(other)),
        }
    }
}

/// A decoded (or to-be-encoded) control/status message: a property read,
/// write, echo, or one of the fixed status-event shapes.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMessage {
    pub timestamp_ns: i64,
    pub correlation_id: u64,
    /// Source/publisher tag (agent name on outbound; sender's declared tag
    /// on inbound — consumed by `TagFragmentFilter`).
    pub tag: String,
    /// The event/property key this message names.
    pub key: String,
    pub format: Format,
    pub value: Option<PropertyValue>,
}

impl EventMessage {
    pub fn read_request(timestamp_ns: i64, correlation_id: u64, tag: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            timestamp_ns,
            correlation_id,
            tag: tag.into(),
            key: key.into(),
            format: Format::Nothing,
            value: None,
        }
    }

    pub fn write(
        timestamp_ns: i64,
        correlation_id: u64,
        tag: impl Into<String>,
        key: impl Into<String>,
        value: PropertyValue,
    ) -> Self {
        Self {
            timestamp_ns,
            correlation_id,
            tag: tag.into(),
            key: key.into(),
            format: Format::of(&value),
            value: Some(value),
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self.format, Format::Nothing)
    }

    /// Encode header + body. Returns the bytes to hand to `try_claim`/`offer`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 + self.tag.len() + self.key.len());
        buf.extend_from_slice(&self.timestamp_ns.to_le_bytes());
        buf.extend_from_slice(&self.correlation_id.to_le_bytes());
        encode_string(&mut buf, &self.tag);
        encode_string(&mut buf, &self.key);
        buf.push(self.format.discriminant());
        encode_value(&mut buf, self.format, self.value.as_ref());
        buf
    }

    /// Decode one message starting at `buf[0]`. Returns the message and the
    /// number of bytes consumed, so a caller holding a buffer with several
    /// catenated messages () can advance and decode the next one.
    pub fn decode(buf: &[u8]) -> CodecResult<(Self, usize)> {
        let mut cursor = 0usize;
        let timestamp_ns = read_i64(buf, &mut cursor)?;
        let correlation_id = read_u64(buf, &mut cursor)?;
        let tag = decode_string(buf, &mut cursor)?;
        let key = decode_string(buf, &mut cursor)?;
        let format = Format::from_discriminant(read_u8(buf, &mut cursor)?)?;
        let value = decode_value(buf, &mut cursor, format)?;
        Ok((
            EventMessage {
                timestamp_ns,
                correlation_id,
                tag,
                key,
                format,
                value,
            },
            cursor,
        ))
    }
}

/// A data-stream payload: header fields plus raw column-major (or
/// row-major) element bytes. Element bytes are never copied on the
/// outbound path (vectored offer); `elements` here is the *decoded*
/// view used on the inbound path only.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorMessage {
    pub timestamp_ns: i64,
    pub correlation_id: u64,
    pub tag: String,
    pub origin: String,
    pub element_format: Format,
    pub major_order: MajorOrder,
    pub dims: SmallVec<[u32; 4]>,
    pub elements: Vec<u8>,
}

impl TensorMessage {
    /// Encode just the header (timestamp/correlation/tag/origin/format/
    /// dims) — element bytes are offered separately via a vectored
    /// `Publication::offer` so they are never copied ().
    pub fn encode_header(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(40 + self.tag.len() + self.origin.len());
        buf.extend_from_slice(&self.timestamp_ns.to_le_bytes());
        buf.extend_from_slice(&self.correlation_id.to_le_bytes());
        encode_string(&mut buf, &self.tag);
        encode_string(&mut buf, &self.origin);
        buf.push(self.element_format.discriminant());
        buf.push(self.major_order.discriminant());
        buf.push(self.dims.len() as u8);
        for d in &self.dims {
            buf.extend_from_slice(&d.to_le_bytes());
        }
        buf
    }

    /// Decode a complete header+elements buffer, as delivered by the
    /// fragment assembler on the inbound path.
    pub fn decode(buf: &[u8]) -> CodecResult<(Self, usize)> {
        let mut cursor = 0usize;
        let timestamp_ns = read_i64(buf, &mut cursor)?;
        let correlation_id = read_u64(buf, &mut cursor)?;
        let tag = decode_string(buf, &mut cursor)?;
        let origin = decode_string(buf, &mut cursor)?;
        let element_format = Format::from_discriminant(read_u8(buf, &mut cursor)?)?;
        let major_order = MajorOrder::from_discriminant(read_u8(buf, &mut cursor)?)?;
        let ndims = read_u8(buf, &mut cursor)? as usize;
        let mut dims = SmallVec::new();
        for _ in 0..ndims {
            dims.push(read_u32(buf, &mut cursor)?);
        }
        let header_len = cursor;
        let elements = buf[header_len..].to_vec();
        let total = buf.len();
        Ok((
            TensorMessage {
                timestamp_ns,
                correlation_id,
                tag,
                origin,
                element_format,
                major_order,
                dims,
                elements,
            },
            total,
        ))
    }
}

fn encode_string(buf: &mut Vec<u8>, s: &str) {
    let len: u16 = s.len().try_into().unwrap_or(u16::MAX);
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&s.as_bytes()[..len as usize]);
}

fn encode_value(buf: &mut Vec<u8>, format: Format, value: Option<&PropertyValue>) {
    match (format, value) {
        (Format::Nothing, _) => {}
        (Format::I64, Some(PropertyValue::I64(v))) => buf.extend_from_slice(&v.to_le_bytes()),
        (Format::F64, Some(PropertyValue::F64(v))) => buf.extend_from_slice(&v.to_le_bytes()),
        (Format::Bool, Some(PropertyValue::Bool(v))) => buf.push(*v as u8),
        (Format::Symbol, Some(PropertyValue::Symbol(v))) | (Format::Str, Some(PropertyValue::Str(v))) => {
            encode_string(buf, v)
        }
        (Format::Bytes, Some(PropertyValue::Bytes(v))) => {
            let len: u32 = v.len().try_into().unwrap_or(u32::MAX);
            buf.extend_from_slice(&len.to_le_bytes());
            buf.extend_from_slice(&v[..len as usize]);
        }
        _ => {}
    }
}

fn decode_value(buf: &[u8], cursor: &mut usize, format: Format) -> CodecResult<Option<PropertyValue>> {
    Ok(match format {
        Format::Nothing => None,
        Format::I64 => Some(PropertyValue::I64(read_i64(buf, cursor)?)),
        Format::F64 => Some(PropertyValue::F64(read_f64(buf, cursor)?)),
        Format::Bool => Some(PropertyValue::Bool(read_u8(buf, cursor)? != 0)),
        Format::Symbol => Some(PropertyValue::Symbol(decode_string(buf, cursor)?)),
        Format::Str => Some(PropertyValue::Str(decode_string(buf, cursor)?)),
        Format::Bytes => {
            let len = read_u32(buf, cursor)? as usize;
            need(buf, *cursor, len)?;
            let bytes = buf[*cursor..*cursor + len].to_vec();
            *cursor += len;
            Some(PropertyValue::Bytes(bytes))
        }
    })
}

fn need(buf: &[u8], at: usize, n: usize) -> CodecResult<()> {
    if buf.len() < at + n {
        Err(CodecError::Truncated {
            needed: at + n,
            have: buf.len(),
        })
    } else {
        Ok(())
    }
}

fn read_u8(buf: &[u8], cursor: &mut usize) -> CodecResult<u8> {
    need(buf, *cursor, 1)?;
    let v = buf[*cursor];
    *cursor += 1;
    Ok(v)
}

fn read_u32(buf: &[u8], cursor: &mut usize) -> CodecResult<u32> {
    need(buf, *cursor, 4)?;
    let v = u32::from_le_bytes(buf[*cursor..*cursor + 4].try_into().unwrap());
    *cursor += 4;
    Ok(v)
}

fn read_u64(buf: &[u8], cursor: &mut usize) -> CodecResult<u64> {
    need(buf, *cursor, 8)?;
    let v = u64::from_le_bytes(buf[*cursor..*cursor + 8].try_into().unwrap());
    *cursor += 8;
    Ok(v)
}

fn read_i64(buf: &[u8], cursor: &mut usize) -> CodecResult<i64> {
    Ok(read_u64(buf, cursor)? as i64)
}

fn read_f64(buf: &[u8], cursor: &mut usize) -> CodecResult<f64> {
    Ok(f64::from_bits(read_u64(buf, cursor)?))
}

fn decode_string(buf: &[u8], cursor: &mut usize) -> CodecResult<String> {
    let len = {
        need(buf, *cursor, 2)?;
        let v = u16::from_le_bytes(buf[*cursor..*cursor + 2].try_into().unwrap());
        *cursor += 2;
        v as usize
    };
    need(buf, *cursor, len)?;
    let s = std::str::from_utf8(&buf[*cursor..*cursor + len])
        .map_err(|_| CodecError::InvalidUtf8)?
        .to_string();
    *cursor += len;
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_message_round_trips() {
        let msg = EventMessage::write(1_000, 42, "agent", "HeartbeatPeriodNs", PropertyValue::I64(5));
        let (decoded, consumed) = EventMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(consumed, msg.encode().len());
    }

    #[test]
    fn read_request_round_trips_with_no_value() {
        let msg = EventMessage::read_request(0, 1, "agent", "Name");
        let (decoded, _) = EventMessage::decode(&msg.encode()).unwrap();
        assert!(decoded.is_read());
        assert_eq!(decoded.key, "Name");
    }

    #[test]
    fn catenated_messages_decode_with_cursor_advance() {
        let a = EventMessage::write(0, 1, "a", "X", PropertyValue::I64(1));
        let b = EventMessage::write(0, 2, "a", "Y", PropertyValue::Bool(true));
        let mut buf = a.encode();
        buf.extend_from_slice(&b.encode());

        let (first, consumed) = EventMessage::decode(&buf).unwrap();
        assert_eq!(first.key, "X");
        let (second, _) = EventMessage::decode(&buf[consumed..]).unwrap();
        assert_eq!(second.key, "Y");
    }

    #[test]
    fn truncated_buffer_is_an_error() {
        let msg = EventMessage::write(0, 1, "a", "X", PropertyValue::I64(1));
        let mut buf = msg.encode();
        buf.truncate(buf.len() - 1);
        assert!(matches!(
            EventMessage::decode(&buf),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn tensor_header_round_trips_with_elements_appended() {
        let tensor = TensorMessage {
            timestamp_ns: 10,
            correlation_id: 7,
            tag: "agent".into(),
            origin: "TestMatrix".into(),
            element_format: Format::F64,
            major_order: MajorOrder::Column,
            dims: SmallVec::from_slice(&[2, 3]),
            elements: vec![0u8; 48],
        };
        let mut buf = tensor.encode_header();
        buf.extend_from_slice(&tensor.elements);
        let (decoded, _) = TensorMessage::decode(&buf).unwrap();
        assert_eq!(decoded.dims.as_slice(), &[2, 3]);
        assert_eq!(decoded.major_order, MajorOrder::Column);
        assert_eq!(decoded.elements.len(), 48);
    }
}
