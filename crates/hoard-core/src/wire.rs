//! Forward-compatible protobuf records.
//!
//! prost drops fields it does not know. Records that hoard rewrites in place
//! (index, keyrings) keep the raw bytes of unknown fields so that a newer
//! writer's additions survive a round-trip through an older reader.

use prost::encoding::{decode_key, decode_varint, encode_key, encode_varint, WireType};
use prost::Message;

use crate::error::{HoardError, HoardResult};

/// Raw encoded fields whose tags the local schema does not define.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnknownFields {
    raw: Vec<u8>,
}

impl UnknownFields {
    /// Scan `buf` and keep every field whose tag is not in `known`.
    pub fn capture(buf: &[u8], known: &[u32]) -> HoardResult<Self> {
        let mut raw = Vec::new();
        for field in raw_fields(buf)? {
            if !known.contains(&field.tag) {
                raw.extend_from_slice(field.raw);
            }
        }
        Ok(Self { raw })
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Append the preserved fields after an already-encoded message.
    pub fn append_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.raw);
    }
}

/// One encoded field of a message.
#[derive(Debug, Clone, Copy)]
pub struct RawField<'a> {
    pub tag: u32,
    pub wire_type: WireType,
    /// Payload of a length-delimited field, the encoded value otherwise
    pub value: &'a [u8],
    /// The whole field, key included
    pub raw: &'a [u8],
}

/// Split `buf` into its fields, in encoding order.
pub fn raw_fields(buf: &[u8]) -> HoardResult<Vec<RawField<'_>>> {
    let mut fields = Vec::new();
    let mut cursor = buf;
    while !cursor.is_empty() {
        let start = buf.len() - cursor.len();
        let (tag, wire_type) = decode_key(&mut cursor)?;
        let value = take_value(wire_type, &mut cursor)?;
        let end = buf.len() - cursor.len();
        fields.push(RawField {
            tag,
            wire_type,
            value,
            raw: &buf[start..end],
        });
    }
    Ok(fields)
}

/// Write `body` as length-delimited field `tag`.
pub fn encode_nested(tag: u32, body: &[u8], out: &mut Vec<u8>) {
    encode_key(tag, WireType::LengthDelimited, out);
    encode_varint(body.len() as u64, out);
    out.extend_from_slice(body);
}

fn take_value<'a>(wire_type: WireType, cursor: &mut &'a [u8]) -> HoardResult<&'a [u8]> {
    let len = match wire_type {
        WireType::Varint => {
            let before: &'a [u8] = *cursor;
            decode_varint(cursor)?;
            return Ok(&before[..before.len() - cursor.len()]);
        }
        WireType::SixtyFourBit => 8,
        WireType::ThirtyTwoBit => 4,
        WireType::LengthDelimited => {
            let len = decode_varint(cursor)?;
            usize::try_from(len)
                .map_err(|_| HoardError::Malformed("field length overflow".into()))?
        }
        WireType::StartGroup | WireType::EndGroup => {
            return Err(HoardError::Malformed("group fields are not supported".into()))
        }
    };
    if cursor.len() < len {
        return Err(HoardError::Malformed("truncated field".into()));
    }
    let (value, rest) = cursor.split_at(len);
    *cursor = rest;
    Ok(value)
}

/// Decode `buf` as `M`, keeping unknown top-level fields.
pub fn decode_preserving<M: Message + Default>(
    buf: &[u8],
    known: &[u32],
) -> HoardResult<(M, UnknownFields)> {
    let msg = M::decode(buf)?;
    let unknown = UnknownFields::capture(buf, known)?;
    Ok((msg, unknown))
}

/// Encode `msg` followed by the preserved unknown fields.
pub fn encode_preserving<M: Message>(msg: &M, unknown: &UnknownFields) -> Vec<u8> {
    let mut out = msg.encode_to_vec();
    unknown.append_to(&mut out);
    out
}
