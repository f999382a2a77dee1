//! Tagged value tree (spec §3, §4.1) and its encode/decode logic.

use super::custom::CustomData;
use super::io::{Reader, WriteExt};
use super::tag::{tag_at, Tag};
use super::DecodeError;

/// A dictionary value (tag `0x44`). Unlike [`Value::Hashtable`], a
/// dictionary may declare a uniform key/value type so entries are written
/// without a per-entry tag byte.
#[derive(Debug, Clone, PartialEq)]
pub struct Dictionary {
    pub key_tag: Option<Tag>,
    pub value_tag: Option<Tag>,
    pub entries: Vec<(Value, Value)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    ByteArray(Vec<u8>),
    IntArray(Vec<i32>),
    StringArray(Vec<String>),
    /// Array whose elements all share one declared tag, written without a
    /// per-element tag byte.
    TypedArray { element_tag: Tag, items: Vec<Value> },
    ObjectArray(Vec<Value>),
    Hashtable(Vec<(Value, Value)>),
    Dictionary(Dictionary),
    Custom(CustomData),
}

impl Value {
    pub fn tag(&self) -> Tag {
        match self {
            Value::Null => Tag::Null,
            Value::Bool(_) => Tag::Bool,
            Value::Byte(_) => Tag::Byte,
            Value::Short(_) => Tag::Short,
            Value::Int(_) => Tag::Int,
            Value::Long(_) => Tag::Long,
            Value::Float(_) => Tag::Float,
            Value::Double(_) => Tag::Double,
            Value::String(_) => Tag::String,
            Value::ByteArray(_) => Tag::ByteArray,
            Value::IntArray(_) => Tag::IntArray,
            Value::StringArray(_) => Tag::StringArray,
            Value::TypedArray { .. } => Tag::TypedArray,
            Value::ObjectArray(_) => Tag::ObjectArray,
            Value::Hashtable(_) => Tag::Hashtable,
            Value::Dictionary(_) => Tag::Dictionary,
            Value::Custom(_) => Tag::Custom,
        }
    }

    /// Builds the narrowest integer variant that round-trips `v` exactly
    /// (spec R2): `Byte` if it fits an `i8`, else `Short`, else `Int`, else
    /// `Long`.
    pub fn from_i64(v: i64) -> Value {
        if let Ok(b) = i8::try_from(v) {
            Value::Byte(b)
        } else if let Ok(s) = i16::try_from(v) {
            Value::Short(s)
        } else if let Ok(i) = i32::try_from(v) {
            Value::Int(i)
        } else {
            Value::Long(v)
        }
    }

    /// Widens any integer variant back to `i64`. Returns `None` for
    /// non-integer variants.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Byte(b) => Some(*b as i64),
            Value::Short(s) => Some(*s as i64),
            Value::Int(i) => Some(*i as i64),
            Value::Long(l) => Some(*l),
            _ => None,
        }
    }
}

/// Sentinel byte for "no uniform type" in a [`Dictionary`]'s key/value tag
/// slots. `0x00` is not used by any entry in the tag table.
const NO_TYPE: u8 = 0x00;

pub fn encode_value(value: &Value, out: &mut Vec<u8>) {
    out.write_u8(value.tag().byte());
    encode_body(value, out);
}

pub fn decode_value(reader: &mut Reader) -> Result<Value, DecodeError> {
    let offset = reader.offset();
    let tag = tag_at(reader.u8()?, offset)?;
    decode_body(tag, reader)
}

fn encode_body(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => {}
        Value::Bool(b) => out.write_u8(*b as u8),
        Value::Byte(b) => out.write_u8(*b as u8),
        Value::Short(s) => out.write_i16(*s),
        Value::Int(i) => out.write_i32(*i),
        Value::Long(l) => out.write_i64(*l),
        Value::Float(f) => out.write_f32(*f),
        Value::Double(d) => out.write_f64(*d),
        Value::String(s) => out.write_str16(s),
        Value::ByteArray(bytes) => {
            out.write_u32(bytes.len() as u32);
            out.write_bytes(bytes);
        }
        Value::IntArray(items) => {
            out.write_u32(items.len() as u32);
            for i in items {
                out.write_i32(*i);
            }
        }
        Value::StringArray(items) => {
            out.write_u16(items.len() as u16);
            for s in items {
                out.write_str16(s);
            }
        }
        Value::TypedArray { element_tag, items } => {
            out.write_u16(items.len() as u16);
            out.write_u8(element_tag.byte());
            for item in items {
                encode_body(item, out);
            }
        }
        Value::ObjectArray(items) => {
            out.write_u16(items.len() as u16);
            for item in items {
                encode_value(item, out);
            }
        }
        Value::Hashtable(pairs) => {
            out.write_u16(pairs.len() as u16);
            for (k, v) in pairs {
                encode_value(k, out);
                encode_value(v, out);
            }
        }
        Value::Dictionary(dict) => {
            out.write_u8(dict.key_tag.map(Tag::byte).unwrap_or(NO_TYPE));
            out.write_u8(dict.value_tag.map(Tag::byte).unwrap_or(NO_TYPE));
            out.write_u16(dict.entries.len() as u16);
            for (k, v) in &dict.entries {
                match dict.key_tag {
                    Some(_) => encode_body(k, out),
                    None => encode_value(k, out),
                }
                match dict.value_tag {
                    Some(_) => encode_body(v, out),
                    None => encode_value(v, out),
                }
            }
        }
        Value::Custom(custom) => custom.encode(out),
    }
}

fn decode_body(tag: Tag, reader: &mut Reader) -> Result<Value, DecodeError> {
    Ok(match tag {
        Tag::Null => Value::Null,
        Tag::Bool => Value::Bool(reader.u8()? != 0),
        Tag::Byte => Value::Byte(reader.u8()? as i8),
        Tag::Short => Value::Short(reader.i16()?),
        Tag::Int => Value::Int(reader.i32()?),
        Tag::Long => Value::Long(reader.i64()?),
        Tag::Float => Value::Float(reader.f32()?),
        Tag::Double => Value::Double(reader.f64()?),
        Tag::String => {
            let len = reader.len16()?;
            Value::String(reader.utf8(len)?)
        }
        Tag::ByteArray => {
            let len = reader.len32()?;
            Value::ByteArray(reader.bytes(len)?.to_vec())
        }
        Tag::IntArray => {
            let count = reader.len32()?;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(reader.i32()?);
            }
            Value::IntArray(items)
        }
        Tag::StringArray => {
            let count = reader.u16()?;
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let len = reader.len16()?;
                items.push(reader.utf8(len)?);
            }
            Value::StringArray(items)
        }
        Tag::TypedArray => {
            let count = reader.u16()?;
            let offset = reader.offset();
            let element_tag = tag_at(reader.u8()?, offset)?;
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(decode_body(element_tag, reader)?);
            }
            Value::TypedArray { element_tag, items }
        }
        Tag::ObjectArray => {
            let count = reader.u16()?;
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(decode_value(reader)?);
            }
            Value::ObjectArray(items)
        }
        Tag::Hashtable => {
            let count = reader.u16()?;
            let mut pairs = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let k = decode_value(reader)?;
                let v = decode_value(reader)?;
                pairs.push((k, v));
            }
            Value::Hashtable(pairs)
        }
        Tag::Dictionary => {
            let key_byte = reader.u8()?;
            let value_byte = reader.u8()?;
            let key_tag = if key_byte == NO_TYPE {
                None
            } else {
                Some(tag_at(key_byte, reader.offset() - 2)?)
            };
            let value_tag = if value_byte == NO_TYPE {
                None
            } else {
                Some(tag_at(value_byte, reader.offset() - 1)?)
            };
            let count = reader.u16()?;
            let mut entries = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let k = match key_tag {
                    Some(t) => decode_body(t, reader)?,
                    None => decode_value(reader)?,
                };
                let v = match value_tag {
                    Some(t) => decode_body(t, reader)?,
                    None => decode_value(reader)?,
                };
                entries.push((k, v));
            }
            Value::Dictionary(Dictionary {
                key_tag,
                value_tag,
                entries,
            })
        }
        Tag::Custom => Value::Custom(CustomData::decode(reader)?),
    })
}
