//! Core value types: keys, records, and their binary encoding
//!
//! ## Encoding
//!
//! Keys and records share one little-endian layout:
//! ```text
//! Int:    [tag = 1][i64]
//! String: [tag = 0][i32 length][UTF-8 bytes]
//! ```

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TxError};

/// Table identifier
pub type TableName = String;

/// Logical timestamp (microseconds since the epoch, skew-corrected)
pub type Timestamp = i64;

/// Transaction identifier
pub type TxnId = i64;

/// Client session identifier
pub type SessionId = u64;

const TAG_STRING: u8 = 0;
const TAG_INT: u8 = 1;

/// Primary key of a row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Key {
    String(String),
    Int(i64),
}

/// Row payload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Record {
    String(String),
    Int(i64),
}

impl Key {
    /// Append the encoded key to `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Key::String(s) => put_string(buf, s),
            Key::Int(v) => put_int(buf, *v),
        }
    }

    /// Decode one key from the front of `buf`
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        match get_tag(buf)? {
            TAG_STRING => Ok(Key::String(get_string(buf)?)),
            TAG_INT => Ok(Key::Int(get_i64(buf)?)),
            tag => Err(TxError::Codec(format!("unknown key tag {}", tag))),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            Key::String(s) => 1 + 4 + s.len(),
            Key::Int(_) => 1 + 8,
        }
    }
}

impl Record {
    /// Append the encoded record to `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Record::String(s) => put_string(buf, s),
            Record::Int(v) => put_int(buf, *v),
        }
    }

    /// Decode one record from the front of `buf`
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        match get_tag(buf)? {
            TAG_STRING => Ok(Record::String(get_string(buf)?)),
            TAG_INT => Ok(Record::Int(get_i64(buf)?)),
            tag => Err(TxError::Codec(format!("unknown record tag {}", tag))),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            Record::String(s) => 1 + 4 + s.len(),
            Record::Int(_) => 1 + 8,
        }
    }

    /// Integer payload, if this is an Int record
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Record::Int(v) => Some(*v),
            Record::String(_) => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::String(s) => write!(f, "'{}'", s),
            Key::Int(v) => write!(f, "{}", v),
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::String(s) => write!(f, "'{}'", s),
            Record::Int(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Key::Int(v)
    }
}

impl From<i32> for Key {
    fn from(v: i32) -> Self {
        Key::Int(v as i64)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::String(s)
    }
}

impl From<i64> for Record {
    fn from(v: i64) -> Self {
        Record::Int(v)
    }
}

impl From<i32> for Record {
    fn from(v: i32) -> Self {
        Record::Int(v as i64)
    }
}

impl From<&str> for Record {
    fn from(s: &str) -> Self {
        Record::String(s.to_string())
    }
}

impl From<String> for Record {
    fn from(s: String) -> Self {
        Record::String(s)
    }
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u8(TAG_STRING);
    buf.put_i32_le(s.len() as i32);
    buf.put_slice(s.as_bytes());
}

fn put_int(buf: &mut BytesMut, v: i64) {
    buf.put_u8(TAG_INT);
    buf.put_i64_le(v);
}

fn get_tag(buf: &mut impl Buf) -> Result<u8> {
    if !buf.has_remaining() {
        return Err(TxError::Codec("missing value tag".to_string()));
    }
    Ok(buf.get_u8())
}

pub(crate) fn get_i64(buf: &mut impl Buf) -> Result<i64> {
    if buf.remaining() < 8 {
        return Err(TxError::Codec(format!(
            "need 8 bytes for an integer, {} left",
            buf.remaining()
        )));
    }
    Ok(buf.get_i64_le())
}

fn get_string(buf: &mut impl Buf) -> Result<String> {
    if buf.remaining() < 4 {
        return Err(TxError::Codec("truncated string length".to_string()));
    }
    let len = buf.get_i32_le();
    if len < 0 || buf.remaining() < len as usize {
        return Err(TxError::Codec(format!(
            "string length {} exceeds {} remaining bytes",
            len,
            buf.remaining()
        )));
    }
    let raw = buf.copy_to_bytes(len as usize);
    String::from_utf8(raw.to_vec()).map_err(|e| TxError::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_string_layout() {
        let bytes = Key::from("ab").to_bytes();
        assert_eq!(&bytes[..], &[0, 2, 0, 0, 0, b'a', b'b']);
    }

    #[test]
    fn test_record_int_layout() {
        let bytes = Record::Int(-2).to_bytes();
        assert_eq!(bytes.len(), Record::Int(-2).encoded_len());
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[1..], &(-2i64).to_le_bytes());
    }

    #[test]
    fn test_decode_truncated_string() {
        let mut bytes = Key::from("hello").to_bytes();
        let mut short = bytes.split_to(bytes.len() - 1);
        assert!(Key::decode(&mut short).is_err());
    }

    #[test]
    fn test_decode_unknown_tag() {
        let mut raw = Bytes::from_static(&[9, 0, 0]);
        assert!(Record::decode(&mut raw).is_err());
    }
}
