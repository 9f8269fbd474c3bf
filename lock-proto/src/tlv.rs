//! TLV (type-length-value) codec
//!
//! A value is a flat sequence of records:
//!
//! ```text
//! ┌─────┬────────────────────────┬──────────────┐
//! │ tag │ length                 │ value        │
//! │ 1B  │ 1B, or 0xFF + u32 (LE) │ length bytes │
//! └─────┴────────────────────────┴──────────────┘
//! ```
//!
//! Numbers are little-endian. Optional fields are simply left out, repeated
//! fields repeat their tag in order, nested values are a TLV record stored as
//! the value of a tag. Unknown tags are skipped on decode.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{Error, Result};

/// Length byte announcing a 4-byte little-endian length
const LONG_LENGTH: u8 = 0xFF;

/// How UUID fields are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UuidFormat {
    /// Raw 16 bytes (wire default)
    #[default]
    Bytes,
    /// 36-byte hyphenated ASCII
    String,
}

/// How date fields are written, both as `i64`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateFormat {
    /// Whole seconds since the Unix epoch (wire default)
    #[default]
    SecondsSince1970,
    MillisecondsSince1970,
}

/// Codec configuration, passed explicitly to every encode/decode call
///
/// The lock protocol itself always uses `TlvConfig::default()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TlvConfig {
    pub uuid_format: UuidFormat,
    pub date_format: DateFormat,
}

/// A value that can be written as TLV records
pub trait TlvEncode {
    fn encode_tlv(&self, writer: &mut TlvWriter<'_>);
}

/// A value that can be read back from TLV records
pub trait TlvDecode: Sized {
    fn decode_tlv(reader: &TlvReader<'_>) -> Result<Self>;
}

/// Encode a value. Pure and infallible.
pub fn encode<T: TlvEncode + ?Sized>(value: &T, config: &TlvConfig) -> Vec<u8> {
    let mut writer = TlvWriter::new(config);
    value.encode_tlv(&mut writer);
    writer.into_bytes()
}

/// Decode a value. Never panics; malformed input is `InvalidData`.
pub fn decode<T: TlvDecode>(bytes: &[u8], config: &TlvConfig) -> Result<T> {
    let reader = TlvReader::parse(bytes, config)?;
    T::decode_tlv(&reader)
}

/// Appends TLV records to a buffer
pub struct TlvWriter<'a> {
    buf: Vec<u8>,
    config: &'a TlvConfig,
}

impl<'a> TlvWriter<'a> {
    pub fn new(config: &'a TlvConfig) -> Self {
        Self {
            buf: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> &TlvConfig {
        self.config
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn bytes(&mut self, tag: u8, value: &[u8]) {
        self.buf.push(tag);
        if value.len() < usize::from(LONG_LENGTH) {
            self.buf.push(value.len() as u8);
        } else {
            // BLE values never come close to 4 GiB
            debug_assert!(u32::try_from(value.len()).is_ok());
            self.buf.push(LONG_LENGTH);
            self.buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
        }
        self.buf.extend_from_slice(value);
    }

    pub fn u8(&mut self, tag: u8, value: u8) {
        self.bytes(tag, &[value]);
    }

    pub fn u16(&mut self, tag: u8, value: u16) {
        self.bytes(tag, &value.to_le_bytes());
    }

    pub fn u32(&mut self, tag: u8, value: u32) {
        self.bytes(tag, &value.to_le_bytes());
    }

    pub fn u64(&mut self, tag: u8, value: u64) {
        self.bytes(tag, &value.to_le_bytes());
    }

    pub fn i64(&mut self, tag: u8, value: i64) {
        self.bytes(tag, &value.to_le_bytes());
    }

    pub fn bool(&mut self, tag: u8, value: bool) {
        self.u8(tag, u8::from(value));
    }

    pub fn string(&mut self, tag: u8, value: &str) {
        self.bytes(tag, value.as_bytes());
    }

    pub fn uuid(&mut self, tag: u8, value: &Uuid) {
        match self.config.uuid_format {
            UuidFormat::Bytes => self.bytes(tag, value.as_bytes()),
            UuidFormat::String => self.bytes(tag, value.to_string().as_bytes()),
        }
    }

    pub fn date(&mut self, tag: u8, value: &DateTime<Utc>) {
        let raw = match self.config.date_format {
            DateFormat::SecondsSince1970 => value.timestamp(),
            DateFormat::MillisecondsSince1970 => value.timestamp_millis(),
        };
        self.i64(tag, raw);
    }

    pub fn nested<T: TlvEncode + ?Sized>(&mut self, tag: u8, value: &T) {
        let inner = encode(value, self.config);
        self.bytes(tag, &inner);
    }
}

/// Parsed view over a TLV record sequence
///
/// Fields are looked up by tag. A missing required field, a field of the
/// wrong width or an out-of-domain value is `InvalidData`.
pub struct TlvReader<'a> {
    fields: Vec<(u8, &'a [u8])>,
    config: &'a TlvConfig,
}

impl<'a> TlvReader<'a> {
    pub fn parse(bytes: &'a [u8], config: &'a TlvConfig) -> Result<Self> {
        let mut fields = Vec::new();
        let mut rest = bytes;

        while let Some((&tag, tail)) = rest.split_first() {
            let (len, tail) = match tail.split_first() {
                None => {
                    return Err(Error::invalid(format!("record 0x{tag:02x} has no length")));
                }
                Some((&LONG_LENGTH, tail)) => {
                    if tail.len() < 4 {
                        return Err(Error::invalid(format!(
                            "record 0x{tag:02x} long length truncated"
                        )));
                    }
                    let (raw, tail) = tail.split_at(4);
                    let len = u32::from_le_bytes(fixed::<4>(raw, tag)?) as usize;
                    (len, tail)
                }
                Some((&len, tail)) => (usize::from(len), tail),
            };

            if tail.len() < len {
                return Err(Error::invalid(format!(
                    "record 0x{tag:02x} truncated: {len} bytes declared, {} available",
                    tail.len()
                )));
            }

            let (value, tail) = tail.split_at(len);
            fields.push((tag, value));
            rest = tail;
        }

        Ok(Self { fields, config })
    }

    pub fn config(&self) -> &TlvConfig {
        self.config
    }

    pub fn optional_bytes(&self, tag: u8) -> Option<&'a [u8]> {
        self.fields
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, value)| *value)
    }

    pub fn bytes(&self, tag: u8) -> Result<&'a [u8]> {
        self.optional_bytes(tag)
            .ok_or_else(|| Error::invalid(format!("missing field 0x{tag:02x}")))
    }

    /// All values for a repeated tag, in order
    pub fn repeated(&self, tag: u8) -> impl Iterator<Item = &'a [u8]> + '_ {
        self.fields
            .iter()
            .filter(move |(t, _)| *t == tag)
            .map(|(_, value)| *value)
    }

    pub fn array<const N: usize>(&self, tag: u8) -> Result<[u8; N]> {
        fixed::<N>(self.bytes(tag)?, tag)
    }

    pub fn u8(&self, tag: u8) -> Result<u8> {
        let [value] = self.array::<1>(tag)?;
        Ok(value)
    }

    pub fn u16(&self, tag: u8) -> Result<u16> {
        self.array(tag).map(u16::from_le_bytes)
    }

    pub fn u32(&self, tag: u8) -> Result<u32> {
        self.array(tag).map(u32::from_le_bytes)
    }

    pub fn optional_u32(&self, tag: u8) -> Result<Option<u32>> {
        self.optional_bytes(tag)
            .map(|raw| fixed::<4>(raw, tag).map(u32::from_le_bytes))
            .transpose()
    }

    pub fn u64(&self, tag: u8) -> Result<u64> {
        self.array(tag).map(u64::from_le_bytes)
    }

    pub fn i64(&self, tag: u8) -> Result<i64> {
        self.array(tag).map(i64::from_le_bytes)
    }

    pub fn bool(&self, tag: u8) -> Result<bool> {
        match self.u8(tag)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::invalid(format!(
                "field 0x{tag:02x}: {other} is not a boolean"
            ))),
        }
    }

    pub fn string(&self, tag: u8) -> Result<String> {
        std::str::from_utf8(self.bytes(tag)?)
            .map(str::to_owned)
            .map_err(|e| Error::invalid(format!("field 0x{tag:02x}: {e}")))
    }

    pub fn uuid(&self, tag: u8) -> Result<Uuid> {
        self.uuid_value(self.bytes(tag)?, tag)
    }

    pub fn uuid_list(&self, tag: u8) -> Result<Vec<Uuid>> {
        self.repeated(tag)
            .map(|raw| self.uuid_value(raw, tag))
            .collect()
    }

    pub fn date(&self, tag: u8) -> Result<DateTime<Utc>> {
        self.date_value(self.bytes(tag)?, tag)
    }

    pub fn optional_date(&self, tag: u8) -> Result<Option<DateTime<Utc>>> {
        self.optional_bytes(tag)
            .map(|raw| self.date_value(raw, tag))
            .transpose()
    }

    pub fn nested<T: TlvDecode>(&self, tag: u8) -> Result<T> {
        decode(self.bytes(tag)?, self.config)
    }

    pub fn optional_nested<T: TlvDecode>(&self, tag: u8) -> Result<Option<T>> {
        self.optional_bytes(tag)
            .map(|raw| decode(raw, self.config))
            .transpose()
    }

    pub fn list<T: TlvDecode>(&self, tag: u8) -> Result<Vec<T>> {
        self.repeated(tag)
            .map(|raw| decode(raw, self.config))
            .collect()
    }

    fn uuid_value(&self, raw: &[u8], tag: u8) -> Result<Uuid> {
        match self.config.uuid_format {
            UuidFormat::Bytes => Ok(Uuid::from_bytes(fixed::<16>(raw, tag)?)),
            UuidFormat::String => std::str::from_utf8(raw)
                .ok()
                .and_then(|s| Uuid::parse_str(s).ok())
                .ok_or_else(|| Error::invalid(format!("field 0x{tag:02x}: not a UUID"))),
        }
    }

    fn date_value(&self, raw: &[u8], tag: u8) -> Result<DateTime<Utc>> {
        let value = i64::from_le_bytes(fixed::<8>(raw, tag)?);
        let date = match self.config.date_format {
            DateFormat::SecondsSince1970 => DateTime::from_timestamp(value, 0),
            DateFormat::MillisecondsSince1970 => DateTime::from_timestamp_millis(value),
        };
        date.ok_or_else(|| Error::invalid(format!("field 0x{tag:02x}: date out of range")))
    }
}

fn fixed<const N: usize>(raw: &[u8], tag: u8) -> Result<[u8; N]> {
    <[u8; N]>::try_from(raw).map_err(|_| {
        Error::invalid(format!(
            "field 0x{tag:02x}: expected {N} bytes, got {}",
            raw.len()
        ))
    })
}
