//! Binary codec for cache files
//!
//! Primitive encodings, all big-endian:
//!
//! ```text
//! Int       4 bytes, two's complement
//! Bool      1 byte, 0 or 1
//! String    Int byte length, then UTF-8 bytes
//! Double    String holding the shortest round-trip decimal text
//! DateTime  String holding "dd.MM.yyyy HH:mm:ss" or a sentinel:
//!           "NULL", "LocalDateTime.MIN", "LocalDateTime.MAX"
//! ```
//!
//! The format carries no version marker; bytes that fail to decode are
//! treated as corruption by the caller.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::NaiveDateTime;

use crate::error::{CacheError, Result};

/// Sentinel for a null timestamp
pub const NULL_SENTINEL: &str = "NULL";
/// Sentinel for [`NaiveDateTime::MIN`]
pub const MIN_SENTINEL: &str = "LocalDateTime.MIN";
/// Sentinel for [`NaiveDateTime::MAX`]
pub const MAX_SENTINEL: &str = "LocalDateTime.MAX";

const PRIMARY_FORMAT: &str = "%d.%m.%Y %H:%M:%S";
const FALLBACK_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const SQL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a timestamp for the cache files
pub fn format_datetime(value: Option<NaiveDateTime>) -> String {
    match value {
        None => NULL_SENTINEL.to_string(),
        Some(dt) if dt == NaiveDateTime::MIN => MIN_SENTINEL.to_string(),
        Some(dt) if dt == NaiveDateTime::MAX => MAX_SENTINEL.to_string(),
        Some(dt) => dt.format(PRIMARY_FORMAT).to_string(),
    }
}

/// Parse a timestamp written by [`format_datetime`]
///
/// Sentinels are checked first, then the primary format, then
/// `yyyy-MM-dd HH:mm:ss`.
pub fn parse_datetime(text: &str) -> Result<Option<NaiveDateTime>> {
    match text {
        NULL_SENTINEL => Ok(None),
        MIN_SENTINEL => Ok(Some(NaiveDateTime::MIN)),
        MAX_SENTINEL => Ok(Some(NaiveDateTime::MAX)),
        _ => NaiveDateTime::parse_from_str(text, PRIMARY_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(text, FALLBACK_FORMAT))
            .map(Some)
            .map_err(|e| CacheError::codec(format!("invalid timestamp '{text}': {e}"))),
    }
}

/// Parse a server-side `yyyy-MM-dd HH:mm:ss` timestamp; empty and `NULL` are null
pub fn parse_sql_datetime(text: &str) -> Result<Option<NaiveDateTime>> {
    let text = text.trim();
    if text.is_empty() || text.eq_ignore_ascii_case(NULL_SENTINEL) {
        return Ok(None);
    }
    NaiveDateTime::parse_from_str(text, SQL_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .map(Some)
        .map_err(|e| CacheError::codec(format!("invalid server timestamp '{text}': {e}")))
}

/// Format a timestamp the way the server stores it
pub fn format_sql_datetime(value: Option<NaiveDateTime>) -> String {
    match value {
        Some(dt) => dt.format(SQL_FORMAT).to_string(),
        None => NULL_SENTINEL.to_string(),
    }
}

/// Growable big-endian writer
#[derive(Debug, Default)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    /// Empty encoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Encoder with `capacity` bytes preallocated
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Write a big-endian Int
    pub fn put_int(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    /// Write a Bool as one byte
    pub fn put_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    /// Write a count or byte length; anything past `i32::MAX` is a codec error
    pub fn put_len(&mut self, len: usize) -> Result<()> {
        let n = i32::try_from(len)
            .map_err(|_| CacheError::codec(format!("length {len} does not fit an Int")))?;
        self.buf.put_i32(n);
        Ok(())
    }

    /// Write an Int byte length followed by the UTF-8 bytes
    pub fn put_string(&mut self, value: &str) -> Result<()> {
        self.put_len(value.len())?;
        self.buf.put_slice(value.as_bytes());
        Ok(())
    }

    /// Write a Double as its shortest round-trip text
    pub fn put_double(&mut self, value: f64) -> Result<()> {
        self.put_string(&value.to_string())
    }

    /// Write a timestamp in the cache text format or as a sentinel
    pub fn put_datetime(&mut self, value: Option<NaiveDateTime>) -> Result<()> {
        self.put_string(&format_datetime(value))
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing was written
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finish writing and hand back the buffer
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Bounds-checked reader over a byte slice
#[derive(Debug)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Reader over `buf`
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(CacheError::codec(format!(
                "truncated {what}: need {n} bytes, {} left",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    /// Read a big-endian Int
    pub fn get_int(&mut self) -> Result<i32> {
        self.need(4, "int")?;
        Ok(self.buf.get_i32())
    }

    /// Read a non-negative count
    pub fn get_len(&mut self) -> Result<usize> {
        let n = self.get_int()?;
        usize::try_from(n).map_err(|_| CacheError::codec(format!("negative length {n}")))
    }

    /// Read a Bool; any byte other than 0 or 1 is an error
    pub fn get_bool(&mut self) -> Result<bool> {
        self.need(1, "bool")?;
        match self.buf.get_u8() {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CacheError::codec(format!("invalid bool byte {other}"))),
        }
    }

    /// Read an Int-length UTF-8 string
    pub fn get_string(&mut self) -> Result<String> {
        let len = self.get_len()?;
        self.need(len, "string")?;
        let (head, tail) = self.buf.split_at(len);
        let text = std::str::from_utf8(head)
            .map_err(|e| CacheError::codec(format!("invalid UTF-8 in string: {e}")))?
            .to_string();
        self.buf = tail;
        Ok(text)
    }

    /// Read a Double from its decimal text
    pub fn get_double(&mut self) -> Result<f64> {
        let text = self.get_string()?;
        text.trim()
            .parse::<f64>()
            .map_err(|e| CacheError::codec(format!("invalid double '{text}': {e}")))
    }

    /// Read a timestamp written by [`Encoder::put_datetime`]
    pub fn get_datetime(&mut self) -> Result<Option<NaiveDateTime>> {
        let text = self.get_string()?;
        parse_datetime(&text)
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Whether every byte was consumed
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_int_is_big_endian() {
        let mut enc = Encoder::new();
        enc.put_int(0x0102_0304);
        assert_eq!(&enc.freeze()[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_string_layout() {
        let mut enc = Encoder::new();
        enc.put_string("äb").unwrap();
        let bytes = enc.freeze();
        assert_eq!(&bytes[..4], &[0, 0, 0, 3]);
        assert_eq!(Decoder::new(&bytes).get_string().unwrap(), "äb");
    }

    #[test]
    fn test_mixed_sequence() {
        let mut enc = Encoder::new();
        enc.put_int(-7);
        enc.put_bool(true);
        enc.put_double(0.1).unwrap();
        enc.put_datetime(Some(dt(2024, 2, 29, 23, 59, 1))).unwrap();
        enc.put_datetime(None).unwrap();
        let bytes = enc.freeze();

        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.get_int().unwrap(), -7);
        assert!(dec.get_bool().unwrap());
        assert_eq!(dec.get_double().unwrap(), 0.1);
        assert_eq!(dec.get_datetime().unwrap(), Some(dt(2024, 2, 29, 23, 59, 1)));
        assert_eq!(dec.get_datetime().unwrap(), None);
        assert!(dec.is_empty());
    }

    #[test]
    fn test_datetime_text_forms() {
        assert_eq!(
            format_datetime(Some(dt(2024, 3, 1, 7, 5, 9))),
            "01.03.2024 07:05:09"
        );
        assert_eq!(format_datetime(None), "NULL");
        assert_eq!(format_datetime(Some(NaiveDateTime::MIN)), "LocalDateTime.MIN");
        assert_eq!(format_datetime(Some(NaiveDateTime::MAX)), "LocalDateTime.MAX");

        assert_eq!(parse_datetime("LocalDateTime.MAX").unwrap(), Some(NaiveDateTime::MAX));
        assert_eq!(parse_datetime("LocalDateTime.MIN").unwrap(), Some(NaiveDateTime::MIN));
        assert_eq!(
            parse_datetime("2024-03-01 17:05:09").unwrap(),
            Some(dt(2024, 3, 1, 17, 5, 9))
        );
        assert!(parse_datetime("yesterday").is_err());
    }

    #[test]
    fn test_sql_datetime() {
        assert_eq!(parse_sql_datetime("").unwrap(), None);
        assert_eq!(parse_sql_datetime("NULL").unwrap(), None);
        assert_eq!(
            parse_sql_datetime("2023-12-31 08:00:00").unwrap(),
            Some(dt(2023, 12, 31, 8, 0, 0))
        );
        assert_eq!(
            format_sql_datetime(Some(dt(2023, 12, 31, 8, 0, 0))),
            "2023-12-31 08:00:00"
        );
        assert!(parse_sql_datetime("31.12.2023").is_err());
    }

    #[test]
    fn test_truncated_input_is_an_error() {
        let mut enc = Encoder::new();
        enc.put_string("hello").unwrap();
        let bytes = enc.freeze();

        assert!(Decoder::new(&bytes[..6]).get_string().is_err());
        assert!(Decoder::new(&bytes[..2]).get_int().is_err());
        assert!(Decoder::new(&[]).get_bool().is_err());
    }

    #[test]
    fn test_length_past_int_range_is_rejected() {
        let mut enc = Encoder::new();
        enc.put_len(i32::MAX as usize).unwrap();
        let err = enc.put_len(i32::MAX as usize + 1).unwrap_err();
        assert!(err.is_corruption());
        assert_eq!(enc.len(), 4);
    }

    #[test]
    fn test_negative_length_and_bad_utf8() {
        assert!(Decoder::new(&[0xff, 0xff, 0xff, 0xff]).get_string().is_err());
        assert!(Decoder::new(&[0, 0, 0, 1, 0xff]).get_string().is_err());
        assert!(Decoder::new(&[2]).get_bool().is_err());
    }
}
