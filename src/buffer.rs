//! The growable byte buffer that accumulates ILP rows before a flush.
//!
//! Binary column tags for v2/v3 (typed floats, arrays, decimals) are
//! written by hand with `byteorder::LittleEndian` rather than through a
//! parser-combinator crate, matching the little-endian numeric writes in
//! `mssql/connection/ssrp.rs`.

use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::time::Instant;

/// The ILP encoding dialect in use. v2 adds binary floats and arrays over
/// v1; v3 adds decimals over v2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProtocolVersion {
    V1 = 1,
    V2 = 2,
    V3 = 3,
}

impl ProtocolVersion {
    pub fn supports_binary_floats(self) -> bool {
        self >= ProtocolVersion::V2
    }

    pub fn supports_arrays(self) -> bool {
        self >= ProtocolVersion::V2
    }

    pub fn supports_decimals(self) -> bool {
        self >= ProtocolVersion::V3
    }

    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

const TAG_BINARY_FLOAT: u8 = 0x10;
const TAG_ARRAY: u8 = 0x0e;
const TAG_ARRAY_ELEM_F64: u8 = 0x0a;
const TAG_ARRAY_NULL: u8 = 0x21;
const TAG_DECIMAL: u8 = 0x17;

/// A growable byte buffer holding zero or more complete rows followed by
/// (optionally) one in-progress row.
pub struct Buffer {
    data: Vec<u8>,
    capacity: usize,
    position: usize,
    end_of_last_row: usize,
    pending_row_count: u64,
    last_flush_time: Instant,
    max_buf_size: usize,
    version: ProtocolVersion,
}

impl Buffer {
    pub fn new(init_buf_size: usize, max_buf_size: usize, version: ProtocolVersion) -> Self {
        let capacity = init_buf_size.max(1);
        Buffer {
            data: vec![0u8; capacity],
            capacity,
            position: 0,
            end_of_last_row: 0,
            pending_row_count: 0,
            last_flush_time: Instant::now(),
            max_buf_size,
            version,
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn end_of_last_row(&self) -> usize {
        self.end_of_last_row
    }

    pub fn pending_row_count(&self) -> u64 {
        self.pending_row_count
    }

    pub fn last_flush_time(&self) -> Instant {
        self.last_flush_time
    }

    pub fn is_row_in_progress(&self) -> bool {
        self.position > self.end_of_last_row
    }

    /// Ensure at least `additional` bytes of headroom past `position`,
    /// growing geometrically (doubling) and never past `max_buf_size`.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        let required = self.position + additional;
        if required <= self.capacity {
            return Ok(());
        }
        if required > self.max_buf_size {
            return Err(Error::layout(format!(
                "Max buffer size is {} bytes, requested buffer size: {}",
                self.max_buf_size, required
            )));
        }
        let mut new_cap = self.capacity.max(1);
        while new_cap < required {
            new_cap = new_cap.saturating_mul(2);
        }
        if new_cap > self.max_buf_size {
            new_cap = self.max_buf_size;
        }
        self.data.resize(new_cap, 0);
        self.capacity = new_cap;
        Ok(())
    }

    fn push_byte(&mut self, b: u8) -> Result<()> {
        self.reserve(1)?;
        self.data[self.position] = b;
        self.position += 1;
        Ok(())
    }

    fn push_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.reserve(bytes.len())?;
        let end = self.position + bytes.len();
        self.data[self.position..end].copy_from_slice(bytes);
        self.position = end;
        Ok(())
    }

    /// Returns the committed prefix `[0..end_of_last_row)`, or `None` if
    /// there is nothing to send. Does not mutate the buffer; callers must
    /// invoke [`Buffer::mark_sent`] once the bytes have actually been
    /// delivered, so a failed send leaves the buffer untouched for retry.
    pub fn view_for_send(&self) -> Option<&[u8]> {
        if self.end_of_last_row == 0 {
            None
        } else {
            Some(&self.data[..self.end_of_last_row])
        }
    }

    /// Owned copy of [`Buffer::view_for_send`]. HTTP retries resend this
    /// same snapshot verbatim; the buffer is only compacted once the whole
    /// retry chain succeeds.
    pub fn snapshot_for_send(&self) -> Option<Vec<u8>> {
        self.view_for_send().map(|v| v.to_vec())
    }

    /// Call after a successful send: compacts the in-progress tail down to
    /// offset 0 and resets the row-count/flush-clock bookkeeping.
    pub fn mark_sent(&mut self) {
        let remaining = self.position - self.end_of_last_row;
        self.data.copy_within(self.end_of_last_row..self.position, 0);
        self.position = remaining;
        self.end_of_last_row = 0;
        self.pending_row_count = 0;
        self.last_flush_time = Instant::now();
    }

    pub fn reset(&mut self) {
        self.position = 0;
        self.end_of_last_row = 0;
        self.pending_row_count = 0;
        self.last_flush_time = Instant::now();
    }

    /// Called by the row builder when a row is closed with `at()`/`atNow()`.
    pub(crate) fn commit_row(&mut self) {
        self.end_of_last_row = self.position;
        self.pending_row_count += 1;
    }

    // -- escaping --------------------------------------------------------

    /// Escape rules for unquoted positions: table/column/symbol names and
    /// symbol values. Backslash-escapes space, comma, equals, plus the
    /// universal newline/carriage-return escapes.
    fn write_escaped_unquoted(&mut self, s: &str) -> Result<()> {
        for ch in s.chars() {
            match ch {
                ' ' | ',' | '=' | '\\' => {
                    self.push_byte(b'\\')?;
                    self.push_utf8_char(ch)?;
                }
                '\n' => self.push_bytes(b"\\n")?,
                '\r' => self.push_bytes(b"\\r")?,
                _ => self.push_utf8_char(ch)?,
            }
        }
        Ok(())
    }

    /// Escape rules inside a double-quoted string column value: only `"`
    /// and `\` need a backslash, plus the universal newline escapes.
    fn write_escaped_quoted(&mut self, s: &str) -> Result<()> {
        for ch in s.chars() {
            match ch {
                '"' | '\\' => {
                    self.push_byte(b'\\')?;
                    self.push_utf8_char(ch)?;
                }
                '\n' => self.push_bytes(b"\\n")?,
                '\r' => self.push_bytes(b"\\r")?,
                _ => self.push_utf8_char(ch)?,
            }
        }
        Ok(())
    }

    fn push_utf8_char(&mut self, ch: char) -> Result<()> {
        let mut buf = [0u8; 4];
        let s = ch.encode_utf8(&mut buf);
        self.push_bytes(s.as_bytes())
    }

    // -- row framing -------------------------------------------------------

    pub(crate) fn write_table_name(&mut self, name: &str) -> Result<()> {
        self.write_escaped_unquoted(name)
    }

    pub(crate) fn write_symbol(&mut self, name: &str, value: &str) -> Result<()> {
        self.push_byte(b',')?;
        self.write_escaped_unquoted(name)?;
        self.push_byte(b'=')?;
        self.write_escaped_unquoted(value)
    }

    pub(crate) fn begin_columns(&mut self) -> Result<()> {
        self.push_byte(b' ')
    }

    pub(crate) fn write_column_sep(&mut self) -> Result<()> {
        self.push_byte(b',')
    }

    fn write_column_name(&mut self, name: &str) -> Result<()> {
        self.write_escaped_unquoted(name)?;
        self.push_byte(b'=')
    }

    pub(crate) fn write_int_column(&mut self, name: &str, value: i64) -> Result<()> {
        self.write_column_name(name)?;
        let mut itoa_buf = itoa::Buffer::new();
        self.push_bytes(itoa_buf.format(value).as_bytes())?;
        self.push_byte(b'i')
    }

    pub(crate) fn write_bool_column(&mut self, name: &str, value: bool) -> Result<()> {
        self.write_column_name(name)?;
        self.push_byte(if value { b't' } else { b'f' })
    }

    pub(crate) fn write_string_column(&mut self, name: &str, value: &str) -> Result<()> {
        self.write_column_name(name)?;
        self.push_byte(b'"')?;
        self.write_escaped_quoted(value)?;
        self.push_byte(b'"')
    }

    /// Text-mode float (always used in v1; used in v2/v3 only if the caller
    /// disables binary floats — this crate always prefers binary floats
    /// once the negotiated version supports them).
    pub(crate) fn write_float_column_text(&mut self, name: &str, value: f64) -> Result<()> {
        self.write_column_name(name)?;
        let mut ryu_buf = ryu::Buffer::new();
        self.push_bytes(ryu_buf.format(value).as_bytes())
    }

    /// Binary float column: `name=` then `=` + tag(0x10) + 8 bytes f64 LE.
    pub(crate) fn write_float_column_binary(&mut self, name: &str, value: f64) -> Result<()> {
        self.write_column_name(name)?;
        self.push_byte(b'=')?;
        self.push_byte(TAG_BINARY_FLOAT)?;
        let mut buf = [0u8; 8];
        LittleEndian::write_f64(&mut buf, value);
        self.push_bytes(&buf)
    }

    /// Microsecond-resolution timestamp column: `<digits>t`.
    pub(crate) fn write_timestamp_column_us(&mut self, name: &str, micros: i64) -> Result<()> {
        self.write_column_name(name)?;
        let mut itoa_buf = itoa::Buffer::new();
        self.push_bytes(itoa_buf.format(micros).as_bytes())?;
        self.push_byte(b't')
    }

    /// Nanosecond-resolution timestamp column (v2+ only, BigInt input):
    /// `<digits>n`.
    pub(crate) fn write_timestamp_column_ns(&mut self, name: &str, nanos: i64) -> Result<()> {
        self.write_column_name(name)?;
        let mut itoa_buf = itoa::Buffer::new();
        self.push_bytes(itoa_buf.format(nanos).as_bytes())?;
        self.push_byte(b'n')
    }

    /// Designated timestamp: always nanoseconds, no trailing type letter.
    pub(crate) fn write_designated_timestamp(&mut self, nanos: i64) -> Result<()> {
        self.push_byte(b' ')?;
        let mut itoa_buf = itoa::Buffer::new();
        self.push_bytes(itoa_buf.format(nanos).as_bytes())
    }

    pub(crate) fn finish_row(&mut self) -> Result<()> {
        self.push_byte(b'\n')?;
        self.commit_row();
        Ok(())
    }

    /// Array column: `name==` then tag(0x0e) + elem-type(0x0a) + dim-count
    /// byte + per-dimension u32 LE lengths + row-major f64 LE payload.
    pub(crate) fn write_array_column(&mut self, name: &str, shape: &[u32], data: &[f64]) -> Result<()> {
        self.write_column_name(name)?;
        self.push_byte(b'=')?;
        self.push_byte(TAG_ARRAY)?;
        self.push_byte(TAG_ARRAY_ELEM_F64)?;
        self.push_byte(shape.len() as u8)?;
        for &len in shape {
            let mut buf = [0u8; 4];
            LittleEndian::write_u32(&mut buf, len);
            self.push_bytes(&buf)?;
        }
        for &v in data {
            let mut buf = [0u8; 8];
            LittleEndian::write_f64(&mut buf, v);
            self.push_bytes(&buf)?;
        }
        Ok(())
    }

    /// A null array value: `name==` then tag(0x0e) + 0x21.
    pub(crate) fn write_null_array_column(&mut self, name: &str) -> Result<()> {
        self.write_column_name(name)?;
        self.push_byte(b'=')?;
        self.push_byte(TAG_ARRAY)?;
        self.push_byte(TAG_ARRAY_NULL)
    }

    /// Decimal text literal column: unquoted literal + `d` suffix.
    pub(crate) fn write_decimal_column_text(&mut self, name: &str, literal: &str) -> Result<()> {
        self.write_column_name(name)?;
        self.push_bytes(literal.as_bytes())?;
        self.push_byte(b'd')
    }

    /// Decimal binary column: `name==` then tag(0x17) + scale byte + length
    /// byte + two's-complement big-endian payload (empty payload = NULL).
    pub(crate) fn write_decimal_column_binary(
        &mut self,
        name: &str,
        scale: u8,
        payload: &[u8],
    ) -> Result<()> {
        self.write_column_name(name)?;
        self.push_byte(b'=')?;
        self.push_byte(TAG_DECIMAL)?;
        self.push_byte(scale)?;
        self.push_byte(payload.len() as u8)?;
        self.push_bytes(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_buf() -> Buffer {
        Buffer::new(128, 1024 * 1024, ProtocolVersion::V3)
    }

    #[test]
    fn v1_basic_row() {
        let mut b = new_buf();
        b.write_table_name("prices").unwrap();
        b.write_symbol("instrument", "EURUSD").unwrap();
        b.begin_columns().unwrap();
        b.write_float_column_text("bid", 1.0195).unwrap();
        b.write_column_sep().unwrap();
        b.write_float_column_text("ask", 1.0221).unwrap();
        b.finish_row().unwrap();

        let sent = b.view_for_send().unwrap();
        assert_eq!(
            std::str::from_utf8(sent).unwrap(),
            "prices,instrument=EURUSD bid=1.0195,ask=1.0221\n"
        );
        assert_eq!(b.pending_row_count(), 1);
    }

    #[test]
    fn v1_designated_ns_timestamp() {
        let mut b = new_buf();
        b.write_table_name("tableName").unwrap();
        b.begin_columns().unwrap();
        b.write_bool_column("boolCol", true).unwrap();
        b.write_column_sep().unwrap();
        b.write_timestamp_column_us("timestampCol", 1658484765000000)
            .unwrap();
        b.write_designated_timestamp(1658484769000000123).unwrap();
        b.finish_row().unwrap();

        let sent = b.view_for_send().unwrap();
        assert_eq!(
            std::str::from_utf8(sent).unwrap(),
            "tableName boolCol=t,timestampCol=1658484765000000t 1658484769000000123\n"
        );
    }

    #[test]
    fn v2_float_column_binary() {
        let mut b = new_buf();
        b.write_table_name("tableName").unwrap();
        b.begin_columns().unwrap();
        b.write_float_column_binary("floatField", 123.456).unwrap();
        b.write_column_sep().unwrap();
        b.write_string_column("strField", "hoho").unwrap();
        b.finish_row().unwrap();

        let sent = b.view_for_send().unwrap().to_vec();
        let mut expected = b"tableName floatField=".to_vec();
        expected.push(0x3d);
        expected.push(0x10);
        let mut f = [0u8; 8];
        LittleEndian::write_f64(&mut f, 123.456);
        expected.extend_from_slice(&f);
        expected.extend_from_slice(b",strField=\"hoho\"\n");
        assert_eq!(sent, expected);
    }

    #[test]
    fn v2_array_column_2d() {
        let mut b = new_buf();
        b.write_table_name("tableName").unwrap();
        b.begin_columns().unwrap();
        b.write_array_column("arrayCol", &[2, 1], &[12.3, 23.4])
            .unwrap();
        b.finish_row().unwrap();

        let sent = b.view_for_send().unwrap().to_vec();
        let mut expected = b"tableName arrayCol=".to_vec();
        expected.push(0x3d);
        expected.extend_from_slice(&[0x0e, 0x0a, 0x02]);
        expected.extend_from_slice(&2u32.to_le_bytes());
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.extend_from_slice(&12.3f64.to_le_bytes());
        expected.extend_from_slice(&23.4f64.to_le_bytes());
        expected.push(b'\n');
        assert_eq!(sent, expected);
    }

    #[test]
    fn v3_decimal_binary_negative() {
        let mut b = new_buf();
        b.write_table_name("fx").unwrap();
        b.begin_columns().unwrap();
        b.write_decimal_column_binary("mid", 2, &[0xff, 0xf6]).unwrap();
        b.finish_row().unwrap();

        let sent = b.view_for_send().unwrap().to_vec();
        let mut expected = b"fx mid=".to_vec();
        expected.push(0x3d);
        expected.extend_from_slice(&[0x17, 0x02, 0x02, 0xff, 0xf6]);
        expected.push(b'\n');
        assert_eq!(sent, expected);
    }

    #[test]
    fn escapes_names_and_symbol_values() {
        let mut b = new_buf();
        b.write_table_name("weird table").unwrap();
        b.write_symbol("sym", "a,b=c").unwrap();
        b.begin_columns().unwrap();
        b.write_int_column("n", 42).unwrap();
        b.finish_row().unwrap();
        let sent = std::str::from_utf8(b.view_for_send().unwrap()).unwrap();
        assert_eq!(sent, "weird\\ table,sym=a\\,b\\=c n=42i\n");
    }

    #[test]
    fn string_column_escapes_quotes_and_backslash() {
        let mut b = new_buf();
        b.write_table_name("t").unwrap();
        b.begin_columns().unwrap();
        b.write_string_column("s", "a\"b\\c").unwrap();
        b.finish_row().unwrap();
        let sent = std::str::from_utf8(b.view_for_send().unwrap()).unwrap();
        assert_eq!(sent, "t s=\"a\\\"b\\\\c\"\n");
    }

    #[test]
    fn growth_preserves_bytes_and_caps_at_max() {
        let mut b = Buffer::new(4, 64, ProtocolVersion::V1);
        b.write_table_name("abcdefgh").unwrap();
        assert!(b.capacity() >= 8);
        assert!(b.capacity() <= 64);
        assert_eq!(&b_data_prefix(&b, 8), b"abcdefgh");

        let mut too_big = Buffer::new(4, 8, ProtocolVersion::V1);
        let err = too_big.reserve(100).unwrap_err();
        assert!(matches!(err, Error::Layout(_)));
    }

    fn b_data_prefix(b: &Buffer, n: usize) -> Vec<u8> {
        b.view_for_send_raw(n)
    }

    impl Buffer {
        #[cfg(test)]
        fn view_for_send_raw(&self, n: usize) -> Vec<u8> {
            self.data[..n].to_vec()
        }
    }

    #[test]
    fn flush_is_idempotent_on_empty_commit() {
        let mut b = new_buf();
        b.write_table_name("t").unwrap();
        b.begin_columns().unwrap();
        b.write_int_column("n", 1).unwrap();
        b.finish_row().unwrap();
        assert!(b.snapshot_for_send().is_some());
        b.mark_sent();
        assert!(b.snapshot_for_send().is_none());
    }

    #[test]
    fn reset_clears_pending_row() {
        let mut b = new_buf();
        b.write_table_name("t").unwrap();
        b.begin_columns().unwrap();
        b.write_int_column("n", 1).unwrap();
        b.finish_row().unwrap();
        b.reset();
        assert!(b.snapshot_for_send().is_none());
        assert_eq!(b.position(), 0);
    }
}
