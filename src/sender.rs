//! The fluent row-builder state machine and the `Sender` that ties
//! `Options`, `Buffer`, and `Transport` together.
//!
//! The "return `&mut Self` so calls chain, `&mut self` so the borrow
//! checker statically rules out concurrent row-building" pattern mirrors
//! the query-builder style of `QueryBuilder` in `sqlx-core`'s
//! `query_builder.rs`: a single exclusive borrow is the whole
//! synchronization story, no runtime lock needed.

use std::time::Duration;

use log::warn;

use crate::buffer::{Buffer, ProtocolVersion};
use crate::config::Options;
use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::value::{ArrayValue, DecimalValue};

const TABLE_DISALLOWED: &[char] = &[
    '.', '?', ',', ':', '\\', '/', '\0', ')', '(', '+', '*', '%', '~', '\n', '\r', '\'', '"',
    '\u{feff}',
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameKind {
    Table,
    ColumnOrSymbol,
}

fn validate_name(name: &str, kind: NameKind, max_name_len: usize) -> Result<()> {
    let what = match kind {
        NameKind::Table => "Table name",
        NameKind::ColumnOrSymbol => "Column name",
    };
    if name.is_empty() {
        return Err(Error::layout(format!("{} must not be empty", what)));
    }
    if name.chars().count() > max_name_len {
        return Err(Error::layout(format!(
            "{} is too long, max length is {}",
            what, max_name_len
        )));
    }
    for ch in name.chars() {
        let code = ch as u32;
        let is_control = ((0x00..=0x1f).contains(&code) && ch != '\n' && ch != '\r')
            || (0x7f..=0x9f).contains(&code);
        if is_control {
            return Err(Error::layout(format!("{} contains a control character", what)));
        }
        if TABLE_DISALLOWED.contains(&ch) {
            return Err(Error::layout(format!(
                "{} contains a disallowed character: '{}'",
                what, ch
            )));
        }
    }
    let starts_with_dash = name.starts_with('-');
    match kind {
        NameKind::Table if starts_with_dash => {
            return Err(Error::layout(format!("{} must not start with '-'", what)))
        }
        NameKind::ColumnOrSymbol if name.contains('-') => {
            return Err(Error::layout(format!("{} must not contain '-'", what)))
        }
        _ => {}
    }
    Ok(())
}

/// Ties configuration, the encoding buffer, and a connected transport
/// together behind the fluent row-builder API. There is no separate
/// `connect()` call and no runtime "already connected" flag:
/// `Sender::connect` both opens the transport and produces the only handle
/// to it, so a double-connect failure mode is unrepresentable here rather
/// than guarded against at runtime.
pub struct Sender {
    options: Options,
    buffer: Buffer,
    transport: Transport,
    has_table: bool,
    has_symbols: bool,
    has_columns: bool,
}

/// Hand-written rather than derived so that `token`/`password` never end up
/// in a log line or panic message via `{:?}`, mirroring `SnowflakeConnection`'s
/// own Debug impl.
impl std::fmt::Debug for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("protocol", &self.options.protocol)
            .field("host", &self.options.host)
            .field("port", &self.options.port)
            .field("protocol_version", &self.buffer.version())
            .field("buffered_bytes", &self.buffer.position())
            .finish()
    }
}

impl Sender {
    pub async fn connect(options: Options) -> Result<Self> {
        options.validate()?;
        let (transport, version) = Transport::connect(&options).await?;
        let buffer = Buffer::new(options.init_buf_size, options.max_buf_size, version);
        Ok(Sender {
            options,
            buffer,
            transport,
            has_table: false,
            has_symbols: false,
            has_columns: false,
        })
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.buffer.version()
    }

    pub fn table(&mut self, name: &str) -> Result<&mut Self> {
        if self.has_table {
            return Err(Error::invalid_api_call("Table name has already been set"));
        }
        validate_name(name, NameKind::Table, self.options.max_name_len)?;
        self.buffer.write_table_name(name)?;
        self.has_table = true;
        Ok(self)
    }

    pub fn symbol(&mut self, name: &str, value: &str) -> Result<&mut Self> {
        if !self.has_table || self.has_columns {
            return Err(Error::invalid_api_call(
                "Symbol can be added only after table name is set and before any column added",
            ));
        }
        validate_name(name, NameKind::ColumnOrSymbol, self.options.max_name_len)?;
        self.buffer.write_symbol(name, value)?;
        self.has_symbols = true;
        Ok(self)
    }

    fn begin_column(&mut self, name: &str) -> Result<()> {
        if !self.has_table {
            return Err(Error::invalid_api_call(
                "Column can be set only after table name is set",
            ));
        }
        validate_name(name, NameKind::ColumnOrSymbol, self.options.max_name_len)?;
        if !self.has_columns {
            self.buffer.begin_columns()?;
        } else {
            self.buffer.write_column_sep()?;
        }
        self.has_columns = true;
        Ok(())
    }

    pub fn int_column(&mut self, name: &str, value: i64) -> Result<&mut Self> {
        self.begin_column(name)?;
        self.buffer.write_int_column(name, value)?;
        Ok(self)
    }

    pub fn bool_column(&mut self, name: &str, value: bool) -> Result<&mut Self> {
        self.begin_column(name)?;
        self.buffer.write_bool_column(name, value)?;
        Ok(self)
    }

    pub fn string_column(&mut self, name: &str, value: &str) -> Result<&mut Self> {
        self.begin_column(name)?;
        self.buffer.write_string_column(name, value)?;
        Ok(self)
    }

    /// Emits a binary float once the negotiated version supports it (v2+);
    /// falls back to the shortest-text form on v1, since v1 has no typed
    /// binary column encoding at all.
    pub fn float_column(&mut self, name: &str, value: f64) -> Result<&mut Self> {
        self.begin_column(name)?;
        if self.buffer.version().supports_binary_floats() {
            self.buffer.write_float_column_binary(name, value)?;
        } else {
            self.buffer.write_float_column_text(name, value)?;
        }
        Ok(self)
    }

    /// Microsecond-precision timestamp column (the default unit; see
    /// [`Sender::timestamp_column_ms`] and [`Sender::timestamp_column_ns`]
    /// for the other units).
    pub fn timestamp_column(&mut self, name: &str, micros: i64) -> Result<&mut Self> {
        self.begin_column(name)?;
        self.buffer.write_timestamp_column_us(name, micros)?;
        Ok(self)
    }

    /// Millisecond-precision timestamp column. Converted to microseconds
    /// before being written, since the wire format has no dedicated
    /// millisecond suffix — "all other unit/type combinations emit
    /// `<digits>t` after converting to microseconds".
    pub fn timestamp_column_ms(&mut self, name: &str, millis: i64) -> Result<&mut Self> {
        self.begin_column(name)?;
        self.buffer.write_timestamp_column_us(name, millis * 1_000)?;
        Ok(self)
    }

    /// Nanosecond-precision timestamp column. Requires protocol v2 or
    /// later, which introduces the `n`-suffixed wire form; v1 callers
    /// should convert to microseconds and use [`Sender::timestamp_column`].
    pub fn timestamp_column_ns(&mut self, name: &str, nanos: i64) -> Result<&mut Self> {
        if !self.buffer.version().supports_binary_floats() {
            return Err(Error::layout(
                "Nanosecond timestamp columns are not supported in protocol v1",
            ));
        }
        self.begin_column(name)?;
        self.buffer.write_timestamp_column_ns(name, nanos)?;
        Ok(self)
    }

    pub fn array_column(&mut self, name: &str, array: &ArrayValue) -> Result<&mut Self> {
        if !self.buffer.version().supports_arrays() {
            return Err(Error::layout("Arrays are not supported in protocol v1"));
        }
        self.begin_column(name)?;
        self.buffer
            .write_array_column(name, array.shape(), array.data())?;
        Ok(self)
    }

    pub fn null_array_column(&mut self, name: &str) -> Result<&mut Self> {
        if !self.buffer.version().supports_arrays() {
            return Err(Error::layout("Arrays are not supported in protocol v1"));
        }
        self.begin_column(name)?;
        self.buffer.write_null_array_column(name)?;
        Ok(self)
    }

    pub fn decimal_column(&mut self, name: &str, value: &DecimalValue) -> Result<&mut Self> {
        if !self.buffer.version().supports_decimals() {
            return Err(Error::layout(
                "Decimals are not supported before protocol v3",
            ));
        }
        self.begin_column(name)?;
        if let Some(text) = value.to_text() {
            self.buffer.write_decimal_column_text(name, text)?;
        } else if let Some((scale, payload)) = value.to_binary() {
            self.buffer
                .write_decimal_column_binary(name, scale, &payload)?;
        } else {
            // A supplied-but-unencodable decimal must never silently elide
            // a column: that no-op path is reserved for genuinely
            // undefined/null inputs, not a value that failed to encode.
            return Err(Error::layout(
                "Decimal value could not be encoded as either text or binary",
            ));
        }
        Ok(self)
    }

    fn ensure_row_has_content(&self) -> Result<()> {
        if !self.has_symbols && !self.has_columns {
            return Err(Error::invalid_api_call(
                "The row must have a symbol or column set before it is closed",
            ));
        }
        Ok(())
    }

    /// Closes the row with an explicit designated timestamp (always
    /// nanosecond-resolution on the wire).
    pub async fn at(&mut self, designated_timestamp_nanos: i64) -> Result<()> {
        self.ensure_row_has_content()?;
        self.buffer
            .write_designated_timestamp(designated_timestamp_nanos)?;
        self.close_row().await
    }

    /// Closes the row without a client-supplied timestamp; the server
    /// assigns ingestion time.
    pub async fn at_now(&mut self) -> Result<()> {
        self.ensure_row_has_content()?;
        self.close_row().await
    }

    async fn close_row(&mut self) -> Result<()> {
        self.buffer.finish_row()?;
        self.has_table = false;
        self.has_symbols = false;
        self.has_columns = false;
        self.maybe_auto_flush().await
    }

    async fn maybe_auto_flush(&mut self) -> Result<()> {
        if !self.options.auto_flush || self.buffer.pending_row_count() == 0 {
            return Ok(());
        }
        let rows_threshold = self.options.effective_auto_flush_rows();
        let interval_threshold = self.options.effective_auto_flush_interval();

        let hit_rows = rows_threshold > 0 && self.buffer.pending_row_count() >= rows_threshold;
        let hit_interval = interval_threshold > Duration::ZERO
            && self.buffer.last_flush_time().elapsed() >= interval_threshold;

        if hit_rows || hit_interval {
            self.flush().await?;
        }
        Ok(())
    }

    /// Sends the committed prefix of the buffer, if any, and compacts on
    /// success. Returns whether any bytes were actually sent.
    pub async fn flush(&mut self) -> Result<bool> {
        let Some(bytes) = self.buffer.snapshot_for_send() else {
            return Ok(false);
        };
        self.transport.send(bytes).await?;
        self.buffer.mark_sent();
        Ok(true)
    }

    /// Drops all buffered content, including any in-progress row, without
    /// sending it.
    pub fn reset(&mut self) {
        self.buffer.reset();
        self.has_table = false;
        self.has_symbols = false;
        self.has_columns = false;
    }

    /// Closes the transport. Any bytes still in the buffer (committed or
    /// in-progress) are lost; this is logged at warn level rather than
    /// silently dropped.
    pub async fn close(self) -> Result<()> {
        if self.buffer.position() > 0 {
            warn!(
                "Buffer contains data which has not been flushed before closing the sender, and it will be lost [position={}]",
                self.buffer.position()
            );
        }
        self.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_table_reset() {
        assert!(validate_name("", NameKind::Table, 127).is_err());
        assert!(validate_name("-bad", NameKind::Table, 127).is_err());
        assert!(validate_name("good-name", NameKind::Table, 127).is_ok());
    }

    #[test]
    fn column_names_reject_hyphen_anywhere() {
        assert!(validate_name("a-b", NameKind::ColumnOrSymbol, 127).is_err());
        assert!(validate_name("ab", NameKind::ColumnOrSymbol, 127).is_ok());
    }

    #[test]
    fn names_reject_disallowed_characters() {
        for bad in ['.', '?', ',', ':', '\\', '/', ')', '(', '+', '*', '%', '~', '\'', '"'] {
            let name = format!("a{}b", bad);
            assert!(validate_name(&name, NameKind::Table, 127).is_err(), "{:?}", bad);
        }
    }

    #[test]
    fn names_reject_del_and_c1_control_characters() {
        for bad in ['\u{7f}', '\u{85}', '\u{9f}'] {
            let name = format!("a{}b", bad);
            assert!(validate_name(&name, NameKind::Table, 127).is_err(), "{:?}", bad);
        }
    }

    #[test]
    fn names_enforce_max_length() {
        let long = "a".repeat(200);
        assert!(validate_name(&long, NameKind::Table, 127).is_err());
    }
}
