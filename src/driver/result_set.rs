//! Result streaming and typed column access.
//!
//! Column indices are 0-based; row numbers are 1-based. Navigation other
//! than [`ResultSet::next`] only moves within the buffered batch, and rows
//! released by a forward scan cannot be revisited.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tracing::debug;

use super::connection::NativeStream;
use super::cursor::{Cursor, Row};
use super::statement::Statement;
use crate::error::{Error, Result};
use crate::protocol::codec::{ByteOrder, Charset};
use crate::protocol::messages::ExecuteReply;
use crate::protocol::types::FieldDescriptor;
use crate::protocol::value::{self, DecodeFailure, Value};

/// Rows of an executed query.
pub struct ResultSet<'s, 'c, S> {
    stmt: &'s mut Statement<'c, S>,
    fields: Arc<[FieldDescriptor]>,
    cursor: Cursor,
    byte_order: ByteOrder,
    charset: Charset,
    /// Rows in batches already replaced.
    row_offset: u64,
    affected: u64,
    aborted: bool,
}

impl<'s, 'c, S: NativeStream> ResultSet<'s, 'c, S> {
    pub(crate) fn new(
        stmt: &'s mut Statement<'c, S>,
        fields: Arc<[FieldDescriptor]>,
        reply: ExecuteReply,
    ) -> Self {
        let byte_order = stmt.conn.byte_order();
        let charset = stmt.conn.charset();
        Self {
            stmt,
            fields,
            cursor: Cursor::new(reply.rows.unwrap_or_default(), reply.has_remain),
            byte_order,
            charset,
            row_offset: 0,
            affected: reply.affected,
            aborted: false,
        }
    }

    fn check(&self) -> Result<()> {
        if self.aborted {
            Err(Error::ResultAborted)
        } else {
            Ok(())
        }
    }

    /// Released-row errors carry the row number across all batches.
    fn absolute_row(&self, result: Result<bool>) -> Result<bool> {
        result.map_err(|e| match e {
            Error::RowReleased(n) => Error::RowReleased(self.row_offset as usize + n),
            other => other,
        })
    }

    /// Advance to the next row, fetching one more batch from the server
    /// when the buffered one is exhausted. A failed fetch aborts the result.
    pub async fn next(&mut self) -> Result<bool> {
        self.check()?;
        if self.cursor.advance() {
            return Ok(true);
        }
        if !self.cursor.has_remain() {
            return Ok(false);
        }
        match self.stmt.fetch_batch(self.fields.len()).await {
            Ok(reply) => {
                self.row_offset += self.cursor.total() as u64;
                debug!(
                    rows = reply.rows.len(),
                    has_remain = reply.has_remain,
                    offset = self.row_offset,
                    "fetched batch"
                );
                self.cursor.replace(reply.rows, reply.has_remain);
                Ok(self.cursor.advance())
            }
            Err(e) => {
                self.aborted = true;
                Err(e)
            }
        }
    }

    pub fn previous(&mut self) -> Result<bool> {
        self.check()?;
        let moved = self.cursor.previous();
        self.absolute_row(moved)
    }

    /// Position on row `row` of the buffered batch (1-based, negative from
    /// the end, `0` before the first). Out-of-range targets clamp to the
    /// batch boundaries and return `false`.
    pub fn absolute(&mut self, row: i64) -> Result<bool> {
        self.check()?;
        let moved = self.cursor.absolute(row);
        self.absolute_row(moved)
    }

    pub fn relative(&mut self, offset: i64) -> Result<bool> {
        self.check()?;
        let moved = self.cursor.relative(offset);
        self.absolute_row(moved)
    }

    pub fn first(&mut self) -> Result<bool> {
        self.check()?;
        let moved = self.cursor.first();
        self.absolute_row(moved)
    }

    pub fn last(&mut self) -> Result<bool> {
        self.check()?;
        let moved = self.cursor.last();
        self.absolute_row(moved)
    }

    pub fn before_first(&mut self) -> Result<()> {
        self.check()?;
        self.cursor.before_first();
        Ok(())
    }

    pub fn after_last(&mut self) -> Result<()> {
        self.check()?;
        self.cursor.after_last();
        Ok(())
    }

    pub fn columns(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Index of the column called `name`, ignoring ASCII case.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Current row number across all batches, when on a row.
    pub fn row_number(&self) -> Option<u64> {
        if self.aborted || !self.cursor.on_row() {
            return None;
        }
        Some(self.row_offset + self.cursor.position() as u64 + 1)
    }

    /// Rows reported affected by the execute.
    pub fn affected(&self) -> u64 {
        self.affected
    }

    /// Whether the server still holds rows beyond the buffered batch.
    pub fn has_remain(&self) -> bool {
        self.cursor.has_remain()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// The current row.
    pub fn row(&self) -> Result<&Row> {
        self.check()?;
        self.cursor.current().map_err(|e| match e {
            Error::RowReleased(n) => Error::RowReleased(self.row_offset as usize + n),
            other => other,
        })
    }

    fn field(&self, index: usize) -> Result<&FieldDescriptor> {
        self.fields.get(index).ok_or(Error::ColumnOutOfRange {
            index,
            count: self.fields.len(),
        })
    }

    /// Raw bytes of column `index`; `None` is SQL NULL.
    pub fn get_raw(&self, index: usize) -> Result<Option<&Bytes>> {
        self.field(index)?;
        self.row()?.get(index).ok_or(Error::ColumnOutOfRange {
            index,
            count: self.fields.len(),
        })
    }

    pub fn is_null(&self, index: usize) -> Result<bool> {
        Ok(self.get_raw(index)?.is_none())
    }

    fn decode_error(&self, index: usize, failure: DecodeFailure) -> Error {
        Error::Decode {
            column: self
                .fields
                .get(index)
                .map_or_else(|| format!("#{index}"), |f| f.name.clone()),
            target: failure.target,
            reason: failure.reason,
        }
    }

    fn typed<T>(
        &self,
        index: usize,
        decode: impl FnOnce(&[u8], ByteOrder) -> std::result::Result<T, DecodeFailure>,
    ) -> Result<Option<T>> {
        match self.get_raw(index)? {
            None => Ok(None),
            Some(bytes) => decode(&bytes[..], self.byte_order)
                .map(Some)
                .map_err(|f| self.decode_error(index, f)),
        }
    }

    /// Column decoded according to its declared type.
    pub fn get_value(&self, index: usize) -> Result<Value> {
        let sql_type = self.field(index)?.sql_type;
        let raw = self.get_raw(index)?;
        value::decode_value(raw, sql_type, self.byte_order, self.charset)
            .map_err(|f| self.decode_error(index, f))
    }

    pub fn get_i64(&self, index: usize) -> Result<Option<i64>> {
        self.typed(index, value::decode_i64)
    }

    pub fn get_u64(&self, index: usize) -> Result<Option<u64>> {
        self.typed(index, value::decode_u64)
    }

    pub fn get_f64(&self, index: usize) -> Result<Option<f64>> {
        self.typed(index, value::decode_f64)
    }

    pub fn get_bool(&self, index: usize) -> Result<Option<bool>> {
        self.typed(index, |b, _| value::decode_bool(b))
    }

    /// Packed decimal rendered as text.
    pub fn get_numeric(&self, index: usize) -> Result<Option<String>> {
        self.typed(index, |b, _| value::decode_numeric_text(b))
    }

    pub fn get_date(&self, index: usize) -> Result<Option<NaiveDate>> {
        self.typed(index, value::decode_date)
    }

    pub fn get_time(&self, index: usize) -> Result<Option<NaiveTime>> {
        self.typed(index, value::decode_time)
    }

    pub fn get_timestamp(&self, index: usize) -> Result<Option<NaiveDateTime>> {
        self.typed(index, value::decode_timestamp)
    }

    /// Text columns decoded with the session charset; other types in
    /// their display form.
    pub fn get_string(&self, index: usize) -> Result<Option<String>> {
        Ok(match self.get_value(index)? {
            Value::Null => None,
            Value::Text(s) => Some(s),
            other => Some(other.to_string()),
        })
    }

    pub fn get_bytes(&self, index: usize) -> Result<Option<Bytes>> {
        Ok(self.get_raw(index)?.cloned())
    }

    /// Every column of the current row, decoded.
    pub fn values(&self) -> Result<Vec<Value>> {
        (0..self.fields.len()).map(|i| self.get_value(i)).collect()
    }
}
