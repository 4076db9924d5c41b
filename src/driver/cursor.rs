//! In-memory row batch and cursor.
//!
//! The cursor index covers `[-1, total]`: `-1` is before the first row and
//! `total` is after the last. Advancing forward to row `i` releases row
//! `i - 2`, so a sequential scan holds at most two rows of a batch alive.
//! Released rows cannot be revisited; moving onto one is an error and
//! leaves the cursor where it was.

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::protocol::messages::RawRow;

/// One buffered row: raw column slices plus their byte lengths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    columns: Vec<Option<Bytes>>,
    lengths: Vec<u32>,
}

impl Row {
    pub fn new(columns: RawRow) -> Self {
        let lengths = columns
            .iter()
            .map(|c| c.as_ref().map_or(0, |b| b.len() as u32))
            .collect();
        Self { columns, lengths }
    }

    /// Raw bytes of column `index`; `None` inside is SQL NULL.
    pub fn get(&self, index: usize) -> Option<Option<&Bytes>> {
        self.columns.get(index).map(Option::as_ref)
    }

    /// Effective byte length of column `index` (0 for NULL).
    pub fn length(&self, index: usize) -> Option<u32> {
        self.lengths.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Rows currently buffered for a result.
#[derive(Debug)]
pub(crate) struct Cursor {
    rows: Vec<Option<Row>>,
    position: isize,
    has_remain: bool,
}

impl Cursor {
    pub fn new(rows: Vec<RawRow>, has_remain: bool) -> Self {
        Self {
            rows: rows.into_iter().map(|r| Some(Row::new(r))).collect(),
            position: -1,
            has_remain,
        }
    }

    /// Swap in the next batch, positioned before its first row.
    pub fn replace(&mut self, rows: Vec<RawRow>, has_remain: bool) {
        *self = Self::new(rows, has_remain);
    }

    pub fn total(&self) -> usize {
        self.rows.len()
    }

    pub fn position(&self) -> isize {
        self.position
    }

    pub fn has_remain(&self) -> bool {
        self.has_remain
    }

    fn end(&self) -> isize {
        self.rows.len() as isize
    }

    pub fn on_row(&self) -> bool {
        self.position >= 0 && self.position < self.end()
    }

    pub fn is_released(&self, index: usize) -> bool {
        matches!(self.rows.get(index), Some(None))
    }

    /// Step forward. Returns `false` once past the last buffered row.
    pub fn advance(&mut self) -> bool {
        if self.position >= self.end() {
            return false;
        }
        self.position += 1;
        if !self.on_row() {
            return false;
        }
        if self.position >= 2 {
            self.rows[(self.position - 2) as usize] = None;
        }
        true
    }

    /// Move to `target`, clamped to `[-1, total]`.
    fn move_to(&mut self, target: isize) -> Result<bool> {
        let target = target.clamp(-1, self.end());
        if target >= 0 && self.is_released(target as usize) {
            return Err(Error::RowReleased(target as usize + 1));
        }
        self.position = target;
        Ok(self.on_row())
    }

    pub fn previous(&mut self) -> Result<bool> {
        self.move_to(self.position - 1)
    }

    /// 1-based; negative counts back from the end, `0` is before-first.
    pub fn absolute(&mut self, row: i64) -> Result<bool> {
        let target = match row {
            0 => -1,
            n if n > 0 => (n - 1).min(self.end() as i64) as isize,
            n => (self.end() as i64 + n).max(-1) as isize,
        };
        self.move_to(target)
    }

    pub fn relative(&mut self, offset: i64) -> Result<bool> {
        let target = (self.position as i64).saturating_add(offset);
        let target = target.clamp(-1, self.end() as i64) as isize;
        self.move_to(target)
    }

    pub fn first(&mut self) -> Result<bool> {
        self.absolute(1)
    }

    pub fn last(&mut self) -> Result<bool> {
        self.absolute(-1)
    }

    pub fn before_first(&mut self) {
        self.position = -1;
    }

    pub fn after_last(&mut self) {
        self.position = self.end();
    }

    pub fn current(&self) -> Result<&Row> {
        if !self.on_row() {
            return Err(Error::NoCurrentRow);
        }
        let index = self.position as usize;
        self.rows[index]
            .as_ref()
            .ok_or(Error::RowReleased(index + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(n: usize) -> Cursor {
        let rows = (0..n)
            .map(|i| vec![Some(Bytes::from(format!("r{i}"))), None])
            .collect();
        Cursor::new(rows, false)
    }

    fn cell(cursor: &Cursor) -> Bytes {
        cursor.current().unwrap().get(0).unwrap().unwrap().clone()
    }

    #[test]
    fn test_row_lengths() {
        let row = Row::new(vec![Some(Bytes::from_static(b"abc")), None]);
        assert_eq!(row.length(0), Some(3));
        assert_eq!(row.length(1), Some(0));
        assert_eq!(row.get(1), Some(None));
        assert_eq!(row.get(2), None);
    }

    #[test]
    fn test_forward_scan() {
        let mut cursor = batch(3);
        assert!(matches!(cursor.current(), Err(Error::NoCurrentRow)));
        let mut seen = Vec::new();
        while cursor.advance() {
            seen.push(cell(&cursor));
        }
        assert_eq!(seen, vec!["r0", "r1", "r2"]);
        assert_eq!(cursor.position(), 3);
        assert!(!cursor.advance());
        assert_eq!(cursor.position(), 3);
    }

    #[test]
    fn test_release_keeps_previous_row() {
        let mut cursor = batch(5);
        for _ in 0..4 {
            cursor.advance();
        }
        // at index 3: rows 0 and 1 released, row 2 still held
        assert!(cursor.is_released(0));
        assert!(cursor.is_released(1));
        assert!(!cursor.is_released(2));
        assert!(cursor.previous().unwrap());
        assert_eq!(cell(&cursor), "r2");
    }

    #[test]
    fn test_moving_onto_released_row_fails_in_place() {
        let mut cursor = batch(4);
        for _ in 0..3 {
            cursor.advance();
        }
        let err = cursor.first().unwrap_err();
        assert!(matches!(err, Error::RowReleased(1)));
        assert_eq!(cursor.position(), 2);
        assert_eq!(cell(&cursor), "r2");

        assert!(matches!(cursor.relative(-2), Err(Error::RowReleased(1))));
        assert_eq!(cursor.position(), 2);
    }

    #[test]
    fn test_absolute_clamps() {
        let mut cursor = batch(3);
        assert!(!cursor.absolute(10).unwrap());
        assert_eq!(cursor.position(), 3);
        assert!(!cursor.absolute(-10).unwrap());
        assert_eq!(cursor.position(), -1);
        assert!(cursor.absolute(-1).unwrap());
        assert_eq!(cell(&cursor), "r2");
        assert!(cursor.absolute(2).unwrap());
        assert_eq!(cell(&cursor), "r1");
        assert!(!cursor.absolute(0).unwrap());
        assert!(matches!(cursor.current(), Err(Error::NoCurrentRow)));
    }

    #[test]
    fn test_boundaries() {
        let mut cursor = batch(2);
        cursor.after_last();
        assert!(!cursor.on_row());
        assert!(cursor.last().unwrap());
        assert_eq!(cell(&cursor), "r1");
        cursor.before_first();
        assert!(!cursor.previous().unwrap());
        assert_eq!(cursor.position(), -1);
        assert!(cursor.relative(1).unwrap());
        assert_eq!(cell(&cursor), "r0");
    }

    #[test]
    fn test_empty_batch() {
        let mut cursor = Cursor::new(Vec::new(), false);
        assert!(!cursor.advance());
        assert!(!cursor.first().unwrap());
        assert!(!cursor.last().unwrap());
        assert!(matches!(cursor.current(), Err(Error::NoCurrentRow)));
    }

    #[test]
    fn test_replace_resets_position() {
        let mut cursor = batch(2);
        while cursor.advance() {}
        cursor.replace(vec![vec![Some(Bytes::from_static(b"next"))]], true);
        assert!(cursor.has_remain());
        assert_eq!(cursor.position(), -1);
        assert!(cursor.advance());
        assert_eq!(cell(&cursor), "next");
    }
}
