use kestrel_common::datum::{Datum, OwnedRow};
use kestrel_common::error::{KestrelResult, MergeError};

/// A forward-only cursor over one shard's (or one merge stage's) rows.
///
/// `value` is only valid right after `next` returned `true`. `close` must be
/// idempotent and must not require the cursor to be drained first.
pub trait QueryResult: Send {
    fn next(&mut self) -> KestrelResult<bool>;

    fn value(&self, index: usize) -> KestrelResult<&Datum>;

    fn column_count(&self) -> usize;

    fn column_label(&self, index: usize) -> Option<&str>;

    fn close(&mut self);

    /// Copy of the current row.
    fn current_row(&self) -> KestrelResult<Vec<Datum>> {
        (0..self.column_count())
            .map(|i| self.value(i).cloned())
            .collect()
    }
}

/// Rows already materialized in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueryResult {
    labels: Vec<String>,
    rows: Vec<OwnedRow>,
    /// Index of the current row + 1; 0 before the first `next`.
    position: usize,
    closed: bool,
}

impl MemoryQueryResult {
    pub fn new(labels: Vec<String>, rows: Vec<OwnedRow>) -> Self {
        Self {
            labels,
            rows,
            position: 0,
            closed: false,
        }
    }

    /// Convenience: labels from `&str`, rows from value vectors.
    pub fn from_values(labels: &[&str], rows: Vec<Vec<Datum>>) -> Self {
        Self::new(
            labels.iter().map(|l| l.to_string()).collect(),
            rows.into_iter().map(OwnedRow::new).collect(),
        )
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn current(&self) -> Option<&OwnedRow> {
        if self.closed || self.position == 0 {
            return None;
        }
        self.rows.get(self.position - 1)
    }
}

impl QueryResult for MemoryQueryResult {
    fn next(&mut self) -> KestrelResult<bool> {
        if self.closed || self.position > self.rows.len() {
            return Ok(false);
        }
        self.position += 1;
        Ok(self.position <= self.rows.len())
    }

    fn value(&self, index: usize) -> KestrelResult<&Datum> {
        let row = self.current().ok_or(MergeError::CursorNotPositioned)?;
        Ok(row.get(index).ok_or(MergeError::ColumnOutOfRange {
            index,
            count: row.len(),
        })?)
    }

    fn column_count(&self) -> usize {
        if self.labels.is_empty() {
            self.rows.first().map_or(0, OwnedRow::len)
        } else {
            self.labels.len()
        }
    }

    fn column_label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    fn close(&mut self) {
        self.closed = true;
        self.rows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_contract() {
        let mut r = MemoryQueryResult::from_values(&["id"], vec![vec![Datum::Int64(1)]]);
        assert!(r.value(0).is_err());
        assert!(r.next().unwrap());
        assert_eq!(r.value(0).unwrap(), &Datum::Int64(1));
        assert!(r.value(1).is_err());
        assert!(!r.next().unwrap());
        assert!(r.value(0).is_err());
        assert!(!r.next().unwrap());
    }

    #[test]
    fn test_close_without_drain() {
        let mut r = MemoryQueryResult::from_values(
            &["id"],
            vec![vec![Datum::Int64(1)], vec![Datum::Int64(2)]],
        );
        assert!(r.next().unwrap());
        r.close();
        r.close();
        assert!(r.is_closed());
        assert!(!r.next().unwrap());
        assert_eq!(r.column_count(), 1);
        assert_eq!(r.column_label(0), Some("id"));
    }
}
