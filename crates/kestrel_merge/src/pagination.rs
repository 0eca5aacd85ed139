use kestrel_common::datum::Datum;
use kestrel_common::error::{KestrelResult, MergeError};

use crate::result::QueryResult;

/// Applies the statement's global OFFSET / row count on top of a merged
/// stream whose shards were asked for `offset + row_count` rows each.
pub struct LimitDecorator {
    inner: Box<dyn QueryResult>,
    offset: u64,
    row_count: Option<u64>,
    emitted: u64,
    skipped: bool,
    positioned: bool,
    done: bool,
}

impl LimitDecorator {
    pub fn new(inner: Box<dyn QueryResult>, offset: u64, row_count: Option<u64>) -> Self {
        Self {
            inner,
            offset,
            row_count,
            emitted: 0,
            skipped: false,
            positioned: false,
            done: false,
        }
    }
}

impl QueryResult for LimitDecorator {
    fn next(&mut self) -> KestrelResult<bool> {
        self.positioned = false;
        if self.done {
            return Ok(false);
        }
        if !self.skipped {
            self.skipped = true;
            for _ in 0..self.offset {
                if !self.inner.next()? {
                    self.done = true;
                    return Ok(false);
                }
            }
        }
        if self.row_count.map_or(false, |limit| self.emitted >= limit) {
            self.done = true;
            return Ok(false);
        }
        if !self.inner.next()? {
            self.done = true;
            return Ok(false);
        }
        self.emitted += 1;
        self.positioned = true;
        Ok(true)
    }

    fn value(&self, index: usize) -> KestrelResult<&Datum> {
        if !self.positioned {
            return Err(MergeError::CursorNotPositioned.into());
        }
        self.inner.value(index)
    }

    fn column_count(&self) -> usize {
        self.inner.column_count()
    }

    fn column_label(&self, index: usize) -> Option<&str> {
        self.inner.column_label(index)
    }

    fn close(&mut self) {
        self.inner.close();
        self.positioned = false;
        self.done = true;
    }
}
