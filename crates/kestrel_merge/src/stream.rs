use kestrel_common::datum::Datum;
use kestrel_common::error::{KestrelResult, MergeError};

use crate::result::QueryResult;

/// Concatenates shard cursors in shard order.
///
/// Once `next` has returned `false` the merge stays exhausted.
pub struct StreamMerge {
    results: Vec<Box<dyn QueryResult>>,
    current: usize,
    positioned: bool,
    done: bool,
}

impl StreamMerge {
    pub fn new(results: Vec<Box<dyn QueryResult>>) -> Self {
        Self {
            results,
            current: 0,
            positioned: false,
            done: false,
        }
    }
}

impl QueryResult for StreamMerge {
    fn next(&mut self) -> KestrelResult<bool> {
        self.positioned = false;
        if self.done {
            return Ok(false);
        }
        while let Some(result) = self.results.get_mut(self.current) {
            if result.next()? {
                self.positioned = true;
                return Ok(true);
            }
            self.current += 1;
        }
        self.done = true;
        Ok(false)
    }

    fn value(&self, index: usize) -> KestrelResult<&Datum> {
        if !self.positioned {
            return Err(MergeError::CursorNotPositioned.into());
        }
        self.results
            .get(self.current)
            .ok_or(MergeError::CursorNotPositioned)?
            .value(index)
    }

    fn column_count(&self) -> usize {
        self.results.first().map_or(0, |r| r.column_count())
    }

    fn column_label(&self, index: usize) -> Option<&str> {
        self.results.first().and_then(|r| r.column_label(index))
    }

    fn close(&mut self) {
        for r in &mut self.results {
            r.close();
        }
        self.done = true;
        self.positioned = false;
    }
}
