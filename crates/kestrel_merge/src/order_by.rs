use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;

use kestrel_common::datum::Datum;
use kestrel_common::error::{KestrelResult, MergeError};

use crate::compare::RowComparator;
use crate::result::QueryResult;

/// Head row of one shard cursor inside the merge heap.
struct MergeEntry {
    row: Vec<Datum>,
    shard_idx: usize,
    comparator: Arc<RowComparator>,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Equal keys come out in shard order, keeping output deterministic.
        self.comparator
            .compare(&self.row, &other.row)
            .then(self.shard_idx.cmp(&other.shard_idx))
    }
}

/// K-way merge of shard cursors that are each already sorted by the
/// comparator. Holds at most one buffered row per shard.
pub struct OrderByStreamMerge {
    results: Vec<Box<dyn QueryResult>>,
    comparator: Arc<RowComparator>,
    heap: BinaryHeap<Reverse<MergeEntry>>,
    current: Option<Vec<Datum>>,
    /// Shard whose head was handed out last and must advance before the
    /// next pop.
    pending: Option<usize>,
    started: bool,
}

impl OrderByStreamMerge {
    pub fn new(results: Vec<Box<dyn QueryResult>>, comparator: RowComparator) -> Self {
        let shards = results.len();
        Self {
            results,
            comparator: Arc::new(comparator),
            heap: BinaryHeap::with_capacity(shards),
            current: None,
            pending: None,
            started: false,
        }
    }

    fn advance(&mut self, shard_idx: usize) -> KestrelResult<()> {
        let Some(result) = self.results.get_mut(shard_idx) else {
            return Ok(());
        };
        if result.next()? {
            let row = result.current_row()?;
            self.heap.push(Reverse(MergeEntry {
                row,
                shard_idx,
                comparator: self.comparator.clone(),
            }));
        }
        Ok(())
    }
}

impl QueryResult for OrderByStreamMerge {
    fn next(&mut self) -> KestrelResult<bool> {
        self.current = None;
        if !self.started {
            self.started = true;
            for shard_idx in 0..self.results.len() {
                self.advance(shard_idx)?;
            }
        } else if let Some(shard_idx) = self.pending.take() {
            self.advance(shard_idx)?;
        }
        match self.heap.pop() {
            Some(Reverse(entry)) => {
                self.pending = Some(entry.shard_idx);
                self.current = Some(entry.row);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn value(&self, index: usize) -> KestrelResult<&Datum> {
        let row = self.current.as_ref().ok_or(MergeError::CursorNotPositioned)?;
        Ok(row.get(index).ok_or(MergeError::ColumnOutOfRange {
            index,
            count: row.len(),
        })?)
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
        self.heap.clear();
        self.current = None;
        self.pending = None;
        self.started = true;
    }
}
