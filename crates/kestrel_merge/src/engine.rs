use kestrel_common::config::MergeConfig;
use kestrel_common::datum::{Datum, OwnedRow};
use kestrel_common::error::{KestrelResult, MergeError};
use kestrel_common::select_context::SelectContext;
use kestrel_common::statement::PaginationSegment;

use crate::compare::RowComparator;
use crate::group_by::{GroupByMemoryMerge, GroupByStreamMerge};
use crate::order_by::OrderByStreamMerge;
use crate::pagination::LimitDecorator;
use crate::result::QueryResult;
use crate::stream::StreamMerge;

pub struct MergeEngine;

impl MergeEngine {
    /// Compose the merge strategy for one statement's shard results.
    ///
    /// `params` resolves parameter-marker pagination. A single result is
    /// passed through untouched: its shard already applied the statement's
    /// own pagination.
    pub fn merge(
        mut results: Vec<Box<dyn QueryResult>>,
        select: &SelectContext,
        config: &MergeConfig,
        params: &[Datum],
    ) -> KestrelResult<MergedResult> {
        if results.is_empty() {
            return Err(MergeError::NoResults.into());
        }
        let shards = results.len();
        if shards == 1 {
            kestrel_observability::record_merge_metrics("transparent", 1, false);
            let inner = results.remove(0);
            return Ok(MergedResult::new(inner, select.visible_column_count, "transparent"));
        }

        if let Some(agg) = select.aggregations.iter().find(|a| a.distinct) {
            close_all(&mut results);
            return Err(MergeError::UnsupportedAggregation(format!(
                "{}(DISTINCT ...) across {} shards",
                agg.function.name(),
                shards
            ))
            .into());
        }

        let pagination = match resolve_pagination(select, params) {
            Ok(p) => p,
            Err(e) => {
                close_all(&mut results);
                return Err(e.into());
            }
        };

        let order = RowComparator::new(&select.order_by, config.null_ordering);
        let (strategy, inner): (&'static str, Box<dyn QueryResult>) =
            if select.has_group_by() || select.has_aggregation() {
                if select.group_by_matches_order_by() {
                    ("group_by_stream", Box::new(GroupByStreamMerge::new(results, select, order)))
                } else {
                    (
                        "group_by_memory",
                        Box::new(GroupByMemoryMerge::new(results, select, order, config.max_groups)),
                    )
                }
            } else if select.has_order_by() {
                ("order_by", Box::new(OrderByStreamMerge::new(results, order)))
            } else {
                ("stream", Box::new(StreamMerge::new(results)))
            };

        let paginated = pagination.is_some();
        let inner: Box<dyn QueryResult> = match pagination {
            Some((offset, row_count)) => Box::new(LimitDecorator::new(inner, offset, row_count)),
            None => inner,
        };

        kestrel_observability::record_merge_metrics(strategy, shards, paginated);
        tracing::debug!(
            "Merging {} shard results with {} strategy (paginated={})",
            shards,
            strategy,
            paginated
        );
        Ok(MergedResult::new(inner, select.visible_column_count, strategy))
    }
}

fn close_all(results: &mut [Box<dyn QueryResult>]) {
    for r in results {
        r.close();
    }
}

/// `(offset, row_count)` to apply after merging, or `None` without a
/// LIMIT/OFFSET clause.
fn resolve_pagination(
    select: &SelectContext,
    params: &[Datum],
) -> Result<Option<(u64, Option<u64>)>, MergeError> {
    let Some(pagination) = select.pagination else {
        return Ok(None);
    };
    let resolve = |seg: PaginationSegment| -> Result<u64, MergeError> {
        seg.resolve(params)
            .and_then(|v| u64::try_from(v).ok())
            .ok_or_else(|| MergeError::TypeMismatch(format!("invalid pagination value {:?}", seg.value)))
    };
    let offset = pagination.offset.map(|s| resolve(s)).transpose()?.unwrap_or(0);
    let row_count = pagination.row_count.map(|s| resolve(s)).transpose()?;
    if offset == 0 && row_count.is_none() {
        return Ok(None);
    }
    Ok(Some((offset, row_count)))
}

/// The cursor handed to the caller.
///
/// Exposes only the visible columns, enforces the `next`/`value` contract,
/// and closes every shard cursor on error, on `close`, or when dropped.
pub struct MergedResult {
    inner: Box<dyn QueryResult>,
    visible_columns: usize,
    strategy: &'static str,
    positioned: bool,
    closed: bool,
}

impl MergedResult {
    fn new(inner: Box<dyn QueryResult>, visible_columns: usize, strategy: &'static str) -> Self {
        Self {
            inner,
            visible_columns,
            strategy,
            positioned: false,
            closed: false,
        }
    }

    pub fn next(&mut self) -> KestrelResult<bool> {
        self.positioned = false;
        if self.closed {
            return Ok(false);
        }
        match self.inner.next() {
            Ok(true) => {
                self.positioned = true;
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(e) => {
                tracing::warn!("Merge aborted, closing all shard cursors: {}", e);
                self.close();
                Err(e)
            }
        }
    }

    pub fn value(&self, index: usize) -> KestrelResult<&Datum> {
        if !self.positioned {
            return Err(MergeError::CursorNotPositioned.into());
        }
        let count = self.column_count();
        if index >= count {
            return Err(MergeError::ColumnOutOfRange { index, count }.into());
        }
        self.inner.value(index)
    }

    /// Visible columns; derived columns injected for merging are hidden.
    pub fn column_count(&self) -> usize {
        let shard_columns = self.inner.column_count();
        if self.visible_columns == 0 {
            shard_columns
        } else {
            self.visible_columns.min(shard_columns)
        }
    }

    pub fn column_label(&self, index: usize) -> Option<&str> {
        if index >= self.column_count() {
            return None;
        }
        self.inner.column_label(index)
    }

    pub fn current_row(&self) -> KestrelResult<OwnedRow> {
        let values = (0..self.column_count())
            .map(|i| self.value(i).cloned())
            .collect::<KestrelResult<Vec<_>>>()?;
        Ok(OwnedRow::new(values))
    }

    /// Drain the remaining rows.
    pub fn collect_rows(mut self) -> KestrelResult<Vec<OwnedRow>> {
        let mut rows = Vec::new();
        while self.next()? {
            rows.push(self.current_row()?);
        }
        Ok(rows)
    }

    pub fn strategy(&self) -> &'static str {
        self.strategy
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.positioned = false;
            self.inner.close();
        }
    }
}

impl Drop for MergedResult {
    fn drop(&mut self) {
        self.close();
    }
}
