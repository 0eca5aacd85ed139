use std::collections::hash_map::Entry;
use std::collections::HashMap;

use kestrel_common::datum::Datum;
use kestrel_common::error::{KestrelResult, MergeError};
use kestrel_common::select_context::{AggregationColumn, SelectContext, SortKey};

use crate::aggregate::{group_key, GroupAccumulator};
use crate::compare::RowComparator;
use crate::order_by::OrderByStreamMerge;
use crate::result::QueryResult;

/// Group-by merge over shards already sorted by the group key.
///
/// Rows of one group arrive adjacent from the underlying order-by merge,
/// so only the group under construction plus one lookahead row is held.
pub struct GroupByStreamMerge {
    inner: OrderByStreamMerge,
    group_by: Vec<SortKey>,
    aggregations: Vec<AggregationColumn>,
    lookahead: Option<Vec<Datum>>,
    current: Option<Vec<Datum>>,
    exhausted: bool,
}

impl GroupByStreamMerge {
    pub fn new(
        results: Vec<Box<dyn QueryResult>>,
        select: &SelectContext,
        comparator: RowComparator,
    ) -> Self {
        Self {
            inner: OrderByStreamMerge::new(results, comparator),
            group_by: select.group_by.clone(),
            aggregations: select.aggregations.clone(),
            lookahead: None,
            current: None,
            exhausted: false,
        }
    }
}

impl QueryResult for GroupByStreamMerge {
    fn next(&mut self) -> KestrelResult<bool> {
        self.current = None;
        let first = match self.lookahead.take() {
            Some(row) => row,
            None => {
                if self.exhausted || !self.inner.next()? {
                    self.exhausted = true;
                    return Ok(false);
                }
                self.inner.current_row()?
            }
        };
        let key = group_key(&self.group_by, &first);
        let mut acc = GroupAccumulator::new(first);
        loop {
            if !self.inner.next()? {
                self.exhausted = true;
                break;
            }
            let row = self.inner.current_row()?;
            if group_key(&self.group_by, &row) == key {
                acc.combine(&self.aggregations, &row)?;
            } else {
                self.lookahead = Some(row);
                break;
            }
        }
        self.current = Some(acc.finish(&self.aggregations)?);
        Ok(true)
    }

    fn value(&self, index: usize) -> KestrelResult<&Datum> {
        current_value(self.current.as_deref(), index)
    }

    fn column_count(&self) -> usize {
        self.inner.column_count()
    }

    fn column_label(&self, index: usize) -> Option<&str> {
        self.inner.column_label(index)
    }

    fn close(&mut self) {
        self.inner.close();
        self.lookahead = None;
        self.current = None;
        self.exhausted = true;
    }
}

/// Group-by merge that drains every shard into a group map on the first
/// `next`, then sorts the combined groups by ORDER BY.
///
/// Memory grows with the number of distinct groups; more than
/// `max_groups` fails with [`MergeError::ResourceExhausted`].
pub struct GroupByMemoryMerge {
    results: Vec<Box<dyn QueryResult>>,
    group_by: Vec<SortKey>,
    aggregations: Vec<AggregationColumn>,
    order: RowComparator,
    max_groups: usize,
    /// Row produced when an aggregate-only query sees no rows at all.
    empty_group: Option<GroupAccumulator>,
    rows: std::vec::IntoIter<Vec<Datum>>,
    current: Option<Vec<Datum>>,
    loaded: bool,
}

impl GroupByMemoryMerge {
    pub fn new(
        results: Vec<Box<dyn QueryResult>>,
        select: &SelectContext,
        order: RowComparator,
        max_groups: usize,
    ) -> Self {
        let empty_group = (!select.has_group_by() && select.has_aggregation())
            .then(|| GroupAccumulator::empty(select));
        Self {
            results,
            group_by: select.group_by.clone(),
            aggregations: select.aggregations.clone(),
            order,
            max_groups,
            empty_group,
            rows: Vec::new().into_iter(),
            current: None,
            loaded: false,
        }
    }

    fn load(&mut self) -> KestrelResult<()> {
        let mut index: HashMap<Vec<u8>, usize> = HashMap::new();
        let mut groups: Vec<GroupAccumulator> = Vec::new();

        for result in &mut self.results {
            while result.next()? {
                let row = result.current_row()?;
                match index.entry(group_key(&self.group_by, &row)) {
                    Entry::Occupied(e) => groups[*e.get()].combine(&self.aggregations, &row)?,
                    Entry::Vacant(e) => {
                        if groups.len() >= self.max_groups {
                            tracing::warn!(
                                "Group-by merge exceeded {} groups; aborting",
                                self.max_groups
                            );
                            return Err(MergeError::ResourceExhausted {
                                groups: groups.len() + 1,
                                limit: self.max_groups,
                            }
                            .into());
                        }
                        e.insert(groups.len());
                        groups.push(GroupAccumulator::new(row));
                    }
                }
            }
        }

        if groups.is_empty() {
            if let Some(empty) = self.empty_group.take() {
                groups.push(empty);
            }
        }
        kestrel_observability::record_merge_groups(groups.len());

        let mut rows = groups
            .into_iter()
            .map(|g| g.finish(&self.aggregations))
            .collect::<Result<Vec<_>, _>>()?;
        if !self.order.is_empty() {
            rows.sort_by(|a, b| self.order.compare(a, b));
        }
        self.rows = rows.into_iter();
        Ok(())
    }
}

impl QueryResult for GroupByMemoryMerge {
    fn next(&mut self) -> KestrelResult<bool> {
        self.current = None;
        if !self.loaded {
            self.loaded = true;
            self.load()?;
        }
        self.current = self.rows.next();
        Ok(self.current.is_some())
    }

    fn value(&self, index: usize) -> KestrelResult<&Datum> {
        current_value(self.current.as_deref(), index)
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
        self.rows = Vec::new().into_iter();
        self.current = None;
        self.loaded = true;
    }
}

fn current_value(row: Option<&[Datum]>, index: usize) -> KestrelResult<&Datum> {
    let row = row.ok_or(MergeError::CursorNotPositioned)?;
    Ok(row.get(index).ok_or(MergeError::ColumnOutOfRange {
        index,
        count: row.len(),
    })?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::MemoryQueryResult;
    use kestrel_common::config::NullOrdering;
    use kestrel_common::statement::{
        AggregationFunction, BoundStatement, OrderItem, Projection, StatementKind,
    };

    fn select(order_by: Vec<OrderItem>) -> SelectContext {
        let stmt = BoundStatement::new(StatementKind::Select)
            .with_projections(
                vec![
                    Projection::column("status"),
                    Projection::aggregation(AggregationFunction::Sum, "amount"),
                ],
                0,
            )
            .with_group_by(vec![OrderItem::asc("status")])
            .with_order_by(order_by);
        SelectContext::from_statement(&stmt)
    }

    fn shard(rows: &[(&str, i64)]) -> Box<dyn QueryResult> {
        Box::new(MemoryQueryResult::from_values(
            &["status", "SUM(amount)"],
            rows.iter()
                .map(|(s, v)| vec![Datum::Text(s.to_string()), Datum::Int64(*v)])
                .collect(),
        ))
    }

    fn drain(m: &mut dyn QueryResult) -> Vec<(String, i64)> {
        let mut out = Vec::new();
        while m.next().unwrap() {
            out.push((
                m.value(0).unwrap().as_str().unwrap().to_string(),
                m.value(1).unwrap().as_i64().unwrap(),
            ));
        }
        out
    }

    #[test]
    fn test_stream_groups_adjacent_rows() {
        let ctx = select(vec![OrderItem::asc("status")]);
        let cmp = RowComparator::new(&ctx.order_by, NullOrdering::Smallest);
        let mut m = GroupByStreamMerge::new(
            vec![shard(&[("a", 1), ("c", 2)]), shard(&[("a", 10), ("b", 5), ("c", 1)])],
            &ctx,
            cmp,
        );
        assert_eq!(
            drain(&mut m),
            vec![("a".into(), 11), ("b".into(), 5), ("c".into(), 3)]
        );
    }

    #[test]
    fn test_memory_merge_sorts_by_aggregate() {
        let ctx = select(vec![OrderItem::desc("SUM(amount)")]);
        let cmp = RowComparator::new(&ctx.order_by, NullOrdering::Smallest);
        let mut m = GroupByMemoryMerge::new(
            vec![shard(&[("b", 1), ("a", 2)]), shard(&[("a", 3), ("c", 4)])],
            &ctx,
            cmp,
            100,
        );
        assert_eq!(
            drain(&mut m),
            vec![("a".into(), 5), ("c".into(), 4), ("b".into(), 1)]
        );
    }

    #[test]
    fn test_memory_merge_group_limit() {
        let ctx = select(Vec::new());
        let cmp = RowComparator::new(&ctx.order_by, NullOrdering::Smallest);
        let mut m = GroupByMemoryMerge::new(
            vec![shard(&[("a", 1), ("b", 1)]), shard(&[("c", 1)])],
            &ctx,
            cmp,
            2,
        );
        let err = m.next().unwrap_err();
        assert!(matches!(
            err,
            kestrel_common::error::KestrelError::Merge(MergeError::ResourceExhausted {
                groups: 3,
                limit: 2
            })
        ));
    }
}
