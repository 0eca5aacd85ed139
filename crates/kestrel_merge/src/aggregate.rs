//! Per-group combination of shard partial aggregates.

use std::cmp::Ordering;

use kestrel_common::datum::{cmp_datum, encode_key, Datum};
use kestrel_common::error::MergeError;
use kestrel_common::select_context::{AggregationColumn, SelectContext, SortKey};
use kestrel_common::statement::AggregationFunction;

/// Binary group key over the GROUP BY columns of `row`.
pub(crate) fn group_key(group_by: &[SortKey], row: &[Datum]) -> Vec<u8> {
    let values: Vec<&Datum> = group_by
        .iter()
        .map(|k| row.get(k.index).unwrap_or(&Datum::Null))
        .collect();
    encode_key(&values)
}

/// One group being combined. Starts from the group's first shard row;
/// non-aggregate columns keep that row's values.
#[derive(Debug, Clone)]
pub(crate) struct GroupAccumulator {
    row: Vec<Datum>,
}

impl GroupAccumulator {
    pub fn new(row: Vec<Datum>) -> Self {
        Self { row }
    }

    /// The row an aggregate-only query yields when no shard returned any
    /// row: COUNT is 0, everything else NULL.
    pub fn empty(select: &SelectContext) -> Self {
        let mut row = vec![Datum::Null; select.column_count()];
        for agg in &select.aggregations {
            if agg.function == AggregationFunction::Count {
                set(&mut row, agg.index, Datum::Int64(0));
            }
            if let Some((_, count_idx)) = agg.avg_parts {
                set(&mut row, count_idx, Datum::Int64(0));
            }
        }
        Self { row }
    }

    /// Fold another shard's partial row for the same group into this one.
    pub fn combine(
        &mut self,
        aggregations: &[AggregationColumn],
        incoming: &[Datum],
    ) -> Result<(), MergeError> {
        for agg in aggregations {
            match agg.function {
                AggregationFunction::Count | AggregationFunction::Sum => {
                    self.add_column(agg.index, incoming)?;
                }
                AggregationFunction::Max => self.keep(agg.index, incoming, Ordering::Greater)?,
                AggregationFunction::Min => self.keep(agg.index, incoming, Ordering::Less)?,
                AggregationFunction::Avg => {
                    if let Some((sum_idx, count_idx)) = agg.avg_parts {
                        self.add_column(sum_idx, incoming)?;
                        self.add_column(count_idx, incoming)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Final row: AVG columns computed from their combined SUM and COUNT.
    pub fn finish(mut self, aggregations: &[AggregationColumn]) -> Result<Vec<Datum>, MergeError> {
        for agg in aggregations {
            let Some((sum_idx, count_idx)) = agg.avg_parts else {
                continue;
            };
            let sum = self.row.get(sum_idx).cloned().unwrap_or(Datum::Null);
            let count = match self.row.get(count_idx) {
                Some(Datum::Null) | None => 0,
                Some(c) => c.as_i64().ok_or_else(|| {
                    MergeError::TypeMismatch(format!("AVG count column holds {}", c))
                })?,
            };
            let avg = sum.div_count(count).ok_or_else(|| {
                MergeError::TypeMismatch(format!("cannot average {} over {} rows", sum, count))
            })?;
            set(&mut self.row, agg.index, avg);
        }
        Ok(self.row)
    }

    fn add_column(&mut self, index: usize, incoming: &[Datum]) -> Result<(), MergeError> {
        let count = self.row.len();
        let theirs = incoming
            .get(index)
            .ok_or(MergeError::ColumnOutOfRange { index, count })?;
        let ours = self
            .row
            .get_mut(index)
            .ok_or(MergeError::ColumnOutOfRange { index, count })?;
        let sum = ours.add(theirs).ok_or_else(|| {
            MergeError::TypeMismatch(format!("cannot add {} and {}", ours, theirs))
        })?;
        *ours = sum;
        Ok(())
    }

    /// Keep whichever of ours/theirs sits on the `wanted` side; NULL loses.
    fn keep(&mut self, index: usize, incoming: &[Datum], wanted: Ordering) -> Result<(), MergeError> {
        let count = self.row.len();
        let theirs = incoming
            .get(index)
            .ok_or(MergeError::ColumnOutOfRange { index, count })?;
        let ours = self
            .row
            .get_mut(index)
            .ok_or(MergeError::ColumnOutOfRange { index, count })?;
        if theirs.is_null() {
            return Ok(());
        }
        if ours.is_null() || cmp_datum(theirs, ours) == wanted {
            *ours = theirs.clone();
        }
        Ok(())
    }
}

fn set(row: &mut [Datum], index: usize, value: Datum) {
    if let Some(slot) = row.get_mut(index) {
        *slot = value;
    }
}
