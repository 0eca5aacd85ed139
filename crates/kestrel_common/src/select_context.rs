//! Column layout of a sharded SELECT.
//!
//! Shards return the visible projections followed by any derived columns
//! the merge needs but the client did not ask for:
//!
//! - `AVG_DERIVED_COUNT_n` / `AVG_DERIVED_SUM_n` for the n-th AVG projection
//! - `ORDER_BY_DERIVED_n` for ORDER BY items not in the select list
//! - `GROUP_BY_DERIVED_n` for GROUP BY items not in the select list
//!
//! The rewrite engine appends the derived columns to each shard query; the
//! merge engine resolves sort keys and aggregates to column indices here and
//! hides everything past `visible_column_count`.

use crate::statement::{
    AggregationFunction, BoundStatement, NullsOrder, OrderDirection, OrderItem, Pagination,
    Projection,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub index: usize,
    pub direction: OrderDirection,
    pub nulls: Option<NullsOrder>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationColumn {
    pub function: AggregationFunction,
    pub distinct: bool,
    pub index: usize,
    /// For AVG: indices of the derived (SUM, COUNT) columns.
    pub avg_parts: Option<(usize, usize)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedColumn {
    pub expression: String,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectContext {
    /// Match candidates per result column (normalized).
    names: Vec<Vec<String>>,
    pub visible_column_count: usize,
    pub derived_columns: Vec<DerivedColumn>,
    pub aggregations: Vec<AggregationColumn>,
    pub group_by: Vec<SortKey>,
    pub order_by: Vec<SortKey>,
    pub pagination: Option<Pagination>,
    group_by_matches_order_by: bool,
}

impl SelectContext {
    pub fn from_statement(stmt: &BoundStatement) -> Self {
        let mut names: Vec<Vec<String>> = Vec::new();
        let mut aggregations = Vec::new();

        for projection in &stmt.projections {
            match projection {
                Projection::Column { owner, name, alias } => {
                    let mut c = vec![normalize(name)];
                    if let Some(o) = owner {
                        c.push(normalize(&format!("{}.{}", o, name)));
                    }
                    if let Some(a) = alias {
                        c.push(normalize(a));
                    }
                    names.push(c);
                }
                Projection::Aggregation {
                    function,
                    distinct,
                    argument,
                    alias,
                } => {
                    let mut c = vec![normalize(&aggregation_text(*function, *distinct, argument))];
                    if let Some(a) = alias {
                        c.push(normalize(a));
                    }
                    aggregations.push(AggregationColumn {
                        function: *function,
                        distinct: *distinct,
                        index: names.len(),
                        avg_parts: None,
                    });
                    names.push(c);
                }
                Projection::Expression { text, alias } => {
                    let mut c = vec![normalize(text)];
                    if let Some(a) = alias {
                        c.push(normalize(a));
                    }
                    names.push(c);
                }
                Projection::Star { owner, columns } => {
                    for col in columns {
                        let mut c = vec![normalize(col)];
                        if let Some(o) = owner {
                            c.push(normalize(&format!("{}.{}", o, col)));
                        }
                        names.push(c);
                    }
                }
            }
        }
        let visible_column_count = names.len();
        let mut derived_columns = Vec::new();

        let mut avg_ordinal = 0;
        for (agg, projection) in aggregations
            .iter_mut()
            .zip(stmt.projections.iter().filter(|p| matches!(p, Projection::Aggregation { .. })))
        {
            let Projection::Aggregation {
                function: AggregationFunction::Avg,
                distinct,
                argument,
                ..
            } = projection
            else {
                continue;
            };
            let count = DerivedColumn {
                expression: aggregation_text(AggregationFunction::Count, *distinct, argument),
                alias: format!("AVG_DERIVED_COUNT_{}", avg_ordinal),
            };
            let sum = DerivedColumn {
                expression: aggregation_text(AggregationFunction::Sum, *distinct, argument),
                alias: format!("AVG_DERIVED_SUM_{}", avg_ordinal),
            };
            let count_idx = names.len();
            names.push(vec![normalize(&count.alias)]);
            let sum_idx = names.len();
            names.push(vec![normalize(&sum.alias)]);
            derived_columns.push(count);
            derived_columns.push(sum);
            agg.avg_parts = Some((sum_idx, count_idx));
            avg_ordinal += 1;
        }

        let order_by = resolve_items(
            &stmt.order_by,
            "ORDER_BY_DERIVED_",
            &mut names,
            &mut derived_columns,
        );
        let group_by = resolve_items(
            &stmt.group_by,
            "GROUP_BY_DERIVED_",
            &mut names,
            &mut derived_columns,
        );

        let group_by_matches_order_by = !stmt.order_by.is_empty()
            && stmt.order_by.len() == stmt.group_by.len()
            && stmt
                .order_by
                .iter()
                .zip(stmt.group_by.iter())
                .all(|(o, g)| {
                    normalize(&o.expression) == normalize(&g.expression)
                        && o.direction == g.direction
                        && o.nulls == g.nulls
                });

        Self {
            names,
            visible_column_count,
            derived_columns,
            aggregations,
            group_by,
            order_by,
            pagination: stmt.pagination,
            group_by_matches_order_by,
        }
    }

    /// Total columns each shard returns once derived columns are injected.
    pub fn column_count(&self) -> usize {
        self.names.len()
    }

    pub fn find_column(&self, expression: &str) -> Option<usize> {
        find(&self.names, &normalize(expression))
    }

    pub fn has_aggregation(&self) -> bool {
        !self.aggregations.is_empty()
    }

    pub fn has_group_by(&self) -> bool {
        !self.group_by.is_empty()
    }

    pub fn has_order_by(&self) -> bool {
        !self.order_by.is_empty()
    }

    /// True when GROUP BY and ORDER BY list the same items in the same
    /// direction, so sorted shard streams can be grouped without buffering.
    pub fn group_by_matches_order_by(&self) -> bool {
        self.group_by_matches_order_by
    }

    /// Shards must return every row of every group when grouping is done
    /// in memory, so a pushed-down row count cannot be narrowed.
    pub fn needs_unbounded_row_count(&self) -> bool {
        self.has_group_by() && !self.group_by_matches_order_by
    }
}

fn resolve_items(
    items: &[OrderItem],
    alias_prefix: &str,
    names: &mut Vec<Vec<String>>,
    derived: &mut Vec<DerivedColumn>,
) -> Vec<SortKey> {
    let mut keys = Vec::with_capacity(items.len());
    let mut ordinal = 0;
    for item in items {
        let wanted = normalize(&item.expression);
        let index = match find(names, &wanted) {
            Some(i) => i,
            None => {
                let column = DerivedColumn {
                    expression: item.expression.clone(),
                    alias: format!("{}{}", alias_prefix, ordinal),
                };
                ordinal += 1;
                names.push(vec![wanted, normalize(&column.alias)]);
                derived.push(column);
                names.len() - 1
            }
        };
        keys.push(SortKey {
            index,
            direction: item.direction,
            nulls: item.nulls,
        });
    }
    keys
}

fn find(names: &[Vec<String>], wanted: &str) -> Option<usize> {
    if let Some(i) = names.iter().position(|c| c.iter().any(|n| n == wanted)) {
        return Some(i);
    }
    // `o.user_id` against an unqualified `user_id` projection, and back.
    let unqualified = wanted.rsplit('.').next().unwrap_or(wanted);
    names.iter().position(|c| {
        c.iter()
            .any(|n| n.rsplit('.').next().unwrap_or(n) == unqualified && !n.contains('('))
    })
}

fn aggregation_text(function: AggregationFunction, distinct: bool, argument: &str) -> String {
    if distinct {
        format!("{}(DISTINCT {})", function.name(), argument)
    } else {
        format!("{}({})", function.name(), argument)
    }
}

fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace() && *c != '`' && *c != '"')
        .flat_map(char::to_lowercase)
        .collect()
}
