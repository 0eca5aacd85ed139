//! Bound statement contract.
//!
//! Kestrel does not parse SQL. An upstream binder hands over a
//! `BoundStatement` describing the pieces routing, rewriting and merging
//! care about, each anchored to a half-open byte range `[start, stop)` of
//! the original SQL text:
//!
//! - referenced tables (every occurrence, so each can be renamed per shard)
//! - sharding predicates, as an OR of AND-groups
//! - the projection list, ORDER BY, GROUP BY and LIMIT/OFFSET clauses
//! - index names and schema qualifiers that need disambiguation
//! - IN value lists on sharding columns, which can be narrowed per shard

use std::ops::Bound;

use crate::datum::Datum;
use crate::error::RouteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Ddl,
}

impl StatementKind {
    pub fn is_query(&self) -> bool {
        matches!(self, StatementKind::Select)
    }
}

/// A value in a predicate or pagination clause: inline, or a `?` marker
/// resolved against the statement parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueExpr {
    Literal(Datum),
    Parameter(usize),
}

impl ValueExpr {
    pub fn resolve(&self, params: &[Datum]) -> Result<Datum, RouteError> {
        match self {
            ValueExpr::Literal(d) => Ok(d.clone()),
            ValueExpr::Parameter(idx) => {
                params
                    .get(*idx)
                    .cloned()
                    .ok_or(RouteError::ParameterOutOfRange {
                        index: *idx,
                        count: params.len(),
                    })
            }
        }
    }
}

/// One occurrence of a table name in the SQL text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSegment {
    pub name: String,
    pub alias: Option<String>,
    pub start: usize,
    pub stop: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PredicateOp {
    Equal(ValueExpr),
    In(Vec<ValueExpr>),
    Range {
        lower: Bound<ValueExpr>,
        upper: Bound<ValueExpr>,
    },
    /// A predicate on the column whose shape yields no sharding value
    /// (`LIKE`, function calls, `<>`). Routing treats the column as unconstrained.
    Unsupported,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub table: String,
    pub column: String,
    pub op: PredicateOp,
}

impl Predicate {
    pub fn equal(table: &str, column: &str, value: ValueExpr) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            op: PredicateOp::Equal(value),
        }
    }

    pub fn in_list(table: &str, column: &str, values: Vec<ValueExpr>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            op: PredicateOp::In(values),
        }
    }

    pub fn range(
        table: &str,
        column: &str,
        lower: Bound<ValueExpr>,
        upper: Bound<ValueExpr>,
    ) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            op: PredicateOp::Range { lower, upper },
        }
    }
}

/// Predicates joined by AND.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionGroup {
    pub predicates: Vec<Predicate>,
}

impl ConditionGroup {
    pub fn new(predicates: Vec<Predicate>) -> Self {
        Self { predicates }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregationFunction {
    Count,
    Sum,
    Max,
    Min,
    Avg,
}

impl AggregationFunction {
    pub fn name(&self) -> &'static str {
        match self {
            AggregationFunction::Count => "COUNT",
            AggregationFunction::Sum => "SUM",
            AggregationFunction::Max => "MAX",
            AggregationFunction::Min => "MIN",
            AggregationFunction::Avg => "AVG",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// A plain column, optionally qualified (`o.user_id`).
    Column {
        owner: Option<String>,
        name: String,
        alias: Option<String>,
    },
    Aggregation {
        function: AggregationFunction,
        distinct: bool,
        /// Argument text as written, e.g. `*` or `amount`.
        argument: String,
        alias: Option<String>,
    },
    /// Any other expression; opaque to merging.
    Expression { text: String, alias: Option<String> },
    /// `*` or `o.*`, with the binder-expanded column names.
    Star {
        owner: Option<String>,
        columns: Vec<String>,
    },
}

impl Projection {
    pub fn column(name: &str) -> Self {
        Projection::Column {
            owner: None,
            name: name.into(),
            alias: None,
        }
    }

    pub fn aggregation(function: AggregationFunction, argument: &str) -> Self {
        Projection::Aggregation {
            function,
            distinct: false,
            argument: argument.into(),
            alias: None,
        }
    }

    pub fn star(columns: &[&str]) -> Self {
        Projection::Star {
            owner: None,
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Number of result columns this projection expands to.
    pub fn width(&self) -> usize {
        match self {
            Projection::Star { columns, .. } => columns.len(),
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullsOrder {
    First,
    Last,
}

/// One ORDER BY or GROUP BY item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderItem {
    /// Expression text, e.g. `user_id`, `o.user_id` or `COUNT(*)`.
    pub expression: String,
    pub direction: OrderDirection,
    /// Explicit `NULLS FIRST/LAST`; `None` defers to the configured default.
    pub nulls: Option<NullsOrder>,
}

impl OrderItem {
    pub fn asc(expression: &str) -> Self {
        Self {
            expression: expression.into(),
            direction: OrderDirection::Asc,
            nulls: None,
        }
    }

    pub fn desc(expression: &str) -> Self {
        Self {
            expression: expression.into(),
            direction: OrderDirection::Desc,
            nulls: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationValue {
    Literal(i64),
    Parameter(usize),
}

/// An OFFSET or row-count value and where it sits in the SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationSegment {
    pub value: PaginationValue,
    pub start: usize,
    pub stop: usize,
}

impl PaginationSegment {
    pub fn resolve(&self, params: &[Datum]) -> Option<i64> {
        match self.value {
            PaginationValue::Literal(v) => Some(v),
            PaginationValue::Parameter(idx) => params.get(idx).and_then(Datum::as_i64),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    pub offset: Option<PaginationSegment>,
    pub row_count: Option<PaginationSegment>,
}

/// An index name owned by a logic table (`CREATE INDEX idx ON t_order`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSegment {
    pub name: String,
    pub table: String,
    pub start: usize,
    pub stop: usize,
}

/// A schema/catalog qualifier in front of a table name (`logic_db.t_order`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSegment {
    pub name: String,
    pub start: usize,
    pub stop: usize,
}

/// The value list of `column IN (...)`; the span covers the parentheses.
/// `table` is the owner as written (table name or alias), empty when the
/// column is unqualified.
#[derive(Debug, Clone, PartialEq)]
pub struct InListSegment {
    pub table: String,
    pub column: String,
    pub values: Vec<ValueExpr>,
    pub start: usize,
    pub stop: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    pub kind: StatementKind,
    pub tables: Vec<TableSegment>,
    /// OR of AND-groups. Empty means no usable condition.
    pub conditions: Vec<ConditionGroup>,
    pub projections: Vec<Projection>,
    /// Byte offset just past the last projection; derived columns are
    /// inserted here.
    pub projections_stop: Option<usize>,
    pub group_by: Vec<OrderItem>,
    pub order_by: Vec<OrderItem>,
    pub pagination: Option<Pagination>,
    pub indexes: Vec<IndexSegment>,
    pub schemas: Vec<SchemaSegment>,
    pub in_lists: Vec<InListSegment>,
}

impl BoundStatement {
    pub fn new(kind: StatementKind) -> Self {
        Self {
            kind,
            tables: Vec::new(),
            conditions: Vec::new(),
            projections: Vec::new(),
            projections_stop: None,
            group_by: Vec::new(),
            order_by: Vec::new(),
            pagination: None,
            indexes: Vec::new(),
            schemas: Vec::new(),
            in_lists: Vec::new(),
        }
    }

    /// Record a table occurrence by locating `name` in `sql` after `from`.
    /// Convenience for callers and tests that hold the SQL text.
    pub fn with_table_at(mut self, sql: &str, name: &str, from: usize) -> Self {
        if let Some(pos) = sql.get(from..).and_then(|rest| rest.find(name)) {
            let start = from + pos;
            self.tables.push(TableSegment {
                name: name.to_string(),
                alias: None,
                start,
                stop: start + name.len(),
            });
        }
        self
    }

    pub fn with_table(mut self, segment: TableSegment) -> Self {
        self.tables.push(segment);
        self
    }

    pub fn with_condition(mut self, group: ConditionGroup) -> Self {
        self.conditions.push(group);
        self
    }

    pub fn with_projections(mut self, projections: Vec<Projection>, stop: usize) -> Self {
        self.projections = projections;
        self.projections_stop = Some(stop);
        self
    }

    pub fn with_order_by(mut self, items: Vec<OrderItem>) -> Self {
        self.order_by = items;
        self
    }

    pub fn with_group_by(mut self, items: Vec<OrderItem>) -> Self {
        self.group_by = items;
        self
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    /// Record an IN list on `owner.column` and the matching predicate in
    /// every condition group, locating the list's parentheses in `sql`
    /// after `from`.
    pub fn with_in_list_at(
        mut self,
        sql: &str,
        owner: &str,
        column: &str,
        values: Vec<ValueExpr>,
        from: usize,
    ) -> Self {
        let open = sql.get(from..).and_then(|rest| rest.find('(')).map(|p| from + p);
        let close = open.and_then(|o| sql.get(o..).and_then(|rest| rest.find(')')).map(|p| o + p));
        if let (Some(start), Some(close)) = (open, close) {
            self.in_lists.push(InListSegment {
                table: owner.to_string(),
                column: column.to_string(),
                values: values.clone(),
                start,
                stop: close + 1,
            });
        }
        if self.conditions.is_empty() {
            self.conditions.push(ConditionGroup::default());
        }
        for group in &mut self.conditions {
            group
                .predicates
                .push(Predicate::in_list(owner, column, values.clone()));
        }
        self
    }

    /// Distinct logic table names in first-appearance order.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for t in &self.tables {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(&t.name)) {
                names.push(t.name.clone());
            }
        }
        names
    }

    pub fn has_aggregation(&self) -> bool {
        self.projections
            .iter()
            .any(|p| matches!(p, Projection::Aggregation { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names_dedup_case_insensitive() {
        let sql = "SELECT * FROM t_order o JOIN T_ORDER p ON o.id = p.id";
        let stmt = BoundStatement::new(StatementKind::Select)
            .with_table_at(sql, "t_order", 0)
            .with_table_at(sql, "T_ORDER", 20);
        assert_eq!(stmt.tables.len(), 2);
        assert_eq!(stmt.table_names(), vec!["t_order".to_string()]);
        assert_eq!(&sql[stmt.tables[1].start..stmt.tables[1].stop], "T_ORDER");
    }

    #[test]
    fn test_in_list_segment_spans_parentheses() {
        let sql = "SELECT * FROM t_order WHERE order_id IN (1, ?, 3)";
        let stmt = BoundStatement::new(StatementKind::Select)
            .with_table_at(sql, "t_order", 0)
            .with_in_list_at(
                sql,
                "",
                "order_id",
                vec![
                    ValueExpr::Literal(Datum::Int64(1)),
                    ValueExpr::Parameter(0),
                    ValueExpr::Literal(Datum::Int64(3)),
                ],
                20,
            );
        let seg = &stmt.in_lists[0];
        assert_eq!(&sql[seg.start..seg.stop], "(1, ?, 3)");
        assert_eq!(stmt.conditions.len(), 1);
        assert!(matches!(stmt.conditions[0].predicates[0].op, PredicateOp::In(_)));
    }

    #[test]
    fn test_parameter_resolution() {
        let params = vec![Datum::Int64(10)];
        assert_eq!(
            ValueExpr::Parameter(0).resolve(&params).unwrap(),
            Datum::Int64(10)
        );
        assert!(ValueExpr::Parameter(3).resolve(&params).is_err());
    }

    #[test]
    fn test_pagination_parameter_resolution() {
        let seg = PaginationSegment {
            value: PaginationValue::Parameter(1),
            start: 0,
            stop: 1,
        };
        assert_eq!(seg.resolve(&[Datum::Int32(0), Datum::Int32(5)]), Some(5));
        assert_eq!(seg.resolve(&[]), None);
    }
}
