use kestrel_common::datum::Datum;
use kestrel_common::error::RewriteError;
use kestrel_common::select_context::SelectContext;
use kestrel_common::statement::{BoundStatement, InListSegment, ValueExpr};
use kestrel_sharding::{DataNode, RouteContext, ShardingRule, TableRule};

use crate::token::{InListItem, SqlToken, TokenSet};

/// Derives rewrite tokens from a bound statement's segments.
pub struct TokenGenerator;

impl TokenGenerator {
    /// Tokens for `stmt` under `route`.
    ///
    /// Table and index tokens are produced for sharding tables only; other
    /// tables keep their names on every data source. Derived projections
    /// and pagination are only rewritten when the statement fans out to
    /// more than one unit, since a single unit's result is passed through
    /// unmerged. For the same reason IN lists on a sharding column are only
    /// pruned per unit when there is more than one unit.
    pub fn generate(
        sql: &str,
        stmt: &BoundStatement,
        params: &[Datum],
        rule: &ShardingRule,
        select: &SelectContext,
        route: &RouteContext,
    ) -> Result<TokenSet, RewriteError> {
        let mut tokens = Vec::new();

        for seg in &stmt.tables {
            if rule.is_sharding_table(&seg.name) {
                tokens.push(SqlToken::Table {
                    start: seg.start,
                    stop: seg.stop,
                    logic_table: seg.name.clone(),
                });
            }
        }
        for seg in &stmt.schemas {
            tokens.push(SqlToken::Schema {
                start: seg.start,
                stop: seg.stop,
            });
        }
        for seg in &stmt.indexes {
            if rule.is_sharding_table(&seg.table) {
                tokens.push(SqlToken::Index {
                    start: seg.start,
                    stop: seg.stop,
                    name: seg.name.clone(),
                    logic_table: seg.table.clone(),
                });
            }
        }

        if route.len() > 1 && stmt.kind.is_query() {
            if let Some(at) = stmt.projections_stop {
                if !select.derived_columns.is_empty() {
                    tokens.push(SqlToken::Projections {
                        at,
                        columns: select.derived_columns.clone(),
                    });
                }
            }
            if let Some(pagination) = &stmt.pagination {
                if let Some(offset) = pagination.offset {
                    tokens.push(SqlToken::Offset(offset));
                }
                if let Some(row_count) = pagination.row_count {
                    tokens.push(SqlToken::RowCount(row_count));
                }
            }
            for seg in &stmt.in_lists {
                if let Some(token) = in_list_token(seg, stmt, params, rule, route)? {
                    tokens.push(token);
                }
            }
        }

        // Stable: a zero-width insertion stays ahead of a token starting at
        // the same position.
        tokens.sort_by_key(|t| (t.start(), t.stop()));
        TokenSet::new(tokens, sql)
    }
}

/// Rule of the table an IN list filters on: the table or alias named by
/// its owner, or for an unqualified column the first table sharded on it.
fn in_list_table<'r>(
    seg: &InListSegment,
    stmt: &BoundStatement,
    rule: &'r ShardingRule,
) -> Option<&'r TableRule> {
    stmt.tables
        .iter()
        .filter(|t| {
            seg.table.is_empty()
                || t.name.eq_ignore_ascii_case(&seg.table)
                || t.alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(&seg.table))
        })
        .filter_map(|t| rule.find_table_rule(&t.name))
        .find(|r| r.is_sharding_column(&seg.column))
}

fn in_list_token(
    seg: &InListSegment,
    stmt: &BoundStatement,
    params: &[Datum],
    rule: &ShardingRule,
    route: &RouteContext,
) -> Result<Option<SqlToken>, RewriteError> {
    if seg.values.len() < 2 {
        return Ok(None);
    }
    let Some(table) = in_list_table(seg, stmt, rule) else {
        return Ok(None);
    };

    let mut items = Vec::with_capacity(seg.values.len());
    for value in &seg.values {
        let datum = match value {
            ValueExpr::Literal(d) => d.clone(),
            ValueExpr::Parameter(idx) => {
                params
                    .get(*idx)
                    .cloned()
                    .ok_or(RewriteError::ParameterOutOfRange {
                        index: *idx,
                        count: params.len(),
                    })?
            }
        };
        // A unit keeps the value unless the strategy rules its shard out.
        let units = route
            .units()
            .iter()
            .filter(|unit| match unit.actual_table(&table.logic_table) {
                Some(actual) => {
                    let node = DataNode::new(&unit.data_source, actual);
                    table.may_hold(&seg.column, &datum, &node) != Some(false)
                }
                None => true,
            })
            .cloned()
            .collect();
        items.push(InListItem {
            value: value.clone(),
            units,
        });
    }
    Ok(Some(SqlToken::InList {
        start: seg.start,
        stop: seg.stop,
        items,
    }))
}
