use std::time::Instant;

use kestrel_common::datum::Datum;
use kestrel_common::error::RewriteError;
use kestrel_common::select_context::SelectContext;
use kestrel_common::statement::{Pagination, PaginationSegment, PaginationValue, ValueExpr};
use kestrel_sharding::{RouteContext, RouteUnit};

use crate::token::{InListItem, SqlToken, TokenSet};

/// Statement-level facts the renderer needs beyond token positions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteContext {
    pub pagination: Option<Pagination>,
    /// Push an unbounded row count to every shard instead of
    /// `offset + row_count`. Set when groups are combined in memory and
    /// every member row of every group is needed.
    pub unbounded_row_count: bool,
}

impl RewriteContext {
    pub fn from_select(select: &SelectContext) -> Self {
        Self {
            pagination: select.pagination,
            unbounded_row_count: select.needs_unbounded_row_count(),
        }
    }
}

/// One physical statement ready for a data source.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionUnit {
    pub data_source: String,
    pub sql: String,
    pub parameters: Vec<Datum>,
    pub route_unit: RouteUnit,
}

pub struct RewriteEngine;

impl RewriteEngine {
    /// Render `sql` once per route unit.
    ///
    /// Each unit's text is built in a single left-to-right pass over the
    /// validated tokens. With no tokens every unit gets `sql` unchanged.
    pub fn rewrite(
        sql: &str,
        params: &[Datum],
        tokens: &TokenSet,
        route: &RouteContext,
        ctx: &RewriteContext,
    ) -> Result<Vec<ExecutionUnit>, RewriteError> {
        let started = Instant::now();
        let row_count = rewritten_row_count(tokens, ctx, params)?;
        let parameters = rewrite_parameters(tokens, params, row_count)?;

        let mut units = Vec::with_capacity(route.len());
        for unit in route.units() {
            units.push(ExecutionUnit {
                data_source: unit.data_source.clone(),
                sql: render(sql, tokens, unit, row_count)?,
                parameters: unit_parameters(tokens, unit, &parameters),
                route_unit: unit.clone(),
            });
        }

        let duration_us = started.elapsed().as_micros() as u64;
        kestrel_observability::record_rewrite_metrics(duration_us, tokens.len(), units.len());
        tracing::debug!(
            "Rewrote statement with {} token(s) into {} unit(s) in {}us",
            tokens.len(),
            units.len(),
            duration_us
        );
        Ok(units)
    }
}

fn render(
    sql: &str,
    tokens: &TokenSet,
    unit: &RouteUnit,
    row_count: Option<i64>,
) -> Result<String, RewriteError> {
    let slice = move |start: usize, stop: usize| {
        sql.get(start..stop).ok_or(RewriteError::TokenOutOfBounds {
            start,
            stop,
            len: sql.len(),
        })
    };

    let mut out = String::with_capacity(sql.len() + 32);
    let mut cursor = 0;
    for token in tokens.tokens() {
        out.push_str(slice(cursor, token.start())?);
        let original = slice(token.start(), token.stop())?;
        match token {
            SqlToken::Table { logic_table, .. } => {
                out.push_str(unit.actual_table(logic_table).unwrap_or(original));
            }
            SqlToken::Schema { .. } => out.push_str(&unit.data_source),
            SqlToken::Index {
                name, logic_table, ..
            } => match unit.actual_table(logic_table) {
                Some(actual) => out.push_str(&format!("{}_{}", name, actual)),
                None => out.push_str(original),
            },
            SqlToken::Projections { columns, .. } => {
                for column in columns {
                    out.push_str(&format!(", {} AS {}", column.expression, column.alias));
                }
            }
            SqlToken::Offset(seg) => match seg.value {
                PaginationValue::Literal(_) => out.push('0'),
                PaginationValue::Parameter(_) => out.push_str(original),
            },
            SqlToken::RowCount(seg) => match (seg.value, row_count) {
                (PaginationValue::Literal(_), Some(n)) => out.push_str(&n.to_string()),
                _ => out.push_str(original),
            },
            SqlToken::InList { items, .. } => match pruned(items, unit) {
                Some(kept) => {
                    let values: Vec<String> = kept
                        .iter()
                        .map(|item| match &item.value {
                            ValueExpr::Literal(d) => d.to_sql_literal(),
                            ValueExpr::Parameter(_) => "?".to_string(),
                        })
                        .collect();
                    out.push_str(&format!("({})", values.join(", ")));
                }
                None => out.push_str(original),
            },
        }
        cursor = token.stop();
    }
    out.push_str(slice(cursor, sql.len())?);
    Ok(out)
}

/// IN-list items `unit` keeps, or `None` when the list stays as written:
/// every item matches, or none does and the statement must still parse.
fn pruned<'a>(items: &'a [InListItem], unit: &RouteUnit) -> Option<Vec<&'a InListItem>> {
    let kept: Vec<&InListItem> = items.iter().filter(|item| item.matches(unit)).collect();
    if kept.is_empty() || kept.len() == items.len() {
        None
    } else {
        Some(kept)
    }
}

/// `parameters` minus the markers pruned from `unit`'s IN lists.
fn unit_parameters(tokens: &TokenSet, unit: &RouteUnit, parameters: &[Datum]) -> Vec<Datum> {
    let mut dropped: Vec<usize> = Vec::new();
    for token in tokens.tokens() {
        let SqlToken::InList { items, .. } = token else {
            continue;
        };
        if pruned(items, unit).is_none() {
            continue;
        }
        dropped.extend(items.iter().filter(|item| !item.matches(unit)).filter_map(|item| {
            match item.value {
                ValueExpr::Parameter(idx) => Some(idx),
                ValueExpr::Literal(_) => None,
            }
        }));
    }
    parameters
        .iter()
        .enumerate()
        .filter(|(idx, _)| !dropped.contains(idx))
        .map(|(_, d)| d.clone())
        .collect()
}

/// Row count each shard must return so the merged stream can still
/// skip `offset` rows and emit `row_count` after them.
fn rewritten_row_count(
    tokens: &TokenSet,
    ctx: &RewriteContext,
    params: &[Datum],
) -> Result<Option<i64>, RewriteError> {
    let Some(row_count) = tokens.tokens().iter().find_map(|t| match t {
        SqlToken::RowCount(seg) => Some(seg),
        _ => None,
    }) else {
        return Ok(None);
    };
    let row_count = resolve(row_count, params)?;
    if ctx.unbounded_row_count {
        return Ok(Some(i64::MAX));
    }
    let offset = match ctx.pagination.and_then(|p| p.offset) {
        Some(seg) => resolve(&seg, params)?,
        None => 0,
    };
    Ok(Some(offset.saturating_add(row_count)))
}

/// Parameter list before per-unit IN-list pruning; pagination markers get
/// their rewritten values.
fn rewrite_parameters(
    tokens: &TokenSet,
    params: &[Datum],
    row_count: Option<i64>,
) -> Result<Vec<Datum>, RewriteError> {
    let mut out = params.to_vec();
    for token in tokens.tokens() {
        let (seg, value) = match token {
            SqlToken::Offset(seg) => (seg, 0),
            SqlToken::RowCount(seg) => match row_count {
                Some(n) => (seg, n),
                None => continue,
            },
            _ => continue,
        };
        if let PaginationValue::Parameter(idx) = seg.value {
            resolve(seg, params)?;
            out[idx] = Datum::Int64(value);
        }
    }
    Ok(out)
}

fn resolve(seg: &PaginationSegment, params: &[Datum]) -> Result<i64, RewriteError> {
    let value = match seg.value {
        PaginationValue::Literal(v) => v,
        PaginationValue::Parameter(idx) => {
            let d = params.get(idx).ok_or(RewriteError::ParameterOutOfRange {
                index: idx,
                count: params.len(),
            })?;
            d.as_i64().ok_or_else(|| {
                RewriteError::InvalidPagination(format!("parameter {} is not an integer: {}", idx, d))
            })?
        }
    };
    if value < 0 {
        return Err(RewriteError::InvalidPagination(format!(
            "negative pagination value {}",
            value
        )));
    }
    Ok(value)
}
