use std::collections::BTreeMap;

use kestrel_common::datum::Datum;
use kestrel_common::error::RouteError;
use kestrel_common::hint::HintOverrides;
use kestrel_common::sharding_value::ShardingValue;
use kestrel_common::statement::BoundStatement;

use super::condition::{self, TableConditions};
use super::{RouteContext, RouteMapper, RouteType, RouteUnit};
use crate::algorithm::{
    ComplexShardingValues, HintShardingValues, PreciseShardingValue, RangeShardingValue,
};
use crate::rule::{DataNode, ShardingRule, ShardingStrategy, TableRule};

/// Stateless router over an immutable rule snapshot; safe to call from any
/// number of threads at once.
pub struct RoutingEngine;

/// Where a strategy's values come from for one routing pass.
enum ValueSource<'a> {
    Conditions(&'a BTreeMap<String, ShardingValue>),
    Hint(Option<&'a [Datum]>),
}

impl<'a> ValueSource<'a> {
    fn value_for(&self, column: &str) -> Option<ShardingValue> {
        match self {
            ValueSource::Conditions(values) => values.get(column).cloned(),
            ValueSource::Hint(Some(values)) => ShardingValue::from_values(values.to_vec()),
            ValueSource::Hint(None) => None,
        }
    }

    fn hint_values(&self) -> Option<&'a [Datum]> {
        match self {
            ValueSource::Hint(values) => *values,
            ValueSource::Conditions(_) => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            ValueSource::Conditions(values) => {
                let parts: Vec<String> = values
                    .iter()
                    .map(|(column, value)| format!("{}={}", column, value))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            ValueSource::Hint(Some(values)) => {
                let parts: Vec<String> = values.iter().map(|d| d.to_string()).collect();
                format!("hint[{}]", parts.join(", "))
            }
            ValueSource::Hint(None) => "hint[]".into(),
        }
    }
}

impl RoutingEngine {
    /// Route `stmt` against `rule`.
    ///
    /// Hint overrides, when they cover a table, replace predicate
    /// extraction for it entirely. A strategy column with no usable value
    /// routes to every candidate. An algorithm that selects nothing fails
    /// with [`RouteError::NoRouteFound`].
    pub fn route(
        rule: &ShardingRule,
        stmt: &BoundStatement,
        params: &[Datum],
        hints: Option<&HintOverrides>,
    ) -> Result<RouteContext, RouteError> {
        let names = stmt.table_names();
        let forced_ds = match hints.and_then(HintOverrides::data_source) {
            Some(ds) if !rule.data_source_names().iter().any(|d| d == ds) => {
                return Err(RouteError::UnknownDataSource(ds.to_string()));
            }
            other => other,
        };

        let sharding: Vec<&TableRule> = names
            .iter()
            .filter_map(|n| rule.find_table_rule(n))
            .collect();
        if sharding.is_empty() {
            return route_without_sharding(rule, stmt, &names, forced_ds);
        }

        let hinted = forced_ds.is_some()
            || hints.map_or(false, |h| sharding.iter().any(|t| h.covers(&t.logic_table)));

        let mut fully_broadcast = true;
        let mut group_routes: Vec<Vec<(String, Vec<RouteMapper>)>> = Vec::new();
        for group in binding_components(rule, &sharding) {
            let primary = group
                .iter()
                .copied()
                .find(|t| hints.map_or(false, |h| h.covers(&t.logic_table)))
                .unwrap_or(group[0]);
            let owners = owners_of(stmt, &group);
            let nodes = route_table(primary, stmt, params, hints, forced_ds, &owners)?;
            if nodes.len() != primary.actual_nodes.len() {
                fully_broadcast = false;
            }
            let mut tuples = Vec::with_capacity(nodes.len());
            for node in nodes {
                let Some(index) = primary.node_index(&node) else {
                    continue;
                };
                let mappers = group
                    .iter()
                    .map(|t| RouteMapper::new(&t.logic_table, &t.actual_nodes[index].table))
                    .collect();
                tuples.push((node.data_source, mappers));
            }
            group_routes.push(tuples);
        }

        let mut common: Vec<String> = Vec::new();
        if let Some(first) = group_routes.first() {
            for (ds, _) in first {
                if !common.contains(ds)
                    && group_routes[1..]
                        .iter()
                        .all(|g| g.iter().any(|(other, _)| other == ds))
                {
                    common.push(ds.clone());
                }
            }
        }
        if common.is_empty() {
            return Err(RouteError::NoCommonDataSource {
                tables: names.join(", "),
            });
        }

        let mut units = Vec::new();
        for ds in &common {
            let mut partials: Vec<Vec<RouteMapper>> = vec![Vec::new()];
            for group in &group_routes {
                let mut next = Vec::new();
                for partial in &partials {
                    for (_, mappers) in group.iter().filter(|(d, _)| d == ds) {
                        let mut combined = partial.clone();
                        combined.extend(mappers.iter().cloned());
                        next.push(combined);
                    }
                }
                partials = next;
            }
            units.extend(partials.into_iter().map(|m| RouteUnit::new(ds, m)));
        }

        let route_type = if hinted {
            RouteType::Hint
        } else if fully_broadcast {
            RouteType::Broadcast
        } else {
            RouteType::Sharded
        };
        let ctx = RouteContext::new(units, route_type);
        tracing::debug!(
            "Routed [{}] to {} unit(s) ({})",
            names.join(", "),
            ctx.len(),
            route_type.as_str()
        );
        Ok(ctx)
    }
}

/// Statements with no sharding table: broadcast tables go to one data
/// source for reads and every data source for writes; anything else goes
/// to the default data source.
fn route_without_sharding(
    rule: &ShardingRule,
    stmt: &BoundStatement,
    names: &[String],
    forced_ds: Option<&str>,
) -> Result<RouteContext, RouteError> {
    let no_data_source = || RouteError::NoRouteFound {
        logic_table: names.join(", "),
        values: "no data source configured".into(),
    };
    let broadcast: Vec<RouteMapper> = names
        .iter()
        .filter(|n| rule.is_broadcast_table(n))
        .map(|n| RouteMapper::new(n, n))
        .collect();

    if broadcast.is_empty() {
        let ds = forced_ds
            .or_else(|| rule.default_data_source())
            .ok_or_else(no_data_source)?;
        return Ok(RouteContext::new(
            vec![RouteUnit::new(ds, Vec::new())],
            RouteType::Default,
        ));
    }

    if stmt.kind.is_query() || forced_ds.is_some() {
        let ds = forced_ds
            .or_else(|| rule.default_data_source())
            .ok_or_else(no_data_source)?;
        return Ok(RouteContext::new(
            vec![RouteUnit::new(ds, broadcast)],
            RouteType::Unicast,
        ));
    }

    let units: Vec<RouteUnit> = rule
        .data_source_names()
        .iter()
        .map(|ds| RouteUnit::new(ds, broadcast.clone()))
        .collect();
    if units.is_empty() {
        return Err(no_data_source());
    }
    Ok(RouteContext::new(units, RouteType::Broadcast))
}

/// Partition the referenced sharding tables into binding groups, keeping
/// first-appearance order.
fn binding_components<'r>(rule: &ShardingRule, tables: &[&'r TableRule]) -> Vec<Vec<&'r TableRule>> {
    let mut assigned = vec![false; tables.len()];
    let mut out = Vec::new();
    for i in 0..tables.len() {
        if assigned[i] {
            continue;
        }
        assigned[i] = true;
        let mut group = vec![tables[i]];
        for j in (i + 1)..tables.len() {
            if !assigned[j] && rule.is_binding_pair(&tables[i].logic_table, &tables[j].logic_table) {
                assigned[j] = true;
                group.push(tables[j]);
            }
        }
        out.push(group);
    }
    out
}

/// Names a predicate may use to refer to any table of `group`.
fn owners_of(stmt: &BoundStatement, group: &[&TableRule]) -> Vec<String> {
    let mut owners: Vec<String> = group.iter().map(|t| t.logic_table.clone()).collect();
    for seg in &stmt.tables {
        let name = seg.name.to_ascii_lowercase();
        if owners.contains(&name) {
            if let Some(alias) = &seg.alias {
                let alias = alias.to_ascii_lowercase();
                if !owners.contains(&alias) {
                    owners.push(alias);
                }
            }
        }
    }
    owners
}

fn route_table(
    table: &TableRule,
    stmt: &BoundStatement,
    params: &[Datum],
    hints: Option<&HintOverrides>,
    forced_ds: Option<&str>,
    owners: &[String],
) -> Result<Vec<DataNode>, RouteError> {
    let mut ds_candidates = table.data_source_names();
    if let Some(ds) = forced_ds {
        ds_candidates.retain(|d| d == ds);
        if ds_candidates.is_empty() {
            return Err(RouteError::NoRouteFound {
                logic_table: table.logic_table.clone(),
                values: format!("data source hint '{}'", ds),
            });
        }
    }
    let skip_db = forced_ds.is_some();

    if let Some(h) = hints.filter(|h| h.covers(&table.logic_table)) {
        let db = ValueSource::Hint(h.database_values(&table.logic_table));
        let tb = ValueSource::Hint(h.table_values(&table.logic_table));
        return route_with(table, &ds_candidates, skip_db, &db, &tb);
    }

    let mut columns: Vec<&str> = table.database_strategy.columns();
    for c in table.table_strategy.columns() {
        if !columns.contains(&c) {
            columns.push(c);
        }
    }

    if stmt.conditions.is_empty() {
        let empty = TableConditions::default();
        let src = ValueSource::Conditions(&empty.values);
        return route_with(table, &ds_candidates, skip_db, &src, &src);
    }

    let mut nodes: Vec<DataNode> = Vec::new();
    let mut satisfiable = false;
    for group in &stmt.conditions {
        let extracted = condition::extract(group, owners, &columns, params)?;
        if extracted.always_false {
            continue;
        }
        satisfiable = true;
        let src = ValueSource::Conditions(&extracted.values);
        for node in route_with(table, &ds_candidates, skip_db, &src, &src)? {
            if !nodes.contains(&node) {
                nodes.push(node);
            }
        }
    }

    if !satisfiable {
        // Nothing can match; one shard still has to answer with the
        // right (empty) result shape.
        let first = table
            .actual_nodes
            .iter()
            .find(|n| ds_candidates.contains(&n.data_source))
            .cloned();
        tracing::debug!(
            "Conditions on {} are always false; routing to first data node",
            table.logic_table
        );
        return first.map(|n| vec![n]).ok_or_else(|| RouteError::NoRouteFound {
            logic_table: table.logic_table.clone(),
            values: "always-false condition".into(),
        });
    }

    nodes.sort_by_key(|n| table.node_index(n));
    Ok(nodes)
}

fn route_with(
    table: &TableRule,
    ds_candidates: &[String],
    skip_db: bool,
    db_source: &ValueSource<'_>,
    table_source: &ValueSource<'_>,
) -> Result<Vec<DataNode>, RouteError> {
    let data_sources = if skip_db {
        ds_candidates.to_vec()
    } else {
        route_strategy(table, &table.database_strategy, ds_candidates, db_source)?
    };
    let mut nodes = Vec::new();
    for ds in &data_sources {
        let candidates = table.actual_tables_in(ds);
        for actual in route_strategy(table, &table.table_strategy, &candidates, table_source)? {
            nodes.push(DataNode::new(ds, &actual));
        }
    }
    Ok(nodes)
}

fn route_strategy(
    table: &TableRule,
    strategy: &ShardingStrategy,
    candidates: &[String],
    source: &ValueSource<'_>,
) -> Result<Vec<String>, RouteError> {
    let failure = |reason: String| RouteError::AlgorithmFailure {
        algorithm: strategy.algorithm_name().unwrap_or("none").to_string(),
        reason,
    };
    let broadcast = |what: &str| -> Result<Vec<String>, RouteError> {
        tracing::debug!(
            "No usable sharding value for {} of {}; routing to all {} candidates",
            what,
            table.logic_table,
            candidates.len()
        );
        Ok(candidates.to_vec())
    };

    let routed: Vec<String> = match strategy {
        ShardingStrategy::None => return Ok(candidates.to_vec()),
        ShardingStrategy::Standard {
            column, algorithm, ..
        } => match source.value_for(column) {
            None => return broadcast(column),
            Some(ShardingValue::Range(range)) => algorithm
                .shard_range(
                    candidates,
                    &RangeShardingValue {
                        logic_table: &table.logic_table,
                        column,
                        range: &range,
                    },
                )
                .map_err(failure)?,
            Some(value) => {
                let mut out: Vec<String> = Vec::new();
                for d in value.discrete().unwrap_or_default() {
                    let hit = algorithm
                        .shard_precise(
                            candidates,
                            &PreciseShardingValue {
                                logic_table: &table.logic_table,
                                column,
                                value: d,
                            },
                        )
                        .map_err(failure)?;
                    if let Some(t) = hit {
                        if !out.contains(&t) {
                            out.push(t);
                        }
                    }
                }
                out
            }
        },
        ShardingStrategy::Complex {
            columns, algorithm, ..
        } => {
            let values: BTreeMap<String, ShardingValue> = columns
                .iter()
                .filter_map(|c| source.value_for(c).map(|v| (c.clone(), v)))
                .collect();
            if values.is_empty() {
                return broadcast(&columns.join(","));
            }
            algorithm
                .shard(
                    candidates,
                    &ComplexShardingValues {
                        logic_table: &table.logic_table,
                        values: &values,
                    },
                )
                .map_err(failure)?
        }
        ShardingStrategy::Hint { algorithm, .. } => match source.hint_values() {
            None => return broadcast("hint"),
            Some(values) => algorithm
                .shard(
                    candidates,
                    &HintShardingValues {
                        logic_table: &table.logic_table,
                        values,
                    },
                )
                .map_err(failure)?,
        },
    };

    // Only configured candidates, in configuration order.
    let routed: Vec<String> = candidates
        .iter()
        .filter(|c| routed.iter().any(|r| r == *c))
        .cloned()
        .collect();
    if routed.is_empty() {
        return Err(RouteError::NoRouteFound {
            logic_table: table.logic_table.clone(),
            values: source.describe(),
        });
    }
    Ok(routed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::AlgorithmRegistry;
    use kestrel_common::config::{AlgorithmConfig, ShardingRuleConfig, StrategyConfig, TableRuleConfig};
    use kestrel_common::statement::{ConditionGroup, Predicate, StatementKind, ValueExpr};

    fn rule() -> ShardingRule {
        let cfg = ShardingRuleConfig::default()
            .with_data_sources(&["ds_0", "ds_1"])
            .with_algorithm("mod2", AlgorithmConfig::new("MOD").with_prop("sharding-count", 2))
            .with_table(
                "t_order",
                TableRuleConfig::new("ds_${0..1}.t_order_${0..1}")
                    .with_database_strategy(StrategyConfig::standard("user_id", "mod2"))
                    .with_table_strategy(StrategyConfig::standard("order_id", "mod2")),
            );
        ShardingRule::build(&cfg, &AlgorithmRegistry::with_builtins()).unwrap()
    }

    fn select(sql: &str) -> BoundStatement {
        BoundStatement::new(StatementKind::Select).with_table_at(sql, "t_order", 0)
    }

    #[test]
    fn test_or_groups_union() {
        let sql = "SELECT * FROM t_order WHERE (user_id = 0 AND order_id = 0) OR (user_id = 1 AND order_id = 1)";
        let lit = |v: i64| ValueExpr::Literal(Datum::Int64(v));
        let stmt = select(sql)
            .with_condition(ConditionGroup::new(vec![
                Predicate::equal("t_order", "user_id", lit(0)),
                Predicate::equal("t_order", "order_id", lit(0)),
            ]))
            .with_condition(ConditionGroup::new(vec![
                Predicate::equal("t_order", "user_id", lit(1)),
                Predicate::equal("t_order", "order_id", lit(1)),
            ]));
        let ctx = RoutingEngine::route(&rule(), &stmt, &[], None).unwrap();
        let got: Vec<String> = ctx.units().iter().map(|u| u.to_string()).collect();
        assert_eq!(got, vec!["ds_0:[t_order->t_order_0]", "ds_1:[t_order->t_order_1]"]);
        assert_eq!(ctx.route_type(), RouteType::Sharded);
    }

    #[test]
    fn test_describe_lists_values() {
        let mut values = BTreeMap::new();
        values.insert("order_id".to_string(), ShardingValue::Precise(Datum::Int64(7)));
        assert_eq!(ValueSource::Conditions(&values).describe(), "{order_id=7}");
        let hinted = [Datum::Int64(1)];
        assert_eq!(ValueSource::Hint(Some(&hinted)).describe(), "hint[1]");
    }
}
