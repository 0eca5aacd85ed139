//! Integration tests for routing followed by SQL rewriting.
//!
//! Validates:
//! - Identity law: no tokens leaves every unit's SQL unchanged
//! - Per-unit table substitution, including binding tables and aliases
//! - Derived column injection for ORDER BY / AVG on fan-out queries
//! - Pagination push-down: offset 0, row count offset+limit, unbounded for
//!   in-memory grouping
//! - Single-unit statements keep their pagination and select list
//! - IN lists on a sharding column keep only the values each unit can hold,
//!   with pruned parameter markers dropped from that unit's parameters

use kestrel_common::config::{AlgorithmConfig, ShardingRuleConfig, StrategyConfig, TableRuleConfig};
use kestrel_common::datum::Datum;
use kestrel_common::select_context::SelectContext;
use kestrel_common::statement::{
    AggregationFunction, BoundStatement, ConditionGroup, OrderItem, Pagination, PaginationSegment,
    PaginationValue, Predicate, Projection, StatementKind, TableSegment, ValueExpr,
};
use kestrel_rewrite::{RewriteContext, RewriteEngine, TokenGenerator, TokenSet};
use kestrel_sharding::{AlgorithmRegistry, RouteMapper, RouteType, RouteUnit, RoutingEngine};
use kestrel_sharding::{RouteContext, ShardingRule};
use proptest::prelude::*;

fn rule() -> ShardingRule {
    let cfg = ShardingRuleConfig::default()
        .with_data_sources(&["ds_0", "ds_1"])
        .with_algorithm("mod2", AlgorithmConfig::new("MOD").with_prop("sharding-count", 2))
        .with_table(
            "t_order",
            TableRuleConfig::new("ds_${0..1}.t_order_${0..1}")
                .with_database_strategy(StrategyConfig::standard("user_id", "mod2"))
                .with_table_strategy(StrategyConfig::standard("order_id", "mod2")),
        )
        .with_table(
            "t_order_item",
            TableRuleConfig::new("ds_${0..1}.t_order_item_${0..1}")
                .with_database_strategy(StrategyConfig::standard("user_id", "mod2"))
                .with_table_strategy(StrategyConfig::standard("order_id", "mod2")),
        )
        .with_binding_group(&["t_order", "t_order_item"]);
    ShardingRule::build(&cfg, &AlgorithmRegistry::with_builtins()).unwrap()
}

fn span(sql: &str, text: &str) -> (usize, usize) {
    let start = sql.find(text).unwrap();
    (start, start + text.len())
}

fn rewrite(sql: &str, stmt: &BoundStatement, params: &[Datum]) -> Vec<(String, String, Vec<Datum>)> {
    let rule = rule();
    let route = RoutingEngine::route(&rule, stmt, params, None).unwrap();
    let select = SelectContext::from_statement(stmt);
    let tokens = TokenGenerator::generate(sql, stmt, params, &rule, &select, &route).unwrap();
    RewriteEngine::rewrite(sql, params, &tokens, &route, &RewriteContext::from_select(&select))
        .unwrap()
        .into_iter()
        .map(|u| (u.data_source, u.sql, u.parameters))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// Table substitution
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_single_unit_rewrites_table_only() {
    let sql = "SELECT * FROM t_order WHERE user_id = ? AND order_id = ? LIMIT 10";
    let (ls, le) = span(sql, "10");
    let stmt = BoundStatement::new(StatementKind::Select)
        .with_table_at(sql, "t_order", 0)
        .with_projections(vec![Projection::star(&["order_id", "user_id"])], 8)
        .with_condition(ConditionGroup::new(vec![
            Predicate::equal("t_order", "user_id", ValueExpr::Parameter(0)),
            Predicate::equal("t_order", "order_id", ValueExpr::Parameter(1)),
        ]))
        .with_pagination(Pagination {
            offset: None,
            row_count: Some(PaginationSegment {
                value: PaginationValue::Literal(10),
                start: ls,
                stop: le,
            }),
        });
    let params = [Datum::Int64(1), Datum::Int64(2)];
    let units = rewrite(sql, &stmt, &params);
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].0, "ds_1");
    assert_eq!(
        units[0].1,
        "SELECT * FROM t_order_0 WHERE user_id = ? AND order_id = ? LIMIT 10"
    );
    assert_eq!(units[0].2, params.to_vec());
}

#[test]
fn test_binding_tables_with_aliases() {
    let sql = "SELECT o.order_id FROM t_order o JOIN t_order_item i ON o.order_id = i.order_id WHERE o.user_id = 0 AND o.order_id = 1";
    let (os, oe) = span(sql, "t_order ");
    let (is, ie) = span(sql, "t_order_item");
    let stmt = BoundStatement::new(StatementKind::Select)
        .with_table(TableSegment {
            name: "t_order".into(),
            alias: Some("o".into()),
            start: os,
            stop: oe - 1,
        })
        .with_table(TableSegment {
            name: "t_order_item".into(),
            alias: Some("i".into()),
            start: is,
            stop: ie,
        })
        .with_condition(ConditionGroup::new(vec![
            Predicate::equal("o", "user_id", ValueExpr::Literal(Datum::Int64(0))),
            Predicate::equal("o", "order_id", ValueExpr::Literal(Datum::Int64(1))),
        ]));
    let units = rewrite(sql, &stmt, &[]);
    assert_eq!(units.len(), 1);
    assert_eq!(
        units[0].1,
        "SELECT o.order_id FROM t_order_1 o JOIN t_order_item_1 i ON o.order_id = i.order_id WHERE o.user_id = 0 AND o.order_id = 1"
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// Fan-out queries
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_fan_out_order_by_with_pagination() {
    let sql = "SELECT order_id FROM t_order ORDER BY user_id DESC LIMIT 5 OFFSET 10";
    let (ls, le) = span(sql, "5");
    let (os, oe) = span(sql, "10");
    let stmt = BoundStatement::new(StatementKind::Select)
        .with_projections(vec![Projection::column("order_id")], 15)
        .with_table_at(sql, "t_order", 0)
        .with_order_by(vec![OrderItem::desc("user_id")])
        .with_pagination(Pagination {
            offset: Some(PaginationSegment {
                value: PaginationValue::Literal(10),
                start: os,
                stop: oe,
            }),
            row_count: Some(PaginationSegment {
                value: PaginationValue::Literal(5),
                start: ls,
                stop: le,
            }),
        });
    let units = rewrite(sql, &stmt, &[]);
    assert_eq!(units.len(), 4);
    assert_eq!(
        units[0].1,
        "SELECT order_id, user_id AS ORDER_BY_DERIVED_0 FROM t_order_0 ORDER BY user_id DESC LIMIT 15 OFFSET 0"
    );
    assert_eq!(units[3].0, "ds_1");
    assert!(units[3].1.contains("FROM t_order_1 "));
}

#[test]
fn test_fan_out_group_by_avg_unbounded() {
    let sql = "SELECT status, AVG(amount) FROM t_order GROUP BY status LIMIT ?";
    let (ls, le) = span(sql, "?");
    let stmt = BoundStatement::new(StatementKind::Select)
        .with_projections(
            vec![
                Projection::column("status"),
                Projection::aggregation(AggregationFunction::Avg, "amount"),
            ],
            26,
        )
        .with_table_at(sql, "t_order", 0)
        .with_group_by(vec![OrderItem::asc("status")])
        .with_pagination(Pagination {
            offset: None,
            row_count: Some(PaginationSegment {
                value: PaginationValue::Parameter(0),
                start: ls,
                stop: le,
            }),
        });
    let units = rewrite(sql, &stmt, &[Datum::Int32(3)]);
    assert_eq!(units.len(), 4);
    assert_eq!(
        units[2].1,
        "SELECT status, AVG(amount), COUNT(amount) AS AVG_DERIVED_COUNT_0, SUM(amount) AS AVG_DERIVED_SUM_0 FROM t_order_0 GROUP BY status LIMIT ?"
    );
    assert_eq!(units[2].2, vec![Datum::Int64(i64::MAX)]);
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-list pruning
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_in_list_pruned_per_table() {
    let sql = "SELECT * FROM t_order WHERE user_id = ? AND order_id IN (?, ?, 3)";
    let stmt = BoundStatement::new(StatementKind::Select)
        .with_table_at(sql, "t_order", 0)
        .with_condition(ConditionGroup::new(vec![Predicate::equal(
            "t_order",
            "user_id",
            ValueExpr::Parameter(0),
        )]))
        .with_in_list_at(
            sql,
            "t_order",
            "order_id",
            vec![
                ValueExpr::Parameter(1),
                ValueExpr::Parameter(2),
                ValueExpr::Literal(Datum::Int64(3)),
            ],
            0,
        );
    let params = [Datum::Int64(1), Datum::Int64(1), Datum::Int64(2)];
    let mut units = rewrite(sql, &stmt, &params);
    units.sort_by(|a, b| a.1.cmp(&b.1));
    assert_eq!(units.len(), 2);
    assert!(units.iter().all(|u| u.0 == "ds_1"));
    assert_eq!(
        units[0].1,
        "SELECT * FROM t_order_0 WHERE user_id = ? AND order_id IN (?)"
    );
    assert_eq!(units[0].2, vec![Datum::Int64(1), Datum::Int64(2)]);
    assert_eq!(
        units[1].1,
        "SELECT * FROM t_order_1 WHERE user_id = ? AND order_id IN (?, 3)"
    );
    assert_eq!(units[1].2, vec![Datum::Int64(1), Datum::Int64(1)]);
}

// ═══════════════════════════════════════════════════════════════════════════
// Identity law
// ═══════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn prop_empty_token_set_is_identity(sql in "\\PC{0,80}", units in 1usize..4) {
        let route = RouteContext::new(
            (0..units)
                .map(|i| RouteUnit::new(&format!("ds_{}", i), vec![RouteMapper::new("t", "t_0")]))
                .collect(),
            RouteType::Sharded,
        );
        let tokens = TokenSet::new(Vec::new(), &sql).unwrap();
        let out = RewriteEngine::rewrite(&sql, &[], &tokens, &route, &RewriteContext::default()).unwrap();
        prop_assert_eq!(out.len(), units);
        for unit in out {
            prop_assert_eq!(&unit.sql, &sql);
        }
    }
}
