//! Integration tests for the routing engine.
//!
//! Validates:
//! - Equality on sharding columns routes to exactly the algorithm's target
//! - Missing conditions route to every actual node (broadcast)
//! - IN lists, ranges, OR-groups and parameter markers
//! - Hint overrides pre-empt WHERE predicates
//! - Empty algorithm output fails with "no route found"
//! - Datetime interval sharding by month suffix
//! - Binding tables zip positionally; unrelated tables take a cross product
//! - Broadcast tables, default data source and data-source hints

use std::ops::Bound;

use kestrel_common::config::{AlgorithmConfig, ShardingRuleConfig, StrategyConfig, TableRuleConfig};
use kestrel_common::datum::Datum;
use kestrel_common::error::RouteError;
use kestrel_common::hint::HintOverrides;
use kestrel_common::statement::{
    BoundStatement, ConditionGroup, Predicate, StatementKind, TableSegment, ValueExpr,
};
use kestrel_sharding::{AlgorithmRegistry, RouteType, RoutingEngine, ShardingRule};
use proptest::prelude::*;

fn config() -> ShardingRuleConfig {
    ShardingRuleConfig::default()
        .with_data_sources(&["ds_0", "ds_1"])
        .with_default_data_source("ds_0")
        .with_algorithm("db_mod", AlgorithmConfig::new("MOD").with_prop("sharding-count", 2))
        .with_algorithm(
            "order_inline",
            AlgorithmConfig::new("INLINE").with_prop("algorithm-expression", "t_order_${order_id % 2}"),
        )
        .with_algorithm(
            "item_inline",
            AlgorithmConfig::new("INLINE")
                .with_prop("algorithm-expression", "t_order_item_${order_id % 2}"),
        )
        .with_table(
            "t_order",
            TableRuleConfig::new("ds_${0..1}.t_order_${0..1}")
                .with_database_strategy(StrategyConfig::standard("user_id", "db_mod"))
                .with_table_strategy(StrategyConfig::standard("order_id", "order_inline")),
        )
        .with_table(
            "t_order_item",
            TableRuleConfig::new("ds_${0..1}.t_order_item_${0..1}")
                .with_database_strategy(StrategyConfig::standard("user_id", "db_mod"))
                .with_table_strategy(StrategyConfig::standard("order_id", "item_inline")),
        )
        .with_table(
            "t_user",
            TableRuleConfig::new("ds_${0..1}.t_user")
                .with_database_strategy(StrategyConfig::standard("user_id", "db_mod")),
        )
        .with_binding_group(&["t_order", "t_order_item"])
        .with_broadcast_table("t_config")
}

fn rule() -> ShardingRule {
    ShardingRule::build(&config(), &AlgorithmRegistry::with_builtins()).unwrap()
}

fn lit(v: i64) -> ValueExpr {
    ValueExpr::Literal(Datum::Int64(v))
}

fn query(kind: StatementKind, tables: &[&str]) -> BoundStatement {
    let mut stmt = BoundStatement::new(kind);
    let mut pos = 14;
    for t in tables {
        stmt = stmt.with_table(TableSegment {
            name: t.to_string(),
            alias: None,
            start: pos,
            stop: pos + t.len(),
        });
        pos += t.len() + 1;
    }
    stmt
}

fn units(ctx: &kestrel_sharding::RouteContext) -> Vec<String> {
    ctx.units().iter().map(|u| u.to_string()).collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// Single table
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_equality_routes_to_single_unit() {
    let stmt = query(StatementKind::Select, &["t_order"]).with_condition(ConditionGroup::new(vec![
        Predicate::equal("t_order", "user_id", lit(1)),
        Predicate::equal("t_order", "order_id", lit(4)),
    ]));
    let ctx = RoutingEngine::route(&rule(), &stmt, &[], None).unwrap();
    assert!(ctx.is_single_route());
    assert_eq!(units(&ctx), vec!["ds_1:[t_order->t_order_0]"]);
}

#[test]
fn test_no_condition_broadcasts() {
    let stmt = query(StatementKind::Select, &["t_order"]);
    let ctx = RoutingEngine::route(&rule(), &stmt, &[], None).unwrap();
    assert_eq!(ctx.len(), 4);
    assert!(ctx.is_broadcast());
    assert_eq!(
        units(&ctx),
        vec![
            "ds_0:[t_order->t_order_0]",
            "ds_0:[t_order->t_order_1]",
            "ds_1:[t_order->t_order_0]",
            "ds_1:[t_order->t_order_1]",
        ]
    );
}

#[test]
fn test_database_only_condition() {
    let stmt = query(StatementKind::Select, &["t_order"])
        .with_condition(ConditionGroup::new(vec![Predicate::equal("t_order", "user_id", lit(2))]));
    let ctx = RoutingEngine::route(&rule(), &stmt, &[], None).unwrap();
    assert_eq!(
        units(&ctx),
        vec!["ds_0:[t_order->t_order_0]", "ds_0:[t_order->t_order_1]"]
    );
    assert_eq!(ctx.route_type(), RouteType::Sharded);
}

#[test]
fn test_in_list_and_parameters() {
    let stmt = query(StatementKind::Select, &["t_order"]).with_condition(ConditionGroup::new(vec![
        Predicate::equal("t_order", "user_id", ValueExpr::Parameter(0)),
        Predicate::in_list("t_order", "order_id", vec![ValueExpr::Parameter(1), lit(5)]),
    ]));
    let params = [Datum::Int32(0), Datum::Int64(3)];
    let ctx = RoutingEngine::route(&rule(), &stmt, &params, None).unwrap();
    assert_eq!(units(&ctx), vec!["ds_0:[t_order->t_order_1]"]);
}

#[test]
fn test_range_on_mod_column() {
    let stmt = query(StatementKind::Select, &["t_order"]).with_condition(ConditionGroup::new(vec![
        Predicate::range("t_order", "user_id", Bound::Included(lit(3)), Bound::Included(lit(3))),
    ]));
    let ctx = RoutingEngine::route(&rule(), &stmt, &[], None).unwrap();
    assert_eq!(ctx.data_source_names(), vec!["ds_1"]);
    assert_eq!(ctx.len(), 2);
}

#[test]
fn test_unsatisfiable_condition_routes_to_first_node() {
    let stmt = query(StatementKind::Select, &["t_order"]).with_condition(ConditionGroup::new(vec![
        Predicate::equal("t_order", "order_id", lit(1)),
        Predicate::equal("t_order", "order_id", lit(2)),
    ]));
    let ctx = RoutingEngine::route(&rule(), &stmt, &[], None).unwrap();
    assert_eq!(units(&ctx), vec!["ds_0:[t_order->t_order_0]"]);
}

#[test]
fn test_integer_gap_routes_to_first_node() {
    let stmt = query(StatementKind::Select, &["t_order"]).with_condition(ConditionGroup::new(vec![
        Predicate::range("t_order", "user_id", Bound::Excluded(lit(5)), Bound::Unbounded),
        Predicate::range("t_order", "user_id", Bound::Unbounded, Bound::Excluded(lit(6))),
    ]));
    let ctx = RoutingEngine::route(&rule(), &stmt, &[], None).unwrap();
    assert_eq!(units(&ctx), vec!["ds_0:[t_order->t_order_0]"]);
}

fn interval_rule() -> ShardingRule {
    let cfg = config()
        .with_algorithm(
            "monthly",
            AlgorithmConfig::new("INTERVAL")
                .with_prop("datetime-lower", "2024-01-01 00:00:00")
                .with_prop("datetime-upper", "2024-03-31 23:59:59")
                .with_prop("sharding-suffix-pattern", "%Y%m")
                .with_prop("datetime-interval-unit", "MONTHS"),
        )
        .with_table(
            "t_log",
            TableRuleConfig::new("ds_0.t_log_${202401..202403}")
                .with_table_strategy(StrategyConfig::standard("created_at", "monthly")),
        );
    ShardingRule::build(&cfg, &AlgorithmRegistry::with_builtins()).unwrap()
}

fn text(v: &str) -> ValueExpr {
    ValueExpr::Literal(Datum::Text(v.into()))
}

#[test]
fn test_interval_routes_by_month() {
    let rule = interval_rule();
    let stmt = query(StatementKind::Select, &["t_log"]).with_condition(ConditionGroup::new(vec![
        Predicate::equal("t_log", "created_at", text("2024-02-14 08:30:00")),
    ]));
    let ctx = RoutingEngine::route(&rule, &stmt, &[], None).unwrap();
    assert_eq!(units(&ctx), vec!["ds_0:[t_log->t_log_202402]"]);

    let stmt = query(StatementKind::Select, &["t_log"]).with_condition(ConditionGroup::new(vec![
        Predicate::range(
            "t_log",
            "created_at",
            Bound::Included(text("2024-02-10 00:00:00")),
            Bound::Unbounded,
        ),
    ]));
    let ctx = RoutingEngine::route(&rule, &stmt, &[], None).unwrap();
    assert_eq!(
        units(&ctx),
        vec!["ds_0:[t_log->t_log_202402]", "ds_0:[t_log->t_log_202403]"]
    );
}

#[test]
fn test_interval_value_outside_bounds_has_no_route() {
    let stmt = query(StatementKind::Select, &["t_log"]).with_condition(ConditionGroup::new(vec![
        Predicate::equal("t_log", "created_at", text("2023-12-31 23:00:00")),
    ]));
    let err = RoutingEngine::route(&interval_rule(), &stmt, &[], None).unwrap_err();
    assert!(matches!(err, RouteError::NoRouteFound { .. }), "{err}");
}

#[test]
fn test_no_route_found_reports_table_and_values() {
    let cfg = config().with_algorithm(
        "order_inline",
        AlgorithmConfig::new("INLINE").with_prop("algorithm-expression", "t_order_${order_id % 4}"),
    );
    let rule = ShardingRule::build(&cfg, &AlgorithmRegistry::with_builtins()).unwrap();
    let stmt = query(StatementKind::Select, &["t_order"]).with_condition(ConditionGroup::new(vec![
        Predicate::equal("t_order", "user_id", lit(0)),
        Predicate::equal("t_order", "order_id", lit(3)),
    ]));
    let err = RoutingEngine::route(&rule, &stmt, &[], None).unwrap_err();
    match err {
        RouteError::NoRouteFound { logic_table, values } => {
            assert_eq!(logic_table, "t_order");
            assert!(values.contains("order_id=3"), "{}", values);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_algorithm_failure_propagates() {
    let stmt = query(StatementKind::Select, &["t_order"]).with_condition(ConditionGroup::new(vec![
        Predicate::equal("t_order", "user_id", ValueExpr::Literal(Datum::Text("abc".into()))),
    ]));
    let err = RoutingEngine::route(&rule(), &stmt, &[], None).unwrap_err();
    assert!(matches!(err, RouteError::AlgorithmFailure { .. }));
}

// ═══════════════════════════════════════════════════════════════════════════
// Hints
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_hint_overrides_where_predicate() {
    let cfg = ShardingRuleConfig::default()
        .with_data_sources(&["ds_0"])
        .with_algorithm(
            "order_inline",
            AlgorithmConfig::new("INLINE").with_prop("algorithm-expression", "t_order_${order_id % 2}"),
        )
        .with_table(
            "t_order",
            TableRuleConfig::new("ds_0.t_order_${0..1}")
                .with_table_strategy(StrategyConfig::standard("order_id", "order_inline")),
        );
    let rule = ShardingRule::build(&cfg, &AlgorithmRegistry::with_builtins()).unwrap();
    let stmt = query(StatementKind::Select, &["t_order"])
        .with_condition(ConditionGroup::new(vec![Predicate::equal("t_order", "order_id", lit(0))]));
    let hints = HintOverrides::new().with_table_value("t_order", 1i64);
    let ctx = RoutingEngine::route(&rule, &stmt, &[], Some(&hints)).unwrap();
    assert!(ctx.is_single_route());
    assert_eq!(units(&ctx), vec!["ds_0:[t_order->t_order_1]"]);
    assert_eq!(ctx.route_type(), RouteType::Hint);
}

#[test]
fn test_hint_strategy_without_hint_broadcasts() {
    let cfg = ShardingRuleConfig::default()
        .with_data_sources(&["ds_0"])
        .with_algorithm(
            "hint",
            AlgorithmConfig::new("HINT_INLINE").with_prop("algorithm-expression", "t_order_${value}"),
        )
        .with_table(
            "t_order",
            TableRuleConfig::new("ds_0.t_order_${0..1}").with_table_strategy(StrategyConfig::hint("hint")),
        );
    let rule = ShardingRule::build(&cfg, &AlgorithmRegistry::with_builtins()).unwrap();
    let stmt = query(StatementKind::Select, &["t_order"]);
    assert_eq!(RoutingEngine::route(&rule, &stmt, &[], None).unwrap().len(), 2);

    let hints = HintOverrides::new().with_table_value("T_ORDER", 1i64);
    let ctx = RoutingEngine::route(&rule, &stmt, &[], Some(&hints)).unwrap();
    assert_eq!(units(&ctx), vec!["ds_0:[t_order->t_order_1]"]);
}

#[test]
fn test_data_source_hint() {
    let stmt = query(StatementKind::Select, &["t_order"])
        .with_condition(ConditionGroup::new(vec![Predicate::equal("t_order", "order_id", lit(1))]));
    let hints = HintOverrides::new().with_data_source("ds_1");
    let ctx = RoutingEngine::route(&rule(), &stmt, &[], Some(&hints)).unwrap();
    assert_eq!(units(&ctx), vec!["ds_1:[t_order->t_order_1]"]);

    let hints = HintOverrides::new().with_data_source("ds_9");
    let err = RoutingEngine::route(&rule(), &stmt, &[], Some(&hints)).unwrap_err();
    assert!(matches!(err, RouteError::UnknownDataSource(_)));
}

// ═══════════════════════════════════════════════════════════════════════════
// Multiple tables
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_binding_tables_zip_positionally() {
    let stmt = query(StatementKind::Select, &["t_order", "t_order_item"]).with_condition(
        ConditionGroup::new(vec![
            Predicate::equal("t_order", "user_id", lit(0)),
            Predicate::equal("t_order", "order_id", lit(1)),
        ]),
    );
    let ctx = RoutingEngine::route(&rule(), &stmt, &[], None).unwrap();
    assert_eq!(
        units(&ctx),
        vec!["ds_0:[t_order->t_order_1, t_order_item->t_order_item_1]"]
    );
}

#[test]
fn test_binding_predicate_through_alias() {
    let stmt = BoundStatement::new(StatementKind::Select)
        .with_table(TableSegment {
            name: "t_order".into(),
            alias: Some("o".into()),
            start: 14,
            stop: 21,
        })
        .with_table(TableSegment {
            name: "t_order_item".into(),
            alias: Some("i".into()),
            start: 29,
            stop: 41,
        })
        .with_condition(ConditionGroup::new(vec![
            Predicate::equal("i", "user_id", lit(1)),
            Predicate::equal("i", "order_id", lit(0)),
        ]));
    let ctx = RoutingEngine::route(&rule(), &stmt, &[], None).unwrap();
    assert_eq!(
        units(&ctx),
        vec!["ds_1:[t_order->t_order_0, t_order_item->t_order_item_0]"]
    );
}

#[test]
fn test_binding_without_condition_does_not_multiply() {
    let stmt = query(StatementKind::Select, &["t_order", "t_order_item"]);
    let ctx = RoutingEngine::route(&rule(), &stmt, &[], None).unwrap();
    assert_eq!(ctx.len(), 4);
}

#[test]
fn test_unrelated_tables_cross_product_per_data_source() {
    let stmt = query(StatementKind::Select, &["t_order", "t_user"]).with_condition(
        ConditionGroup::new(vec![Predicate::equal("", "user_id", lit(0))]),
    );
    let ctx = RoutingEngine::route(&rule(), &stmt, &[], None).unwrap();
    assert_eq!(
        units(&ctx),
        vec![
            "ds_0:[t_order->t_order_0, t_user->t_user]",
            "ds_0:[t_order->t_order_1, t_user->t_user]",
        ]
    );
}

#[test]
fn test_no_common_data_source() {
    let stmt = query(StatementKind::Select, &["t_order", "t_user"]).with_condition(
        ConditionGroup::new(vec![
            Predicate::equal("t_order", "user_id", lit(0)),
            Predicate::equal("t_user", "user_id", lit(1)),
        ]),
    );
    let err = RoutingEngine::route(&rule(), &stmt, &[], None).unwrap_err();
    assert!(matches!(err, RouteError::NoCommonDataSource { .. }));
}

// ═══════════════════════════════════════════════════════════════════════════
// Broadcast and default routing
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_broadcast_table_read_is_unicast_write_is_everywhere() {
    let read = query(StatementKind::Select, &["t_config"]);
    let ctx = RoutingEngine::route(&rule(), &read, &[], None).unwrap();
    assert_eq!(ctx.route_type(), RouteType::Unicast);
    assert_eq!(units(&ctx), vec!["ds_0:[t_config->t_config]"]);

    let write = query(StatementKind::Update, &["t_config"]);
    let ctx = RoutingEngine::route(&rule(), &write, &[], None).unwrap();
    assert!(ctx.is_broadcast());
    assert_eq!(ctx.data_source_names(), vec!["ds_0", "ds_1"]);
}

#[test]
fn test_unconfigured_table_goes_to_default_data_source() {
    let stmt = query(StatementKind::Select, &["t_audit"]);
    let ctx = RoutingEngine::route(&rule(), &stmt, &[], None).unwrap();
    assert_eq!(ctx.route_type(), RouteType::Default);
    assert_eq!(ctx.units()[0].data_source, "ds_0");
    assert!(ctx.units()[0].table_mappers.is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════
// Properties
// ═══════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn prop_equality_routes_to_algorithm_target(user_id in any::<i32>(), order_id in any::<i32>()) {
        let stmt = query(StatementKind::Select, &["t_order"]).with_condition(ConditionGroup::new(vec![
            Predicate::equal("t_order", "user_id", lit(user_id as i64)),
            Predicate::equal("t_order", "order_id", lit(order_id as i64)),
        ]));
        let ctx = RoutingEngine::route(&rule(), &stmt, &[], None).unwrap();
        prop_assert!(ctx.is_single_route());
        let unit = &ctx.units()[0];
        prop_assert_eq!(unit.data_source.clone(), format!("ds_{}", (user_id as i64).rem_euclid(2)));
        let expected_table = format!("t_order_{}", (order_id as i64).rem_euclid(2));
        prop_assert_eq!(unit.actual_table("t_order"), Some(expected_table.as_str()));
    }

    #[test]
    fn prop_unrelated_predicates_broadcast(status in any::<i64>()) {
        let stmt = query(StatementKind::Select, &["t_order"]).with_condition(ConditionGroup::new(vec![
            Predicate::equal("t_order", "status", lit(status)),
        ]));
        let ctx = RoutingEngine::route(&rule(), &stmt, &[], None).unwrap();
        prop_assert_eq!(ctx.len(), 4);
        prop_assert!(ctx.is_broadcast());
    }
}
