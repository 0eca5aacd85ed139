use std::sync::Arc;
use std::time::Instant;

use kestrel_common::config::MergeConfig;
use kestrel_common::datum::Datum;
use kestrel_common::error::KestrelResult;
use kestrel_common::request_context::RequestContext;
use kestrel_common::select_context::SelectContext;
use kestrel_common::statement::BoundStatement;
use kestrel_merge::{MergeEngine, MergedResult, QueryResult};
use kestrel_rewrite::{ExecutionUnit, RewriteContext, RewriteEngine, TokenGenerator};
use kestrel_sharding::{RouteContext, RoutingEngine, ShardingRule, ShardingRuleHolder};

use crate::config::KernelConfig;
use crate::executor::{dispatch, ShardExecutor};

/// Everything needed to run one logic statement: the physical units and
/// the context the merge will need once their cursors come back.
///
/// Holds the rule snapshot it was planned against, so a concurrent reload
/// does not affect a statement already in flight.
#[derive(Debug)]
pub struct ExecutionPlan {
    pub request_id: u64,
    pub units: Vec<ExecutionUnit>,
    pub route: RouteContext,
    pub select: SelectContext,
    pub params: Vec<Datum>,
    rule: Arc<ShardingRule>,
}

impl ExecutionPlan {
    pub fn rule(&self) -> &ShardingRule {
        &self.rule
    }

    pub fn merge_config(&self) -> &MergeConfig {
        self.rule.merge_config()
    }
}

/// Route → rewrite → dispatch → merge for one statement at a time.
pub struct ShardingKernel {
    rules: Arc<ShardingRuleHolder>,
    config: KernelConfig,
}

impl ShardingKernel {
    pub fn new(rules: Arc<ShardingRuleHolder>, config: KernelConfig) -> Self {
        Self { rules, config }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn rules(&self) -> &Arc<ShardingRuleHolder> {
        &self.rules
    }

    /// Route and rewrite `stmt` against the current rule snapshot.
    pub fn prepare(
        &self,
        sql: &str,
        stmt: &BoundStatement,
        params: &[Datum],
        ctx: &RequestContext,
    ) -> KestrelResult<ExecutionPlan> {
        let rule = self.rules.snapshot();

        let start = Instant::now();
        let routed = RoutingEngine::route(&rule, stmt, params, ctx.hints());
        let route_us = start.elapsed().as_micros() as u64;
        let route = match routed {
            Ok(route) => {
                kestrel_observability::record_route_metrics(
                    route_us,
                    route.route_type().as_str(),
                    route.len(),
                    true,
                );
                route
            }
            Err(e) => {
                kestrel_observability::record_route_metrics(route_us, "none", 0, false);
                tracing::debug!("Request {} failed to route: {}", ctx.request_id, e);
                return Err(e.into());
            }
        };

        let select = SelectContext::from_statement(stmt);
        let tokens = TokenGenerator::generate(sql, stmt, params, &rule, &select, &route)?;
        let units = RewriteEngine::rewrite(
            sql,
            params,
            &tokens,
            &route,
            &RewriteContext::from_select(&select),
        )?;

        if self.config.sql_show {
            tracing::info!("Logic SQL: {}", sql);
            for unit in &units {
                tracing::info!(
                    "Actual SQL: {} ::: {} ::: {:?}",
                    unit.data_source,
                    unit.sql,
                    unit.parameters
                );
            }
        }
        tracing::debug!(
            "Request {} planned in {}us: {} units, route={}",
            ctx.request_id,
            ctx.elapsed_us(),
            units.len(),
            route.route_type().as_str()
        );

        Ok(ExecutionPlan {
            request_id: ctx.request_id,
            units,
            route,
            select,
            params: params.to_vec(),
            rule,
        })
    }

    /// Merge the cursors returned for `plan`'s units, in unit order.
    pub fn merge(
        &self,
        plan: &ExecutionPlan,
        results: Vec<Box<dyn QueryResult>>,
    ) -> KestrelResult<MergedResult> {
        MergeEngine::merge(results, &plan.select, plan.merge_config(), &plan.params)
    }

    /// Plan, dispatch every unit through `executor`, and merge.
    pub fn execute(
        &self,
        sql: &str,
        stmt: &BoundStatement,
        params: &[Datum],
        ctx: &RequestContext,
        executor: &dyn ShardExecutor,
    ) -> KestrelResult<MergedResult> {
        let plan = self.prepare(sql, stmt, params, ctx)?;
        let results = dispatch(
            &plan.units,
            executor,
            self.config.max_connections_size_per_query,
        )?;
        self.merge(&plan, results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_common::config::{AlgorithmConfig, ShardingRuleConfig, StrategyConfig, TableRuleConfig};
    use kestrel_common::statement::{ConditionGroup, Predicate, Projection, StatementKind, ValueExpr};
    use kestrel_sharding::AlgorithmRegistry;

    fn kernel() -> ShardingKernel {
        let cfg = ShardingRuleConfig::default()
            .with_data_sources(&["ds_0", "ds_1"])
            .with_algorithm("mod2", AlgorithmConfig::new("MOD").with_prop("sharding-count", 2))
            .with_table(
                "t_user",
                TableRuleConfig::new("ds_${0..1}.t_user")
                    .with_database_strategy(StrategyConfig::standard("user_id", "mod2")),
            );
        let holder = ShardingRuleHolder::from_config(&cfg, &AlgorithmRegistry::with_builtins()).unwrap();
        ShardingKernel::new(Arc::new(holder), KernelConfig::default().with_sql_show(true))
    }

    #[test]
    fn test_prepare_routes_and_rewrites() {
        let sql = "SELECT name FROM t_user WHERE user_id = ?";
        let stmt = BoundStatement::new(StatementKind::Select)
            .with_projections(vec![Projection::column("name")], 11)
            .with_table_at(sql, "t_user", 0)
            .with_condition(ConditionGroup::new(vec![Predicate::equal(
                "t_user",
                "user_id",
                ValueExpr::Parameter(0),
            )]));
        let ctx = RequestContext::new(7);
        let plan = kernel().prepare(sql, &stmt, &[Datum::Int64(3)], &ctx).unwrap();
        assert_eq!(plan.request_id, ctx.request_id);
        assert_eq!(plan.units.len(), 1);
        assert_eq!(plan.units[0].data_source, "ds_1");
        assert_eq!(plan.units[0].sql, sql);
        assert_eq!(plan.params, vec![Datum::Int64(3)]);
    }

    #[test]
    fn test_prepare_surfaces_route_errors() {
        let sql = "SELECT name FROM t_user WHERE user_id = ?";
        let stmt = BoundStatement::new(StatementKind::Select)
            .with_table_at(sql, "t_user", 0)
            .with_condition(ConditionGroup::new(vec![Predicate::equal(
                "t_user",
                "user_id",
                ValueExpr::Parameter(0),
            )]));
        let err = kernel()
            .prepare(sql, &stmt, &[], &RequestContext::default())
            .err()
            .unwrap();
        assert!(err.is_user_error());
    }
}
