//! Sharding rule model and routing engine.
//!
//! - [`rule`]: immutable `ShardingRule` built from `ShardingRuleConfig`
//! - [`rule_holder`]: atomic snapshot/reload of the active rule
//! - [`algorithm`]: capability traits and the typed algorithm registry
//! - [`route`]: bound statement → `RouteContext`

pub mod algorithm;
pub mod inline_expr;
pub mod route;
pub mod rule;
pub mod rule_holder;

pub use algorithm::AlgorithmRegistry;
pub use route::{RouteContext, RouteMapper, RouteType, RouteUnit, RoutingEngine};
pub use rule::{DataNode, ShardingRule, ShardingStrategy, TableRule};
pub use rule_holder::ShardingRuleHolder;
