//! Sharding rule model.
//!
//! # Design
//!
//! A `ShardingRule` is built once from a `ShardingRuleConfig` and never
//! mutated; reload builds a fresh rule and swaps it in
//! [`ShardingRuleHolder`](crate::rule_holder::ShardingRuleHolder).
//!
//! - Logic table names are case-insensitive and stored lower-cased.
//! - Each `TableRule` lists its actual data nodes in configuration order
//!   (data-source-major for inline expressions). Routing results keep this
//!   order, which makes route contexts deterministic.
//! - Binding tables must have the same number of data nodes with the same
//!   data source at every position, so routing can map one table's node
//!   index onto the others.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use kestrel_common::config::{MergeConfig, ShardingRuleConfig, StrategyConfig};
use kestrel_common::datum::Datum;
use kestrel_common::error::ConfigError;

use crate::algorithm::{
    AlgorithmRegistry, ComplexKeysShardingAlgorithm, HintShardingAlgorithm,
    PreciseShardingValue, ShardingAlgorithm, StandardShardingAlgorithm,
};
use crate::inline_expr;

/// One physical table: `{data_source}.{table}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataNode {
    pub data_source: String,
    pub table: String,
}

impl DataNode {
    pub fn new(data_source: &str, table: &str) -> Self {
        Self {
            data_source: data_source.to_string(),
            table: table.to_string(),
        }
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        match text.trim().split_once('.') {
            Some((ds, table)) if !ds.is_empty() && !table.is_empty() && !table.contains('.') => {
                Ok(Self::new(ds, table))
            }
            _ => Err(ConfigError::InvalidDataNode(text.to_string())),
        }
    }
}

impl fmt::Display for DataNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.data_source, self.table)
    }
}

/// A resolved strategy: sharding columns plus the algorithm instance.
#[derive(Clone)]
pub enum ShardingStrategy {
    Standard {
        column: String,
        algorithm_name: String,
        algorithm: Arc<dyn StandardShardingAlgorithm>,
    },
    Complex {
        columns: Vec<String>,
        algorithm_name: String,
        algorithm: Arc<dyn ComplexKeysShardingAlgorithm>,
    },
    Hint {
        algorithm_name: String,
        algorithm: Arc<dyn HintShardingAlgorithm>,
    },
    None,
}

impl fmt::Debug for ShardingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardingStrategy::Standard {
                column,
                algorithm_name,
                ..
            } => write!(f, "Standard({} by {})", column, algorithm_name),
            ShardingStrategy::Complex {
                columns,
                algorithm_name,
                ..
            } => write!(f, "Complex({:?} by {})", columns, algorithm_name),
            ShardingStrategy::Hint { algorithm_name, .. } => write!(f, "Hint({})", algorithm_name),
            ShardingStrategy::None => write!(f, "None"),
        }
    }
}

impl ShardingStrategy {
    fn build(
        config: Option<&StrategyConfig>,
        algorithms: &HashMap<String, ShardingAlgorithm>,
    ) -> Result<Self, ConfigError> {
        let lookup = |name: &str| {
            algorithms
                .get(name)
                .ok_or_else(|| ConfigError::UnknownAlgorithm(name.to_string()))
        };
        let mismatch = |name: &str, strategy: &'static str| ConfigError::AlgorithmKindMismatch {
            algorithm: name.to_string(),
            strategy,
        };
        Ok(match config {
            None | Some(StrategyConfig::None) => ShardingStrategy::None,
            Some(StrategyConfig::Standard {
                sharding_column,
                algorithm,
            }) => match lookup(algorithm)? {
                ShardingAlgorithm::Standard(a) => ShardingStrategy::Standard {
                    column: sharding_column.to_ascii_lowercase(),
                    algorithm_name: algorithm.clone(),
                    algorithm: a.clone(),
                },
                _ => return Err(mismatch(algorithm, "standard")),
            },
            Some(StrategyConfig::Complex {
                sharding_columns,
                algorithm,
            }) => match lookup(algorithm)? {
                ShardingAlgorithm::Complex(a) => ShardingStrategy::Complex {
                    columns: sharding_columns
                        .iter()
                        .map(|c| c.to_ascii_lowercase())
                        .collect(),
                    algorithm_name: algorithm.clone(),
                    algorithm: a.clone(),
                },
                _ => return Err(mismatch(algorithm, "complex")),
            },
            Some(StrategyConfig::Hint { algorithm }) => match lookup(algorithm)? {
                ShardingAlgorithm::Hint(a) => ShardingStrategy::Hint {
                    algorithm_name: algorithm.clone(),
                    algorithm: a.clone(),
                },
                _ => return Err(mismatch(algorithm, "hint")),
            },
        })
    }

    /// Lower-cased sharding columns (empty for hint and none).
    pub fn columns(&self) -> Vec<&str> {
        match self {
            ShardingStrategy::Standard { column, .. } => vec![column.as_str()],
            ShardingStrategy::Complex { columns, .. } => columns.iter().map(String::as_str).collect(),
            ShardingStrategy::Hint { .. } | ShardingStrategy::None => Vec::new(),
        }
    }

    pub fn algorithm_name(&self) -> Option<&str> {
        match self {
            ShardingStrategy::Standard { algorithm_name, .. }
            | ShardingStrategy::Complex { algorithm_name, .. }
            | ShardingStrategy::Hint { algorithm_name, .. } => Some(algorithm_name),
            ShardingStrategy::None => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableRule {
    pub logic_table: String,
    pub actual_nodes: Vec<DataNode>,
    pub database_strategy: ShardingStrategy,
    pub table_strategy: ShardingStrategy,
    /// Index into the rule's binding groups.
    pub binding_group: Option<usize>,
}

impl TableRule {
    /// Distinct data sources in node order.
    pub fn data_source_names(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for node in &self.actual_nodes {
            if !out.contains(&node.data_source) {
                out.push(node.data_source.clone());
            }
        }
        out
    }

    /// Actual tables hosted on `data_source`, in node order.
    pub fn actual_tables_in(&self, data_source: &str) -> Vec<String> {
        self.actual_nodes
            .iter()
            .filter(|n| n.data_source == data_source)
            .map(|n| n.table.clone())
            .collect()
    }

    pub fn node_index(&self, node: &DataNode) -> Option<usize> {
        self.actual_nodes.iter().position(|n| n == node)
    }

    pub fn is_sharding_column(&self, column: &str) -> bool {
        let column = column.to_ascii_lowercase();
        self.database_strategy.columns().contains(&column.as_str())
            || self.table_strategy.columns().contains(&column.as_str())
    }

    /// Whether a row with `column = value` can live in `node`, judged by
    /// the standard strategies sharding on `column`. `None` when no
    /// standard strategy shards on it or an algorithm rejects the value.
    pub fn may_hold(&self, column: &str, value: &Datum, node: &DataNode) -> Option<bool> {
        let column = column.to_ascii_lowercase();
        let levels = [
            (&self.database_strategy, self.data_source_names(), &node.data_source),
            (
                &self.table_strategy,
                self.actual_tables_in(&node.data_source),
                &node.table,
            ),
        ];
        let mut decided = None;
        for (strategy, candidates, actual) in &levels {
            let ShardingStrategy::Standard {
                column: sharding_column,
                algorithm,
                ..
            } = strategy
            else {
                continue;
            };
            if *sharding_column != column {
                continue;
            }
            let target = algorithm
                .shard_precise(
                    candidates,
                    &PreciseShardingValue {
                        logic_table: &self.logic_table,
                        column: sharding_column,
                        value,
                    },
                )
                .ok()?;
            let hit = target.is_some_and(|t| t.eq_ignore_ascii_case(actual));
            decided = Some(decided.unwrap_or(true) && hit);
        }
        decided
    }
}

#[derive(Debug, Clone)]
pub struct ShardingRule {
    tables: BTreeMap<String, TableRule>,
    data_sources: Vec<String>,
    default_data_source: Option<String>,
    broadcast_tables: BTreeSet<String>,
    binding_groups: Vec<BTreeSet<String>>,
    merge: MergeConfig,
}

impl ShardingRule {
    pub fn build(
        config: &ShardingRuleConfig,
        registry: &AlgorithmRegistry,
    ) -> Result<Self, ConfigError> {
        let mut algorithms = HashMap::with_capacity(config.algorithms.len());
        for (name, algo) in &config.algorithms {
            algorithms.insert(name.clone(), registry.create(name, algo)?);
        }

        let known_sources: BTreeSet<&str> = config.data_sources.iter().map(String::as_str).collect();
        let mut tables = BTreeMap::new();
        for (name, table_cfg) in &config.tables {
            let logic = name.to_ascii_lowercase();
            if tables.contains_key(&logic) {
                return Err(ConfigError::DuplicateTable(name.clone()));
            }
            let actual_nodes = match &table_cfg.actual_data_nodes {
                Some(expr) => inline_expr::expand(expr)?
                    .iter()
                    .map(|n| DataNode::parse(n))
                    .collect::<Result<Vec<_>, _>>()?,
                None if !config.data_sources.is_empty() => config
                    .data_sources
                    .iter()
                    .map(|ds| DataNode::new(ds, name))
                    .collect(),
                None => match &config.default_data_source {
                    Some(ds) => vec![DataNode::new(ds, name)],
                    None => return Err(ConfigError::InvalidDataNode(name.clone())),
                },
            };
            if !known_sources.is_empty() {
                if let Some(bad) = actual_nodes
                    .iter()
                    .find(|n| !known_sources.contains(n.data_source.as_str()))
                {
                    return Err(ConfigError::UnknownDataSource {
                        table: name.clone(),
                        data_source: bad.data_source.clone(),
                    });
                }
            }
            let database_strategy = ShardingStrategy::build(
                table_cfg
                    .database_strategy
                    .as_ref()
                    .or(config.default_database_strategy.as_ref()),
                &algorithms,
            )?;
            let table_strategy = ShardingStrategy::build(
                table_cfg
                    .table_strategy
                    .as_ref()
                    .or(config.default_table_strategy.as_ref()),
                &algorithms,
            )?;
            tables.insert(
                logic.clone(),
                TableRule {
                    logic_table: logic,
                    actual_nodes,
                    database_strategy,
                    table_strategy,
                    binding_group: None,
                },
            );
        }

        let mut binding_groups = Vec::with_capacity(config.binding_table_groups.len());
        for group in &config.binding_table_groups {
            let members: Vec<String> = group.iter().map(|t| t.to_ascii_lowercase()).collect();
            let Some(first) = members.first() else {
                continue;
            };
            let first_rule = tables
                .get(first)
                .ok_or_else(|| ConfigError::BindingTableNotFound(first.clone()))?;
            for other in &members[1..] {
                let other_rule = tables
                    .get(other)
                    .ok_or_else(|| ConfigError::BindingTableNotFound(other.clone()))?;
                check_binding_compatible(first_rule, other_rule)?;
            }
            let index = binding_groups.len();
            for member in &members {
                if let Some(rule) = tables.get_mut(member) {
                    rule.binding_group = Some(index);
                }
            }
            binding_groups.push(members.into_iter().collect::<BTreeSet<_>>());
        }

        let data_sources = if config.data_sources.is_empty() {
            let mut out: Vec<String> = Vec::new();
            for node in tables.values().flat_map(|t| t.actual_nodes.iter()) {
                if !out.contains(&node.data_source) {
                    out.push(node.data_source.clone());
                }
            }
            if let Some(ds) = &config.default_data_source {
                if !out.contains(ds) {
                    out.push(ds.clone());
                }
            }
            out
        } else {
            config.data_sources.clone()
        };
        if let Some(ds) = &config.default_data_source {
            if !data_sources.contains(ds) {
                return Err(ConfigError::UnknownDataSource {
                    table: "<default>".into(),
                    data_source: ds.clone(),
                });
            }
        }

        Ok(Self {
            tables,
            data_sources,
            default_data_source: config.default_data_source.clone(),
            broadcast_tables: config
                .broadcast_tables
                .iter()
                .map(|t| t.to_ascii_lowercase())
                .collect(),
            binding_groups,
            merge: config.merge,
        })
    }

    pub fn find_table_rule(&self, logic_table: &str) -> Option<&TableRule> {
        self.tables.get(&logic_table.to_ascii_lowercase())
    }

    /// The other members of `logic_table`'s binding group.
    pub fn binding_tables(&self, logic_table: &str) -> BTreeSet<String> {
        let logic = logic_table.to_ascii_lowercase();
        self.find_table_rule(&logic)
            .and_then(|r| r.binding_group)
            .and_then(|g| self.binding_groups.get(g))
            .map(|group| group.iter().filter(|t| **t != logic).cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_binding_pair(&self, a: &str, b: &str) -> bool {
        match (self.find_table_rule(a), self.find_table_rule(b)) {
            (Some(ra), Some(rb)) => ra.binding_group.is_some() && ra.binding_group == rb.binding_group,
            _ => false,
        }
    }

    pub fn is_sharding_table(&self, name: &str) -> bool {
        self.tables.contains_key(&name.to_ascii_lowercase())
    }

    pub fn is_broadcast_table(&self, name: &str) -> bool {
        self.broadcast_tables.contains(&name.to_ascii_lowercase())
    }

    pub fn table_rules(&self) -> impl Iterator<Item = &TableRule> {
        self.tables.values()
    }

    pub fn data_source_names(&self) -> &[String] {
        &self.data_sources
    }

    /// The configured default, or the first known data source.
    pub fn default_data_source(&self) -> Option<&str> {
        self.default_data_source
            .as_deref()
            .or_else(|| self.data_sources.first().map(String::as_str))
    }

    pub fn merge_config(&self) -> &MergeConfig {
        &self.merge
    }
}

fn check_binding_compatible(a: &TableRule, b: &TableRule) -> Result<(), ConfigError> {
    let mismatch = |reason: String| ConfigError::BindingTableMismatch {
        first: a.logic_table.clone(),
        second: b.logic_table.clone(),
        reason,
    };
    if a.actual_nodes.len() != b.actual_nodes.len() {
        return Err(mismatch(format!(
            "{} data nodes vs {}",
            a.actual_nodes.len(),
            b.actual_nodes.len()
        )));
    }
    for (i, (na, nb)) in a.actual_nodes.iter().zip(&b.actual_nodes).enumerate() {
        if na.data_source != nb.data_source {
            return Err(mismatch(format!(
                "node {} lives on '{}' vs '{}'",
                i, na.data_source, nb.data_source
            )));
        }
    }
    Ok(())
}
