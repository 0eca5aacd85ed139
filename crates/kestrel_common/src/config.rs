//! Declarative sharding rule configuration.
//!
//! Loaded from TOML:
//!
//! ```toml
//! data_sources = ["ds_0", "ds_1"]
//! broadcast_tables = ["t_config"]
//! binding_table_groups = [["t_order", "t_order_item"]]
//!
//! [tables.t_order]
//! actual_data_nodes = "ds_${0..1}.t_order_${0..1}"
//! database_strategy = { type = "standard", sharding_column = "user_id", algorithm = "db_mod" }
//! table_strategy = { type = "standard", sharding_column = "order_id", algorithm = "order_mod" }
//!
//! [algorithms.db_mod]
//! type = "MOD"
//! props = { sharding-count = 2 }
//! ```
//!
//! Configuration values are immutable once built; the `with_*` methods
//! consume a config and return a new one, so "decorating" a config never
//! touches a rule model already in use.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardingRuleConfig {
    /// Known data sources. Empty means "whatever the data nodes name".
    pub data_sources: Vec<String>,
    /// Target for statements that touch no sharding table.
    pub default_data_source: Option<String>,
    pub broadcast_tables: Vec<String>,
    pub binding_table_groups: Vec<Vec<String>>,
    /// Applied to tables that declare no database strategy.
    pub default_database_strategy: Option<StrategyConfig>,
    /// Applied to tables that declare no table strategy.
    pub default_table_strategy: Option<StrategyConfig>,
    pub tables: BTreeMap<String, TableRuleConfig>,
    pub algorithms: BTreeMap<String, AlgorithmConfig>,
    pub merge: MergeConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableRuleConfig {
    /// Inline expression such as `ds_${0..1}.t_order_${0..3}`.
    pub actual_data_nodes: Option<String>,
    pub database_strategy: Option<StrategyConfig>,
    pub table_strategy: Option<StrategyConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    Standard {
        sharding_column: String,
        algorithm: String,
    },
    Complex {
        sharding_columns: Vec<String>,
        algorithm: String,
    },
    Hint {
        algorithm: String,
    },
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    #[serde(rename = "type")]
    pub algorithm_type: String,
    #[serde(default)]
    pub props: BTreeMap<String, serde_json::Value>,
}

impl AlgorithmConfig {
    pub fn new(algorithm_type: &str) -> Self {
        Self {
            algorithm_type: algorithm_type.to_string(),
            props: BTreeMap::new(),
        }
    }

    pub fn with_prop(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.props.insert(key.to_string(), value.into());
        self
    }
}

/// How NULLs sort when an ORDER BY item does not say `NULLS FIRST/LAST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullOrdering {
    /// NULL compares below every value (first under ASC, last under DESC).
    #[default]
    Smallest,
    /// NULL compares above every value (last under ASC, first under DESC).
    Largest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Upper bound on distinct groups held by an in-memory group-by merge.
    pub max_groups: usize,
    pub null_ordering: NullOrdering,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_groups: 1_000_000,
            null_ordering: NullOrdering::Smallest,
        }
    }
}

impl ShardingRuleConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn with_data_sources(mut self, names: &[&str]) -> Self {
        self.data_sources = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_default_data_source(mut self, name: &str) -> Self {
        self.default_data_source = Some(name.to_string());
        self
    }

    pub fn with_table(mut self, logic_table: &str, table: TableRuleConfig) -> Self {
        self.tables.insert(logic_table.to_string(), table);
        self
    }

    pub fn with_algorithm(mut self, name: &str, algorithm: AlgorithmConfig) -> Self {
        self.algorithms.insert(name.to_string(), algorithm);
        self
    }

    pub fn with_broadcast_table(mut self, logic_table: &str) -> Self {
        self.broadcast_tables.push(logic_table.to_string());
        self
    }

    pub fn with_binding_group(mut self, tables: &[&str]) -> Self {
        self.binding_table_groups
            .push(tables.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_default_database_strategy(mut self, strategy: StrategyConfig) -> Self {
        self.default_database_strategy = Some(strategy);
        self
    }

    pub fn with_default_table_strategy(mut self, strategy: StrategyConfig) -> Self {
        self.default_table_strategy = Some(strategy);
        self
    }

    pub fn with_merge(mut self, merge: MergeConfig) -> Self {
        self.merge = merge;
        self
    }
}

impl TableRuleConfig {
    pub fn new(actual_data_nodes: &str) -> Self {
        Self {
            actual_data_nodes: Some(actual_data_nodes.to_string()),
            database_strategy: None,
            table_strategy: None,
        }
    }

    pub fn with_database_strategy(mut self, strategy: StrategyConfig) -> Self {
        self.database_strategy = Some(strategy);
        self
    }

    pub fn with_table_strategy(mut self, strategy: StrategyConfig) -> Self {
        self.table_strategy = Some(strategy);
        self
    }
}

impl StrategyConfig {
    pub fn standard(column: &str, algorithm: &str) -> Self {
        StrategyConfig::Standard {
            sharding_column: column.to_string(),
            algorithm: algorithm.to_string(),
        }
    }

    pub fn complex(columns: &[&str], algorithm: &str) -> Self {
        StrategyConfig::Complex {
            sharding_columns: columns.iter().map(|s| s.to_string()).collect(),
            algorithm: algorithm.to_string(),
        }
    }

    pub fn hint(algorithm: &str) -> Self {
        StrategyConfig::Hint {
            algorithm: algorithm.to_string(),
        }
    }
}

/// Load a rule configuration from a TOML file.
pub fn load_rule_config(path: &Path) -> Result<ShardingRuleConfig, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    let config = ShardingRuleConfig::from_toml_str(&text)?;
    tracing::info!(
        "Loaded sharding rule config from {}: {} tables, {} algorithms",
        path.display(),
        config.tables.len(),
        config.algorithms.len()
    );
    Ok(config)
}
