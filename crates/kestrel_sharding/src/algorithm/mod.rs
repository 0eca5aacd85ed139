//! Sharding algorithms.
//!
//! Three capabilities, one per strategy kind:
//!
//! - [`StandardShardingAlgorithm`]: one column, precise and range values
//! - [`ComplexKeysShardingAlgorithm`]: several columns evaluated jointly
//! - [`HintShardingAlgorithm`]: values supplied by the caller, not the SQL
//!
//! Algorithms are created from config through an [`AlgorithmRegistry`]
//! keyed by upper-case type name. The built-in types are registered by
//! [`AlgorithmRegistry::with_builtins`]; embedders add their own with
//! [`AlgorithmRegistry::register`] before building a rule.
//!
//! Every algorithm receives the candidate target names (data sources or
//! actual tables) and returns the subset to route to. Returning nothing is
//! not an error here; the routing engine turns it into "no route found".

pub mod inline;
pub mod interval;
pub mod modulo;
pub mod range;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use kestrel_common::config::AlgorithmConfig;
use kestrel_common::datum::Datum;
use kestrel_common::error::ConfigError;
use kestrel_common::sharding_value::{RangeValue, ShardingValue};

pub use inline::{ComplexInlineAlgorithm, HintInlineAlgorithm, InlineAlgorithm};
pub use interval::{IntervalAlgorithm, IntervalUnit};
pub use modulo::{HashModAlgorithm, ModAlgorithm};
pub use range::BoundaryRangeAlgorithm;

#[derive(Debug, Clone, Copy)]
pub struct PreciseShardingValue<'a> {
    pub logic_table: &'a str,
    pub column: &'a str,
    pub value: &'a Datum,
}

#[derive(Debug, Clone, Copy)]
pub struct RangeShardingValue<'a> {
    pub logic_table: &'a str,
    pub column: &'a str,
    pub range: &'a RangeValue,
}

/// All sharding columns' values for one table, keyed by lower-case column.
#[derive(Debug, Clone, Copy)]
pub struct ComplexShardingValues<'a> {
    pub logic_table: &'a str,
    pub values: &'a BTreeMap<String, ShardingValue>,
}

#[derive(Debug, Clone, Copy)]
pub struct HintShardingValues<'a> {
    pub logic_table: &'a str,
    pub values: &'a [Datum],
}

pub trait StandardShardingAlgorithm: Send + Sync + fmt::Debug {
    /// Pick the single target for one value.
    fn shard_precise(
        &self,
        targets: &[String],
        value: &PreciseShardingValue<'_>,
    ) -> Result<Option<String>, String>;

    /// Pick every target that may hold a value in the range.
    fn shard_range(
        &self,
        targets: &[String],
        value: &RangeShardingValue<'_>,
    ) -> Result<Vec<String>, String>;
}

pub trait ComplexKeysShardingAlgorithm: Send + Sync + fmt::Debug {
    fn shard(
        &self,
        targets: &[String],
        values: &ComplexShardingValues<'_>,
    ) -> Result<Vec<String>, String>;
}

pub trait HintShardingAlgorithm: Send + Sync + fmt::Debug {
    fn shard(
        &self,
        targets: &[String],
        values: &HintShardingValues<'_>,
    ) -> Result<Vec<String>, String>;
}

/// A configured algorithm instance, tagged by capability.
#[derive(Debug, Clone)]
pub enum ShardingAlgorithm {
    Standard(Arc<dyn StandardShardingAlgorithm>),
    Complex(Arc<dyn ComplexKeysShardingAlgorithm>),
    Hint(Arc<dyn HintShardingAlgorithm>),
}

impl ShardingAlgorithm {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ShardingAlgorithm::Standard(_) => "standard",
            ShardingAlgorithm::Complex(_) => "complex",
            ShardingAlgorithm::Hint(_) => "hint",
        }
    }
}

/// Typed view over an algorithm's `props` table.
#[derive(Debug, Clone, Copy)]
pub struct AlgorithmProps<'a> {
    props: &'a BTreeMap<String, serde_json::Value>,
}

impl<'a> AlgorithmProps<'a> {
    pub fn new(props: &'a BTreeMap<String, serde_json::Value>) -> Self {
        Self { props }
    }

    pub fn get_str(&self, key: &str) -> Option<&'a str> {
        self.props.get(key).and_then(|v| v.as_str())
    }

    /// Integers may be written as numbers or numeric strings.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.props.get(key)? {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn require_str(&self, key: &str) -> Result<&'a str, String> {
        self.get_str(key)
            .ok_or_else(|| format!("missing string property '{}'", key))
    }

    pub fn require_i64(&self, key: &str) -> Result<i64, String> {
        self.get_i64(key)
            .ok_or_else(|| format!("missing integer property '{}'", key))
    }

    pub fn require_positive(&self, key: &str) -> Result<i64, String> {
        let v = self.require_i64(key)?;
        if v <= 0 {
            return Err(format!("property '{}' must be positive, got {}", key, v));
        }
        Ok(v)
    }
}

pub type AlgorithmFactory =
    Arc<dyn Fn(AlgorithmProps<'_>) -> Result<ShardingAlgorithm, String> + Send + Sync>;

/// Algorithm factories keyed by upper-case type name.
#[derive(Clone)]
pub struct AlgorithmRegistry {
    factories: HashMap<String, AlgorithmFactory>,
}

impl fmt::Debug for AlgorithmRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlgorithmRegistry")
            .field("types", &self.types())
            .finish()
    }
}

impl AlgorithmRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("MOD", |p| {
            Ok(ShardingAlgorithm::Standard(Arc::new(ModAlgorithm::from_props(p)?)))
        });
        registry.register("HASH_MOD", |p| {
            Ok(ShardingAlgorithm::Standard(Arc::new(HashModAlgorithm::from_props(p)?)))
        });
        registry.register("INLINE", |p| {
            Ok(ShardingAlgorithm::Standard(Arc::new(InlineAlgorithm::from_props(p)?)))
        });
        registry.register("VOLUME_RANGE", |p| {
            Ok(ShardingAlgorithm::Standard(Arc::new(
                BoundaryRangeAlgorithm::volume_from_props(p)?,
            )))
        });
        registry.register("BOUNDARY_RANGE", |p| {
            Ok(ShardingAlgorithm::Standard(Arc::new(
                BoundaryRangeAlgorithm::boundaries_from_props(p)?,
            )))
        });
        registry.register("INTERVAL", |p| {
            Ok(ShardingAlgorithm::Standard(Arc::new(IntervalAlgorithm::from_props(p)?)))
        });
        registry.register("COMPLEX_INLINE", |p| {
            Ok(ShardingAlgorithm::Complex(Arc::new(
                ComplexInlineAlgorithm::from_props(p)?,
            )))
        });
        registry.register("HINT_INLINE", |p| {
            Ok(ShardingAlgorithm::Hint(Arc::new(HintInlineAlgorithm::from_props(p)?)))
        });
        registry
    }

    pub fn register<F>(&mut self, type_name: &str, factory: F)
    where
        F: Fn(AlgorithmProps<'_>) -> Result<ShardingAlgorithm, String> + Send + Sync + 'static,
    {
        self.factories
            .insert(type_name.to_ascii_uppercase(), Arc::new(factory));
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(&type_name.to_ascii_uppercase())
    }

    pub fn types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Instantiate the algorithm configured under `name`.
    pub fn create(
        &self,
        name: &str,
        config: &AlgorithmConfig,
    ) -> Result<ShardingAlgorithm, ConfigError> {
        let factory = self
            .factories
            .get(&config.algorithm_type.to_ascii_uppercase())
            .ok_or_else(|| ConfigError::UnknownAlgorithmType(config.algorithm_type.clone()))?;
        factory(AlgorithmProps::new(&config.props)).map_err(|reason| {
            ConfigError::InvalidAlgorithmProps {
                algorithm: name.to_string(),
                reason,
            }
        })
    }
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Resolve a computed name against the candidates: an exact
/// (case-insensitive) match first, then a numeric-suffix match.
pub fn resolve_target(targets: &[String], computed: &str) -> Option<String> {
    targets
        .iter()
        .find(|t| t.eq_ignore_ascii_case(computed))
        .or_else(|| find_by_suffix(targets, computed))
        .cloned()
}

/// The candidate whose name ends with `suffix`, where the character before
/// the suffix is not a digit (`t_order_1` matches "1", `t_order_11` does not).
pub fn find_by_suffix<'t>(targets: &'t [String], suffix: &str) -> Option<&'t String> {
    targets.iter().find(|t| {
        t.len() > suffix.len()
            && t.ends_with(suffix)
            && !t[..t.len() - suffix.len()]
                .chars()
                .last()
                .map_or(false, |c| c.is_ascii_digit())
    })
}
