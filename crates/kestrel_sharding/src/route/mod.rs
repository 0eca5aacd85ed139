//! Routing: bound statement + rule snapshot → shard targets.

mod condition;
mod engine;

pub use engine::RoutingEngine;

use std::fmt;

/// `logic → actual` table name mapping inside one route unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteMapper {
    pub logic: String,
    pub actual: String,
}

impl RouteMapper {
    pub fn new(logic: &str, actual: &str) -> Self {
        Self {
            logic: logic.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// One physical statement: a data source plus the actual tables it uses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteUnit {
    pub data_source: String,
    pub table_mappers: Vec<RouteMapper>,
}

impl RouteUnit {
    pub fn new(data_source: &str, table_mappers: Vec<RouteMapper>) -> Self {
        Self {
            data_source: data_source.to_string(),
            table_mappers,
        }
    }

    /// Actual table for `logic` in this unit (case-insensitive).
    pub fn actual_table(&self, logic: &str) -> Option<&str> {
        self.table_mappers
            .iter()
            .find(|m| m.logic.eq_ignore_ascii_case(logic))
            .map(|m| m.actual.as_str())
    }
}

impl fmt::Display for RouteUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:[", self.data_source)?;
        for (i, m) in self.table_mappers.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}->{}", m.logic, m.actual)?;
        }
        write!(f, "]")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteType {
    /// Narrowed by sharding values.
    Sharded,
    /// Every actual node of every sharding table.
    Broadcast,
    /// Broadcast-only read served by one data source.
    Unicast,
    /// No sharding table; sent to the default data source.
    Default,
    /// Hint overrides decided the targets.
    Hint,
}

impl RouteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteType::Sharded => "sharded",
            RouteType::Broadcast => "broadcast",
            RouteType::Unicast => "unicast",
            RouteType::Default => "default",
            RouteType::Hint => "hint",
        }
    }
}

/// Ordered, deduplicated route units for one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteContext {
    units: Vec<RouteUnit>,
    route_type: RouteType,
}

impl RouteContext {
    pub fn new(units: Vec<RouteUnit>, route_type: RouteType) -> Self {
        let mut deduped: Vec<RouteUnit> = Vec::with_capacity(units.len());
        for unit in units {
            if !deduped.contains(&unit) {
                deduped.push(unit);
            }
        }
        Self {
            units: deduped,
            route_type,
        }
    }

    pub fn units(&self) -> &[RouteUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Exactly one unit: results pass through unmerged and SQL needs no
    /// pagination or projection rewriting.
    pub fn is_single_route(&self) -> bool {
        self.units.len() == 1
    }

    pub fn is_broadcast(&self) -> bool {
        self.route_type == RouteType::Broadcast
    }

    pub fn route_type(&self) -> RouteType {
        self.route_type
    }

    /// Distinct data sources in unit order.
    pub fn data_source_names(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for u in &self.units {
            if !out.contains(&u.data_source.as_str()) {
                out.push(&u.data_source);
            }
        }
        out
    }

    /// Actual tables `logic` maps to across all units, in unit order.
    pub fn actual_tables(&self, logic: &str) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for t in self.units.iter().filter_map(|u| u.actual_table(logic)) {
            if !out.contains(&t) {
                out.push(t);
            }
        }
        out
    }
}
