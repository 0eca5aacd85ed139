//! Per-request forced sharding values.
//!
//! A `HintOverrides` value is built by the caller and carried on the
//! `RequestContext` for exactly one statement. Routing consults it before
//! looking at predicates: when any value is present for a logic table,
//! predicate extraction for that table is skipped.

use std::collections::BTreeMap;

use crate::datum::Datum;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HintOverrides {
    database_values: BTreeMap<String, Vec<Datum>>,
    table_values: BTreeMap<String, Vec<Datum>>,
    data_source: Option<String>,
}

impl HintOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Values fed to the database-level strategy of `logic_table`.
    pub fn with_database_value(mut self, logic_table: &str, value: impl Into<Datum>) -> Self {
        self.database_values
            .entry(logic_table.to_ascii_lowercase())
            .or_default()
            .push(value.into());
        self
    }

    /// Values fed to the table-level strategy of `logic_table`.
    pub fn with_table_value(mut self, logic_table: &str, value: impl Into<Datum>) -> Self {
        self.table_values
            .entry(logic_table.to_ascii_lowercase())
            .or_default()
            .push(value.into());
        self
    }

    /// Route the whole statement to one data source, skipping
    /// database-level sharding for every table.
    pub fn with_data_source(mut self, data_source: &str) -> Self {
        self.data_source = Some(data_source.to_string());
        self
    }

    pub fn database_values(&self, logic_table: &str) -> Option<&[Datum]> {
        self.database_values
            .get(&logic_table.to_ascii_lowercase())
            .map(Vec::as_slice)
    }

    pub fn table_values(&self, logic_table: &str) -> Option<&[Datum]> {
        self.table_values
            .get(&logic_table.to_ascii_lowercase())
            .map(Vec::as_slice)
    }

    pub fn data_source(&self) -> Option<&str> {
        self.data_source.as_deref()
    }

    /// True when this hint pre-empts predicate extraction for `logic_table`.
    pub fn covers(&self, logic_table: &str) -> bool {
        self.database_values(logic_table).is_some() || self.table_values(logic_table).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.database_values.is_empty() && self.table_values.is_empty() && self.data_source.is_none()
    }
}
