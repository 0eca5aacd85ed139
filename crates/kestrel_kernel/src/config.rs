use serde::{Deserialize, Serialize};

use kestrel_common::error::ConfigError;

/// Runtime properties of the statement pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Log the logic statement and every rewritten unit at `info`.
    pub sql_show: bool,
    /// Upper bound on concurrent physical statements per data source for one
    /// logic statement. Units beyond it share a connection and run serially.
    pub max_connections_size_per_query: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            sql_show: false,
            max_connections_size_per_query: 1,
        }
    }
}

impl KernelConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if config.max_connections_size_per_query == 0 {
            return Err(ConfigError::Parse(
                "max_connections_size_per_query must be at least 1".into(),
            ));
        }
        Ok(config)
    }

    pub fn with_sql_show(mut self, sql_show: bool) -> Self {
        self.sql_show = sql_show;
        self
    }

    pub fn with_max_connections_size_per_query(mut self, max: usize) -> Self {
        self.max_connections_size_per_query = max.max(1);
        self
    }
}
