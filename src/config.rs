use serde::{Deserialize, Serialize};

/// Tunables for a table. Missing fields fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Dirty-row count at which a row-expression column is evaluated on the rayon pool.
    pub parallel_threshold: usize,
    /// Page size used by queries that do not set one.
    pub default_page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { parallel_threshold: 1024, default_page_size: 20 }
    }
}

impl EngineConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
