//! Store and path accessor configuration.
//!
//! Both types deserialize from JSON with every field optional, so hosts can
//! keep a partial config file next to their persisted state.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Settings for a single store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Prefix for names handed out to unnamed atoms (`anon0`, `anon1`, ...).
    pub anon_prefix: String,

    /// Separator placed between a group name and its members.
    pub group_separator: String,

    /// Catch listener panics during flush so the remaining listeners run.
    pub isolate_listener_panics: bool,

    /// Upper bound on flush passes triggered by listeners writing back into
    /// the store. Exceeding it leaves the remaining batch pending.
    pub max_flush_passes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            anon_prefix: "anon".to_string(),
            group_separator: ".".to_string(),
            isolate_listener_panics: true,
            max_flush_passes: 100,
        }
    }
}

impl StoreConfig {
    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Settings for a [`PathAccessor`](crate::reactive::PathAccessor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathOptions {
    /// Character splitting a path into fragments.
    pub separator: char,

    /// Fail on traversal through non-container values instead of yielding
    /// `null`.
    pub strict: bool,
}

impl Default for PathOptions {
    fn default() -> Self {
        Self {
            separator: '.',
            strict: true,
        }
    }
}
