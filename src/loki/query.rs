use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const QUERY_RANGE_PATH: &str = "/loki/api/v1/query_range";
pub const LABELS_PATH: &str = "/loki/api/v1/labels";
const TENANT_PATH: &str = "/api/logs/v1/";

/// Default `limit` of range queries.
pub const DEFAULT_LIMIT: u32 = 100;

/// Scan order of a range query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Forward,
    #[default]
    Backward,
}

impl Direction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "FORWARD",
            Self::Backward => "BACKWARD",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `query_range` request: which logs, over which time span, in which order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryWindow {
    /// Tenant (`application`, `infrastructure`, `audit`) when querying through the gateway.
    pub log_type: Option<String>,
    pub query: String,
    pub limit: u32,
    /// Inclusive.
    pub start: DateTime<Utc>,
    /// Exclusive.
    pub end: DateTime<Utc>,
    pub direction: Direction,
}

impl QueryWindow {
    pub fn new(query: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            log_type: None,
            query: query.into(),
            limit: DEFAULT_LIMIT,
            start,
            end,
            direction: Direction::default(),
        }
    }

    #[must_use]
    pub fn log_type(mut self, log_type: impl Into<String>) -> Self {
        self.log_type = Some(log_type.into());
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub(crate) fn path(&self) -> String {
        tenant_path(self.log_type.as_deref(), QUERY_RANGE_PATH)
    }
}

/// Stream selector matching one label value, e.g. `{kubernetes_namespace_name="loki"}`.
pub fn selector(key: &str, value: &str) -> String {
    format!("{{{key}=\"{value}\"}}")
}

/// Prefixes `path` with the gateway tenant path of `log_type`, when there is one.
pub(crate) fn tenant_path(log_type: Option<&str>, path: &str) -> String {
    match log_type.filter(|log_type| !log_type.is_empty()) {
        Some(log_type) => format!("{TENANT_PATH}{log_type}{path}"),
        None => path.to_owned(),
    }
}
