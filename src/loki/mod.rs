//! Querying Loki over HTTP: range queries, label listings and readiness.

mod client;
pub mod query;
pub mod response;
pub mod retry;

pub use self::{
    client::{DEFAULT_RETRIES, LogQueryClient, LokiClientConfig, QueryError, SEARCH_LIMIT},
    query::{Direction, QueryWindow, selector},
    response::{LabelResponse, QueryResult, QueryStats, StreamResult},
    retry::{Backoff, BackoffConfig, ExponentialBackoff, FixedBackoff, NoBackoff},
};
