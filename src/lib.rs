#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![allow(clippy::type_complexity)]

//! Object-storage provisioning for Loki and a resilient client for querying it.
//!
//! The provisioning side resolves backend credentials from a cluster, makes sure the target
//! bucket exists and is empty, and writes the secret Loki reads its storage configuration
//! from. The querying side talks to the Loki HTTP API with authentication, bounded retries
//! and time-windowed range queries.

#[macro_use]
extern crate tracing;

#[macro_use]
pub mod internal_events;

pub mod config;
pub mod context;
pub mod gcp;
pub mod http;
pub mod kubernetes;
pub mod loki;
pub mod provisioner;
pub mod sensitive_string;
pub mod storage;
#[cfg(test)]
pub mod test_util;
pub mod tls;
pub mod trace;

pub use context::OperationContext;
pub use provisioner::StorageProvisioner;

/// Boxed error used at the boundaries where the concrete error type does not matter.
pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

/// User agent sent with every request issued by this crate.
pub const USER_AGENT: &str = "loki-logcli";
