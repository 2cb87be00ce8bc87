//! Read and write access to the cluster objects storage provisioning depends on.
//!
//! Everything above this module talks to the cluster through the [`Cluster`] trait so the
//! provisioning flow can be exercised against an in-memory cluster.

use std::{collections::BTreeMap, fmt};

use async_trait::async_trait;
use snafu::Snafu;

mod kube_cluster;
#[cfg(test)]
pub mod fake;

pub use kube_cluster::KubeCluster;

/// Raw secret payload, keyed by data key.
pub type SecretData = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ClusterError {
    #[snafu(display("Failed to build Kubernetes client: {}", source))]
    BuildClient { source: kube::Error },
    #[snafu(display("Failed to {} {} {}: {}", verb, kind, name, source))]
    Request {
        verb: &'static str,
        kind: &'static str,
        name: String,
        source: kube::Error,
    },
    #[snafu(display("Secret {}/{} already exists", namespace, name))]
    AlreadyExists { namespace: String, name: String },
    #[snafu(display("Unexpected shape of {} {}: {}", kind, name, reason))]
    UnexpectedObject {
        kind: &'static str,
        name: String,
        reason: String,
    },
}

/// Infrastructure provider the cluster runs on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Platform {
    Aws,
    Gcp,
    Azure,
    OpenStack,
    Other(String),
}

impl Platform {
    /// Parses `status.platformStatus.type` of the `Infrastructure` object.
    pub fn from_type(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "aws" => Self::Aws,
            "gcp" => Self::Gcp,
            "azure" => Self::Azure,
            "openstack" => Self::OpenStack,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aws => f.write_str("aws"),
            Self::Gcp => f.write_str("gcp"),
            Self::Azure => f.write_str("azure"),
            Self::OpenStack => f.write_str("openstack"),
            Self::Other(other) => f.write_str(other),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlatformStatus {
    pub platform: Platform,
    /// Only reported for AWS clusters.
    pub region: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageClassInfo {
    pub name: String,
    pub is_default: bool,
}

pub const DEFAULT_STORAGE_CLASS_ANNOTATION: &str = "storageclass.kubernetes.io/is-default-class";

/// The slice of the Kubernetes API used by credential resolution and secret materialization.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Data of a secret, or `None` when it does not exist.
    async fn secret(&self, namespace: &str, name: &str) -> Result<Option<SecretData>, ClusterError>;

    /// Literal environment variables declared by the containers of a deployment, or `None`
    /// when the deployment does not exist.
    async fn deployment_env(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ClusterError>;

    async fn platform(&self) -> Result<PlatformStatus, ClusterError>;

    /// `spec.host` of a route, or `None` when the route (or the route API) does not exist.
    async fn route_host(&self, namespace: &str, name: &str) -> Result<Option<String>, ClusterError>;

    async fn storage_classes(&self) -> Result<Vec<StorageClassInfo>, ClusterError>;

    async fn service_exists(&self, namespace: &str, name: &str) -> Result<bool, ClusterError>;

    /// Phases of the pods matching `label_selector`, in list order.
    async fn pod_phases(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<String>, ClusterError>;

    /// Creates an opaque secret. Fails with [`ClusterError::AlreadyExists`] when the name is taken.
    async fn create_secret(
        &self,
        namespace: &str,
        name: &str,
        data: SecretData,
    ) -> Result<(), ClusterError>;

    /// Deletes a secret, returning whether it existed.
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<bool, ClusterError>;
}
