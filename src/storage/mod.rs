//! Object storage backends Loki can be provisioned against.
//!
//! Each backend resolves its credentials from the cluster, opens an [`ObjectStore`] with them,
//! and knows the secret layout Loki expects for it. Bucket lifecycle (ensure, empty, delete) is
//! shared and lives in [`lifecycle`].

use std::{fmt, str::FromStr};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use snafu::Snafu;

use crate::{
    context::{Interrupted, OperationContext},
    http::HttpClient,
    kubernetes::{Cluster, ClusterError},
    sensitive_string::SensitiveString,
};

pub mod azure;
pub mod gcs;
pub mod lifecycle;
#[cfg(test)]
pub(crate) mod memory;
pub mod s3;
pub mod secret;
pub mod swift;

pub use secret::StorageSecret;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    S3,
    Azure,
    Gcs,
    Swift,
    Odf,
    Minio,
}

impl StorageType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::Azure => "azure",
            Self::Gcs => "gcs",
            Self::Swift => "swift",
            Self::Odf => "odf",
            Self::Minio => "minio",
        }
    }

    /// Whether the backend speaks the S3 API.
    pub const fn is_s3_compatible(self) -> bool {
        matches!(self, Self::S3 | Self::Odf | Self::Minio)
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s3" => Ok(Self::S3),
            "azure" => Ok(Self::Azure),
            "gcs" => Ok(Self::Gcs),
            "swift" => Ok(Self::Swift),
            "odf" => Ok(Self::Odf),
            "minio" => Ok(Self::Minio),
            _ => Err(format!("Unknown storage type: {s}")),
        }
    }
}

/// The bucket to provision and the secret that will carry its credentials.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BucketSpec {
    pub name: String,
    pub storage_type: StorageType,
    pub secret_name: String,
    pub namespace: String,
}

impl BucketSpec {
    pub fn new(
        name: impl Into<String>,
        storage_type: StorageType,
        secret_name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            storage_type,
            secret_name: secret_name.into(),
            namespace: namespace.into(),
        }
    }

    pub fn validate(&self) -> Result<(), StorageError> {
        let reason = if self.name.trim().is_empty() {
            "bucket name is empty"
        } else if self.secret_name.trim().is_empty() {
            "secret name is empty"
        } else if self.namespace.trim().is_empty() {
            "namespace is empty"
        } else {
            return Ok(());
        };
        Err(StorageError::InvalidBucketSpec {
            backend: self.storage_type,
            reason: reason.to_owned(),
        })
    }
}

/// Credentials for S3 and S3-compatible stores.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct S3Credential {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: SensitiveString,
    /// Endpoint written into the secret. Only set for in-cluster stores (ODF, MinIO).
    pub endpoint: Option<String>,
    /// Endpoint this process uses to reach the store, when it differs from `endpoint`.
    pub client_endpoint: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AzureCredential {
    pub account_name: String,
    pub account_key: SensitiveString,
    pub environment: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GcsCredential {
    /// Service account key, as the JSON document Loki reads from `key.json`.
    pub key_json: SensitiveString,
    pub project_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SwiftCredential {
    pub auth_url: String,
    pub username: String,
    pub password: SensitiveString,
    pub user_id: String,
    pub user_domain_name: String,
    pub user_domain_id: String,
    pub domain_id: String,
    pub domain_name: String,
    pub project_id: String,
    pub project_name: String,
    pub project_domain_id: String,
    pub project_domain_name: String,
    pub region: Option<String>,
    /// Object store endpoint taken from the Keystone service catalog.
    pub storage_url: String,
    pub token: SensitiveString,
    /// `verify: false` in the cloud configuration.
    pub insecure: bool,
}

/// Credential material of one backend family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credential {
    S3(S3Credential),
    Azure(AzureCredential),
    Gcs(GcsCredential),
    Swift(SwiftCredential),
}

impl Credential {
    fn family(&self) -> &'static str {
        match self {
            Self::S3(_) => "S3",
            Self::Azure(_) => "Azure",
            Self::Gcs(_) => "GCS",
            Self::Swift(_) => "Swift",
        }
    }

    pub(crate) fn mismatch(&self, backend: StorageType) -> StorageError {
        StorageError::CredentialMalformed {
            backend,
            resource: "credential".to_owned(),
            reason: format!("{} credentials cannot be used here", self.family()),
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    #[snafu(display("{} credentials unavailable: {}", backend, reason))]
    CredentialUnavailable {
        backend: StorageType,
        reason: String,
    },
    #[snafu(display("{} credentials in {} are malformed: {}", backend, resource, reason))]
    CredentialMalformed {
        backend: StorageType,
        resource: String,
        reason: String,
    },
    #[snafu(display("Failed to {} {} bucket {:?}: {}", operation, backend, bucket, source))]
    BucketOperationFailed {
        backend: StorageType,
        bucket: String,
        operation: &'static str,
        source: StoreError,
    },
    #[snafu(display("{} storage secret {}/{} already exists", backend, namespace, name))]
    SecretAlreadyExists {
        backend: StorageType,
        namespace: String,
        name: String,
    },
    #[snafu(display("Invalid {} bucket spec: {}", backend, reason))]
    InvalidBucketSpec {
        backend: StorageType,
        reason: String,
    },
    #[snafu(display("Failed to set up {} client for {}: {}", backend, endpoint, source))]
    Connect {
        backend: StorageType,
        endpoint: String,
        source: crate::Error,
    },
    #[snafu(display("{} cluster call on {} failed: {}", backend, resource, source))]
    Cluster {
        backend: StorageType,
        resource: String,
        source: ClusterError,
    },
    #[snafu(display("Deadline exceeded during {} of {} {}", operation, backend, resource))]
    DeadlineExceeded {
        backend: StorageType,
        operation: &'static str,
        resource: String,
    },
    #[snafu(display("{} of {} {} was cancelled", operation, backend, resource))]
    Cancelled {
        backend: StorageType,
        operation: &'static str,
        resource: String,
    },
    #[snafu(display("No supported object storage found on {} cluster", platform))]
    UnsupportedStorage { platform: String },
    #[snafu(display("Storage discovery call on {} failed: {}", resource, source))]
    Discovery {
        resource: String,
        source: ClusterError,
    },
    #[snafu(display("Storage discovery stopped: {}", source))]
    DiscoveryInterrupted { source: Interrupted },
    #[snafu(display("Cluster has no storage classes"))]
    NoStorageClass,
}

impl StorageError {
    pub(crate) fn interrupted(
        interrupted: Interrupted,
        backend: StorageType,
        operation: &'static str,
        resource: impl Into<String>,
    ) -> Self {
        let resource = resource.into();
        match interrupted {
            Interrupted::DeadlineExceeded => Self::DeadlineExceeded {
                backend,
                operation,
                resource,
            },
            Interrupted::Cancelled => Self::Cancelled {
                backend,
                operation,
                resource,
            },
        }
    }

    /// Whether the bucket an operation targeted does not exist.
    pub fn is_bucket_not_found(&self) -> bool {
        matches!(
            self,
            Self::BucketOperationFailed {
                source: StoreError::NotFound,
                ..
            }
        )
    }

    /// Whether the caller should skip rather than fail: the cluster does not offer this backend.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::CredentialUnavailable { .. } | Self::UnsupportedStorage { .. }
        )
    }
}

/// Failure of a single object store call.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("bucket does not exist"))]
    NotFound,
    #[snafu(display("{}", source))]
    Request { source: crate::Error },
    #[snafu(display("unexpected response status {}: {}", status, body))]
    UnexpectedStatus {
        status: http::StatusCode,
        body: String,
    },
}

impl StoreError {
    pub(crate) fn request(source: impl Into<crate::Error>) -> Self {
        Self::Request {
            source: source.into(),
        }
    }

    pub(crate) fn unexpected(response: &http::Response<bytes::Bytes>) -> Self {
        Self::UnexpectedStatus {
            status: response.status(),
            body: String::from_utf8_lossy(response.body()).trim().to_owned(),
        }
    }
}

/// Sends a request to a REST object store and collects the response body.
pub(crate) async fn send_request(
    client: &HttpClient,
    request: http::Request<hyper::Body>,
) -> Result<http::Response<bytes::Bytes>, StoreError> {
    let response = client.send(request).await.map_err(StoreError::request)?;
    let (parts, body) = response.into_parts();
    let body = hyper::body::to_bytes(body)
        .await
        .map_err(StoreError::request)?;
    Ok(http::Response::from_parts(parts, body))
}

/// Bucket and object operations of one storage account.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError>;

    /// Creates `bucket`, returning the location constraint sent with the request, if any.
    async fn create_bucket(&self, bucket: &str) -> Result<Option<String>, StoreError>;

    /// Object keys of `bucket`, one listing page at a time.
    ///
    /// Pages are requested lazily, so objects of a page may be deleted before the next page
    /// is fetched. Yields [`StoreError::NotFound`] when the bucket does not exist.
    fn object_pages<'a>(&'a self, bucket: &'a str)
    -> BoxStream<'a, Result<Vec<String>, StoreError>>;

    /// Deletes a page of objects, in bulk where the store supports it.
    async fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> Result<(), StoreError>;

    /// Deletes an empty bucket. Yields [`StoreError::NotFound`] when the bucket does not exist.
    async fn delete_bucket(&self, bucket: &str) -> Result<(), StoreError>;
}

/// One storage variant: where its credentials come from, how its store is reached, and the
/// secret layout Loki reads for it.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn storage_type(&self) -> StorageType;

    async fn resolve_credential(
        &self,
        cluster: &dyn Cluster,
        ctx: &OperationContext,
    ) -> Result<Credential, StorageError>;

    async fn open_store(&self, credential: &Credential) -> Result<Box<dyn ObjectStore>, StorageError>;

    fn secret_data(
        &self,
        spec: &BucketSpec,
        credential: &Credential,
    ) -> Result<StorageSecret, StorageError>;

    async fn ensure_bucket(
        &self,
        store: &dyn ObjectStore,
        bucket: &str,
        ctx: &OperationContext,
    ) -> Result<(), StorageError> {
        lifecycle::ensure_bucket(self.storage_type(), store, bucket, ctx).await
    }

    async fn empty_bucket(
        &self,
        store: &dyn ObjectStore,
        bucket: &str,
        ctx: &OperationContext,
    ) -> Result<(), StorageError> {
        lifecycle::empty_bucket(self.storage_type(), store, bucket, ctx)
            .await
            .map(|_| ())
    }

    async fn delete_bucket(
        &self,
        store: &dyn ObjectStore,
        bucket: &str,
        ctx: &OperationContext,
    ) -> Result<(), StorageError> {
        lifecycle::delete_bucket(self.storage_type(), store, bucket, ctx).await
    }

    async fn materialize_secret(
        &self,
        cluster: &dyn Cluster,
        spec: &BucketSpec,
        credential: &Credential,
        ctx: &OperationContext,
    ) -> Result<(), StorageError> {
        let secret = self.secret_data(spec, credential)?;
        secret::materialize(cluster, spec, secret, ctx).await
    }
}

/// Reads one key of a secret as UTF-8, trimming surrounding whitespace.
pub(crate) fn secret_value(
    backend: StorageType,
    data: &crate::kubernetes::SecretData,
    resource: &str,
    key: &str,
) -> Result<String, StorageError> {
    let value = data
        .get(key)
        .ok_or_else(|| StorageError::CredentialUnavailable {
            backend,
            reason: format!("key {key} missing from secret {resource}"),
        })?;
    let value = std::str::from_utf8(value).map_err(|error| StorageError::CredentialMalformed {
        backend,
        resource: resource.to_owned(),
        reason: format!("key {key} is not UTF-8: {error}"),
    })?;
    Ok(value.trim().to_owned())
}

/// Fetches a secret through `ctx`, treating its absence as unavailable credentials.
pub(crate) async fn required_secret(
    backend: StorageType,
    cluster: &dyn Cluster,
    namespace: &str,
    name: &str,
    ctx: &OperationContext,
) -> Result<crate::kubernetes::SecretData, StorageError> {
    optional_secret(backend, cluster, namespace, name, ctx)
        .await?
        .ok_or_else(|| StorageError::CredentialUnavailable {
            backend,
            reason: format!("secret {namespace}/{name} not found"),
        })
}

pub(crate) async fn optional_secret(
    backend: StorageType,
    cluster: &dyn Cluster,
    namespace: &str,
    name: &str,
    ctx: &OperationContext,
) -> Result<Option<crate::kubernetes::SecretData>, StorageError> {
    let resource = format!("secret {namespace}/{name}");
    match ctx.run(cluster.secret(namespace, name)).await {
        Ok(Ok(data)) => Ok(data),
        Ok(Err(source)) => Err(StorageError::Cluster {
            backend,
            resource,
            source,
        }),
        Err(interrupted) => Err(StorageError::interrupted(
            interrupted,
            backend,
            "credential lookup",
            resource,
        )),
    }
}
