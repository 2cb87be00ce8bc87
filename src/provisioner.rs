//! Entry point tying credential resolution, bucket lifecycle and secret materialization together.

use std::{future::Future, sync::Arc};

use tokio::time::Instant;
use tracing_futures::Instrument;

use crate::{
    config::{ProvisionerConfig, ProxyPolicy},
    context::OperationContext,
    internal_events::{StorageCredentialUnavailable, StorageTypeDetected},
    kubernetes::{Cluster, ClusterError, Platform},
    storage::{
        BucketSpec, StorageBackend, StorageError, StorageType,
        azure::AzureBackend,
        gcs::GcsBackend,
        s3::{S3Backend, S3Flavor},
        secret,
        swift::SwiftBackend,
    },
};

/// Storage classes an OpenShift Data Foundation install provides.
pub const ODF_STORAGE_CLASSES: [&str; 3] = [
    "openshift-storage.noobaa.io",
    "ocs-storagecluster-ceph-rbd",
    "ocs-storagecluster-cephfs",
];

/// Where the secret for a provisioned bucket was written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretRef {
    pub namespace: String,
    pub name: String,
}

/// Provisions and tears down Loki object storage on one cluster.
#[derive(Clone)]
pub struct StorageProvisioner {
    cluster: Arc<dyn Cluster>,
    config: ProvisionerConfig,
    proxy: ProxyPolicy,
}

impl StorageProvisioner {
    pub fn new(cluster: Arc<dyn Cluster>, config: ProvisionerConfig) -> Self {
        let proxy = config.proxy();
        Self {
            cluster,
            config,
            proxy,
        }
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    /// The backend implementing `storage_type`.
    pub fn backend_for(&self, storage_type: StorageType) -> Box<dyn StorageBackend> {
        let tls = self.config.tls.clone();
        let proxy = self.proxy.clone();
        match storage_type {
            StorageType::S3 => Box::new(S3Backend::new(S3Flavor::Aws, tls, proxy)),
            StorageType::Odf => Box::new(S3Backend::new(S3Flavor::Odf, tls, proxy)),
            StorageType::Minio => Box::new(S3Backend::new(
                S3Flavor::Minio {
                    namespace: self.config.minio_namespace.clone(),
                },
                tls,
                proxy,
            )),
            StorageType::Azure => Box::new(AzureBackend::new(self.config.azure.clone())),
            StorageType::Gcs => Box::new(GcsBackend::new(
                self.config.gcs_endpoint.clone(),
                tls,
                proxy,
            )),
            StorageType::Swift => Box::new(SwiftBackend::new(tls, proxy)),
        }
    }

    fn bounded(&self, ctx: &OperationContext) -> OperationContext {
        match self.config.timeout() {
            Some(timeout) => ctx.child().deadline(Instant::now() + timeout),
            None => ctx.child(),
        }
    }

    /// Makes sure the bucket of `spec` exists and is empty, then writes its storage secret.
    pub async fn provision(
        &self,
        spec: &BucketSpec,
        ctx: &OperationContext,
    ) -> Result<SecretRef, StorageError> {
        let backend = self.backend_for(spec.storage_type);
        self.provision_with(backend.as_ref(), spec, ctx).await
    }

    /// Like [`StorageProvisioner::provision`], with a caller-supplied backend.
    pub async fn provision_with(
        &self,
        backend: &dyn StorageBackend,
        spec: &BucketSpec,
        ctx: &OperationContext,
    ) -> Result<SecretRef, StorageError> {
        spec.validate()?;
        let ctx = self.bounded(ctx);

        async {
            let credential = backend
                .resolve_credential(self.cluster.as_ref(), &ctx)
                .await
                .inspect_err(|error| {
                    if error.is_unavailable() {
                        emit!(StorageCredentialUnavailable {
                            backend: spec.storage_type,
                            error,
                        });
                    }
                })?;
            let store = backend.open_store(&credential).await?;

            backend
                .ensure_bucket(store.as_ref(), &spec.name, &ctx)
                .await?;
            backend
                .materialize_secret(self.cluster.as_ref(), spec, &credential, &ctx)
                .await?;

            Ok::<_, StorageError>(SecretRef {
                namespace: spec.namespace.clone(),
                name: spec.secret_name.clone(),
            })
        }
        .instrument(info_span!(
            "provision",
            backend = %spec.storage_type,
            bucket = %spec.name,
        ))
        .await
    }

    /// Removes the storage secret of `spec`, then empties and deletes its bucket.
    ///
    /// Either being absent already counts as success.
    pub async fn teardown(
        &self,
        spec: &BucketSpec,
        ctx: &OperationContext,
    ) -> Result<(), StorageError> {
        let backend = self.backend_for(spec.storage_type);
        self.teardown_with(backend.as_ref(), spec, ctx).await
    }

    pub async fn teardown_with(
        &self,
        backend: &dyn StorageBackend,
        spec: &BucketSpec,
        ctx: &OperationContext,
    ) -> Result<(), StorageError> {
        spec.validate()?;
        let ctx = self.bounded(ctx);

        async {
            secret::remove(self.cluster.as_ref(), spec, &ctx).await?;

            let credential = backend
                .resolve_credential(self.cluster.as_ref(), &ctx)
                .await?;
            let store = backend.open_store(&credential).await?;
            backend
                .delete_bucket(store.as_ref(), &spec.name, &ctx)
                .await
        }
        .instrument(info_span!(
            "teardown",
            backend = %spec.storage_type,
            bucket = %spec.name,
        ))
        .await
    }

    pub async fn detect_storage_type(
        &self,
        ctx: &OperationContext,
    ) -> Result<Option<StorageType>, StorageError> {
        detect_storage_type(
            self.cluster.as_ref(),
            &self.config.minio_namespace,
            &self.bounded(ctx),
        )
        .await
    }

    pub async fn default_storage_class(
        &self,
        ctx: &OperationContext,
    ) -> Result<String, StorageError> {
        default_storage_class(self.cluster.as_ref(), &self.bounded(ctx)).await
    }
}

async fn discover<T, F>(ctx: &OperationContext, resource: &str, fut: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, ClusterError>>,
{
    match ctx.run(fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(StorageError::Discovery {
            resource: resource.to_owned(),
            source,
        }),
        Err(source) => Err(StorageError::DiscoveryInterrupted { source }),
    }
}

/// Picks the object storage a cluster offers.
///
/// Cloud platforms map to their native store. Elsewhere an ODF install is preferred over a
/// running MinIO deployment in `minio_namespace`.
pub async fn detect_storage_type(
    cluster: &dyn Cluster,
    minio_namespace: &str,
    ctx: &OperationContext,
) -> Result<Option<StorageType>, StorageError> {
    let platform = discover(ctx, "infrastructure cluster", cluster.platform())
        .await?
        .platform;

    let detected = match platform {
        Platform::Aws => Some(StorageType::S3),
        Platform::Gcp => Some(StorageType::Gcs),
        Platform::Azure => Some(StorageType::Azure),
        Platform::OpenStack => Some(StorageType::Swift),
        Platform::Other(_) => {
            if odf_installed(cluster, ctx).await? {
                Some(StorageType::Odf)
            } else if minio_running(cluster, minio_namespace, ctx).await? {
                Some(StorageType::Minio)
            } else {
                None
            }
        }
    };

    emit!(StorageTypeDetected {
        platform: &platform.to_string(),
        storage_type: detected,
    });
    Ok(detected)
}

async fn odf_installed(cluster: &dyn Cluster, ctx: &OperationContext) -> Result<bool, StorageError> {
    let classes = discover(ctx, "storage classes", cluster.storage_classes()).await?;
    let all_present = ODF_STORAGE_CLASSES
        .iter()
        .all(|wanted| classes.iter().any(|class| class.name == *wanted));
    if !all_present {
        return Ok(false);
    }
    discover(
        ctx,
        "service openshift-storage/s3",
        cluster.service_exists("openshift-storage", "s3"),
    )
    .await
}

async fn minio_running(
    cluster: &dyn Cluster,
    namespace: &str,
    ctx: &OperationContext,
) -> Result<bool, StorageError> {
    let phases = discover(
        ctx,
        &format!("pods {namespace} app=minio"),
        cluster.pod_phases(namespace, "app=minio"),
    )
    .await?;
    if phases.first().map(String::as_str) != Some("Running") {
        return Ok(false);
    }
    discover(
        ctx,
        &format!("service {namespace}/minio"),
        cluster.service_exists(namespace, "minio"),
    )
    .await
}

/// Name of the default storage class, or of the first class when none is marked default.
pub async fn default_storage_class(
    cluster: &dyn Cluster,
    ctx: &OperationContext,
) -> Result<String, StorageError> {
    let classes = discover(ctx, "storage classes", cluster.storage_classes()).await?;
    classes
        .iter()
        .find(|class| class.is_default)
        .or_else(|| classes.first())
        .map(|class| class.name.clone())
        .ok_or(StorageError::NoStorageClass)
}
