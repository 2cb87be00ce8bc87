//! S3 and the S3-compatible stores running inside the cluster (ODF, MinIO).

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    types::{BucketLocationConstraint, CreateBucketConfiguration, Delete, ObjectIdentifier},
};
use aws_smithy_runtime::client::http::hyper_014::HyperClientBuilder;
use futures::{StreamExt, stream::BoxStream};

use super::{
    BucketSpec, Credential, ObjectStore, S3Credential, StorageBackend, StorageError, StorageSecret,
    StorageType, StoreError, required_secret, secret_value,
};
use crate::{
    config::ProxyPolicy,
    context::OperationContext,
    http::build_proxy_connector,
    kubernetes::Cluster,
    tls::TlsConfig,
};

/// Keys per `ListObjectsV2` page, the S3 maximum.
pub const PAGE_SIZE: i32 = 1000;

/// The region S3 treats as implicit. It is rejected as an explicit location constraint.
pub const DEFAULT_REGION: &str = "us-east-1";

const AWS_CREDS_NAMESPACE: &str = "kube-system";
const AWS_CREDS_SECRET: &str = "aws-creds";
const ODF_NAMESPACE: &str = "openshift-storage";
const ODF_SECRET: &str = "noobaa-admin";
const ODF_SERVICE: &str = "s3";
const MINIO_SECRET: &str = "minio-creds";
const MINIO_SERVICE: &str = "minio";

/// Location constraint to send when creating a bucket in `region`.
pub fn location_constraint(region: &str) -> Option<String> {
    let region = region.trim();
    if region.is_empty() || region == DEFAULT_REGION {
        None
    } else {
        Some(region.to_owned())
    }
}

pub fn aws_endpoint(region: &str) -> String {
    format!("https://s3.{region}.amazonaws.com")
}

/// Which S3 implementation a bucket lives in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum S3Flavor {
    Aws,
    /// The NooBaa S3 endpoint of OpenShift Data Foundation.
    Odf,
    Minio { namespace: String },
}

impl S3Flavor {
    fn storage_type(&self) -> StorageType {
        match self {
            Self::Aws => StorageType::S3,
            Self::Odf => StorageType::Odf,
            Self::Minio { .. } => StorageType::Minio,
        }
    }

    /// Where the store runs in the cluster, as (namespace, service, secret, key id key, secret key key).
    fn in_cluster(&self) -> Option<(&str, &'static str, &'static str, &'static str, &'static str)> {
        match self {
            Self::Aws => None,
            Self::Odf => Some((
                ODF_NAMESPACE,
                ODF_SERVICE,
                ODF_SECRET,
                "AWS_ACCESS_KEY_ID",
                "AWS_SECRET_ACCESS_KEY",
            )),
            Self::Minio { namespace } => Some((
                namespace,
                MINIO_SERVICE,
                MINIO_SECRET,
                "access_key_id",
                "secret_access_key",
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct S3Backend {
    flavor: S3Flavor,
    tls: TlsConfig,
    proxy: ProxyPolicy,
}

impl S3Backend {
    pub fn new(flavor: S3Flavor, tls: TlsConfig, proxy: ProxyPolicy) -> Self {
        Self { flavor, tls, proxy }
    }

    fn credential<'a>(&self, credential: &'a Credential) -> Result<&'a S3Credential, StorageError> {
        match credential {
            Credential::S3(credential) => Ok(credential),
            other => Err(other.mismatch(self.storage_type())),
        }
    }

    async fn resolve_aws(
        &self,
        cluster: &dyn Cluster,
        ctx: &OperationContext,
    ) -> Result<Credential, StorageError> {
        let backend = self.storage_type();
        let platform = match ctx.run(cluster.platform()).await {
            Ok(Ok(platform)) => platform,
            Ok(Err(source)) => {
                return Err(StorageError::Cluster {
                    backend,
                    resource: "infrastructure cluster".to_owned(),
                    source,
                });
            }
            Err(interrupted) => {
                return Err(StorageError::interrupted(
                    interrupted,
                    backend,
                    "credential lookup",
                    "infrastructure cluster",
                ));
            }
        };
        let region = platform
            .region
            .ok_or_else(|| StorageError::CredentialUnavailable {
                backend,
                reason: format!("{} cluster reports no AWS region", platform.platform),
            })?;

        let resource = format!("{AWS_CREDS_NAMESPACE}/{AWS_CREDS_SECRET}");
        let data =
            required_secret(backend, cluster, AWS_CREDS_NAMESPACE, AWS_CREDS_SECRET, ctx).await?;

        Ok(Credential::S3(S3Credential {
            region,
            access_key_id: secret_value(backend, &data, &resource, "aws_access_key_id")?,
            secret_access_key: secret_value(backend, &data, &resource, "aws_secret_access_key")?
                .into(),
            endpoint: None,
            client_endpoint: None,
        }))
    }

    async fn resolve_in_cluster(
        &self,
        cluster: &dyn Cluster,
        ctx: &OperationContext,
        (namespace, service, secret, key_id, secret_key): (&str, &str, &str, &str, &str),
    ) -> Result<Credential, StorageError> {
        let backend = self.storage_type();
        let resource = format!("{namespace}/{secret}");
        let data = required_secret(backend, cluster, namespace, secret, ctx).await?;
        let access_key_id = secret_value(backend, &data, &resource, key_id)?;
        let secret_access_key = secret_value(backend, &data, &resource, secret_key)?;

        let route = match ctx.run(cluster.route_host(namespace, service)).await {
            Ok(Ok(route)) => route,
            Ok(Err(source)) => {
                return Err(StorageError::Cluster {
                    backend,
                    resource: format!("route {namespace}/{service}"),
                    source,
                });
            }
            Err(interrupted) => {
                return Err(StorageError::interrupted(
                    interrupted,
                    backend,
                    "credential lookup",
                    format!("route {namespace}/{service}"),
                ));
            }
        };

        let endpoint = format!("http://{service}.{namespace}.svc");
        Ok(Credential::S3(S3Credential {
            region: DEFAULT_REGION.to_owned(),
            access_key_id,
            secret_access_key: secret_access_key.into(),
            client_endpoint: route.map(|host| format!("http://{host}")),
            endpoint: Some(endpoint),
        }))
    }

    fn build_client(&self, credential: &S3Credential) -> Result<Client, StorageError> {
        let backend = self.storage_type();
        let endpoint = credential
            .client_endpoint
            .as_ref()
            .or(credential.endpoint.as_ref());

        // In-cluster stores serve certificates signed by the cluster CA.
        let tls = match self.flavor {
            S3Flavor::Aws => self.tls.clone(),
            S3Flavor::Odf | S3Flavor::Minio { .. } => TlsConfig::insecure(),
        };
        let connector =
            build_proxy_connector(&tls, &self.proxy).map_err(|error| StorageError::Connect {
                backend,
                endpoint: endpoint
                    .cloned()
                    .unwrap_or_else(|| aws_endpoint(&credential.region)),
                source: Box::new(error),
            })?;

        let mut config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(credential.region.clone()))
            .credentials_provider(Credentials::new(
                credential.access_key_id.clone(),
                credential.secret_access_key.inner(),
                None,
                None,
                "loki-storage",
            ))
            .http_client(HyperClientBuilder::new().build(connector));
        if let Some(endpoint) = endpoint {
            config = config.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Client::from_conf(config.build()))
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn storage_type(&self) -> StorageType {
        self.flavor.storage_type()
    }

    async fn resolve_credential(
        &self,
        cluster: &dyn Cluster,
        ctx: &OperationContext,
    ) -> Result<Credential, StorageError> {
        match self.flavor.in_cluster() {
            None => self.resolve_aws(cluster, ctx).await,
            Some(location) => self.resolve_in_cluster(cluster, ctx, location).await,
        }
    }

    async fn open_store(&self, credential: &Credential) -> Result<Box<dyn ObjectStore>, StorageError> {
        let credential = self.credential(credential)?;
        let client = self.build_client(credential)?;
        let location = match self.flavor {
            S3Flavor::Aws => location_constraint(&credential.region),
            S3Flavor::Odf | S3Flavor::Minio { .. } => None,
        };
        Ok(Box::new(S3Store { client, location }))
    }

    fn secret_data(
        &self,
        spec: &BucketSpec,
        credential: &Credential,
    ) -> Result<StorageSecret, StorageError> {
        let credential = self.credential(credential)?;
        let secret = StorageSecret::new()
            .with("access_key_id", credential.access_key_id.as_str())
            .with("access_key_secret", credential.secret_access_key.inner())
            .with("bucketnames", spec.name.as_str());

        Ok(match (&self.flavor, &credential.endpoint) {
            (S3Flavor::Aws, _) => secret
                .with("region", credential.region.as_str())
                .with("endpoint", aws_endpoint(&credential.region)),
            (_, Some(endpoint)) => secret.with("endpoint", endpoint.as_str()),
            (_, None) => {
                return Err(StorageError::CredentialMalformed {
                    backend: self.storage_type(),
                    resource: "credential".to_owned(),
                    reason: "in-cluster S3 credentials carry no endpoint".to_owned(),
                });
            }
        })
    }
}

fn store_error<E, R>(error: SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    if error.code() == Some("NoSuchBucket") {
        StoreError::NotFound
    } else {
        StoreError::request(DisplayErrorContext(&error).to_string())
    }
}

struct S3Store {
    client: Client,
    location: Option<String>,
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(store_error)?;
        Ok(output
            .buckets()
            .iter()
            .any(|existing| existing.name() == Some(bucket)))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<Option<String>, StoreError> {
        let mut request = self.client.create_bucket().bucket(bucket);
        if let Some(region) = &self.location {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => Ok(self.location.clone()),
            Err(error) if error.code() == Some("BucketAlreadyOwnedByYou") => {
                Ok(self.location.clone())
            }
            Err(error) => Err(store_error(error)),
        }
    }

    fn object_pages<'a>(
        &'a self,
        bucket: &'a str,
    ) -> BoxStream<'a, Result<Vec<String>, StoreError>> {
        futures::stream::try_unfold(Some(None), move |token: Option<Option<String>>| async move {
            let Some(token) = token else {
                return Ok(None);
            };

            let output = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .max_keys(PAGE_SIZE)
                .set_continuation_token(token)
                .send()
                .await
                .map_err(store_error)?;

            let keys = output
                .contents()
                .iter()
                .filter_map(|object| object.key().map(str::to_owned))
                .collect();
            let next = if output.is_truncated().unwrap_or(false) {
                output
                    .next_continuation_token()
                    .map(|token| Some(token.to_owned()))
            } else {
                None
            };
            Ok(Some((keys, next)))
        })
        .boxed()
    }

    async fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> Result<(), StoreError> {
        let count = keys.len();
        let objects = keys
            .into_iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::request)?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(StoreError::request)?;

        let output = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(store_error)?;

        match output.errors().first() {
            None => Ok(()),
            Some(first) => Err(StoreError::request(format!(
                "{} of {} objects not deleted, first {:?}: {}",
                output.errors().len(),
                count,
                first.key().unwrap_or_default(),
                first.message().or(first.code()).unwrap_or("unknown error"),
            ))),
        }
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map(|_| ())
            .map_err(store_error)
    }
}
