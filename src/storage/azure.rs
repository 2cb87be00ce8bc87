//! Azure Blob Storage containers.

use std::num::NonZeroU32;

use async_trait::async_trait;
use azure_core::{StatusCode, error::ErrorKind, request_options::MaxResults};
use azure_storage::{CloudLocation, StorageCredentials};
use azure_storage_blobs::prelude::{BlobServiceClient, ClientBuilder, ContainerClient};
use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use serde::{Deserialize, Serialize};

use super::{
    AzureCredential, BucketSpec, Credential, ObjectStore, StorageBackend, StorageError,
    StorageSecret, StorageType, StoreError, required_secret, secret_value,
};
use crate::{
    context::OperationContext, kubernetes::Cluster, sensitive_string::SensitiveString,
};

pub const ENVIRONMENT: &str = "AzureGlobal";

const PAGE_SIZE: u32 = 1000;

const REGISTRY_NAMESPACE: &str = "openshift-image-registry";
const REGISTRY_DEPLOYMENT: &str = "image-registry";
const REGISTRY_SECRET: &str = "image-registry-private-configuration";
const ACCOUNT_NAME_ENV: &str = "REGISTRY_STORAGE_AZURE_ACCOUNTNAME";
const ACCOUNT_KEY_KEY: &str = "REGISTRY_STORAGE_AZURE_ACCOUNTKEY";

fn default_account_name_key() -> String {
    "account_name".to_owned()
}

fn default_account_key_key() -> String {
    "account_key".to_owned()
}

/// Where the storage account name and key are read from.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "snake_case", tag = "source")]
pub enum AzureCredentialSource {
    /// Borrow the storage account the cluster image registry is configured with.
    #[default]
    ImageRegistry,

    /// A secret holding the account name and key.
    Secret {
        namespace: String,
        name: String,
        #[serde(default = "default_account_name_key")]
        account_name_key: String,
        #[serde(default = "default_account_key_key")]
        account_key_key: String,
    },

    Static {
        account_name: String,
        account_key: SensitiveString,
    },
}

#[derive(Clone, Debug, Default)]
pub struct AzureBackend {
    source: AzureCredentialSource,
}

impl AzureBackend {
    pub fn new(source: AzureCredentialSource) -> Self {
        Self { source }
    }

    fn credential<'a>(&self, credential: &'a Credential) -> Result<&'a AzureCredential, StorageError> {
        match credential {
            Credential::Azure(credential) => Ok(credential),
            other => Err(other.mismatch(StorageType::Azure)),
        }
    }

    async fn from_image_registry(
        &self,
        cluster: &dyn Cluster,
        ctx: &OperationContext,
    ) -> Result<(String, String), StorageError> {
        let backend = StorageType::Azure;
        let resource = format!("deployment {REGISTRY_NAMESPACE}/{REGISTRY_DEPLOYMENT}");
        let env = match ctx
            .run(cluster.deployment_env(REGISTRY_NAMESPACE, REGISTRY_DEPLOYMENT))
            .await
        {
            Ok(Ok(env)) => env,
            Ok(Err(source)) => {
                return Err(StorageError::Cluster {
                    backend,
                    resource,
                    source,
                });
            }
            Err(interrupted) => {
                return Err(StorageError::interrupted(
                    interrupted,
                    backend,
                    "credential lookup",
                    resource,
                ));
            }
        };
        let account_name = env
            .ok_or_else(|| StorageError::CredentialUnavailable {
                backend,
                reason: format!("{resource} not found"),
            })?
            .remove(ACCOUNT_NAME_ENV)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| StorageError::CredentialUnavailable {
                backend,
                reason: format!("{resource} does not set {ACCOUNT_NAME_ENV}"),
            })?;

        let data =
            required_secret(backend, cluster, REGISTRY_NAMESPACE, REGISTRY_SECRET, ctx).await?;
        let account_key = secret_value(
            backend,
            &data,
            &format!("{REGISTRY_NAMESPACE}/{REGISTRY_SECRET}"),
            ACCOUNT_KEY_KEY,
        )?;
        Ok((account_name, account_key))
    }
}

#[async_trait]
impl StorageBackend for AzureBackend {
    fn storage_type(&self) -> StorageType {
        StorageType::Azure
    }

    async fn resolve_credential(
        &self,
        cluster: &dyn Cluster,
        ctx: &OperationContext,
    ) -> Result<Credential, StorageError> {
        let (account_name, account_key) = match &self.source {
            AzureCredentialSource::ImageRegistry => self.from_image_registry(cluster, ctx).await?,
            AzureCredentialSource::Secret {
                namespace,
                name,
                account_name_key,
                account_key_key,
            } => {
                let backend = StorageType::Azure;
                let resource = format!("{namespace}/{name}");
                let data = required_secret(backend, cluster, namespace, name, ctx).await?;
                (
                    secret_value(backend, &data, &resource, account_name_key)?,
                    secret_value(backend, &data, &resource, account_key_key)?,
                )
            }
            AzureCredentialSource::Static {
                account_name,
                account_key,
            } => (account_name.clone(), account_key.inner().to_owned()),
        };

        Ok(Credential::Azure(AzureCredential {
            account_name,
            account_key: account_key.into(),
            environment: ENVIRONMENT.to_owned(),
        }))
    }

    async fn open_store(&self, credential: &Credential) -> Result<Box<dyn ObjectStore>, StorageError> {
        let credential = self.credential(credential)?;
        let location = CloudLocation::Public {
            account: credential.account_name.clone(),
        };
        Ok(Box::new(AzureStore::new(location, credential)))
    }

    fn secret_data(
        &self,
        spec: &BucketSpec,
        credential: &Credential,
    ) -> Result<StorageSecret, StorageError> {
        let credential = self.credential(credential)?;
        Ok(StorageSecret::new()
            .with("environment", credential.environment.as_str())
            .with("container", spec.name.as_str())
            .with("account_name", credential.account_name.as_str())
            .with("account_key", credential.account_key.inner()))
    }
}

fn store_error(error: azure_core::Error) -> StoreError {
    match error.kind() {
        ErrorKind::HttpResponse {
            status: StatusCode::NotFound,
            ..
        } => StoreError::NotFound,
        _ => StoreError::request(error),
    }
}

struct AzureStore {
    service: BlobServiceClient,
}

impl AzureStore {
    fn new(location: CloudLocation, credential: &AzureCredential) -> Self {
        let credentials = StorageCredentials::access_key(
            credential.account_name.clone(),
            credential.account_key.inner().to_owned(),
        );
        let service = ClientBuilder::with_location(location, credentials).blob_service_client();
        Self { service }
    }

    fn container(&self, name: &str) -> ContainerClient {
        self.service.container_client(name)
    }
}

#[async_trait]
impl ObjectStore for AzureStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        self.container(bucket).exists().await.map_err(store_error)
    }

    async fn create_bucket(&self, bucket: &str) -> Result<Option<String>, StoreError> {
        self.container(bucket)
            .create()
            .await
            .map(|_| None)
            .map_err(store_error)
    }

    fn object_pages<'a>(
        &'a self,
        bucket: &'a str,
    ) -> BoxStream<'a, Result<Vec<String>, StoreError>> {
        let mut list = self.container(bucket).list_blobs();
        if let Some(page_size) = NonZeroU32::new(PAGE_SIZE) {
            list = list.max_results(MaxResults::new(page_size));
        }
        list.into_stream()
            .map_ok(|page| {
                page.blobs
                    .blobs()
                    .map(|blob| blob.name.clone())
                    .collect::<Vec<_>>()
            })
            .map_err(store_error)
            .boxed()
    }

    async fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> Result<(), StoreError> {
        // Blob storage has no multi-object delete outside batch requests.
        let container = self.container(bucket);
        for key in keys {
            match container.blob_client(key).delete().await {
                Ok(_) => {}
                Err(error) => match store_error(error) {
                    StoreError::NotFound => {}
                    error => return Err(error),
                },
            }
        }
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        self.container(bucket)
            .delete()
            .await
            .map(|_| ())
            .map_err(store_error)
    }
}
