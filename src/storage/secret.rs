use std::{collections::BTreeMap, fmt};

use super::{BucketSpec, StorageError, StorageType};
use crate::{
    context::OperationContext,
    internal_events::{StorageSecretCreated, StorageSecretDeleted},
    kubernetes::{Cluster, ClusterError, SecretData},
};

/// Key/value pairs of the secret Loki reads its object storage settings from.
///
/// Values are credentials, so `Debug` only shows the keys.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct StorageSecret {
    entries: BTreeMap<String, String>,
}

impl StorageSecret {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.entries.insert(key.to_owned(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn into_data(self) -> SecretData {
        self.entries
            .into_iter()
            .map(|(key, value)| (key, value.into_bytes()))
            .collect()
    }
}

impl fmt::Debug for StorageSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

/// Creates the storage secret of `spec`. An existing secret with the same name is an error.
pub async fn materialize(
    cluster: &dyn Cluster,
    spec: &BucketSpec,
    secret: StorageSecret,
    ctx: &OperationContext,
) -> Result<(), StorageError> {
    spec.validate()?;

    let backend = spec.storage_type;
    let resource = format!("secret {}/{}", spec.namespace, spec.secret_name);
    let created = ctx
        .run(cluster.create_secret(&spec.namespace, &spec.secret_name, secret.into_data()))
        .await
        .map_err(|interrupted| {
            StorageError::interrupted(interrupted, backend, "secret creation", resource.as_str())
        })?;

    match created {
        Ok(()) => {
            emit!(StorageSecretCreated {
                backend,
                namespace: &spec.namespace,
                name: &spec.secret_name,
            });
            Ok(())
        }
        Err(ClusterError::AlreadyExists { namespace, name }) => {
            Err(StorageError::SecretAlreadyExists {
                backend,
                namespace,
                name,
            })
        }
        Err(source) => Err(StorageError::Cluster {
            backend,
            resource,
            source,
        }),
    }
}

/// Deletes the storage secret of `spec`, returning whether it existed.
pub async fn remove(
    cluster: &dyn Cluster,
    spec: &BucketSpec,
    ctx: &OperationContext,
) -> Result<bool, StorageError> {
    let backend: StorageType = spec.storage_type;
    let resource = format!("secret {}/{}", spec.namespace, spec.secret_name);
    let existed = match ctx
        .run(cluster.delete_secret(&spec.namespace, &spec.secret_name))
        .await
    {
        Ok(Ok(existed)) => existed,
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
                "secret deletion",
                resource,
            ));
        }
    };

    emit!(StorageSecretDeleted {
        namespace: &spec.namespace,
        name: &spec.secret_name,
        existed,
    });
    Ok(existed)
}
