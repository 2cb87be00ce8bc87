use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::{
    ByteString,
    api::{
        apps::v1::Deployment,
        core::v1::{Pod, Secret, Service},
        storage::v1::StorageClass,
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use kube::{
    Api, Client,
    api::{ApiResource, DeleteParams, DynamicObject, ListParams, PostParams},
    core::GroupVersionKind,
};
use snafu::ResultExt;

use super::{
    BuildClientSnafu, Cluster, ClusterError, DEFAULT_STORAGE_CLASS_ANNOTATION, Platform,
    PlatformStatus, RequestSnafu, SecretData, StorageClassInfo,
};

const INFRASTRUCTURE_NAME: &str = "cluster";

fn infrastructure_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        "config.openshift.io",
        "v1",
        "Infrastructure",
    ))
}

fn route_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("route.openshift.io", "v1", "Route"))
}

fn is_status(error: &kube::Error, code: u16) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == code)
}

/// [`Cluster`] backed by a live API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connects using the in-cluster environment or the local kubeconfig.
    pub async fn try_default() -> Result<Self, ClusterError> {
        let client = Client::try_default().await.context(BuildClientSnafu)?;
        Ok(Self::new(client))
    }
}

impl std::fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCluster").finish_non_exhaustive()
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn secret(&self, namespace: &str, name: &str) -> Result<Option<SecretData>, ClusterError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets.get_opt(name).await.context(RequestSnafu {
            verb: "get",
            kind: "secret",
            name: format!("{namespace}/{name}"),
        })?;

        Ok(secret.map(|secret| {
            secret
                .data
                .unwrap_or_default()
                .into_iter()
                .map(|(key, ByteString(value))| (key, value))
                .collect()
        }))
    }

    async fn deployment_env(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ClusterError> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deployment = deployments.get_opt(name).await.context(RequestSnafu {
            verb: "get",
            kind: "deployment",
            name: format!("{namespace}/{name}"),
        })?;

        Ok(deployment.map(|deployment| {
            deployment
                .spec
                .and_then(|spec| spec.template.spec)
                .map(|pod| pod.containers)
                .unwrap_or_default()
                .into_iter()
                .flat_map(|container| container.env.unwrap_or_default())
                .filter_map(|var| var.value.map(|value| (var.name, value)))
                .collect()
        }))
    }

    async fn platform(&self) -> Result<PlatformStatus, ClusterError> {
        let resource = infrastructure_resource();
        let infrastructures: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);
        let infrastructure = infrastructures
            .get_opt(INFRASTRUCTURE_NAME)
            .await
            .context(RequestSnafu {
                verb: "get",
                kind: "infrastructure",
                name: INFRASTRUCTURE_NAME,
            })?;

        let Some(infrastructure) = infrastructure else {
            return Ok(PlatformStatus {
                platform: Platform::Other("none".to_owned()),
                region: None,
            });
        };

        let status = &infrastructure.data;
        let platform = status
            .pointer("/status/platformStatus/type")
            .or_else(|| status.pointer("/status/platform"))
            .and_then(|value| value.as_str())
            .map(Platform::from_type)
            .unwrap_or_else(|| Platform::Other("none".to_owned()));
        let region = status
            .pointer("/status/platformStatus/aws/region")
            .and_then(|value| value.as_str())
            .map(str::to_owned);

        Ok(PlatformStatus { platform, region })
    }

    async fn route_host(&self, namespace: &str, name: &str) -> Result<Option<String>, ClusterError> {
        let resource = route_resource();
        let routes: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &resource);
        let route = routes.get_opt(name).await.context(RequestSnafu {
            verb: "get",
            kind: "route",
            name: format!("{namespace}/{name}"),
        })?;

        Ok(route.and_then(|route| {
            route
                .data
                .pointer("/spec/host")
                .and_then(|host| host.as_str())
                .filter(|host| !host.is_empty())
                .map(str::to_owned)
        }))
    }

    async fn storage_classes(&self) -> Result<Vec<StorageClassInfo>, ClusterError> {
        let classes: Api<StorageClass> = Api::all(self.client.clone());
        let list = classes
            .list(&ListParams::default())
            .await
            .context(RequestSnafu {
                verb: "list",
                kind: "storageclass",
                name: "*",
            })?;

        Ok(list
            .items
            .into_iter()
            .map(|class| StorageClassInfo {
                is_default: class
                    .metadata
                    .annotations
                    .as_ref()
                    .and_then(|annotations| annotations.get(DEFAULT_STORAGE_CLASS_ANNOTATION))
                    .is_some_and(|value| value == "true"),
                name: class.metadata.name.unwrap_or_default(),
            })
            .collect())
    }

    async fn service_exists(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let service = services.get_opt(name).await.context(RequestSnafu {
            verb: "get",
            kind: "service",
            name: format!("{namespace}/{name}"),
        })?;
        Ok(service.is_some())
    }

    async fn pod_phases(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<String>, ClusterError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods
            .list(&ListParams::default().labels(label_selector))
            .await
            .context(RequestSnafu {
                verb: "list",
                kind: "pod",
                name: format!("{namespace}/{label_selector}"),
            })?;

        Ok(list
            .items
            .into_iter()
            .map(|pod| {
                pod.status
                    .and_then(|status| status.phase)
                    .unwrap_or_default()
            })
            .collect())
    }

    async fn create_secret(
        &self,
        namespace: &str,
        name: &str,
        data: SecretData,
    ) -> Result<(), ClusterError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                namespace: Some(namespace.to_owned()),
                ..Default::default()
            },
            type_: Some("Opaque".to_owned()),
            data: Some(
                data.into_iter()
                    .map(|(key, value)| (key, ByteString(value)))
                    .collect(),
            ),
            ..Default::default()
        };

        match secrets.create(&PostParams::default(), &secret).await {
            Ok(_) => Ok(()),
            Err(error) if is_status(&error, 409) => Err(ClusterError::AlreadyExists {
                namespace: namespace.to_owned(),
                name: name.to_owned(),
            }),
            Err(source) => Err(ClusterError::Request {
                verb: "create",
                kind: "secret",
                name: format!("{namespace}/{name}"),
                source,
            }),
        }
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match secrets.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(error) if is_status(&error, 404) => Ok(false),
            Err(source) => Err(ClusterError::Request {
                verb: "delete",
                kind: "secret",
                name: format!("{namespace}/{name}"),
                source,
            }),
        }
    }
}
