use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Mutex,
};

use async_trait::async_trait;

use super::{Cluster, ClusterError, Platform, PlatformStatus, SecretData, StorageClassInfo};

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_owned(), name.to_owned())
}

#[derive(Debug, Default)]
struct State {
    secrets: BTreeMap<Key, SecretData>,
    deployments: BTreeMap<Key, BTreeMap<String, String>>,
    routes: BTreeMap<Key, String>,
    services: BTreeSet<Key>,
    pods: BTreeMap<String, Vec<(String, String)>>,
    storage_classes: Vec<StorageClassInfo>,
    /// Every mutating call, in order, e.g. `delete_secret ns/name`.
    calls: Vec<String>,
}

/// In-memory cluster for provisioning tests.
#[derive(Debug)]
pub struct FakeCluster {
    platform: PlatformStatus,
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new(platform: Platform, region: Option<&str>) -> Self {
        Self {
            platform: PlatformStatus {
                platform,
                region: region.map(str::to_owned),
            },
            state: Mutex::default(),
        }
    }

    pub fn with_secret<'a>(
        self,
        namespace: &str,
        name: &str,
        data: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        self.state
            .lock()
            .unwrap()
            .secrets
            .insert(key(namespace, name), crate::test_util::secret_data(data));
        self
    }

    pub fn with_deployment_env<'a>(
        self,
        namespace: &str,
        name: &str,
        env: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let env = env
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        self.state
            .lock()
            .unwrap()
            .deployments
            .insert(key(namespace, name), env);
        self
    }

    pub fn with_route(self, namespace: &str, name: &str, host: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .routes
            .insert(key(namespace, name), host.to_owned());
        self
    }

    pub fn with_service(self, namespace: &str, name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .services
            .insert(key(namespace, name));
        self
    }

    pub fn with_pod(self, namespace: &str, labels: &str, phase: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .pods
            .entry(namespace.to_owned())
            .or_default()
            .push((labels.to_owned(), phase.to_owned()));
        self
    }

    pub fn with_storage_class(self, name: &str, is_default: bool) -> Self {
        self.state
            .lock()
            .unwrap()
            .storage_classes
            .push(StorageClassInfo {
                name: name.to_owned(),
                is_default,
            });
        self
    }

    pub fn stored_secret(&self, namespace: &str, name: &str) -> Option<SecretData> {
        self.state
            .lock()
            .unwrap()
            .secrets
            .get(&key(namespace, name))
            .cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn secret(&self, namespace: &str, name: &str) -> Result<Option<SecretData>, ClusterError> {
        Ok(self.stored_secret(namespace, name))
    }

    async fn deployment_env(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ClusterError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .deployments
            .get(&key(namespace, name))
            .cloned())
    }

    async fn platform(&self) -> Result<PlatformStatus, ClusterError> {
        Ok(self.platform.clone())
    }

    async fn route_host(&self, namespace: &str, name: &str) -> Result<Option<String>, ClusterError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .routes
            .get(&key(namespace, name))
            .cloned())
    }

    async fn storage_classes(&self) -> Result<Vec<StorageClassInfo>, ClusterError> {
        Ok(self.state.lock().unwrap().storage_classes.clone())
    }

    async fn service_exists(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .services
            .contains(&key(namespace, name)))
    }

    async fn pod_phases(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<String>, ClusterError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .pods
            .get(namespace)
            .map(|pods| {
                pods.iter()
                    .filter(|(labels, _)| labels == label_selector)
                    .map(|(_, phase)| phase.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_secret(
        &self,
        namespace: &str,
        name: &str,
        data: SecretData,
    ) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create_secret {namespace}/{name}"));
        if state.secrets.contains_key(&key(namespace, name)) {
            return Err(ClusterError::AlreadyExists {
                namespace: namespace.to_owned(),
                name: name.to_owned(),
            });
        }
        state.secrets.insert(key(namespace, name), data);
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete_secret {namespace}/{name}"));
        Ok(state.secrets.remove(&key(namespace, name)).is_some())
    }
}
