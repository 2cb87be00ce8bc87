//! Google Cloud Storage buckets, through the JSON API.

use std::path::PathBuf;

use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use http::{Method, Request, StatusCode, header::CONTENT_TYPE};
use hyper::Body;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;

use super::{
    BucketSpec, Credential, GcsCredential, ObjectStore, StorageBackend, StorageError,
    StorageSecret, StorageType, StoreError, optional_secret, secret_value, send_request,
};
use crate::{
    config::ProxyPolicy,
    context::OperationContext,
    gcp::{GcpAuthenticator, Scope},
    http::HttpClient,
    kubernetes::Cluster,
    tls::TlsConfig,
};

pub const BASE_URL: &str = "https://storage.googleapis.com";

/// `maxResults` of object listings.
pub const PAGE_SIZE: u32 = 1000;

const CREDENTIALS_NAMESPACE: &str = "kube-system";
const CREDENTIALS_SECRET: &str = "gcp-credentials";
const CREDENTIALS_KEY: &str = "service_account.json";
const CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

// Everything but RFC 3986 unreserved characters, so object names keep their slashes escaped.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn encode(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

#[derive(Clone, Debug)]
pub struct GcsBackend {
    base_url: String,
    credentials_file: Option<PathBuf>,
    tls: TlsConfig,
    proxy: ProxyPolicy,
}

impl GcsBackend {
    pub fn new(base_url: Option<String>, tls: TlsConfig, proxy: ProxyPolicy) -> Self {
        Self {
            base_url: base_url
                .unwrap_or_else(|| BASE_URL.to_owned())
                .trim_end_matches('/')
                .to_owned(),
            credentials_file: None,
            tls,
            proxy,
        }
    }

    /// Key file used when the cluster holds no GCP credentials secret. Defaults to the file named
    /// by `GOOGLE_APPLICATION_CREDENTIALS`.
    #[must_use]
    pub fn with_credentials_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_file = Some(path.into());
        self
    }

    fn credential<'a>(&self, credential: &'a Credential) -> Result<&'a GcsCredential, StorageError> {
        match credential {
            Credential::Gcs(credential) => Ok(credential),
            other => Err(other.mismatch(StorageType::Gcs)),
        }
    }

    async fn key_from_file(&self) -> Result<(String, String), StorageError> {
        let backend = StorageType::Gcs;
        let path = match &self.credentials_file {
            Some(path) => path.clone(),
            None => std::env::var_os(CREDENTIALS_ENV)
                .filter(|path| !path.is_empty())
                .map(PathBuf::from)
                .ok_or_else(|| StorageError::CredentialUnavailable {
                    backend,
                    reason: format!(
                        "secret {CREDENTIALS_NAMESPACE}/{CREDENTIALS_SECRET} not found and {CREDENTIALS_ENV} is not set"
                    ),
                })?,
        };

        let key = tokio::fs::read_to_string(&path).await.map_err(|error| {
            StorageError::CredentialUnavailable {
                backend,
                reason: format!("cannot read {}: {}", path.display(), error),
            }
        })?;
        Ok((path.display().to_string(), key))
    }
}

fn project_id(resource: &str, key_json: &str) -> Result<String, StorageError> {
    let malformed = |reason: String| StorageError::CredentialMalformed {
        backend: StorageType::Gcs,
        resource: resource.to_owned(),
        reason,
    };
    let key: serde_json::Value =
        serde_json::from_str(key_json).map_err(|error| malformed(error.to_string()))?;
    key.get("project_id")
        .and_then(serde_json::Value::as_str)
        .filter(|project| !project.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| malformed("no project_id in service account key".to_owned()))
}

#[async_trait]
impl StorageBackend for GcsBackend {
    fn storage_type(&self) -> StorageType {
        StorageType::Gcs
    }

    async fn resolve_credential(
        &self,
        cluster: &dyn Cluster,
        ctx: &OperationContext,
    ) -> Result<Credential, StorageError> {
        let backend = StorageType::Gcs;
        let (resource, key_json) = match optional_secret(
            backend,
            cluster,
            CREDENTIALS_NAMESPACE,
            CREDENTIALS_SECRET,
            ctx,
        )
        .await?
        {
            Some(data) => {
                let resource = format!("{CREDENTIALS_NAMESPACE}/{CREDENTIALS_SECRET}");
                let key = secret_value(backend, &data, &resource, CREDENTIALS_KEY)?;
                (resource, key)
            }
            None => self.key_from_file().await?,
        };

        let project_id = project_id(&resource, &key_json)?;
        Ok(Credential::Gcs(GcsCredential {
            key_json: key_json.into(),
            project_id,
        }))
    }

    async fn open_store(&self, credential: &Credential) -> Result<Box<dyn ObjectStore>, StorageError> {
        let credential = self.credential(credential)?;
        let connect = |source: crate::Error| StorageError::Connect {
            backend: StorageType::Gcs,
            endpoint: self.base_url.clone(),
            source,
        };

        let client = HttpClient::new(&self.tls, &self.proxy).map_err(|error| connect(error.into()))?;
        let auth = GcpAuthenticator::from_json(credential.key_json.inner(), Scope::DevStorageReadWrite)
            .await
            .map_err(|error| connect(error.into()))?;

        Ok(Box::new(GcsStore {
            client,
            auth,
            base_url: self.base_url.clone(),
            project_id: credential.project_id.clone(),
        }))
    }

    fn secret_data(
        &self,
        spec: &BucketSpec,
        credential: &Credential,
    ) -> Result<StorageSecret, StorageError> {
        let credential = self.credential(credential)?;
        Ok(StorageSecret::new()
            .with("bucketname", spec.name.as_str())
            .with("key.json", credential.key_json.inner()))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectItem {
    name: String,
}

struct GcsStore {
    client: HttpClient,
    auth: GcpAuthenticator,
    base_url: String,
    project_id: String,
}

impl GcsStore {
    fn bucket_url(&self, bucket: &str) -> String {
        format!("{}/storage/v1/b/{}", self.base_url, encode(bucket))
    }

    async fn call(
        &self,
        method: Method,
        uri: String,
        body: Option<serde_json::Value>,
    ) -> Result<http::Response<bytes::Bytes>, StoreError> {
        let builder = Request::builder().method(method).uri(uri);
        let mut request = match body {
            Some(body) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .map_err(StoreError::request)?;
        self.auth
            .refresh_if_expired()
            .await
            .map_err(StoreError::request)?;
        self.auth.apply(&mut request);

        send_request(&self.client, request).await
    }

    async fn list_page(
        &self,
        bucket: &str,
        page_token: Option<String>,
    ) -> Result<ObjectList, StoreError> {
        let mut uri = format!("{}/o?maxResults={PAGE_SIZE}", self.bucket_url(bucket));
        if let Some(token) = page_token {
            uri.push_str("&pageToken=");
            uri.push_str(&encode(&token));
        }

        let response = self.call(Method::GET, uri, None).await?;
        match response.status() {
            status if status.is_success() => {
                serde_json::from_slice(response.body()).map_err(StoreError::request)
            }
            StatusCode::NOT_FOUND => Err(StoreError::NotFound),
            _ => Err(StoreError::unexpected(&response)),
        }
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        let response = self.call(Method::GET, self.bucket_url(bucket), None).await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(StoreError::unexpected(&response)),
        }
    }

    async fn create_bucket(&self, bucket: &str) -> Result<Option<String>, StoreError> {
        let uri = format!(
            "{}/storage/v1/b?project={}",
            self.base_url,
            encode(&self.project_id)
        );
        let response = self
            .call(Method::POST, uri, Some(serde_json::json!({ "name": bucket })))
            .await?;
        match response.status() {
            // 409 is also returned when the bucket is owned by someone else, which the existence
            // check before creation rules out.
            status if status.is_success() || status == StatusCode::CONFLICT => Ok(None),
            _ => Err(StoreError::unexpected(&response)),
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
            let page = self.list_page(bucket, token).await?;
            let names = page.items.into_iter().map(|item| item.name).collect();
            Ok(Some((names, page.next_page_token.map(Some))))
        })
        .boxed()
    }

    async fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> Result<(), StoreError> {
        for key in keys {
            let uri = format!("{}/o/{}", self.bucket_url(bucket), encode(&key));
            let response = self.call(Method::DELETE, uri, None).await?;
            match response.status() {
                status if status.is_success() || status == StatusCode::NOT_FOUND => {}
                _ => return Err(StoreError::unexpected(&response)),
            }
        }
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let response = self
            .call(Method::DELETE, self.bucket_url(bucket), None)
            .await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound),
            _ => Err(StoreError::unexpected(&response)),
        }
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_json, method, path, path_regex, query_param, query_param_is_missing},
    };

    use super::*;
    use crate::{
        kubernetes::{Platform, fake::FakeCluster},
        storage::lifecycle,
    };

    const KEY: &str = r#"{"type": "service_account", "project_id": "openshift-qe", "client_email": "loki@openshift-qe.iam.gserviceaccount.com"}"#;

    fn backend() -> GcsBackend {
        GcsBackend::new(None, TlsConfig::default(), ProxyPolicy::disabled())
    }

    fn store(server: &MockServer) -> GcsStore {
        GcsStore {
            client: HttpClient::new(&TlsConfig::default(), &ProxyPolicy::disabled()).unwrap(),
            auth: GcpAuthenticator::None,
            base_url: server.uri(),
            project_id: "openshift-qe".into(),
        }
    }

    #[test]
    fn object_names_are_escaped() {
        assert_eq!(encode("chunks/fake/01.gz"), "chunks%2Ffake%2F01.gz");
        assert_eq!(encode("index_19500"), "index_19500");
    }

    #[tokio::test]
    async fn prefers_cluster_secret() {
        let cluster = FakeCluster::new(Platform::Gcp, None).with_secret(
            CREDENTIALS_NAMESPACE,
            CREDENTIALS_SECRET,
            [(CREDENTIALS_KEY, KEY)],
        );
        let backend = backend();
        let credential = backend
            .resolve_credential(&cluster, &OperationContext::new())
            .await
            .unwrap();
        let spec = BucketSpec::new("logs-gcs", StorageType::Gcs, "gcs-secret", "loki");

        let secret = backend.secret_data(&spec, &credential).unwrap();

        similar_asserts::assert_eq!(
            secret.keys().collect::<Vec<_>>(),
            vec!["bucketname", "key.json"]
        );
        assert_eq!(secret.get("key.json"), Some(KEY));
        assert!(matches!(credential, Credential::Gcs(GcsCredential { ref project_id, .. }) if project_id == "openshift-qe"));
    }

    #[tokio::test]
    async fn falls_back_to_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = crate::test_util::temp_file(dir.path(), "key.json", KEY);
        let cluster = FakeCluster::new(Platform::Gcp, None);

        let credential = backend()
            .with_credentials_file(file)
            .resolve_credential(&cluster, &OperationContext::new())
            .await
            .unwrap();

        let Credential::Gcs(gcs) = credential else {
            panic!("expected GCS credentials");
        };
        assert_eq!(gcs.project_id, "openshift-qe");
        assert_eq!(gcs.key_json.inner(), KEY);
    }

    #[tokio::test]
    #[serial]
    async fn falls_back_to_application_credentials_env() {
        let dir = tempfile::tempdir().unwrap();
        let file = crate::test_util::temp_file(dir.path(), "application.json", KEY);
        let cluster = FakeCluster::new(Platform::Gcp, None);

        // SAFETY: serialized with every other test touching the variable.
        unsafe { std::env::set_var(CREDENTIALS_ENV, &file) };
        let resolved = backend()
            .resolve_credential(&cluster, &OperationContext::new())
            .await;
        unsafe { std::env::remove_var(CREDENTIALS_ENV) };

        assert!(matches!(resolved, Ok(Credential::Gcs(_))));
    }

    #[tokio::test]
    #[serial]
    async fn no_secret_and_no_env_is_unavailable() {
        // SAFETY: serialized with every other test touching the variable.
        unsafe { std::env::remove_var(CREDENTIALS_ENV) };
        let cluster = FakeCluster::new(Platform::Gcp, None);

        let error = backend()
            .resolve_credential(&cluster, &OperationContext::new())
            .await
            .unwrap_err();

        assert!(error.is_unavailable());
        assert!(error.to_string().contains(CREDENTIALS_ENV), "{error}");
    }

    #[tokio::test]
    async fn key_without_project_is_malformed() {
        let cluster = FakeCluster::new(Platform::Gcp, None).with_secret(
            CREDENTIALS_NAMESPACE,
            CREDENTIALS_SECRET,
            [(CREDENTIALS_KEY, r#"{"type": "service_account"}"#)],
        );
        let error = backend()
            .resolve_credential(&cluster, &OperationContext::new())
            .await
            .unwrap_err();
        assert!(matches!(error, StorageError::CredentialMalformed { .. }));
    }

    #[tokio::test]
    async fn creates_missing_bucket_in_project() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/logs-gcs"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/b"))
            .and(query_param("project", "openshift-qe"))
            .and(body_json(serde_json::json!({ "name": "logs-gcs" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "name": "logs-gcs" })))
            .expect(1)
            .mount(&server)
            .await;

        let store = store(&server);
        lifecycle::ensure_bucket(StorageType::Gcs, &store, "logs-gcs", &OperationContext::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn empties_bucket_across_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/logs-gcs/o"))
            .and(query_param("maxResults", "1000"))
            .and(query_param_is_missing("pageToken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{ "name": "index/a" }, { "name": "index/b" }],
                "nextPageToken": "page-2",
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/logs-gcs/o"))
            .and(query_param("pageToken", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{ "name": "chunks/c" }],
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path_regex(r"^/storage/v1/b/logs-gcs/o/.+$"))
            .respond_with(ResponseTemplate::new(204))
            .expect(3)
            .mount(&server)
            .await;

        let store = store(&server);
        let deleted =
            lifecycle::empty_bucket(StorageType::Gcs, &store, "logs-gcs", &OperationContext::new())
                .await
                .unwrap();

        assert_eq!(deleted, 3);
    }

    #[tokio::test]
    async fn deleting_missing_bucket_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/gone/o"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/storage/v1/b/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = store(&server);
        lifecycle::delete_bucket(StorageType::Gcs, &store, "gone", &OperationContext::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unexpected_status_names_bucket() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/locked"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let store = store(&server);
        let error =
            lifecycle::ensure_bucket(StorageType::Gcs, &store, "locked", &OperationContext::new())
                .await
                .unwrap_err();

        assert!(error.to_string().contains("\"locked\""), "{error}");
        assert!(error.to_string().contains("403"), "{error}");
    }
}
