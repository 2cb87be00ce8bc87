//! OpenStack Swift containers, authenticated through Keystone v3.

use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use http::{HeaderValue, Method, Request, StatusCode, header::CONTENT_TYPE};
use hyper::Body;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::Deserialize;
use serde_json::json;

use super::{
    BucketSpec, Credential, ObjectStore, StorageBackend, StorageError, StorageSecret, StorageType,
    StoreError, SwiftCredential, required_secret, secret_value, send_request,
};
use crate::{
    config::ProxyPolicy, context::OperationContext, http::HttpClient, kubernetes::Cluster,
    tls::TlsConfig,
};

/// Objects per container listing page.
pub const PAGE_SIZE: usize = 1000;

const CREDENTIALS_NAMESPACE: &str = "kube-system";
const CREDENTIALS_SECRET: &str = "openstack-credentials";
const CREDENTIALS_KEY: &str = "clouds.yaml";
const AUTH_TOKEN: &str = "x-auth-token";
const SUBJECT_TOKEN: &str = "x-subject-token";

const PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');
const QUERY: &AsciiSet = &PATH.add(b'&').add(b'=').add(b'+').add(b'/');

#[derive(Debug, Deserialize)]
struct CloudsYaml {
    clouds: Clouds,
}

#[derive(Debug, Deserialize)]
struct Clouds {
    openstack: Cloud,
}

#[derive(Debug, Deserialize)]
struct Cloud {
    auth: CloudAuth,
    #[serde(default)]
    region_name: Option<String>,
    #[serde(default, alias = "endpoint_type")]
    interface: Option<String>,
    #[serde(default)]
    verify: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct CloudAuth {
    auth_url: String,
    username: String,
    password: String,
    #[serde(default)]
    project_id: String,
    #[serde(default)]
    project_name: String,
    #[serde(default)]
    user_domain_name: String,
}

impl Cloud {
    /// Catalog interface to pick endpoints from. `publicURL` style values are accepted.
    fn interface(&self) -> &str {
        self.interface
            .as_deref()
            .map(|interface| interface.trim_end_matches("URL"))
            .filter(|interface| !interface.is_empty())
            .unwrap_or("public")
    }

    fn region(&self) -> Option<&str> {
        self.region_name
            .as_deref()
            .filter(|region| !region.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    user: TokenUser,
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Deserialize)]
struct CatalogEndpoint {
    interface: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    region_id: Option<String>,
    url: String,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    user: UserBody,
}

#[derive(Debug, Deserialize)]
struct UserBody {
    domain_id: String,
}

/// Keystone v3 base URL for a configured `auth_url`, which may or may not carry the version.
fn identity_url(auth_url: &str) -> String {
    let base = auth_url.trim().trim_end_matches('/');
    if base.ends_with("/v3") {
        base.to_owned()
    } else {
        format!("{base}/v3")
    }
}

fn object_store_endpoint(
    catalog: &[CatalogEntry],
    interface: &str,
    region: Option<&str>,
) -> Option<String> {
    catalog
        .iter()
        .filter(|entry| entry.kind == "object-store")
        .flat_map(|entry| &entry.endpoints)
        .find(|endpoint| {
            endpoint.interface == interface
                && region.is_none_or(|region| {
                    endpoint.region.as_deref() == Some(region)
                        || endpoint.region_id.as_deref() == Some(region)
                })
        })
        .map(|endpoint| endpoint.url.trim_end_matches('/').to_owned())
}

#[derive(Clone, Debug)]
pub struct SwiftBackend {
    tls: TlsConfig,
    proxy: ProxyPolicy,
}

impl SwiftBackend {
    pub fn new(tls: TlsConfig, proxy: ProxyPolicy) -> Self {
        Self { tls, proxy }
    }

    fn credential<'a>(
        &self,
        credential: &'a Credential,
    ) -> Result<&'a SwiftCredential, StorageError> {
        match credential {
            Credential::Swift(credential) => Ok(credential),
            other => Err(other.mismatch(StorageType::Swift)),
        }
    }

    fn client(&self, insecure: bool, endpoint: &str) -> Result<HttpClient, StorageError> {
        let tls = if insecure {
            TlsConfig::insecure()
        } else {
            self.tls.clone()
        };
        HttpClient::new(&tls, &self.proxy).map_err(|error| StorageError::Connect {
            backend: StorageType::Swift,
            endpoint: endpoint.to_owned(),
            source: Box::new(error),
        })
    }

    /// Password authentication scoped to the configured project. Returns the token and its body.
    async fn issue_token(
        &self,
        client: &HttpClient,
        cloud: &Cloud,
    ) -> Result<(String, TokenBody), StoreError> {
        let auth = &cloud.auth;
        let project = if auth.project_id.is_empty() {
            json!({ "name": auth.project_name, "domain": { "name": auth.user_domain_name } })
        } else {
            json!({ "id": auth.project_id })
        };
        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": auth.username,
                            "domain": { "name": auth.user_domain_name },
                            "password": auth.password,
                        }
                    }
                },
                "scope": { "project": project },
            }
        });

        let request = Request::post(format!("{}/auth/tokens", identity_url(&auth.auth_url)))
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .map_err(StoreError::request)?;
        let response = send_request(client, request).await?;
        if !response.status().is_success() {
            return Err(StoreError::unexpected(&response));
        }

        let token = response
            .headers()
            .get(SUBJECT_TOKEN)
            .and_then(|token| token.to_str().ok())
            .ok_or_else(|| StoreError::request("Keystone response carries no X-Subject-Token"))?
            .to_owned();
        let body: TokenResponse =
            serde_json::from_slice(response.body()).map_err(StoreError::request)?;
        Ok((token, body.token))
    }

    async fn user_domain_id(
        &self,
        client: &HttpClient,
        cloud: &Cloud,
        token: &str,
        user_id: &str,
    ) -> Result<String, StoreError> {
        let uri = format!(
            "{}/users/{}",
            identity_url(&cloud.auth.auth_url),
            utf8_percent_encode(user_id, QUERY)
        );
        let request = Request::get(uri)
            .header(AUTH_TOKEN, token)
            .body(Body::empty())
            .map_err(StoreError::request)?;
        let response = send_request(client, request).await?;
        if !response.status().is_success() {
            return Err(StoreError::unexpected(&response));
        }
        let body: UserResponse =
            serde_json::from_slice(response.body()).map_err(StoreError::request)?;
        Ok(body.user.domain_id)
    }

    async fn authenticate(
        &self,
        cloud: Cloud,
        ctx: &OperationContext,
    ) -> Result<SwiftCredential, StorageError> {
        let backend = StorageType::Swift;
        let insecure = cloud.verify == Some(false);
        let identity = identity_url(&cloud.auth.auth_url);
        let client = self.client(insecure, &identity)?;
        let connect = |error: StoreError| StorageError::Connect {
            backend,
            endpoint: identity.clone(),
            source: Box::new(error),
        };
        let interrupted = |interrupted| {
            StorageError::interrupted(interrupted, backend, "authentication", identity.as_str())
        };

        let (token, body) = ctx
            .run(self.issue_token(&client, &cloud))
            .await
            .map_err(interrupted)?
            .map_err(connect)?;
        let storage_url = object_store_endpoint(&body.catalog, cloud.interface(), cloud.region())
            .ok_or_else(|| StorageError::CredentialUnavailable {
                backend,
                reason: format!(
                    "no {} object-store endpoint{} in the Keystone catalog",
                    cloud.interface(),
                    cloud
                        .region()
                        .map(|region| format!(" for region {region}"))
                        .unwrap_or_default(),
                ),
            })?;
        let domain_id = ctx
            .run(self.user_domain_id(&client, &cloud, &token, &body.user.id))
            .await
            .map_err(interrupted)?
            .map_err(connect)?;

        debug!(
            message = "Authenticated against Keystone.",
            auth_url = %cloud.auth.auth_url,
            user_id = %body.user.id,
            %storage_url,
        );

        let region = cloud.region().map(str::to_owned);
        let auth = cloud.auth;
        Ok(SwiftCredential {
            auth_url: auth.auth_url,
            username: auth.username,
            password: auth.password.into(),
            user_id: body.user.id,
            user_domain_id: domain_id.clone(),
            domain_id: domain_id.clone(),
            project_domain_id: domain_id,
            domain_name: auth.user_domain_name.clone(),
            project_domain_name: auth.user_domain_name.clone(),
            user_domain_name: auth.user_domain_name,
            project_id: auth.project_id,
            project_name: auth.project_name,
            region,
            storage_url,
            token: token.into(),
            insecure,
        })
    }
}

#[async_trait]
impl StorageBackend for SwiftBackend {
    fn storage_type(&self) -> StorageType {
        StorageType::Swift
    }

    async fn resolve_credential(
        &self,
        cluster: &dyn Cluster,
        ctx: &OperationContext,
    ) -> Result<Credential, StorageError> {
        let backend = StorageType::Swift;
        let resource = format!("{CREDENTIALS_NAMESPACE}/{CREDENTIALS_SECRET}");
        let data = required_secret(
            backend,
            cluster,
            CREDENTIALS_NAMESPACE,
            CREDENTIALS_SECRET,
            ctx,
        )
        .await?;
        let clouds = secret_value(backend, &data, &resource, CREDENTIALS_KEY)?;
        let clouds: CloudsYaml =
            serde_yaml::from_str(&clouds).map_err(|error| StorageError::CredentialMalformed {
                backend,
                resource: resource.clone(),
                reason: format!("invalid {CREDENTIALS_KEY}: {error}"),
            })?;

        self.authenticate(clouds.clouds.openstack, ctx)
            .await
            .map(Credential::Swift)
    }

    async fn open_store(&self, credential: &Credential) -> Result<Box<dyn ObjectStore>, StorageError> {
        let credential = self.credential(credential)?;
        let client = self.client(credential.insecure, &credential.storage_url)?;
        let token = HeaderValue::from_str(credential.token.inner()).map_err(|error| {
            StorageError::CredentialMalformed {
                backend: StorageType::Swift,
                resource: "Keystone token".to_owned(),
                reason: error.to_string(),
            }
        })?;

        Ok(Box::new(SwiftStore {
            client,
            storage_url: credential.storage_url.clone(),
            token,
            page_size: PAGE_SIZE,
        }))
    }

    fn secret_data(
        &self,
        spec: &BucketSpec,
        credential: &Credential,
    ) -> Result<StorageSecret, StorageError> {
        let c = self.credential(credential)?;
        Ok(StorageSecret::new()
            .with("auth_url", c.auth_url.as_str())
            .with("username", c.username.as_str())
            .with("user_domain_name", c.user_domain_name.as_str())
            .with("user_domain_id", c.user_domain_id.as_str())
            .with("user_id", c.user_id.as_str())
            .with("password", c.password.inner())
            .with("domain_id", c.domain_id.as_str())
            .with("domain_name", c.domain_name.as_str())
            .with("container_name", spec.name.as_str())
            .with("project_id", c.project_id.as_str())
            .with("project_name", c.project_name.as_str())
            .with("project_domain_id", c.project_domain_id.as_str())
            .with("project_domain_name", c.project_domain_name.as_str()))
    }
}

#[derive(Debug, Deserialize)]
struct ObjectEntry {
    name: String,
}

struct SwiftStore {
    client: HttpClient,
    storage_url: String,
    token: HeaderValue,
    page_size: usize,
}

impl SwiftStore {
    fn container_url(&self, container: &str) -> String {
        format!(
            "{}/{}",
            self.storage_url,
            utf8_percent_encode(container, QUERY)
        )
    }

    async fn call(&self, method: Method, uri: String) -> Result<http::Response<bytes::Bytes>, StoreError> {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(AUTH_TOKEN, self.token.clone())
            .body(Body::empty())
            .map_err(StoreError::request)?;
        send_request(&self.client, request).await
    }

    async fn list_page(&self, container: &str, marker: Option<&str>) -> Result<Vec<String>, StoreError> {
        let mut uri = format!(
            "{}?format=json&limit={}",
            self.container_url(container),
            self.page_size
        );
        if let Some(marker) = marker {
            uri.push_str("&marker=");
            uri.extend(utf8_percent_encode(marker, QUERY));
        }

        let response = self.call(Method::GET, uri).await?;
        match response.status() {
            StatusCode::NO_CONTENT => Ok(Vec::new()),
            status if status.is_success() => {
                let entries: Vec<ObjectEntry> =
                    serde_json::from_slice(response.body()).map_err(StoreError::request)?;
                Ok(entries.into_iter().map(|entry| entry.name).collect())
            }
            StatusCode::NOT_FOUND => Err(StoreError::NotFound),
            _ => Err(StoreError::unexpected(&response)),
        }
    }
}

#[async_trait]
impl ObjectStore for SwiftStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        let response = self.call(Method::HEAD, self.container_url(bucket)).await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(StoreError::unexpected(&response)),
        }
    }

    async fn create_bucket(&self, bucket: &str) -> Result<Option<String>, StoreError> {
        let response = self.call(Method::PUT, self.container_url(bucket)).await?;
        if response.status().is_success() {
            Ok(None)
        } else {
            Err(StoreError::unexpected(&response))
        }
    }

    fn object_pages<'a>(
        &'a self,
        bucket: &'a str,
    ) -> BoxStream<'a, Result<Vec<String>, StoreError>> {
        // Swift pages by marker: the next page starts after the last name of a full page.
        futures::stream::try_unfold(Some(None), move |marker: Option<Option<String>>| async move {
            let Some(marker) = marker else {
                return Ok(None);
            };
            let names = self.list_page(bucket, marker.as_deref()).await?;
            let next = if names.len() >= self.page_size {
                names.last().cloned().map(Some)
            } else {
                None
            };
            Ok(Some((names, next)))
        })
        .boxed()
    }

    async fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> Result<(), StoreError> {
        for key in keys {
            let uri = format!(
                "{}/{}",
                self.container_url(bucket),
                utf8_percent_encode(&key, PATH)
            );
            let response = self.call(Method::DELETE, uri).await?;
            match response.status() {
                status if status.is_success() || status == StatusCode::NOT_FOUND => {}
                _ => return Err(StoreError::unexpected(&response)),
            }
        }
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let response = self.call(Method::DELETE, self.container_url(bucket)).await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound),
            _ => Err(StoreError::unexpected(&response)),
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, header, method, path, query_param, query_param_is_missing},
    };

    use super::*;
    use crate::{
        kubernetes::{Platform, fake::FakeCluster},
        storage::lifecycle,
    };

    fn clouds_yaml(auth_url: &str) -> String {
        format!(
            r#"
clouds:
  openstack:
    auth:
      auth_url: {auth_url}
      username: "loki"
      password: "s3cret"
      project_id: "4f1d"
      project_name: "logging"
      user_domain_name: "Default"
    region_name: "regionOne"
    interface: "public"
    identity_api_version: 3
"#
        )
    }

    fn backend() -> SwiftBackend {
        SwiftBackend::new(TlsConfig::default(), ProxyPolicy::disabled())
    }

    async fn keystone(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/v3/auth/tokens"))
            .and(body_partial_json(json!({
                "auth": { "scope": { "project": { "id": "4f1d" } } }
            })))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("X-Subject-Token", "gAAAAAB-token")
                    .set_body_json(json!({
                        "token": {
                            "user": { "id": "u-42", "name": "loki" },
                            "catalog": [
                                {
                                    "type": "identity",
                                    "endpoints": [
                                        { "interface": "public", "region": "regionOne", "url": "http://keystone.invalid/v3" }
                                    ]
                                },
                                {
                                    "type": "object-store",
                                    "endpoints": [
                                        { "interface": "internal", "region": "regionOne", "url": "http://swift.internal/v1/AUTH_4f1d" },
                                        { "interface": "public", "region": "regionTwo", "url": "http://swift.two/v1/AUTH_4f1d" },
                                        { "interface": "public", "region": "regionOne", "url": format!("{}/v1/AUTH_4f1d/", server.uri()) }
                                    ]
                                }
                            ]
                        }
                    })),
            )
            .expect(1)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v3/users/u-42"))
            .and(header("x-auth-token", "gAAAAAB-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "user": { "id": "u-42", "domain_id": "default-domain" }
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    fn store(server: &MockServer, page_size: usize) -> SwiftStore {
        SwiftStore {
            client: HttpClient::new(&TlsConfig::default(), &ProxyPolicy::disabled()).unwrap(),
            storage_url: format!("{}/v1/AUTH_4f1d", server.uri()),
            token: HeaderValue::from_static("gAAAAAB-token"),
            page_size,
        }
    }

    #[test]
    fn identity_url_appends_version_once() {
        assert_eq!(identity_url("https://keystone:13000"), "https://keystone:13000/v3");
        assert_eq!(identity_url("https://keystone:13000/v3/"), "https://keystone:13000/v3");
    }

    #[test]
    fn endpoint_type_is_accepted_as_interface() {
        let cloud: Cloud = serde_yaml::from_str(
            r#"
auth: { auth_url: "http://k", username: "u", password: "p" }
endpoint_type: "internalURL"
"#,
        )
        .unwrap();
        assert_eq!(cloud.interface(), "internal");
        assert_eq!(cloud.region(), None);
    }

    #[tokio::test]
    async fn resolves_through_keystone() {
        let server = MockServer::start().await;
        keystone(&server).await;
        let cluster = FakeCluster::new(Platform::OpenStack, None).with_secret(
            CREDENTIALS_NAMESPACE,
            CREDENTIALS_SECRET,
            [(CREDENTIALS_KEY, clouds_yaml(&server.uri()).as_str())],
        );
        let backend = backend();

        let credential = backend
            .resolve_credential(&cluster, &OperationContext::new())
            .await
            .unwrap();
        let spec = BucketSpec::new("logs-swift", StorageType::Swift, "swift-secret", "loki");
        let secret = backend.secret_data(&spec, &credential).unwrap();

        let Credential::Swift(swift) = &credential else {
            panic!("expected Swift credentials");
        };
        assert_eq!(swift.storage_url, format!("{}/v1/AUTH_4f1d", server.uri()));
        assert_eq!(swift.token.inner(), "gAAAAAB-token");
        similar_asserts::assert_eq!(
            secret.keys().collect::<Vec<_>>(),
            vec![
                "auth_url",
                "container_name",
                "domain_id",
                "domain_name",
                "password",
                "project_domain_id",
                "project_domain_name",
                "project_id",
                "project_name",
                "user_domain_id",
                "user_domain_name",
                "user_id",
                "username",
            ]
        );
        assert_eq!(secret.get("user_id"), Some("u-42"));
        for key in ["user_domain_id", "domain_id", "project_domain_id"] {
            assert_eq!(secret.get(key), Some("default-domain"), "{key}");
        }
        for key in ["user_domain_name", "domain_name", "project_domain_name"] {
            assert_eq!(secret.get(key), Some("Default"), "{key}");
        }
        assert_eq!(secret.get("container_name"), Some("logs-swift"));
    }

    #[tokio::test]
    async fn rejected_password_fails_authentication() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/auth/tokens"))
            .respond_with(ResponseTemplate::new(401).set_body_string("The request you have made requires authentication."))
            .mount(&server)
            .await;
        let cluster = FakeCluster::new(Platform::OpenStack, None).with_secret(
            CREDENTIALS_NAMESPACE,
            CREDENTIALS_SECRET,
            [(CREDENTIALS_KEY, clouds_yaml(&server.uri()).as_str())],
        );

        let error = backend()
            .resolve_credential(&cluster, &OperationContext::new())
            .await
            .unwrap_err();

        assert!(matches!(error, StorageError::Connect { .. }));
        assert!(error.to_string().contains("401"), "{error}");
    }

    #[tokio::test]
    async fn invalid_clouds_yaml_is_malformed() {
        let cluster = FakeCluster::new(Platform::OpenStack, None).with_secret(
            CREDENTIALS_NAMESPACE,
            CREDENTIALS_SECRET,
            [(CREDENTIALS_KEY, "clouds: [")],
        );
        let error = backend()
            .resolve_credential(&cluster, &OperationContext::new())
            .await
            .unwrap_err();
        assert!(matches!(error, StorageError::CredentialMalformed { .. }));
    }

    #[tokio::test]
    async fn creates_missing_container() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/v1/AUTH_4f1d/logs-swift"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/AUTH_4f1d/logs-swift"))
            .and(header("x-auth-token", "gAAAAAB-token"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let store = store(&server, PAGE_SIZE);
        lifecycle::ensure_bucket(StorageType::Swift, &store, "logs-swift", &OperationContext::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn empties_container_by_marker() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/AUTH_4f1d/logs-swift"))
            .and(query_param("limit", "2"))
            .and(query_param_is_missing("marker"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "name": "index/a", "bytes": 10 },
                { "name": "index/b", "bytes": 12 }
            ])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/AUTH_4f1d/logs-swift"))
            .and(query_param("marker", "index/b"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "name": "index/c", "bytes": 3 }
            ])))
            .expect(1)
            .mount(&server)
            .await;
        for name in ["a", "b", "c"] {
            Mock::given(method("DELETE"))
                .and(path(format!("/v1/AUTH_4f1d/logs-swift/index/{name}")))
                .respond_with(ResponseTemplate::new(204))
                .expect(1)
                .mount(&server)
                .await;
        }

        let store = store(&server, 2);
        let deleted = lifecycle::empty_bucket(
            StorageType::Swift,
            &store,
            "logs-swift",
            &OperationContext::new(),
        )
        .await
        .unwrap();

        assert_eq!(deleted, 3);
    }

    #[tokio::test]
    async fn deleting_missing_container_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/AUTH_4f1d/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = store(&server, PAGE_SIZE);
        lifecycle::delete_bucket(StorageType::Swift, &store, "gone", &OperationContext::new())
            .await
            .unwrap();
    }
}
