use std::{path::PathBuf, sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{HeaderMap, HeaderValue, Request, StatusCode};
use hyper::Body;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use snafu::{ResultExt, Snafu};
use url::Url;

use super::{
    query::{Direction, LABELS_PATH, QueryWindow, selector, tenant_path},
    response::{LabelResponse, QueryResult},
    retry::{Backoff, BackoffConfig},
};
use crate::{
    config::ProxyPolicy,
    http::{Auth, HttpClient, HttpError},
    internal_events::{
        LokiAttemptFailure, LokiQueryAttemptFailed, LokiQueryCompleted, LokiQueryRetriesExhausted,
        LokiQuerySent,
    },
    sensitive_string::SensitiveString,
    tls::TlsConfig,
};

pub const DEFAULT_RETRIES: usize = 5;

/// `limit` of the search helpers.
pub const SEARCH_LIMIT: u32 = 50;

const BASIC_AND_BEARER: &str = "at most one of HTTP basic auth (username/password), bearer-token & bearer-token-file is allowed to be configured";
const TOKEN_AND_TOKEN_FILE: &str =
    "at most one of the options bearer-token & bearer-token-file is allowed to be configured";

const NAMESPACE_LABEL: &str = "kubernetes_namespace_name";

// Same escaping as a single URL path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum QueryError {
    #[snafu(display("{}", message))]
    AuthConflict { message: &'static str },
    #[snafu(display("unable to read authorization credentials file {:?}: {}", path, source))]
    ReadTokenFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Invalid Loki endpoint {:?}: {}", endpoint, source))]
    InvalidEndpoint {
        endpoint: String,
        source: url::ParseError,
    },
    #[snafu(display("Invalid credentials: {}", source))]
    InvalidCredentials { source: HttpError },
    #[snafu(display("Invalid value for header {}: {}", name, source))]
    InvalidHeader {
        name: &'static str,
        source: http::header::InvalidHeaderValue,
    },
    #[snafu(display("{} is outside the range of nanosecond timestamps", time))]
    TimeOutOfRange { time: DateTime<Utc> },
    #[snafu(display("Failed to build HTTP client: {}", source))]
    BuildClient { source: HttpError },
    #[snafu(display("Failed to build request to {}: {}", url, source))]
    BuildRequest { url: String, source: http::Error },
    #[snafu(display("Request to {} failed: {}", url, source))]
    Request { url: String, source: HttpError },
    #[snafu(display("Ran out of attempts while querying the server: {} attempts to {}", attempts, url))]
    ExhaustedRetries { url: String, attempts: usize },
    #[snafu(display("Failed to decode response from {}: {}", url, source))]
    DecodeFailed {
        url: String,
        source: serde_json::Error,
    },
    #[snafu(display("Loki at {} is not ready: {}", url, status))]
    NotReady { url: String, status: StatusCode },
}

const fn default_retries() -> usize {
    DEFAULT_RETRIES
}

/// Connection and authentication settings of a [`LogQueryClient`].
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LokiClientConfig {
    /// Base address, e.g. the route of the LokiStack gateway.
    pub endpoint: String,

    /// Username for HTTP basic auth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<SensitiveString>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<SensitiveString>,

    /// File holding a bearer token. Read on every request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token_file: Option<PathBuf>,

    /// Sent as `X-Scope-OrgID`, for reaching tenant data without the gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,

    /// Sent as `X-Query-Tags`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_tags: Option<String>,

    /// How many times a failed query is retried.
    #[serde(default = "default_retries")]
    pub retries: usize,

    /// Bound on each attempt, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,

    #[serde(default)]
    pub backoff: BackoffConfig,

    /// When unset the process environment decides, see [`ProxyPolicy::from_env`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyPolicy>,
}

impl LokiClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: None,
            password: None,
            bearer_token: None,
            bearer_token_file: None,
            org_id: None,
            query_tags: None,
            retries: DEFAULT_RETRIES,
            request_timeout_secs: None,
            backoff: BackoffConfig::default(),
            proxy: None,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.is_empty())
}

fn unix_nanos(time: DateTime<Utc>) -> Result<String, QueryError> {
    time.timestamp_nanos_opt()
        .map(|nanos| nanos.to_string())
        .ok_or(QueryError::TimeOutOfRange { time })
}

/// Client of the Loki query API.
///
/// Certificates are not verified: the client targets cluster routes signed by the cluster CA.
#[derive(Clone, Debug)]
pub struct LogQueryClient {
    config: LokiClientConfig,
    endpoint: Url,
    client: HttpClient,
    backoff: Arc<dyn Backoff>,
    timeout: Option<Duration>,
    start_time: DateTime<Utc>,
}

impl LogQueryClient {
    pub fn new(endpoint: &str) -> Result<Self, QueryError> {
        Self::from_config(LokiClientConfig::new(endpoint))
    }

    pub fn from_config(config: LokiClientConfig) -> Result<Self, QueryError> {
        let endpoint = Url::parse(&config.endpoint).context(InvalidEndpointSnafu {
            endpoint: config.endpoint.clone(),
        })?;
        let proxy = config.proxy.clone().unwrap_or_else(ProxyPolicy::from_env);
        let client = HttpClient::new(&TlsConfig::insecure(), &proxy).context(BuildClientSnafu)?;

        Ok(Self {
            backoff: config.backoff.build(),
            timeout: config.request_timeout_secs.map(Duration::from_secs),
            config,
            endpoint,
            client,
            start_time: Utc::now(),
        })
    }

    pub fn config(&self) -> &LokiClientConfig {
        &self.config
    }

    #[must_use]
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.config.retries = retries;
        self
    }

    #[must_use]
    pub fn with_basic_auth(mut self, username: &str, password: &str) -> Self {
        self.config.username = Some(username.to_owned());
        self.config.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.config.bearer_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_token_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.bearer_token_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_org_id(mut self, org_id: &str) -> Self {
        self.config.org_id = Some(org_id.to_owned());
        self
    }

    #[must_use]
    pub fn with_query_tags(mut self, tags: &str) -> Self {
        self.config.query_tags = Some(tags.to_owned());
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Arc<dyn Backoff>) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Start of the window searched by [`LogQueryClient::search_logs`]. Defaults to the time
    /// the client was created.
    #[must_use]
    pub fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = start_time;
        self
    }

    async fn auth(&self) -> Result<Option<Auth>, QueryError> {
        let username = non_empty(&self.config.username);
        let password = self
            .config
            .password
            .as_ref()
            .filter(|password| !password.is_empty());
        let token = self
            .config
            .bearer_token
            .as_ref()
            .filter(|token| !token.is_empty());
        let token_file = self
            .config
            .bearer_token_file
            .as_ref()
            .filter(|path| !path.as_os_str().is_empty());

        if (username.is_some() || password.is_some()) && (token.is_some() || token_file.is_some()) {
            return AuthConflictSnafu {
                message: BASIC_AND_BEARER,
            }
            .fail();
        }
        if token.is_some() && token_file.is_some() {
            return AuthConflictSnafu {
                message: TOKEN_AND_TOKEN_FILE,
            }
            .fail();
        }

        if let Some(token) = token {
            return Ok(Some(Auth::Bearer {
                token: token.clone(),
            }));
        }
        if let Some(path) = token_file {
            let token = tokio::fs::read_to_string(path)
                .await
                .context(ReadTokenFileSnafu { path: path.clone() })?;
            return Ok(Some(Auth::Bearer {
                token: token.trim().into(),
            }));
        }
        Ok(match (username, password) {
            (Some(user), Some(password)) => Some(Auth::Basic {
                user: user.to_owned(),
                password: password.clone(),
            }),
            _ => None,
        })
    }

    async fn headers(&self) -> Result<HeaderMap, QueryError> {
        let mut headers = HeaderMap::new();
        if let Some(auth) = self.auth().await? {
            auth.apply_headers_map(&mut headers)
                .context(InvalidCredentialsSnafu)?;
        }
        for (name, value) in [
            ("X-Scope-OrgID", non_empty(&self.config.org_id)),
            ("X-Query-Tags", non_empty(&self.config.query_tags)),
        ] {
            if let Some(value) = value {
                headers.insert(
                    name,
                    HeaderValue::from_str(value).context(InvalidHeaderSnafu { name })?,
                );
            }
        }
        Ok(headers)
    }

    /// Joins `path` onto the base path of the endpoint.
    fn url(&self, path: &str, params: &[(&str, String)]) -> Url {
        let mut url = self.endpoint.clone();
        let joined = format!("{}{}", url.path().trim_end_matches('/'), path);
        url.set_path(&joined);
        url.set_query(None);
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        url
    }

    fn request(&self, url: &Url, headers: &HeaderMap) -> Result<Request<Body>, QueryError> {
        let mut request = Request::get(url.as_str())
            .body(Body::empty())
            .context(BuildRequestSnafu { url: url.as_str() })?;
        request.headers_mut().extend(headers.clone());
        Ok(request)
    }

    async fn attempt(&self, request: Request<Body>) -> crate::Result<(StatusCode, Bytes)> {
        let response = self.client.send(request).await?;
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body()).await?;
        Ok((status, body))
    }

    /// GETs `path` until a 2xx response arrives or the attempts run out, then decodes the body.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, QueryError> {
        let url = self.url(path, params);
        let headers = self.headers().await?;
        let attempts = self.config.retries.saturating_add(1);

        emit!(LokiQuerySent { url: url.as_str() });
        for attempt in 1..=attempts {
            let remaining = attempts - attempt;
            let request = self.request(&url, &headers)?;
            let outcome = match self.timeout {
                Some(timeout) => tokio::time::timeout(timeout, self.attempt(request))
                    .await
                    .ok(),
                None => Some(self.attempt(request).await),
            };

            let failure_body;
            let failure = match &outcome {
                Some(Ok((status, body))) if status.is_success() => {
                    let decoded = serde_json::from_slice(body)
                        .context(DecodeFailedSnafu { url: url.as_str() })?;
                    emit!(LokiQueryCompleted {
                        url: url.as_str(),
                        attempts: attempt,
                    });
                    return Ok(decoded);
                }
                Some(Ok((status, body))) => {
                    failure_body = String::from_utf8_lossy(body);
                    LokiAttemptFailure::Status {
                        status: *status,
                        body: &failure_body,
                    }
                }
                Some(Err(error)) => LokiAttemptFailure::Transport(&**error),
                None => LokiAttemptFailure::TimedOut(self.timeout.unwrap_or_default()),
            };
            emit!(LokiQueryAttemptFailed {
                url: url.as_str(),
                attempt,
                remaining,
                failure,
            });

            if remaining > 0 {
                let delay = self.backoff.delay(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        emit!(LokiQueryRetriesExhausted {
            url: url.as_str(),
            attempts,
        });
        ExhaustedRetriesSnafu {
            url: url.as_str(),
            attempts,
        }
        .fail()
    }

    /// Runs a `query_range` request over `window`.
    pub async fn query_range(&self, window: &QueryWindow) -> Result<QueryResult, QueryError> {
        let params = [
            ("query", window.query.clone()),
            ("limit", window.limit.to_string()),
            ("start", unix_nanos(window.start)?),
            ("end", unix_nanos(window.end)?),
            ("direction", window.direction.as_str().to_owned()),
        ];
        self.get_json(&window.path(), &params).await
    }

    /// The latest lines matching `query`, newest first, since the client start time.
    pub async fn search_logs(&self, log_type: &str, query: &str) -> Result<QueryResult, QueryError> {
        let window = QueryWindow::new(query, self.start_time, Utc::now())
            .log_type(log_type)
            .limit(SEARCH_LIMIT)
            .direction(Direction::Backward);
        self.query_range(&window).await
    }

    pub async fn search_by_key(
        &self,
        log_type: &str,
        key: &str,
        value: &str,
    ) -> Result<QueryResult, QueryError> {
        self.search_logs(log_type, &selector(key, value)).await
    }

    pub async fn search_by_namespace(
        &self,
        log_type: &str,
        namespace: &str,
    ) -> Result<QueryResult, QueryError> {
        self.search_by_key(log_type, NAMESPACE_LABEL, namespace)
            .await
    }

    pub async fn list_label_names(
        &self,
        log_type: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<LabelResponse, QueryError> {
        let params = [("start", unix_nanos(start)?), ("end", unix_nanos(end)?)];
        self.get_json(&tenant_path(Some(log_type), LABELS_PATH), &params)
            .await
    }

    pub async fn list_label_values(
        &self,
        log_type: &str,
        name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<LabelResponse, QueryError> {
        let path = format!(
            "/loki/api/v1/label/{}/values",
            utf8_percent_encode(name, PATH_SEGMENT)
        );
        let params = [("start", unix_nanos(start)?), ("end", unix_nanos(end)?)];
        self.get_json(&tenant_path(Some(log_type), &path), &params)
            .await
    }

    async fn status(&self, url: &Url) -> Result<StatusCode, QueryError> {
        let request = self.request(url, &self.headers().await?)?;
        let response = self
            .client
            .send(request)
            .await
            .context(RequestSnafu { url: url.as_str() })?;
        Ok(response.status())
    }

    /// Checks `/ready`, falling back to the base address when the endpoint does not exist.
    pub async fn ready(&self) -> Result<(), QueryError> {
        let ready = self.url("/ready", &[]);
        let (url, status) = match self.status(&ready).await? {
            StatusCode::NOT_FOUND => {
                warn!(message = "Endpoint `/ready` not found, checking the base address instead.");
                (self.endpoint.clone(), self.status(&self.endpoint).await?)
            }
            status => (ready, status),
        };

        match status {
            StatusCode::OK => Ok(()),
            status => NotReadySnafu {
                url: url.as_str(),
                status,
            }
            .fail(),
        }
    }
}
