use std::{fmt, time::Instant};

use futures::future::BoxFuture;
use headers::{Authorization, HeaderMapExt};
use http::{HeaderMap, Request, Response, header::HeaderValue, uri::InvalidUri};
use hyper::{
    body::Body,
    client::{Client, HttpConnector},
};
use hyper_openssl::HttpsConnector;
use hyper_proxy::ProxyConnector;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use tracing::Span;
use tracing_futures::Instrument;

use crate::{
    config::ProxyPolicy,
    internal_events::{AboutToSendHttpRequest, GotHttpError, GotHttpResponse},
    sensitive_string::SensitiveString,
    tls::{TlsConfig, TlsError, tls_connector_builder},
};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HttpError {
    #[snafu(display("Failed to build TLS connector: {}", source))]
    BuildTlsConnector { source: TlsError },
    #[snafu(display("Failed to build HTTPS connector: {}", source))]
    MakeHttpsConnector { source: openssl::error::ErrorStack },
    #[snafu(display("Failed to build proxy connector: {}", source))]
    BuildProxyConnector { source: std::io::Error },
    #[snafu(display("Failed to configure proxy: {}", source))]
    MakeProxyConnector { source: InvalidUri },
    #[snafu(display("Failed to make HTTP(S) request: {}", source))]
    CallRequest { source: hyper::Error },
    #[snafu(display("Failed to build HTTP request: {}", source))]
    BuildRequest { source: http::Error },
    #[snafu(display("Bearer token is not a valid header value"))]
    InvalidBearerToken,
}

pub type HttpsProxyConnector = ProxyConnector<HttpsConnector<HttpConnector>>;

/// HTTP(S) client honouring an explicit TLS configuration and proxy policy.
pub struct HttpClient {
    client: Client<HttpsProxyConnector, Body>,
    span: Span,
    user_agent: HeaderValue,
}

impl HttpClient {
    pub fn new(tls: &TlsConfig, proxy: &ProxyPolicy) -> Result<HttpClient, HttpError> {
        Self::new_with_user_agent(tls, proxy, HeaderValue::from_static(crate::USER_AGENT))
    }

    pub fn new_with_user_agent(
        tls: &TlsConfig,
        proxy: &ProxyPolicy,
        user_agent: HeaderValue,
    ) -> Result<HttpClient, HttpError> {
        let proxy_connector = build_proxy_connector(tls, proxy)?;
        let client = Client::builder().build(proxy_connector);

        let span = tracing::info_span!("http");

        Ok(HttpClient {
            client,
            span,
            user_agent,
        })
    }

    pub fn send(
        &self,
        mut request: Request<Body>,
    ) -> BoxFuture<'static, Result<Response<Body>, HttpError>> {
        let _enter = self.span.enter();

        default_request_headers(&mut request, &self.user_agent);

        emit!(AboutToSendHttpRequest { request: &request });

        let response = self.client.request(request);

        let fut = async move {
            // Capture the time right before we issue the request.
            // Request doesn't start the processing until we start polling it.
            let before = Instant::now();

            let response_result = response.await;

            let roundtrip = before.elapsed();

            let response = response_result
                .inspect_err(|error| {
                    emit!(GotHttpError { error, roundtrip });
                })
                .context(CallRequestSnafu)?;

            emit!(GotHttpResponse {
                response: &response,
                roundtrip
            });
            Ok(response)
        }
        .instrument(self.span.clone());

        Box::pin(fut)
    }
}

/// Builds the HTTPS connector used both directly and underneath the proxy connector.
pub fn build_tls_connector(tls: &TlsConfig) -> Result<HttpsConnector<HttpConnector>, HttpError> {
    let mut http = HttpConnector::new();
    http.enforce_http(false);

    let builder = tls_connector_builder(tls).context(BuildTlsConnectorSnafu)?;
    let mut https = HttpsConnector::with_connector(http, builder).context(MakeHttpsConnectorSnafu)?;

    let settings = tls.clone();
    https.set_callback(move |c, _uri| {
        settings.apply_connect_configuration(c);
        Ok(())
    });

    Ok(https)
}

/// Builds a connector that routes requests through the proxies of `proxy`, if any.
///
/// The proxy connector gets its own TLS connector built from `tls` so that tunnelled
/// connections follow the same verification rules as direct ones.
pub fn build_proxy_connector(
    tls: &TlsConfig,
    proxy: &ProxyPolicy,
) -> Result<HttpsProxyConnector, HttpError> {
    let tunnel_tls = tls_connector_builder(tls)
        .context(BuildTlsConnectorSnafu)?
        .build();
    let https = build_tls_connector(tls)?;
    let mut connector = ProxyConnector::new(https).context(BuildProxyConnectorSnafu)?;
    connector.set_tls(Some(tunnel_tls));
    proxy
        .configure(&mut connector)
        .context(MakeProxyConnectorSnafu)?;
    Ok(connector)
}

fn default_request_headers<B>(request: &mut Request<B>, user_agent: &HeaderValue) {
    if !request.headers().contains_key("User-Agent") {
        request
            .headers_mut()
            .insert("User-Agent", user_agent.clone());
    }

    if !request.headers().contains_key("Accept-Encoding") {
        // compressed responses are not supported
        request
            .headers_mut()
            .insert("Accept-Encoding", HeaderValue::from_static("identity"));
    }
}

impl Clone for HttpClient {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            span: self.span.clone(),
            user_agent: self.user_agent.clone(),
        }
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("client", &self.client)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

/// Credentials attached to outgoing requests.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "snake_case", tag = "strategy")]
pub enum Auth {
    Basic {
        user: String,
        password: SensitiveString,
    },
    Bearer {
        token: SensitiveString,
    },
}

impl Auth {
    /// Sets the `Authorization` header. A bearer token that cannot be sent as a header value
    /// is an error rather than a request without credentials.
    pub fn apply_headers_map(&self, map: &mut HeaderMap) -> Result<(), HttpError> {
        match &self {
            Auth::Basic { user, password } => {
                map.typed_insert(Authorization::basic(user, password.inner()));
            }
            Auth::Bearer { token } => {
                let auth = Authorization::bearer(token.inner())
                    .map_err(|_| HttpError::InvalidBearerToken)?;
                map.typed_insert(auth);
            }
        }
        Ok(())
    }
}
