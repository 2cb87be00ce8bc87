use std::net::IpAddr;

use headers::Authorization;
use http::uri::InvalidUri;
use hyper_proxy::{Custom, Intercept, Proxy, ProxyConnector};
use no_proxy::NoProxy;
use serde::{Deserialize, Serialize};
use url::Url;

// suggestion of standardization coming from https://about.gitlab.com/blog/2021/01/27/we-need-to-talk-no-proxy/
fn from_env(key: &str) -> Option<String> {
    // use lowercase first and the uppercase
    std::env::var(key.to_lowercase())
        .ok()
        .or_else(|| std::env::var(key.to_uppercase()).ok())
        .filter(|value| !value.is_empty())
}

fn is_loopback(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    host.eq_ignore_ascii_case("localhost")
        || host
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct NoProxyInterceptor {
    no_proxy: NoProxy,
    bypass_localhost: bool,
}

impl NoProxyInterceptor {
    fn intercept(self, expected_scheme: &'static str) -> Intercept {
        Intercept::Custom(Custom::from(
            move |scheme: Option<&str>, host: Option<&str>, port: Option<u16>| {
                if scheme.is_some() && scheme != Some(expected_scheme) {
                    return false;
                }
                let Some(host) = host else {
                    return true;
                };
                if self.bypass_localhost && is_loopback(host) {
                    return false;
                }
                let matches = self.no_proxy.matches(host)
                    || port.is_some_and(|port| self.no_proxy.matches(&format!("{host}:{port}")));
                // only intercept those that don't match
                !matches
            },
        ))
    }
}

/// How outgoing HTTP(S) traffic is routed through a proxy.
///
/// Every HTTP client in this crate takes a `ProxyPolicy` at construction. The process
/// environment is only read by [`ProxyPolicy::from_env`], so callers decide explicitly whether
/// ambient proxy settings apply.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProxyPolicy {
    /// Enables proxying support.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Proxy endpoint to use when proxying HTTP traffic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,

    /// Proxy endpoint to use when proxying HTTPS traffic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https: Option<String>,

    /// A list of hosts to avoid proxying.
    #[serde(default)]
    pub no_proxy: NoProxy,

    /// Never proxy requests to `localhost` or a loopback address.
    ///
    /// A port-forwarded service listening on `127.0.0.1` cannot be reached through a proxy
    /// running elsewhere.
    #[serde(default = "default_true")]
    pub bypass_localhost: bool,
}

const fn default_true() -> bool {
    true
}

impl Default for ProxyPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            http: None,
            https: None,
            no_proxy: NoProxy::default(),
            bypass_localhost: true,
        }
    }
}

impl ProxyPolicy {
    /// A policy that never proxies.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn from_env() -> Self {
        Self {
            http: from_env("HTTP_PROXY"),
            https: from_env("HTTPS_PROXY"),
            no_proxy: from_env("NO_PROXY").map(NoProxy::from).unwrap_or_default(),
            ..Default::default()
        }
    }

    /// Fills unset proxy endpoints of `self` from the process environment.
    #[must_use]
    pub fn merge_with_env(&self) -> Self {
        Self::from_env().merge(self)
    }

    // overrides current proxy configuration with other configuration
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let no_proxy = if other.no_proxy.is_empty() {
            self.no_proxy.clone()
        } else {
            other.no_proxy.clone()
        };

        Self {
            enabled: self.enabled && other.enabled,
            http: other.http.clone().or_else(|| self.http.clone()),
            https: other.https.clone().or_else(|| self.https.clone()),
            no_proxy,
            bypass_localhost: self.bypass_localhost && other.bypass_localhost,
        }
    }

    #[must_use]
    pub fn with_bypass_localhost(mut self, bypass_localhost: bool) -> Self {
        self.bypass_localhost = bypass_localhost;
        self
    }

    /// Whether a request to `host` would be sent through the proxy for `scheme`.
    pub fn applies_to(&self, scheme: &str, host: &str) -> bool {
        let endpoint = match scheme {
            "http" => &self.http,
            "https" => &self.https,
            _ => return false,
        };
        if !self.enabled || endpoint.is_none() {
            return false;
        }
        if self.bypass_localhost && is_loopback(host) {
            return false;
        }
        !self.no_proxy.matches(host)
    }

    fn interceptor(&self) -> NoProxyInterceptor {
        NoProxyInterceptor {
            no_proxy: self.no_proxy.clone(),
            bypass_localhost: self.bypass_localhost,
        }
    }

    fn build_proxy(
        &self,
        proxy_scheme: &'static str,
        proxy_url: &Option<String>,
    ) -> Result<Option<Proxy>, InvalidUri> {
        proxy_url
            .as_ref()
            .map(|url| {
                url.parse().map(|parsed| {
                    let mut proxy = Proxy::new(self.interceptor().intercept(proxy_scheme), parsed);
                    if let Ok(authority) = Url::parse(url)
                        && let Some(password) = authority.password()
                    {
                        proxy.set_authorization(Authorization::basic(
                            authority.username(),
                            password,
                        ));
                    }
                    proxy
                })
            })
            .transpose()
    }

    fn http_proxy(&self) -> Result<Option<Proxy>, InvalidUri> {
        self.build_proxy("http", &self.http)
    }

    fn https_proxy(&self) -> Result<Option<Proxy>, InvalidUri> {
        self.build_proxy("https", &self.https)
    }

    /// Install the proxies of this policy on the [`ProxyConnector<C>`].
    ///
    /// # Errors
    ///
    /// Function will error if a configured proxy endpoint is not a valid URI.
    pub fn configure<C>(&self, connector: &mut ProxyConnector<C>) -> Result<(), InvalidUri> {
        if self.enabled {
            if let Some(proxy) = self.http_proxy()? {
                connector.add_proxy(proxy);
            }
            if let Some(proxy) = self.https_proxy()? {
                connector.add_proxy(proxy);
            }
        }
        Ok(())
    }
}
