use std::path::PathBuf;

use openssl::{
    error::ErrorStack,
    ssl::{ConnectConfiguration, SslConnector, SslConnectorBuilder, SslMethod, SslVerifyMode},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TlsError {
    #[snafu(display("Could not build TLS connector: {}", source))]
    TlsBuildConnector { source: ErrorStack },
    #[snafu(display("Could not load CA file {:?}: {}", path, source))]
    SetCaFile { path: PathBuf, source: ErrorStack },
}

/// Client TLS options.
///
/// Clusters used for validation usually serve self-signed certificates, which is why the
/// query client and the in-cluster S3 endpoints build this with verification turned off.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    /// Enables certificate verification. Defaults to `true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_certificate: Option<bool>,

    /// Enables hostname verification. Defaults to the value of `verify_certificate`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_hostname: Option<bool>,

    /// Absolute path to an additional CA certificate file, in PEM format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,
}

impl TlsConfig {
    pub fn insecure() -> Self {
        Self {
            verify_certificate: Some(false),
            verify_hostname: Some(false),
            ca_file: None,
        }
    }

    pub fn verify_certificate(&self) -> bool {
        self.verify_certificate.unwrap_or(true)
    }

    pub fn verify_hostname(&self) -> bool {
        self.verify_hostname
            .unwrap_or_else(|| self.verify_certificate())
    }

    pub(crate) fn apply_connect_configuration(&self, connection: &mut ConnectConfiguration) {
        connection.set_verify_hostname(self.verify_hostname());
    }
}

pub fn tls_connector_builder(config: &TlsConfig) -> Result<SslConnectorBuilder, TlsError> {
    let mut builder = SslConnector::builder(SslMethod::tls()).context(TlsBuildConnectorSnafu)?;

    if let Some(path) = &config.ca_file {
        builder
            .set_ca_file(path)
            .context(SetCaFileSnafu { path: path.clone() })?;
    }

    if config.verify_certificate() {
        builder.set_verify(SslVerifyMode::PEER);
    } else {
        warn!(
            message = "`verify_certificate` is DISABLED, this may lead to security vulnerabilities."
        );
        builder.set_verify(SslVerifyMode::NONE);
    }

    Ok(builder)
}
