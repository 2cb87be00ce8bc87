use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use snafu::{ResultExt, Snafu};

pub mod format;
mod proxy;

pub use format::Format;
pub use proxy::ProxyPolicy;

use crate::{storage::azure::AzureCredentialSource, tls::TlsConfig};

pub const DEFAULT_MINIO_NAMESPACE: &str = "minio-aosqe";

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("Could not read config file {:?}: {}", path, source))]
    ReadFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Unknown config format for {:?}, expected .toml, .yaml or .json", path))]
    UnknownFormat { path: std::path::PathBuf },
    #[snafu(display("Could not parse {} config {:?}: {}", format, path, message))]
    Parse {
        path: std::path::PathBuf,
        format: Format,
        message: String,
    },
}

/// Settings shared by every backend the provisioner drives.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProvisionerConfig {
    /// Proxy used to reach object storage endpoints.
    ///
    /// When unset the process environment decides, see [`ProxyPolicy::from_env`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyPolicy>,

    /// TLS options for cloud provider endpoints. In-cluster S3 endpoints (ODF, MinIO) are
    /// always reached without certificate verification.
    #[serde(default)]
    pub tls: TlsConfig,

    /// Namespace the MinIO deployment lives in.
    #[serde(default = "default_minio_namespace")]
    pub minio_namespace: String,

    /// Where Azure storage account credentials come from.
    #[serde(default)]
    pub azure: AzureCredentialSource,

    /// Overrides the Google Cloud Storage JSON API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcs_endpoint: Option<String>,

    /// Upper bound, in seconds, for a single provisioning or teardown run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_minio_namespace() -> String {
    DEFAULT_MINIO_NAMESPACE.to_owned()
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            tls: TlsConfig::default(),
            minio_namespace: default_minio_namespace(),
            azure: AzureCredentialSource::default(),
            gcs_endpoint: None,
            timeout_secs: None,
        }
    }
}

impl ProvisionerConfig {
    pub fn proxy(&self) -> ProxyPolicy {
        match &self.proxy {
            Some(proxy) => proxy.clone(),
            None => ProxyPolicy::from_env(),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Loads a config file, choosing the format from the file extension.
pub fn load_from_path<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();
    let format = Format::from_path(path).map_err(|_| ConfigError::UnknownFormat {
        path: path.to_owned(),
    })?;
    let content = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
    format::deserialize(&content, format).map_err(|message| ConfigError::Parse {
        path: path.to_owned(),
        format,
        message,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults() {
        let config: ProvisionerConfig = toml::from_str("").unwrap();
        assert_eq!(config, ProvisionerConfig::default());
        assert_eq!(config.minio_namespace, DEFAULT_MINIO_NAMESPACE);
        assert!(config.timeout().is_none());
    }

    #[test]
    fn rejects_unknown_fields() {
        let result = toml::from_str::<ProvisionerConfig>("bucket_prefix = \"loki\"");
        assert!(result.is_err());
    }

    #[test]
    fn loads_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "minio_namespace: minio-test\ntimeout_secs: 300\nproxy:\n  enabled: false"
        )
        .unwrap();

        let config: ProvisionerConfig = load_from_path(file.path()).unwrap();
        assert_eq!(config.minio_namespace, "minio-test");
        assert_eq!(config.timeout(), Some(Duration::from_secs(300)));
        assert!(!config.proxy().enabled);
    }

    #[test]
    fn unknown_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        let result = load_from_path::<ProvisionerConfig>(file.path());
        assert!(matches!(result, Err(ConfigError::UnknownFormat { .. })));
    }
}
