//! Configuration providers.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};
use url::Url;

use crate::domain::Configuration;
use crate::{Error, Result};

/// Source of configuration documents.
#[async_trait]
pub trait ConfigurationProvider: Send + Sync + 'static {
    /// Fetch the latest configuration document.
    async fn fetch(&self) -> Result<Configuration>;

    /// Human-readable source, for logs.
    fn describe(&self) -> String;
}

fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate installed one first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Fetches the configuration as JSON over HTTP(S).
pub struct HttpConfigurationProvider {
    url: Url,
    client: reqwest::Client,
}

impl HttpConfigurationProvider {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| Error::config(format!("invalid configuration URL '{url}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "unsupported configuration URL scheme '{}'",
                url.scheme()
            )));
        }

        install_rustls_provider();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("signage/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { url, client })
    }
}

#[async_trait]
impl ConfigurationProvider for HttpConfigurationProvider {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<Configuration> {
        let response = self
            .client
            .get(self.url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?
            .error_for_status()?;
        let bytes = response.bytes().await?;
        debug!(bytes = bytes.len(), "configuration downloaded");
        Configuration::from_slice(&bytes)
    }

    fn describe(&self) -> String {
        self.url.to_string()
    }
}

/// Reads the configuration from a local JSON file.
pub struct FileConfigurationProvider {
    path: PathBuf,
}

impl FileConfigurationProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ConfigurationProvider for FileConfigurationProvider {
    async fn fetch(&self) -> Result<Configuration> {
        let bytes = tokio::fs::read(&self.path).await?;
        Configuration::from_slice(&bytes)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
