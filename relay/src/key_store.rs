use crate::config::KeyStoreConfig;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum KeyStoreError {
    #[error("HTTP client error: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("unexpected status {0} from key store")]
    UnexpectedStatus(StatusCode),
    #[error("key store url cannot take a path: {0}")]
    InvalidUrl(Url),
}

/// Read-only view of an external API key store.
///
/// Values are either the sending domain bound to the key or the literal
/// `disabled`. A key that was never stored yields `None`.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KeyStoreError>;
}

pub fn from_config(config: &KeyStoreConfig) -> Arc<dyn KeyStore> {
    match config {
        KeyStoreConfig::Http { url, timeout_secs } => Arc::new(HttpKeyStore::new(
            url.clone(),
            Duration::from_secs(*timeout_secs),
        )),
        KeyStoreConfig::Static { entries } => Arc::new(StaticKeyStore::new(entries.clone())),
    }
}

/// Key store reached over HTTP: `GET <base_url>/<key>`.
pub struct HttpKeyStore {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpKeyStore {
    pub fn new(base_url: Url, timeout: Duration) -> Self {
        HttpKeyStore {
            client: reqwest::Client::new(),
            base_url,
            timeout,
        }
    }

    fn key_url(&self, key: &str) -> Result<Url, KeyStoreError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| KeyStoreError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .push(key);
        Ok(url)
    }
}

#[async_trait]
impl KeyStore for HttpKeyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KeyStoreError> {
        // Dot segments are resolved away by the URL and would address the base itself.
        if key == "." || key == ".." {
            return Ok(None);
        }

        let response = self
            .client
            .get(self.key_url(key)?)
            .timeout(self.timeout)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(Some(response.text().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(KeyStoreError::UnexpectedStatus(status)),
        }
    }
}

/// Key store held in memory, filled from configuration.
pub struct StaticKeyStore {
    entries: HashMap<String, String>,
}

impl StaticKeyStore {
    pub fn new(entries: HashMap<String, String>) -> Self {
        StaticKeyStore { entries }
    }
}

#[async_trait]
impl KeyStore for StaticKeyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KeyStoreError> {
        Ok(self.entries.get(key).cloned())
    }
}
