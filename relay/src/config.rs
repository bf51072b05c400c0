use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;
use url::Url;

pub const DEFAULT_UPSTREAM_URL: &str = "https://api.mailchannels.net/tx/v1/send";

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_KEY_STORE_TIMEOUT_SECS: u64 = 5;

const API_KEY_PREFIX: &str = "API_KEY_";
const DKIM_PRIVATE_KEY_PREFIX: &str = "DKIM_PRIVATE_KEY_";
const DKIM_SELECTOR_PREFIX: &str = "DKIM_SELECTOR_";
const DKIM_CHECK_VAR: &str = "DKIM_CHECK";

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Timeout cannot be 0")]
    InvalidTimeout,

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
}

/// Relay configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for sendmail traffic
    pub listener: Listener,
    /// Admin listener for health and metrics endpoints
    pub admin_listener: Listener,
    /// Mail provider that receives the built payloads
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// API key validation strategy
    pub auth: AuthConfig,
    /// Per-domain DKIM settings
    #[serde(default)]
    pub dkim: DkimConfig,
}

impl Config {
    /// Validates the relay configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        self.upstream.validate()?;

        if let AuthConfig::KeyStore {
            key_store: KeyStoreConfig::Http { url, timeout_secs },
        } = &self.auth
        {
            if *timeout_secs == 0 {
                return Err(ValidationError::InvalidTimeout);
            }
            check_scheme(url)?;
        }

        Ok(())
    }

    /// Fills in the settings that may come from process variables.
    ///
    /// When the environment strategy has no inline key list, keys are read from
    /// `API_KEY_1`, `API_KEY_2`, ... DKIM entries are merged from
    /// `DKIM_PRIVATE_KEY_<TOKEN>` / `DKIM_SELECTOR_<TOKEN>`, overriding inline values,
    /// and `DKIM_CHECK` overrides the enforcement flag.
    pub fn merge_environment<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();

        if let AuthConfig::Environment { keys: keys @ None } = &mut self.auth {
            *keys = Some(indexed_api_keys(|name| vars.get(name).cloned()));
        }

        self.dkim.merge_environment(&vars);
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    /// Validates the listener configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Mail provider configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct UpstreamConfig {
    /// Send endpoint of the provider
    #[serde(default = "default_upstream_url")]
    pub url: Url,
    /// Applies to the whole send, including reading the response body
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl UpstreamConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        check_scheme(&self.url)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        UpstreamConfig {
            url: default_upstream_url(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

fn default_upstream_url() -> Url {
    Url::parse(DEFAULT_UPSTREAM_URL).expect("default upstream url is valid")
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_key_store_timeout_secs() -> u64 {
    DEFAULT_KEY_STORE_TIMEOUT_SECS
}

fn check_scheme(url: &Url) -> Result<(), ValidationError> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ValidationError::UnsupportedScheme(other.to_string())),
    }
}

/// Which API key validation strategy is active for this deployment
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum AuthConfig {
    /// Static list of keys. `None` means the list is read from process variables.
    Environment {
        #[serde(default)]
        keys: Option<Vec<ApiKeyEntry>>,
    },
    /// Keys are looked up in an external key -> domain store.
    KeyStore { key_store: KeyStoreConfig },
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ApiKeyEntry {
    pub key: String,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum KeyStoreConfig {
    /// `GET <url>/<key>` returns the stored value, 404 when absent.
    Http {
        url: Url,
        /// Applies to each lookup, including reading the value
        #[serde(default = "default_key_store_timeout_secs")]
        timeout_secs: u64,
    },
    /// Inline key -> value map.
    Static {
        #[serde(default)]
        entries: HashMap<String, String>,
    },
}

/// Reads `API_KEY_<n>` starting at 1 until the first index without a value.
pub fn indexed_api_keys<F>(lookup: F) -> Vec<ApiKeyEntry>
where
    F: Fn(&str) -> Option<String>,
{
    let mut entries = Vec::new();

    for index in 1.. {
        let key = match lookup(&format!("{API_KEY_PREFIX}{index}")) {
            Some(key) if !key.is_empty() => key,
            _ => break,
        };
        let disabled =
            lookup(&format!("{API_KEY_PREFIX}{index}_DISABLED")).as_deref() == Some("true");

        entries.push(ApiKeyEntry { key, disabled });
    }

    entries
}

/// Normalizes a sending domain into the token DKIM settings are keyed by.
pub fn domain_token(domain: &str) -> String {
    domain.replace('.', "_").to_uppercase()
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct DkimConfig {
    /// When set, every send must have DKIM settings for its sender domain.
    #[serde(default)]
    pub enforce: bool,
    /// Keyed by domain token (`EXAMPLE_COM`); plain domains are accepted too.
    #[serde(default)]
    pub domains: HashMap<String, DkimEntry>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct DkimEntry {
    pub private_key: Option<String>,
    pub selector: Option<String>,
}

/// Complete DKIM settings for one domain.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DkimSettings<'a> {
    pub private_key: &'a str,
    pub selector: &'a str,
}

impl DkimConfig {
    /// Returns the settings for a sender domain, or `None` unless both the
    /// private key and the selector are configured and non-empty.
    pub fn resolve(&self, domain: &str) -> Option<DkimSettings<'_>> {
        let token = domain_token(domain);
        let entry = self
            .domains
            .get(&token)
            .or_else(|| self.domains.get(domain))?;

        match (entry.private_key.as_deref(), entry.selector.as_deref()) {
            (Some(private_key), Some(selector)) if !private_key.is_empty() && !selector.is_empty() => {
                Some(DkimSettings {
                    private_key,
                    selector,
                })
            }
            _ => None,
        }
    }

    fn merge_environment(&mut self, vars: &HashMap<String, String>) {
        let inline = std::mem::take(&mut self.domains);
        self.domains = inline
            .into_iter()
            .map(|(name, entry)| (domain_token(&name), entry))
            .collect();

        for (name, value) in vars {
            if let Some(token) = name.strip_prefix(DKIM_PRIVATE_KEY_PREFIX) {
                self.domains.entry(token.to_string()).or_default().private_key =
                    Some(value.clone());
            } else if let Some(token) = name.strip_prefix(DKIM_SELECTOR_PREFIX) {
                self.domains.entry(token.to_string()).or_default().selector = Some(value.clone());
            }
        }

        if let Some(check) = vars.get(DKIM_CHECK_VAR) {
            self.enforce = check == "true";
        }
    }
}
